use super::PublishedRecord;
use redis::{Client, Connection, Pipeline};
use std::collections::BTreeMap;
use thiserror::Error;
use toolrec::ExternalId;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A key-value store that holds ordered lists with an expiry
pub trait ListSink {
    /// Replaces each record's list and sets its expiry. An empty list only deletes the key.
    fn write_batch(&mut self, batch: &[PublishedRecord], ttl: u64) -> Result<(), SinkError>;
}

/// Writes each batch as one atomic redis pipeline
pub struct RedisSink {
    connection: Connection,
}

impl RedisSink {
    pub fn connect(url: &str) -> Result<RedisSink, SinkError> {
        let client = Client::open(url)?;
        let connection = client.get_connection()?;
        debug!("Connected to redis at {}", url);

        Ok(RedisSink { connection })
    }

    fn queue(pipe: &mut Pipeline, record: &PublishedRecord, ttl: u64) {
        pipe.del(&record.key).ignore();
        if record.items.is_empty() {
            return;
        }

        let push = pipe.cmd("RPUSH").arg(&record.key);
        // Integer ids go out as integers so readers get the same type back
        for item in &record.items {
            match item {
                ExternalId::Int(value) => push.arg(*value),
                ExternalId::Text(value) => push.arg(value.as_str()),
            };
        }
        push.ignore();

        pipe.expire(&record.key, i64::try_from(ttl).unwrap_or(i64::MAX))
            .ignore();
    }
}

impl ListSink for RedisSink {
    fn write_batch(&mut self, batch: &[PublishedRecord], ttl: u64) -> Result<(), SinkError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for record in batch {
            RedisSink::queue(&mut pipe, record, ttl);
        }

        pipe.query::<()>(&mut self.connection)?;
        Ok(())
    }
}

/// In-process sink, used for dry runs and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lists: BTreeMap<String, (Vec<ExternalId>, u64)>,
    round_trips: usize,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn get(&self, key: &str) -> Option<&[ExternalId]> {
        self.lists.get(key).map(|(items, _)| items.as_slice())
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.lists.get(key).map(|(_, ttl)| *ttl)
    }

    /// Number of keys currently holding a list
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    pub fn lists(&self) -> impl Iterator<Item = (&str, &[ExternalId])> + '_ {
        self.lists
            .iter()
            .map(|(key, (items, _))| (key.as_str(), items.as_slice()))
    }

    pub fn into_lists(self) -> BTreeMap<String, Vec<ExternalId>> {
        self.lists
            .into_iter()
            .map(|(key, (items, _))| (key, items))
            .collect()
    }
}

impl ListSink for MemorySink {
    fn write_batch(&mut self, batch: &[PublishedRecord], ttl: u64) -> Result<(), SinkError> {
        self.round_trips += 1;
        for record in batch {
            self.lists.remove(&record.key);
            if !record.items.is_empty() {
                self.lists
                    .insert(record.key.clone(), (record.items.clone(), ttl));
            }
        }
        Ok(())
    }
}
