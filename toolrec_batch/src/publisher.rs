mod sink;

use crate::{
    ranking::{ids_only, RankedList},
    recommender::PublishOptions,
};
use thiserror::Error;
use toolrec::{ExternalId, SinkKeys};
use tracing::{error, info};

pub use sink::{ListSink, MemorySink, RedisSink, SinkError};

/// A ranked list reduced to its ids, under the key it is published at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub key: String,
    pub items: Vec<ExternalId>,
}

/// Every ranked output of one run, entities in ascending id order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationSet {
    pub history: Vec<(ExternalId, RankedList)>,
    pub discovery: Vec<(ExternalId, RankedList)>,
    pub related: Vec<(ExternalId, RankedList)>,
    pub popular: RankedList,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not reach the sink: {0}")]
    Connect(#[source] SinkError),
    #[error(
        "sink write failed after {written} of {total} batches, published lists are stale until the whole publication is retried"
    )]
    Incomplete {
        written: usize,
        total: usize,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub records: usize,
    pub batches: usize,
}

/// Turns ranked lists into keyed records and writes them to a sink in batches
pub struct Publisher {
    keys: SinkKeys,
    expire_seconds: u64,
    batch_size: usize,
}

impl Publisher {
    pub fn new(options: &PublishOptions) -> Publisher {
        Publisher {
            keys: SinkKeys::with_prefix(options.key_prefix.clone()),
            expire_seconds: options.expire_seconds,
            batch_size: options.batch_size.max(1),
        }
    }

    /// Popular first, then history and discovery per user, then related per item
    pub fn to_records(&self, set: &RecommendationSet) -> Vec<PublishedRecord> {
        let mut records =
            Vec::with_capacity(1 + set.history.len() + set.discovery.len() + set.related.len());

        records.push(PublishedRecord {
            key: self.keys.popular(),
            items: ids_only(&set.popular),
        });

        for (user, list) in &set.history {
            records.push(PublishedRecord {
                key: self.keys.history(user),
                items: ids_only(list),
            });
        }

        for (user, list) in &set.discovery {
            records.push(PublishedRecord {
                key: self.keys.discovery(user),
                items: ids_only(list),
            });
        }

        for (item, list) in &set.related {
            records.push(PublishedRecord {
                key: self.keys.related(item),
                items: ids_only(list),
            });
        }

        records
    }

    pub fn publish<S>(&self, set: &RecommendationSet, sink: &mut S) -> Result<PublishSummary, PublishError>
    where
        S: ListSink + ?Sized,
    {
        let records = self.to_records(set);
        let total = records.len().div_ceil(self.batch_size);

        info!(
            "Publishing {} lists in {} batches (expiry {}s)",
            records.len(),
            total,
            self.expire_seconds
        );

        for (written, batch) in records.chunks(self.batch_size).enumerate() {
            if let Err(source) = sink.write_batch(batch, self.expire_seconds) {
                error!("Sink write failed on batch {} of {}", written + 1, total);
                return Err(PublishError::Incomplete {
                    written,
                    total,
                    source,
                });
            }
        }

        info!("Publication complete");

        Ok(PublishSummary {
            records: records.len(),
            batches: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::Scored;

    struct FailingSink {
        accepted: usize,
        calls: usize,
    }

    impl ListSink for FailingSink {
        fn write_batch(&mut self, _batch: &[PublishedRecord], _ttl: u64) -> Result<(), SinkError> {
            self.calls += 1;
            if self.calls > self.accepted {
                return Err(SinkError::Unavailable(String::from("connection reset")));
            }
            Ok(())
        }
    }

    fn list(ids: &[i64]) -> RankedList {
        ids.iter()
            .enumerate()
            .map(|(rank, id)| Scored {
                id: ExternalId::Int(*id),
                score: 1.0 / (rank + 1) as f64,
            })
            .collect()
    }

    fn sample_set() -> RecommendationSet {
        RecommendationSet {
            history: vec![(ExternalId::Int(1), list(&[10, 11])), (ExternalId::Int(2), list(&[]))],
            discovery: vec![(ExternalId::Int(1), list(&[12])), (ExternalId::Int(2), list(&[10]))],
            related: vec![(ExternalId::Int(10), list(&[11, 12]))],
            popular: list(&[10, 12, 11]),
        }
    }

    #[test]
    fn records_use_the_key_layout() {
        let publisher = Publisher::new(&PublishOptions::new());
        let records = publisher.to_records(&sample_set());

        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "rec:sys:global:popular",
                "rec:sys:user:1:history",
                "rec:sys:user:2:history",
                "rec:sys:user:1:discovery",
                "rec:sys:user:2:discovery",
                "rec:sys:item:10:related",
            ]
        );
        assert_eq!(
            records[0].items,
            vec![ExternalId::Int(10), ExternalId::Int(12), ExternalId::Int(11)]
        );
    }

    #[test]
    fn publishes_in_batches() {
        let mut options = PublishOptions::new();
        options.batch_size = 4;
        options.expire_seconds = 60;
        let publisher = Publisher::new(&options);
        let mut sink = MemorySink::new();

        let summary = publisher.publish(&sample_set(), &mut sink).unwrap();
        assert_eq!(summary, PublishSummary { records: 6, batches: 2 });
        assert_eq!(sink.round_trips(), 2);
        assert_eq!(
            sink.get("rec:sys:user:1:history"),
            Some(&[ExternalId::Int(10), ExternalId::Int(11)][..])
        );
        assert_eq!(sink.ttl("rec:sys:user:1:history"), Some(60));
        // An empty list leaves no key behind
        assert_eq!(sink.get("rec:sys:user:2:history"), None);
    }

    #[test]
    fn republishing_converges() {
        let publisher = Publisher::new(&PublishOptions::new());
        let mut sink = MemorySink::new();

        publisher.publish(&sample_set(), &mut sink).unwrap();
        let first = sink.clone();
        publisher.publish(&sample_set(), &mut sink).unwrap();
        assert_eq!(sink.into_lists(), first.into_lists());
    }

    #[test]
    fn failure_is_reported_as_incomplete() {
        let mut options = PublishOptions::new();
        options.batch_size = 2;
        let publisher = Publisher::new(&options);
        let mut sink = FailingSink {
            accepted: 1,
            calls: 0,
        };

        match publisher.publish(&sample_set(), &mut sink) {
            Err(PublishError::Incomplete { written, total, .. }) => {
                assert_eq!(written, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected an incomplete publication, got {:?}", other),
        }
        assert_eq!(sink.calls, 2);
    }

    #[test]
    fn custom_prefix_reaches_the_keys() {
        let mut options = PublishOptions::new();
        options.key_prefix = "staging:".into();
        let records = Publisher::new(&options).to_records(&RecommendationSet::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "staging:global:popular");
        assert!(records[0].items.is_empty());
    }
}
