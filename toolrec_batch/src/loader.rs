use crate::{
    matrix::{Cell, InteractionMatrix},
    recommender::DecayOptions,
};
use chrono::{DateTime, Duration, Utc};
use polars::datatypes::{PlHashMap, PlHashSet};
use std::collections::BTreeSet;
use thiserror::Error;
use toolrec::ExternalId;
use tracing::{info, warn};

/// A record as it comes out of the record source. Any field may be missing
#[derive(Debug, Clone, PartialEq)]
pub struct RawInteraction {
    pub user_id: Option<ExternalId>,
    pub item_id: Option<ExternalId>,
    pub event_time: Option<DateTime<Utc>>,
    /// Number of interactions the record stands for. Missing means one
    pub count: Option<i64>,
}

impl RawInteraction {
    /// A complete record for a single interaction
    pub fn new(
        user_id: impl Into<ExternalId>,
        item_id: impl Into<ExternalId>,
        event_time: DateTime<Utc>,
    ) -> RawInteraction {
        RawInteraction {
            user_id: Some(user_id.into()),
            item_id: Some(item_id.into()),
            event_time: Some(event_time),
            count: None,
        }
    }

    pub fn with_count(mut self, count: i64) -> RawInteraction {
        self.count = Some(count);
        self
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("record {index} has no {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("record {index} happened at {event_time}, after the reference instant {reference}")]
    FutureEvent {
        index: usize,
        event_time: DateTime<Utc>,
        reference: DateTime<Utc>,
    },
    #[error("record {index} has count {count}, counts must be positive")]
    InvalidCount { index: usize, count: i64 },
    #[error("record {index} has text {field} \"{id}\", spelled the same as an integer id of the snapshot")]
    CollidingId {
        index: usize,
        field: &'static str,
        id: String,
    },
}

/// Bijection between external ids and matrix indices for one run.
///
/// Indices follow ascending id order, so comparing indices compares ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdMap {
    to_index: PlHashMap<ExternalId, usize>,
    to_id: Vec<ExternalId>,
}

impl IdMap {
    /// `ids` must already be sorted and unique
    fn from_sorted(ids: Vec<ExternalId>) -> IdMap {
        let mut to_index = PlHashMap::with_capacity_and_hasher(ids.len(), Default::default());
        for (index, id) in ids.iter().enumerate() {
            to_index.insert(id.clone(), index);
        }

        IdMap {
            to_index,
            to_id: ids,
        }
    }

    pub fn index_of(&self, id: &ExternalId) -> Option<usize> {
        self.to_index.get(id).copied()
    }

    pub fn id_of(&self, index: usize) -> Option<&ExternalId> {
        self.to_id.get(index)
    }

    pub fn len(&self) -> usize {
        self.to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_id.is_empty()
    }

    /// Ids in index order
    pub fn ids(&self) -> &[ExternalId] {
        &self.to_id
    }
}

impl FromIterator<ExternalId> for IdMap {
    fn from_iter<T: IntoIterator<Item = ExternalId>>(iter: T) -> Self {
        let unique: BTreeSet<_> = iter.into_iter().collect();
        IdMap::from_sorted(unique.into_iter().collect())
    }
}

/// What happened to the records of one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub read: usize,
    pub accepted: usize,
    pub malformed: usize,
    pub outside_window: usize,
}

/// The matrix and the id mappings built from one snapshot of records
#[derive(Debug, Clone, Default)]
pub struct LoadedInteractions {
    pub matrix: InteractionMatrix,
    pub users: IdMap,
    pub items: IdMap,
    pub report: LoadReport,
}

/// Turns raw records into the time-decayed interaction matrix
pub struct InteractionLoader {
    rate: f64,
    reference: DateTime<Utc>,
    window_days: Option<u32>,
    strict: bool,
}

struct Accepted {
    index: usize,
    user_id: ExternalId,
    item_id: ExternalId,
    weight: f64,
    count: f64,
}

impl InteractionLoader {
    /// `reference` is the instant record ages are measured from. It overrides whatever the
    /// options hold, so that one run uses one instant throughout.
    pub fn new(options: &DecayOptions, reference: DateTime<Utc>) -> InteractionLoader {
        InteractionLoader {
            rate: options.rate,
            reference,
            window_days: options.window_days,
            strict: options.strict,
        }
    }

    pub fn load<I>(&self, records: I) -> Result<LoadedInteractions, DataError>
    where
        I: IntoIterator<Item = RawInteraction>,
    {
        let mut report = LoadReport::default();
        let mut accepted = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            report.read += 1;

            let record = match self.check(index, record) {
                Ok(record) => record,
                Err(e) if self.strict => return Err(e),
                Err(e) => {
                    warn!("Skipping malformed record: {}", e);
                    report.malformed += 1;
                    continue;
                }
            };

            match record {
                Some(record) => accepted.push(record),
                None => report.outside_window += 1,
            }
        }

        let accepted = self.drop_colliding_ids(accepted, &mut report)?;
        report.accepted = accepted.len();

        let users: IdMap = accepted.iter().map(|a| a.user_id.clone()).collect();
        let items: IdMap = accepted.iter().map(|a| a.item_id.clone()).collect();

        let cells = accepted
            .into_iter()
            .filter_map(|a| {
                Some(Cell {
                    row: users.index_of(&a.user_id)?,
                    col: items.index_of(&a.item_id)?,
                    weight: a.weight,
                    count: a.count,
                })
            })
            .collect();

        let matrix = if users.is_empty() {
            InteractionMatrix::empty()
        } else {
            InteractionMatrix::from_cells(users.len(), items.len(), cells)
        };

        info!(
            "Loaded {} records: {} accepted, {} malformed, {} outside the window; {} users x {} items, {} cells",
            report.read,
            report.accepted,
            report.malformed,
            report.outside_window,
            users.len(),
            items.len(),
            matrix.nnz()
        );

        Ok(LoadedInteractions {
            matrix,
            users,
            items,
            report,
        })
    }

    /// Sink keys spell ids out, so a text id that reads like an integer id of the same
    /// snapshot would share its keys. Records carrying such text ids are malformed.
    fn drop_colliding_ids(
        &self,
        accepted: Vec<Accepted>,
        report: &mut LoadReport,
    ) -> Result<Vec<Accepted>, DataError> {
        let spelled = |ids: Vec<Option<i64>>| -> PlHashSet<String> {
            ids.into_iter().flatten().map(|v| v.to_string()).collect()
        };
        let int_users = spelled(accepted.iter().map(|a| a.user_id.as_int()).collect());
        let int_items = spelled(accepted.iter().map(|a| a.item_id.as_int()).collect());

        let mut kept = Vec::with_capacity(accepted.len());
        for record in accepted {
            let clash = [
                ("user_id", &record.user_id, &int_users),
                ("item_id", &record.item_id, &int_items),
            ]
            .into_iter()
            .find_map(|(field, id, ints)| match id {
                ExternalId::Text(text) if ints.contains(text) => Some((field, text.clone())),
                _ => None,
            });

            match clash {
                None => kept.push(record),
                Some((field, id)) => {
                    let e = DataError::CollidingId {
                        index: record.index,
                        field,
                        id,
                    };
                    if self.strict {
                        return Err(e);
                    }
                    warn!("Skipping malformed record: {}", e);
                    report.malformed += 1;
                }
            }
        }

        Ok(kept)
    }

    /// Validates one record. `Ok(None)` means well formed but older than the window
    fn check(&self, index: usize, record: RawInteraction) -> Result<Option<Accepted>, DataError> {
        let user_id = record.user_id.ok_or(DataError::MissingField {
            index,
            field: "user_id",
        })?;
        let item_id = record.item_id.ok_or(DataError::MissingField {
            index,
            field: "item_id",
        })?;
        let event_time = record.event_time.ok_or(DataError::MissingField {
            index,
            field: "event_time",
        })?;

        let count = record.count.unwrap_or(1);
        if count <= 0 {
            return Err(DataError::InvalidCount { index, count });
        }

        if event_time > self.reference {
            return Err(DataError::FutureEvent {
                index,
                event_time,
                reference: self.reference,
            });
        }

        if let Some(window) = self.window_days {
            if self.reference - event_time > Duration::days(i64::from(window)) {
                return Ok(None);
            }
        }
        let days = age_in_days(self.reference, event_time);

        Ok(Some(Accepted {
            index,
            user_id,
            item_id,
            weight: decay_weight(self.rate, days) * count as f64,
            count: count as f64,
        }))
    }
}

/// Whole days elapsed between `event_time` and `reference`, rounded down
pub fn age_in_days(reference: DateTime<Utc>, event_time: DateTime<Utc>) -> i64 {
    // num_days truncates toward zero, which is the floor for non-negative ages
    (reference - event_time).num_days()
}

/// `rate ^ days`, never rounding all the way down to zero
pub fn decay_weight(rate: f64, days: i64) -> f64 {
    let exponent = days.clamp(0, i64::from(i32::MAX)) as i32;
    rate.powi(exponent).max(f64::MIN_POSITIVE)
}
