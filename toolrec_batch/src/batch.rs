use crate::{
    als::TrainingReport,
    loader::{LoadReport, RawInteraction},
    publisher::{ListSink, Publisher},
    ranking::RankedList,
    recommender::{Recommender, RecommenderError, RecommenderOptions},
};
use std::time::{Duration, Instant};
use toolrec::ExternalId;
use tracing::{info, warn};

/// What one batch run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub load: LoadReport,
    pub training: TrainingReport,
    /// Non-empty lists per kind
    pub history_lists: usize,
    pub discovery_lists: usize,
    pub related_lists: usize,
    pub popular_items: usize,
    /// Records handed to the sink, empty lists included
    pub records: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

/// Trains on a snapshot of records, scores every list and publishes them to the sink.
///
/// Nothing reaches the sink unless loading and training succeed.
pub fn run_batch<I, S>(
    records: I,
    options: &RecommenderOptions,
    sink: &mut S,
) -> Result<RunSummary, RecommenderError>
where
    I: IntoIterator<Item = RawInteraction>,
    S: ListSink + ?Sized,
{
    let start = Instant::now();

    let recommender = Recommender::new_with_options(records, options)?;
    let set = recommender.recommend_all();

    let published = Publisher::new(&options.publish).publish(&set, sink)?;

    let summary = RunSummary {
        load: recommender.load_report(),
        training: recommender.training_report(),
        history_lists: non_empty(&set.history),
        discovery_lists: non_empty(&set.discovery),
        related_lists: non_empty(&set.related),
        popular_items: set.popular.len(),
        records: published.records,
        batches: published.batches,
        elapsed: start.elapsed(),
    };
    log_summary(&summary);

    Ok(summary)
}

fn non_empty(lists: &[(ExternalId, RankedList)]) -> usize {
    lists.iter().filter(|(_, list)| !list.is_empty()).count()
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Run finished in {:.2?}: {} of {} records accepted, {} malformed, {} outside the window",
        summary.elapsed,
        summary.load.accepted,
        summary.load.read,
        summary.load.malformed,
        summary.load.outside_window
    );
    info!(
        "Published {} history, {} discovery, {} related lists and {} popular items ({} records, {} batches)",
        summary.history_lists,
        summary.discovery_lists,
        summary.related_lists,
        summary.popular_items,
        summary.records,
        summary.batches
    );
    if summary.training.singular_rows > 0 {
        warn!(
            "{} factor rows were zeroed after singular solves",
            summary.training.singular_rows
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{MemorySink, PublishError, PublishedRecord, SinkError};
    use chrono::{Duration as Days, TimeZone, Utc};

    struct DownSink;

    impl ListSink for DownSink {
        fn write_batch(&mut self, _batch: &[PublishedRecord], _ttl: u64) -> Result<(), SinkError> {
            Err(SinkError::Unavailable(String::from("refused")))
        }
    }

    fn options() -> RecommenderOptions {
        RecommenderOptions::new()
            .with_reference(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
            .with_factors(3)
            .with_iterations(5)
    }

    fn records() -> Vec<RawInteraction> {
        let reference = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        vec![
            RawInteraction::new(1, 10, reference - Days::days(1)),
            RawInteraction::new(1, 11, reference - Days::days(2)),
            RawInteraction::new(2, 11, reference - Days::days(3)),
            RawInteraction::new(2, 12, reference - Days::days(1)),
        ]
    }

    #[test]
    fn publishes_every_list() {
        let mut sink = MemorySink::new();
        let summary = run_batch(records(), &options(), &mut sink).unwrap();

        assert_eq!(summary.load.accepted, 4);
        assert_eq!(summary.history_lists, 2);
        assert_eq!(summary.popular_items, 3);
        // popular, 2 history, 2 discovery, 3 related
        assert_eq!(summary.records, 8);
        assert_eq!(
            sink.get("rec:sys:global:popular"),
            Some(&[ExternalId::Int(11), ExternalId::Int(10), ExternalId::Int(12)][..])
        );
        assert_eq!(
            sink.get("rec:sys:user:1:history"),
            Some(&[ExternalId::Int(10), ExternalId::Int(11)][..])
        );
    }

    #[test]
    fn empty_snapshot_clears_popular() {
        let mut sink = MemorySink::new();
        let stale = PublishedRecord {
            key: String::from("rec:sys:global:popular"),
            items: vec![ExternalId::Int(1)],
        };
        sink.write_batch(&[stale], 10).unwrap();

        let summary = run_batch(Vec::new(), &options(), &mut sink).unwrap();
        assert_eq!(summary.records, 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn sink_failure_is_reported() {
        let result = run_batch(records(), &options(), &mut DownSink);
        assert!(matches!(
            result,
            Err(RecommenderError::Publish(PublishError::Incomplete { written: 0, .. }))
        ));
    }

    #[test]
    fn bad_options_never_reach_the_sink() {
        let mut sink = MemorySink::new();
        let result = run_batch(records(), &options().with_batch_size(0), &mut sink);
        assert!(result.is_err());
        assert_eq!(sink.round_trips(), 0);
    }
}
