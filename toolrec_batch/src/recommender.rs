mod recommender_types;

use crate::{
    als::{AlsTrainer, FactorModel, TrainingReport},
    loader::{IdMap, InteractionLoader, LoadReport, RawInteraction},
    matrix::InteractionMatrix,
    publisher::RecommendationSet,
    rankers::{rank_popular, HistoryIndex},
    ranking::{RankedList, Scored},
    scorers::{DiscoveryScorer, RelatedScorer},
};
use chrono::Utc;
use toolrec::ExternalId;
use tracing::info;

pub use recommender_types::{
    AlsOptions, DecayOptions, ListSizes, OptionsError, PopularityWeighting, PublishOptions,
    RecommenderError, RecommenderOptions,
};

/// Represents one trained run of the recommendation system
pub struct Recommender {
    /// Decayed interaction weights, users against items
    matrix: InteractionMatrix,
    users: IdMap,
    items: IdMap,
    model: FactorModel,
    /// Every user's own items, ranked once up front
    history: HistoryIndex,
    /// Global list, also the cold start fallback
    popular: RankedList,
    sizes: ListSizes,
    load_report: LoadReport,
    training_report: TrainingReport,
}

impl Recommender {
    /// Creates a new recommender from a snapshot of records.
    /// Uses the default recommender settings.
    #[inline]
    pub fn new<I>(records: I) -> Result<Recommender, RecommenderError>
    where
        I: IntoIterator<Item = RawInteraction>,
    {
        Self::new_with_options(records, &RecommenderOptions::new())
    }

    /// Creates a new recommender with the provided settings
    pub fn new_with_options<I>(
        records: I,
        options: &RecommenderOptions,
    ) -> Result<Recommender, RecommenderError>
    where
        I: IntoIterator<Item = RawInteraction>,
    {
        options.validate()?;

        // One instant for the whole run
        let reference = options.decay.reference.unwrap_or_else(Utc::now);
        let loaded = InteractionLoader::new(&options.decay, reference).load(records)?;
        info!(
            "Loaded {} users, {} items, {} interactions",
            loaded.users.len(),
            loaded.items.len(),
            loaded.matrix.nnz()
        );

        let (model, training_report) = AlsTrainer::new(&options.als).train(&loaded.matrix);
        info!("Model trained");

        let history = HistoryIndex::build(
            &loaded.matrix,
            &loaded.users,
            &loaded.items,
            options.sizes.history,
        );
        let popular = rank_popular(
            &loaded.matrix,
            &loaded.items,
            options.popularity,
            options.sizes.popular,
        );
        info!("History and popularity ranked");

        Ok(Recommender {
            matrix: loaded.matrix,
            users: loaded.users,
            items: loaded.items,
            model,
            history,
            popular,
            sizes: options.sizes.clone(),
            load_report: loaded.report,
            training_report,
        })
    }

    /// The user's own items by decayed weight, empty for unknown users
    pub fn get_history_by_uid(&self, user: &ExternalId) -> &[Scored] {
        self.history.get(user)
    }

    /// Unseen items by predicted preference, empty for unknown users
    pub fn get_discovery_by_uid(&self, user: &ExternalId) -> RankedList {
        DiscoveryScorer::new(&self.matrix, &self.model, &self.users, &self.items)
            .recommend(user, self.sizes.discovery)
    }

    /// Items whose factors point the same way as this item's, empty for unknown items
    pub fn get_related_by_iid(&self, item: &ExternalId) -> RankedList {
        RelatedScorer::new(&self.model, &self.items).related(item, self.sizes.related)
    }

    pub fn get_popular(&self) -> &[Scored] {
        &self.popular
    }

    /// Every list of the run, ready for publication
    pub fn recommend_all(&self) -> RecommendationSet {
        let history = self
            .users
            .ids()
            .iter()
            .map(|user| (user.clone(), self.history.get(user).to_vec()))
            .collect();

        let discovery = DiscoveryScorer::new(&self.matrix, &self.model, &self.users, &self.items)
            .recommend_all(self.sizes.discovery);
        info!("Discovery lists scored for {} users", discovery.len());

        let related =
            RelatedScorer::new(&self.model, &self.items).related_all(self.sizes.related);
        info!("Related lists scored for {} items", related.len());

        RecommendationSet {
            history,
            discovery,
            related,
            popular: self.popular.clone(),
        }
    }

    pub fn users(&self) -> &IdMap {
        &self.users
    }

    pub fn items(&self) -> &IdMap {
        &self.items
    }

    pub fn matrix(&self) -> &InteractionMatrix {
        &self.matrix
    }

    pub fn model(&self) -> &FactorModel {
        &self.model
    }

    pub fn load_report(&self) -> LoadReport {
        self.load_report
    }

    pub fn training_report(&self) -> TrainingReport {
        self.training_report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::ids_only;
    use chrono::{DateTime, Duration, TimeZone};

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        reference() - Duration::days(days)
    }

    fn options() -> RecommenderOptions {
        RecommenderOptions::new()
            .with_reference(reference())
            .with_factors(4)
            .with_iterations(8)
    }

    fn two_groups() -> Vec<RawInteraction> {
        let mut records = Vec::new();
        for user in 0..4 {
            for item in 0..3 {
                if user != item {
                    records.push(RawInteraction::new(user, 100 + item, days_ago(user + item)));
                }
            }
        }
        for user in 4..8 {
            for item in 3..6 {
                if user - 4 != item - 3 {
                    records.push(RawInteraction::new(user, 100 + item, days_ago(item)));
                }
            }
        }
        records
    }

    #[test]
    fn empty_input_gives_empty_lists() {
        let recommender = Recommender::new_with_options(Vec::new(), &options()).unwrap();
        assert_eq!(recommender.model().user_factors.nrows(), 0);
        assert_eq!(recommender.model().item_factors.nrows(), 0);

        let unknown = ExternalId::Int(1);
        assert!(recommender.get_history_by_uid(&unknown).is_empty());
        assert!(recommender.get_discovery_by_uid(&unknown).is_empty());
        assert!(recommender.get_related_by_iid(&unknown).is_empty());
        assert!(recommender.get_popular().is_empty());
        assert_eq!(recommender.recommend_all(), RecommendationSet::default());
    }

    #[test]
    fn history_follows_recency() {
        let records = vec![
            RawInteraction::new("u1", "a", days_ago(10)),
            RawInteraction::new("u1", "b", days_ago(1)),
        ];
        let recommender = Recommender::new_with_options(records, &options()).unwrap();

        let history = recommender.get_history_by_uid(&ExternalId::from("u1"));
        assert_eq!(
            ids_only(history),
            vec![ExternalId::from("b"), ExternalId::from("a")]
        );
        assert!((history[0].score - 0.95).abs() < 1e-12);
        assert!((history[1].score - 0.95f64.powi(10)).abs() < 1e-12);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let bad = options().with_decay_rate(1.5);
        assert!(matches!(
            Recommender::new_with_options(Vec::new(), &bad),
            Err(RecommenderError::Options(OptionsError::DecayRate(_)))
        ));
    }

    #[test]
    fn strict_mode_surfaces_bad_records() {
        let records = vec![RawInteraction {
            user_id: Some(ExternalId::Int(1)),
            item_id: None,
            event_time: Some(days_ago(1)),
            count: None,
        }];

        let lenient = Recommender::new_with_options(records.clone(), &options()).unwrap();
        assert_eq!(lenient.load_report().malformed, 1);

        let strict = Recommender::new_with_options(records, &options().with_strict(true));
        assert!(matches!(strict, Err(RecommenderError::Data(_))));
    }

    #[test]
    fn same_inputs_same_lists() {
        let first = Recommender::new_with_options(two_groups(), &options()).unwrap();
        let second = Recommender::new_with_options(two_groups(), &options()).unwrap();
        assert_eq!(first.recommend_all(), second.recommend_all());
    }

    #[test]
    fn lists_keep_their_invariants() {
        let options = options().with_sizes(ListSizes {
            history: 2,
            discovery: 2,
            related: 3,
            popular: 4,
        });
        let recommender = Recommender::new_with_options(two_groups(), &options).unwrap();
        let set = recommender.recommend_all();

        assert_eq!(set.history.len(), 8);
        assert_eq!(set.discovery.len(), 8);
        assert_eq!(set.related.len(), 6);
        assert!(set.popular.len() <= 4);

        for (user, list) in &set.discovery {
            assert!(list.len() <= 2);
            let seen = ids_only(recommender.get_history_by_uid(user));
            let row = recommender.users().index_of(user).unwrap();
            let row = recommender.matrix().row(row);
            for entry in list {
                let col = recommender.items().index_of(&entry.id).unwrap();
                assert!(!row.cols.contains(&col));
                assert!(!seen.contains(&entry.id));
            }
        }

        for (item, list) in &set.related {
            assert!(list.len() <= 3);
            assert!(list.iter().all(|entry| &entry.id != item));
        }

        for (_, list) in &set.history {
            assert!(list.len() <= 2);
            for pair in list.windows(2) {
                assert!(
                    pair[0].score > pair[1].score
                        || (pair[0].score == pair[1].score && pair[0].id < pair[1].id)
                );
            }
        }
    }

    #[test]
    fn group_members_discover_their_group() {
        let recommender = Recommender::new_with_options(two_groups(), &options()).unwrap();
        // User 0 never used item 100, the only unseen item in its own group
        let discovery = recommender.get_discovery_by_uid(&ExternalId::Int(0));
        assert_eq!(discovery[0].id, ExternalId::Int(100));
    }
}
