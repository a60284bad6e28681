//! Rankings that come straight from the interaction matrix, no model needed.

use crate::{
    loader::IdMap,
    matrix::InteractionMatrix,
    ranking::{to_ranked, top_n, RankedList, Scored},
    recommender::PopularityWeighting,
};
use polars::datatypes::PlHashMap;
use rayon::prelude::*;
use toolrec::ExternalId;

/// Items ranked by their total weight across all users. This is the cold start fallback
pub fn rank_popular(
    matrix: &InteractionMatrix,
    items: &IdMap,
    weighting: PopularityWeighting,
    n: usize,
) -> RankedList {
    let totals = matrix.column_sums(weighting == PopularityWeighting::Raw);

    let candidates = totals
        .into_iter()
        .enumerate()
        .filter(|(_, total)| *total > 0.0)
        .collect();

    to_ranked(top_n(candidates, n), items)
}

/// Every user's own items, most recent-weighted first, built once per run
#[derive(Debug, Clone, Default)]
pub struct HistoryIndex {
    lists: PlHashMap<ExternalId, RankedList>,
}

impl HistoryIndex {
    pub fn build(matrix: &InteractionMatrix, users: &IdMap, items: &IdMap, n: usize) -> HistoryIndex {
        let ranked: Vec<(ExternalId, RankedList)> = (0..matrix.rows())
            .into_par_iter()
            .filter_map(|row| {
                let user = users.id_of(row)?.clone();
                let candidates = matrix.row(row).iter().collect();
                Some((user, to_ranked(top_n(candidates, n), items)))
            })
            .collect();

        let mut lists = PlHashMap::with_capacity_and_hasher(ranked.len(), Default::default());
        for (user, list) in ranked {
            lists.insert(user, list);
        }

        HistoryIndex { lists }
    }

    /// The user's list, empty for users without history
    pub fn get(&self, user: &ExternalId) -> &[Scored] {
        self.lists.get(user).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Cell;
    use crate::ranking::ids_only;
    use proptest::prelude::*;

    fn ids(values: &[i64]) -> IdMap {
        values.iter().map(|v| ExternalId::Int(*v)).collect()
    }

    fn cell(row: usize, col: usize, weight: f64, count: f64) -> Cell {
        Cell {
            row,
            col,
            weight,
            count,
        }
    }

    #[test]
    fn popularity_scenario() {
        // users u1, u2; items i1, i2, i3
        let matrix = InteractionMatrix::from_cells(
            2,
            3,
            vec![
                cell(0, 0, 1.0, 1.0),
                cell(0, 1, 1.0, 1.0),
                cell(1, 1, 1.0, 1.0),
                cell(1, 2, 1.0, 1.0),
            ],
        );
        let items = ids(&[1, 2, 3]);

        let popular = rank_popular(&matrix, &items, PopularityWeighting::Decayed, 10);
        assert_eq!(
            ids_only(&popular),
            vec![ExternalId::Int(2), ExternalId::Int(1), ExternalId::Int(3)]
        );
        assert_eq!(popular[0].score, 2.0);
    }

    #[test]
    fn raw_weighting_counts_interactions() {
        // Item 1 was used once, recently; item 2 three times, long ago
        let matrix = InteractionMatrix::from_cells(
            1,
            2,
            vec![cell(0, 0, 1.0, 1.0), cell(0, 1, 0.3, 3.0)],
        );
        let items = ids(&[1, 2]);

        let decayed = rank_popular(&matrix, &items, PopularityWeighting::Decayed, 2);
        let raw = rank_popular(&matrix, &items, PopularityWeighting::Raw, 2);
        assert_eq!(decayed[0].id, ExternalId::Int(1));
        assert_eq!(raw[0].id, ExternalId::Int(2));
        assert_eq!(raw[0].score, 3.0);
    }

    #[test]
    fn history_ranks_by_weight() {
        let matrix = InteractionMatrix::from_cells(
            2,
            3,
            vec![
                cell(0, 0, 0.5987, 1.0),
                cell(0, 1, 0.95, 1.0),
                cell(0, 2, 0.95, 1.0),
                cell(1, 2, 1.0, 1.0),
            ],
        );
        let users = ids(&[100, 200]);
        let items = ids(&[1, 2, 3]);

        let history = HistoryIndex::build(&matrix, &users, &items, 2);
        assert_eq!(history.len(), 2);
        assert_eq!(
            ids_only(history.get(&ExternalId::Int(100))),
            vec![ExternalId::Int(2), ExternalId::Int(3)]
        );
        assert!(history.get(&ExternalId::Int(999)).is_empty());
    }

    #[test]
    fn empty_matrix_gives_empty_rankings() {
        let matrix = InteractionMatrix::empty();
        let none = IdMap::default();
        assert!(rank_popular(&matrix, &none, PopularityWeighting::Decayed, 10).is_empty());
        assert!(HistoryIndex::build(&matrix, &none, &none, 4).is_empty());
    }

    proptest! {
        #[test]
        fn heavier_items_rank_first(weights in prop::collection::vec(1u8..5, 1..12)) {
            let cells = weights
                .iter()
                .enumerate()
                .map(|(col, w)| cell(0, col, f64::from(*w), 1.0))
                .collect();
            let matrix = InteractionMatrix::from_cells(1, weights.len(), cells);
            let items = ids(&(0..weights.len() as i64).collect::<Vec<_>>());
            let popular = rank_popular(&matrix, &items, PopularityWeighting::Decayed, weights.len());

            for pair in popular.windows(2) {
                prop_assert!(pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score && pair[0].id < pair[1].id));
            }
        }
    }
}
