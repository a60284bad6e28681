use crate::loader::IdMap;
use std::cmp::Ordering;
use toolrec::ExternalId;

/// One entry of a ranked list
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub id: ExternalId,
    pub score: f64,
}

/// Highest score first, equal scores in ascending id order, no repeated ids
pub type RankedList = Vec<Scored>;

/// Descending score, then ascending index. Indices follow id order, so this is also the
/// ascending-id tie-break.
fn rank_order(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then(a.0.cmp(&b.0))
}

/// Keeps the best `n` (index, score) candidates in rank order.
///
/// Candidates must carry distinct indices. Non-finite scores are dropped.
pub fn top_n(mut candidates: Vec<(usize, f64)>, n: usize) -> Vec<(usize, f64)> {
    candidates.retain(|(_, score)| score.is_finite());
    if n == 0 {
        return Vec::new();
    }

    if candidates.len() > n {
        candidates.select_nth_unstable_by(n - 1, rank_order);
        candidates.truncate(n);
    }
    candidates.sort_unstable_by(rank_order);

    candidates
}

/// Swaps matrix indices for external ids
pub fn to_ranked(entries: Vec<(usize, f64)>, ids: &IdMap) -> RankedList {
    entries
        .into_iter()
        .filter_map(|(index, score)| {
            Some(Scored {
                id: ids.id_of(index)?.clone(),
                score,
            })
        })
        .collect()
}

/// Drops the scores, keeping the order
pub fn ids_only(list: &[Scored]) -> Vec<ExternalId> {
    list.iter().map(|entry| entry.id.clone()).collect()
}
