//! Rankings derived from the trained factor model.

use crate::{
    als::FactorModel,
    loader::IdMap,
    matrix::InteractionMatrix,
    ranking::{to_ranked, top_n, RankedList, Scored},
};
use rayon::prelude::*;
use toolrec::ExternalId;

/// Items a user has not interacted with, ranked by predicted preference
pub struct DiscoveryScorer<'a> {
    matrix: &'a InteractionMatrix,
    model: &'a FactorModel,
    users: &'a IdMap,
    items: &'a IdMap,
}

impl<'a> DiscoveryScorer<'a> {
    pub fn new(
        matrix: &'a InteractionMatrix,
        model: &'a FactorModel,
        users: &'a IdMap,
        items: &'a IdMap,
    ) -> DiscoveryScorer<'a> {
        DiscoveryScorer {
            matrix,
            model,
            users,
            items,
        }
    }

    /// Empty for users the run has never seen
    pub fn recommend(&self, user: &ExternalId, n: usize) -> RankedList {
        match self.users.index_of(user) {
            Some(row) => self.recommend_index(row, n),
            None => Vec::new(),
        }
    }

    fn recommend_index(&self, row: usize, n: usize) -> RankedList {
        let user = self.model.user(row);
        // A zero factor carries no preference at all
        if user.iter().all(|v| *v == 0.0) {
            return Vec::new();
        }

        let seen = self.matrix.row_mask(row);
        let scores = self.model.item_factors.dot(&user);

        let candidates = scores
            .iter()
            .enumerate()
            .filter(|(item, _)| !seen[*item])
            .map(|(item, score)| (item, *score))
            .collect();

        to_ranked(top_n(candidates, n), self.items)
    }

    /// Lists for every known user, in user index order
    pub fn recommend_all(&self, n: usize) -> Vec<(ExternalId, RankedList)> {
        (0..self.users.len())
            .into_par_iter()
            .filter_map(|row| Some((self.users.id_of(row)?.clone(), self.recommend_index(row, n))))
            .collect()
    }
}

/// Items ranked by cosine similarity of their factors
pub struct RelatedScorer<'a> {
    model: &'a FactorModel,
    items: &'a IdMap,
    norms: Vec<f64>,
}

impl<'a> RelatedScorer<'a> {
    pub fn new(model: &'a FactorModel, items: &'a IdMap) -> RelatedScorer<'a> {
        let norms = model
            .item_factors
            .rows()
            .into_iter()
            .map(|row| row.dot(&row).sqrt())
            .collect();

        RelatedScorer {
            model,
            items,
            norms,
        }
    }

    /// Cosine similarity of two item indices, zero when either factor has zero norm.
    /// `None` when either index is out of range.
    pub fn similarity(&self, a: usize, b: usize) -> Option<f64> {
        let (norm_a, norm_b) = (*self.norms.get(a)?, *self.norms.get(b)?);
        if norm_a == 0.0 || norm_b == 0.0 {
            return Some(0.0);
        }
        Some(self.model.item(a).dot(&self.model.item(b)) / (norm_a * norm_b))
    }

    /// Empty for unknown items
    pub fn related(&self, item: &ExternalId, n: usize) -> RankedList {
        match self.items.index_of(item) {
            Some(index) => self.related_index(index, n),
            None => Vec::new(),
        }
    }

    fn related_index(&self, index: usize, n: usize) -> RankedList {
        if self.norms[index] == 0.0 {
            return Vec::new();
        }

        let dots = self.model.item_factors.dot(&self.model.item(index));
        let mut candidates = Vec::with_capacity(dots.len());
        let mut unscored = Vec::new();

        for (other, dot) in dots.iter().enumerate() {
            if other == index {
                continue;
            }
            let norm = self.norms[other];
            if norm == 0.0 {
                unscored.push(other);
            } else {
                candidates.push((other, dot / (self.norms[index] * norm)));
            }
        }

        let mut ranked = to_ranked(top_n(candidates, n), self.items);

        // Zero-norm items only fill what is left, after every item with a defined similarity
        for other in unscored.into_iter().take(n.saturating_sub(ranked.len())) {
            if let Some(id) = self.items.id_of(other) {
                ranked.push(Scored {
                    id: id.clone(),
                    score: 0.0,
                });
            }
        }

        ranked
    }

    /// Lists for every known item, in item index order
    pub fn related_all(&self, n: usize) -> Vec<(ExternalId, RankedList)> {
        (0..self.items.len())
            .into_par_iter()
            .filter_map(|index| Some((self.items.id_of(index)?.clone(), self.related_index(index, n))))
            .collect()
    }
}
