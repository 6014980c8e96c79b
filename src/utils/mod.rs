use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Dense dot product over the common prefix of the two slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    DVector::from_column_slice(&a[..len]).dot(&DVector::from_column_slice(&b[..len]))
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Non-finite training artifacts must never reach the store.
pub fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn sanitize_vector(vector: &mut [f32]) {
    for x in vector.iter_mut() {
        *x = finite_or_zero(*x);
    }
}

/// Descending by score, ascending by id on equal scores. Every ranked list
/// in the engine goes through this so ordering is reproducible.
pub fn sort_ranked(entries: &mut [(Uuid, f32)]) {
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

/// Sparse term-weight vector backing the content embeddings. Weights are
/// keyed by token; a zero-norm vector normalizes to the empty vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    terms: HashMap<String, f32>,
}

impl SparseVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_terms(terms: HashMap<String, f32>) -> Self {
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn get(&self, term: &str) -> Option<f32> {
        self.terms.get(term).copied()
    }

    pub fn add_weight(&mut self, term: &str, weight: f32) {
        *self.terms.entry(term.to_string()).or_insert(0.0) += weight;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f32)> {
        self.terms.iter()
    }

    /// Iterates the smaller map's keys against the larger one.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (smaller, larger) = if self.terms.len() <= other.terms.len() {
            (&self.terms, &other.terms)
        } else {
            (&other.terms, &self.terms)
        };

        smaller
            .iter()
            .filter_map(|(term, weight)| larger.get(term).map(|w| weight * w))
            .sum()
    }

    pub fn norm(&self) -> f32 {
        self.terms.values().map(|w| w * w).sum::<f32>().sqrt()
    }

    /// Returns the unit-norm vector, or an empty vector when the norm is
    /// zero or non-finite.
    pub fn normalized(&self) -> SparseVector {
        let norm = self.norm();
        if norm <= 0.0 || !norm.is_finite() {
            return SparseVector::new();
        }

        let terms = self
            .terms
            .iter()
            .map(|(term, weight)| (term.clone(), finite_or_zero(weight / norm)))
            .collect();

        SparseVector { terms }
    }
}
