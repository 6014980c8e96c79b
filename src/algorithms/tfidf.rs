use crate::models::Tour;
use crate::utils::SparseVector;
use rayon::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

const TOKEN_MIN_CHARS: usize = 2;

/// Lowercase, strip everything but Unicode letters and digits, split on
/// whitespace, drop short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.chars().count() >= TOKEN_MIN_CHARS)
        .map(|token| token.to_string())
        .collect()
}

/// Concatenated textual corpus for one tour: title, description,
/// destination, policy, flattened itinerary, tags.
fn extract_terms(tour: &Tour) -> Vec<String> {
    let mut terms = Vec::new();
    terms.extend(tokenize(&tour.title));
    terms.extend(tokenize(&tour.description));
    terms.extend(tokenize(&tour.destination));
    terms.extend(tokenize(&tour.policy));
    for leg in &tour.itinerary {
        terms.extend(tokenize(leg));
    }
    for tag in &tour.tags {
        terms.extend(tokenize(tag));
    }
    terms
}

/// Builds L2-normalized TF-IDF vectors for the corpus. Tours whose corpus
/// tokenizes to nothing get no vector at all.
///
/// tf = count / total_tokens, idf = ln((N+1)/(df+1)) + 1 (smoothed, always
/// positive).
pub fn build_tour_vectors(tours: &[Tour]) -> HashMap<Uuid, SparseVector> {
    let documents: Vec<(Uuid, Vec<String>)> = tours
        .par_iter()
        .map(|tour| (tour.id, extract_terms(tour)))
        .filter(|(_, terms)| !terms.is_empty())
        .collect();

    let doc_count = documents.len();
    if doc_count == 0 {
        return HashMap::new();
    }

    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for (_, terms) in &documents {
        let mut seen: Vec<&str> = terms.iter().map(|t| t.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *document_frequency.entry(term).or_insert(0) += 1;
        }
    }

    let idf: HashMap<&str, f32> = document_frequency
        .iter()
        .map(|(term, df)| {
            let value = ((doc_count as f32 + 1.0) / (*df as f32 + 1.0)).ln() + 1.0;
            (*term, value)
        })
        .collect();

    let mut vectors = HashMap::with_capacity(doc_count);
    for (tour_id, terms) in &documents {
        let total = terms.len() as f32;
        let mut counts: HashMap<&str, f32> = HashMap::new();
        for term in terms {
            *counts.entry(term.as_str()).or_insert(0.0) += 1.0;
        }

        let mut vector = SparseVector::new();
        for (term, count) in counts {
            let tf = count / total;
            let weight = tf * idf.get(term).copied().unwrap_or(0.0);
            vector.add_weight(term, weight);
        }

        let normalized = vector.normalized();
        if !normalized.is_empty() {
            vectors.insert(*tour_id, normalized);
        }
    }

    vectors
}

/// User content profile: interaction-weighted sum of the tour vectors,
/// L2-normalized. A zero sum yields the empty vector.
pub fn user_content_vector(
    tour_scores: &HashMap<Uuid, f32>,
    tour_vectors: &HashMap<Uuid, SparseVector>,
) -> SparseVector {
    let mut profile = SparseVector::new();

    for (tour_id, score) in tour_scores {
        if *score <= 0.0 {
            continue;
        }
        let Some(vector) = tour_vectors.get(tour_id) else {
            continue;
        };
        for (term, weight) in vector.iter() {
            profile.add_weight(term, score * weight);
        }
    }

    profile.normalized()
}
