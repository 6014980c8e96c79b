use crate::catalog::Catalog;
use crate::config::AggregationConfig;
use crate::models::InteractionEvent;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Aggregated ratings below this are floored to keep SGD off near-zero
/// targets.
const RATING_FLOOR: f32 = 0.1;

/// Sparse implicit-rating matrix. `ratings` holds (user_idx, tour_idx,
/// rating) triples aligned with `user_ids` / `tour_ids`; `scores` keeps the
/// per-user weight map for building content profiles.
#[derive(Debug, Clone, Default)]
pub struct RatingMatrix {
    pub user_ids: Vec<Uuid>,
    pub tour_ids: Vec<Uuid>,
    pub ratings: Vec<(usize, usize, f32)>,
    pub scores: HashMap<Uuid, HashMap<Uuid, f32>>,
}

impl RatingMatrix {
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

/// Converts the canonical event stream into a time-decayed implicit rating
/// per (user, tour).
pub struct InteractionAggregator {
    half_life_days: f32,
    window_days: i64,
}

impl InteractionAggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            half_life_days: config.half_life_days,
            window_days: config.window_days,
        }
    }

    /// 1.0 for events today or in the future, halving every half-life.
    pub fn decay_factor(&self, days_ago: i64) -> f32 {
        if days_ago <= 0 {
            1.0
        } else {
            0.5_f32.powf(days_ago as f32 / self.half_life_days)
        }
    }

    pub fn effective_weight(&self, event: &InteractionEvent, now: DateTime<Utc>) -> f32 {
        let days_ago = (now - event.occurred_at).num_days();
        event.kind.base_weight() * self.decay_factor(days_ago)
    }

    /// Builds the rating matrix from all sources: events inside the window,
    /// restricted to approved tours, effective weights summed per
    /// (user, tour). Only positive aggregates are emitted.
    pub async fn build(&self, catalog: &dyn Catalog, now: DateTime<Utc>) -> Result<RatingMatrix> {
        let cutoff = now - Duration::days(self.window_days);
        let approved: HashSet<Uuid> = catalog
            .approved_tours()
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let events = catalog.interactions_since(cutoff).await?;

        let mut scores: HashMap<Uuid, HashMap<Uuid, f32>> = HashMap::new();
        for event in &events {
            if !approved.contains(&event.tour_id) {
                continue;
            }
            let weight = self.effective_weight(event, now);
            if weight <= 0.0 {
                continue;
            }
            *scores
                .entry(event.user_id)
                .or_default()
                .entry(event.tour_id)
                .or_insert(0.0) += weight;
        }

        // Deterministic index order keeps factor rows stable across runs.
        let mut user_ids: Vec<Uuid> = scores.keys().copied().collect();
        user_ids.sort();
        let mut tour_ids: Vec<Uuid> = scores
            .values()
            .flat_map(|items| items.keys().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tour_ids.sort();

        let user_index: HashMap<Uuid, usize> =
            user_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let tour_index: HashMap<Uuid, usize> =
            tour_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut ratings = Vec::new();
        for (user_id, items) in &scores {
            let u = user_index[user_id];
            for (tour_id, score) in items {
                if *score <= 0.0 {
                    continue;
                }
                ratings.push((u, tour_index[tour_id], score.max(RATING_FLOOR)));
            }
        }
        ratings.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        debug!(
            users = user_ids.len(),
            tours = tour_ids.len(),
            ratings = ratings.len(),
            "aggregated interaction matrix"
        );

        Ok(RatingMatrix {
            user_ids,
            tour_ids,
            ratings,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BookingRecord, InMemoryCatalog, WishlistRecord};
    use crate::models::{ActionKind, Tour, TourStatus};

    fn aggregator() -> InteractionAggregator {
        InteractionAggregator::new(&AggregationConfig {
            half_life_days: 14.0,
            window_days: 365,
        })
    }

    fn tour(id: u128, status: TourStatus) -> Tour {
        Tour {
            id: Uuid::from_u128(id),
            title: "t".to_string(),
            description: String::new(),
            destination: String::new(),
            tour_type: String::new(),
            tags: vec![],
            duration_days: 1,
            base_price: 1.0,
            policy: String::new(),
            itinerary: vec![],
            child_age_limit: 0,
            requires_passport: false,
            requires_visa: false,
            status,
            published_at: Utc::now(),
        }
    }

    #[test]
    fn test_decay_factor() {
        let agg = aggregator();
        assert_eq!(agg.decay_factor(0), 1.0);
        assert_eq!(agg.decay_factor(-3), 1.0);
        assert!((agg.decay_factor(14) - 0.5).abs() < 1e-6);
        assert!((agg.decay_factor(28) - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_weights_summed_across_sources() {
        let catalog = InMemoryCatalog::new();
        let user = Uuid::from_u128(10);
        let tour_id = Uuid::from_u128(1);
        let now = Utc::now();
        catalog.add_tour(tour(1, TourStatus::Approved)).await;

        // Same (user, tour) from booking table and wishlist table: summed.
        catalog
            .record_booking(BookingRecord {
                user_id: user,
                tour_id,
                booked_at: now,
            })
            .await;
        catalog
            .record_wishlist(WishlistRecord {
                user_id: user,
                tour_id,
                added_at: now,
            })
            .await;

        let matrix = aggregator().build(&catalog, now).await.unwrap();
        assert_eq!(matrix.ratings.len(), 1);
        let (_, _, rating) = matrix.ratings[0];
        let expected = ActionKind::BookingSuccess.base_weight() + ActionKind::WishlistAdd.base_weight();
        assert!((rating - expected).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_unapproved_and_stale_events_excluded() {
        let catalog = InMemoryCatalog::new();
        let user = Uuid::from_u128(10);
        let now = Utc::now();
        catalog.add_tour(tour(1, TourStatus::Pending)).await;
        catalog.add_tour(tour(2, TourStatus::Approved)).await;

        catalog
            .record_booking(BookingRecord {
                user_id: user,
                tour_id: Uuid::from_u128(1),
                booked_at: now,
            })
            .await;
        catalog
            .record_booking(BookingRecord {
                user_id: user,
                tour_id: Uuid::from_u128(2),
                booked_at: now - Duration::days(400),
            })
            .await;

        let matrix = aggregator().build(&catalog, now).await.unwrap();
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn test_decayed_booking_weight() {
        let catalog = InMemoryCatalog::new();
        let user = Uuid::from_u128(10);
        let now = Utc::now();
        catalog.add_tour(tour(1, TourStatus::Approved)).await;
        catalog
            .record_booking(BookingRecord {
                user_id: user,
                tour_id: Uuid::from_u128(1),
                booked_at: now - Duration::days(14),
            })
            .await;

        let matrix = aggregator().build(&catalog, now).await.unwrap();
        let (_, _, rating) = matrix.ratings[0];
        assert!((rating - 3.0).abs() < 1e-4);
    }
}
