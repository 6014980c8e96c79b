use crate::models::*;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// External collaborator surface. The engine consumes catalog metadata,
/// interaction events (already canonicalized across all raw sources), and
/// rating aggregates through this trait; a database-backed implementation
/// can replace [`InMemoryCatalog`] without touching the services.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn approved_tours(&self) -> Result<Vec<Tour>>;

    async fn tour(&self, id: Uuid) -> Result<Option<Tour>>;

    /// Most-recently-published approved tours, for the fallback pool.
    async fn recent_approved_tours(&self, limit: usize) -> Result<Vec<Tour>>;

    /// Canonical interaction stream from every source, at or after `cutoff`.
    async fn interactions_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<InteractionEvent>>;

    /// Full canonical interaction history for one user.
    async fn user_interactions(&self, user_id: Uuid) -> Result<Vec<InteractionEvent>>;

    /// Qualifying events for `user_id` strictly after `since`.
    async fn user_event_count_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<usize>;

    async fn rating_aggregates(&self) -> Result<HashMap<Uuid, RatingAggregate>>;
}

/// Raw analytics-stream record, prior to canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub user_id: Option<Uuid>,
    pub tour_id: Option<Uuid>,
    pub event_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Booking-table row. Always canonicalized as a booking success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub user_id: Uuid,
    pub tour_id: Uuid,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WishlistRecord {
    pub user_id: Uuid,
    pub tour_id: Uuid,
    pub added_at: DateTime<Utc>,
}

/// Legacy activity-log row with its own action vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub user_id: Uuid,
    pub tour_id: Uuid,
    pub action: String,
    pub logged_at: DateTime<Utc>,
}

/// Serializable dump of catalog state, used by the trainer binary to run
/// offline jobs against exported data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub tours: Vec<Tour>,
    #[serde(default)]
    pub analytics: Vec<AnalyticsRecord>,
    #[serde(default)]
    pub bookings: Vec<BookingRecord>,
    #[serde(default)]
    pub wishlists: Vec<WishlistRecord>,
    #[serde(default)]
    pub activity_log: Vec<ActivityRecord>,
    #[serde(default)]
    pub ratings: Vec<RatingAggregate>,
}

#[derive(Default)]
struct CatalogState {
    tours: HashMap<Uuid, Tour>,
    analytics: Vec<AnalyticsRecord>,
    bookings: Vec<BookingRecord>,
    wishlists: Vec<WishlistRecord>,
    activity_log: Vec<ActivityRecord>,
    ratings: HashMap<Uuid, RatingAggregate>,
}

impl CatalogState {
    /// Folds all four origins into the canonical event set. Duplicates are
    /// kept; the aggregator sums them.
    fn canonical_events(&self) -> Vec<InteractionEvent> {
        let mut events = Vec::new();

        for record in &self.analytics {
            let (Some(user_id), Some(tour_id)) = (record.user_id, record.tour_id) else {
                continue;
            };
            if let Some(kind) = ActionKind::from_event_name(&record.event_name) {
                events.push(InteractionEvent::new(user_id, tour_id, kind, record.occurred_at));
            }
        }

        for booking in &self.bookings {
            events.push(InteractionEvent::new(
                booking.user_id,
                booking.tour_id,
                ActionKind::BookingSuccess,
                booking.booked_at,
            ));
        }

        for wishlist in &self.wishlists {
            events.push(InteractionEvent::new(
                wishlist.user_id,
                wishlist.tour_id,
                ActionKind::WishlistAdd,
                wishlist.added_at,
            ));
        }

        for log in &self.activity_log {
            if let Some(kind) = ActionKind::from_activity_action(&log.action) {
                events.push(InteractionEvent::new(log.user_id, log.tour_id, kind, log.logged_at));
            }
        }

        events
    }
}

/// In-memory catalog used by tests, benches, and the snapshot-driven
/// trainer binary.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let catalog = Self::new();
        {
            let mut state = catalog.state.write().await;
            for tour in snapshot.tours {
                state.tours.insert(tour.id, tour);
            }
            state.analytics = snapshot.analytics;
            state.bookings = snapshot.bookings;
            state.wishlists = snapshot.wishlists;
            state.activity_log = snapshot.activity_log;
            for rating in snapshot.ratings {
                state.ratings.insert(rating.tour_id, rating);
            }
        }
        catalog
    }

    pub async fn add_tour(&self, tour: Tour) {
        self.state.write().await.tours.insert(tour.id, tour);
    }

    pub async fn record_analytics(&self, record: AnalyticsRecord) {
        self.state.write().await.analytics.push(record);
    }

    pub async fn record_booking(&self, record: BookingRecord) {
        self.state.write().await.bookings.push(record);
    }

    pub async fn record_wishlist(&self, record: WishlistRecord) {
        self.state.write().await.wishlists.push(record);
    }

    pub async fn record_activity(&self, record: ActivityRecord) {
        self.state.write().await.activity_log.push(record);
    }

    pub async fn set_rating(&self, rating: RatingAggregate) {
        self.state.write().await.ratings.insert(rating.tour_id, rating);
    }
}

#[async_trait::async_trait]
impl Catalog for InMemoryCatalog {
    async fn approved_tours(&self) -> Result<Vec<Tour>> {
        let state = self.state.read().await;
        Ok(state
            .tours
            .values()
            .filter(|t| t.is_approved())
            .cloned()
            .collect())
    }

    async fn tour(&self, id: Uuid) -> Result<Option<Tour>> {
        Ok(self.state.read().await.tours.get(&id).cloned())
    }

    async fn recent_approved_tours(&self, limit: usize) -> Result<Vec<Tour>> {
        let state = self.state.read().await;
        let mut tours: Vec<Tour> = state
            .tours
            .values()
            .filter(|t| t.is_approved())
            .cloned()
            .collect();
        tours.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.id.cmp(&b.id)));
        tours.truncate(limit);
        Ok(tours)
    }

    async fn interactions_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<InteractionEvent>> {
        let state = self.state.read().await;
        Ok(state
            .canonical_events()
            .into_iter()
            .filter(|e| e.occurred_at >= cutoff)
            .collect())
    }

    async fn user_interactions(&self, user_id: Uuid) -> Result<Vec<InteractionEvent>> {
        let state = self.state.read().await;
        Ok(state
            .canonical_events()
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect())
    }

    async fn user_event_count_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state
            .canonical_events()
            .iter()
            .filter(|e| e.user_id == user_id && e.occurred_at > since)
            .count())
    }

    async fn rating_aggregates(&self) -> Result<HashMap<Uuid, RatingAggregate>> {
        Ok(self.state.read().await.ratings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tour(status: TourStatus) -> Tour {
        Tour {
            id: Uuid::new_v4(),
            title: "Island escape".to_string(),
            description: "Five days island hopping".to_string(),
            destination: "Palawan".to_string(),
            tour_type: "beach".to_string(),
            tags: vec!["island".to_string()],
            duration_days: 5,
            base_price: 900.0,
            policy: String::new(),
            itinerary: vec![],
            child_age_limit: 6,
            requires_passport: true,
            requires_visa: false,
            status,
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_only_approved_tours_listed() {
        let catalog = InMemoryCatalog::new();
        catalog.add_tour(tour(TourStatus::Approved)).await;
        catalog.add_tour(tour(TourStatus::Pending)).await;

        assert_eq!(catalog.approved_tours().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_sources_canonicalized() {
        let catalog = InMemoryCatalog::new();
        let user = Uuid::new_v4();
        let tour_id = Uuid::new_v4();
        let now = Utc::now();

        catalog
            .record_analytics(AnalyticsRecord {
                user_id: Some(user),
                tour_id: Some(tour_id),
                event_name: "tour_view".to_string(),
                occurred_at: now,
            })
            .await;
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
        catalog
            .record_activity(ActivityRecord {
                user_id: user,
                tour_id,
                action: "booking_created".to_string(),
                logged_at: now,
            })
            .await;
        // Unknown actions and anonymous events are dropped.
        catalog
            .record_activity(ActivityRecord {
                user_id: user,
                tour_id,
                action: "booking_cancelled".to_string(),
                logged_at: now,
            })
            .await;
        catalog
            .record_analytics(AnalyticsRecord {
                user_id: None,
                tour_id: Some(tour_id),
                event_name: "tour_view".to_string(),
                occurred_at: now,
            })
            .await;

        let events = catalog
            .interactions_since(now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events
                .iter()
                .filter(|e| e.kind == ActionKind::BookingSuccess)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_event_count_is_strictly_after() {
        let catalog = InMemoryCatalog::new();
        let user = Uuid::new_v4();
        let tour_id = Uuid::new_v4();
        let now = Utc::now();

        catalog
            .record_analytics(AnalyticsRecord {
                user_id: Some(user),
                tour_id: Some(tour_id),
                event_name: "cart_add".to_string(),
                occurred_at: now,
            })
            .await;

        assert_eq!(catalog.user_event_count_since(user, now).await.unwrap(), 0);
        assert_eq!(
            catalog
                .user_event_count_since(user, now - Duration::minutes(1))
                .await
                .unwrap(),
            1
        );
    }
}
