use crate::utils::SparseVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical implicit-feedback action set. Every raw source (analytics
/// stream, booking table, wishlist table, legacy activity log) maps onto
/// these five kinds before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    View,
    WishlistAdd,
    CartAdd,
    BookingSuccess,
    ReviewSubmit,
}

impl ActionKind {
    pub fn base_weight(&self) -> f32 {
        match self {
            ActionKind::View => 1.0,
            ActionKind::WishlistAdd => 3.0,
            ActionKind::CartAdd => 4.0,
            ActionKind::BookingSuccess => 6.0,
            ActionKind::ReviewSubmit => 5.0,
        }
    }

    /// Analytics stream event names.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "tour_view" => Some(ActionKind::View),
            "wishlist_add" => Some(ActionKind::WishlistAdd),
            "cart_add" => Some(ActionKind::CartAdd),
            "booking_success" => Some(ActionKind::BookingSuccess),
            "review_submit" => Some(ActionKind::ReviewSubmit),
            _ => None,
        }
    }

    /// Legacy activity-log action vocabulary. Cancellations carry no
    /// preference signal and are dropped.
    pub fn from_activity_action(action: &str) -> Option<Self> {
        match action {
            "tour_view" => Some(ActionKind::View),
            "wishlist_add" => Some(ActionKind::WishlistAdd),
            "cart_add" => Some(ActionKind::CartAdd),
            "booking_created" => Some(ActionKind::BookingSuccess),
            "review_submitted" => Some(ActionKind::ReviewSubmit),
            _ => None,
        }
    }
}

/// A single canonical interaction. Duplicates across sources are kept and
/// summed by the aggregator, never deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: Uuid,
    pub tour_id: Uuid,
    pub kind: ActionKind,
    pub occurred_at: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(user_id: Uuid, tour_id: Uuid, kind: ActionKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            tour_id,
            kind,
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TourStatus {
    Pending,
    Approved,
    Archived,
}

/// Catalog item metadata as supplied by the external catalog subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub destination: String,
    pub tour_type: String,
    pub tags: Vec<String>,
    pub duration_days: u32,
    pub base_price: f64,
    pub policy: String,
    pub itinerary: Vec<String>,
    pub child_age_limit: u32,
    pub requires_passport: bool,
    pub requires_visa: bool,
    pub status: TourStatus,
    pub published_at: DateTime<Utc>,
}

impl Tour {
    pub fn is_approved(&self) -> bool {
        self.status == TourStatus::Approved
    }
}

/// Average rating and count, sourced from the reviews subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingAggregate {
    pub tour_id: Uuid,
    pub avg_rating: f32,
    pub rating_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    UserCf,
    TourCf,
    UserContent,
    TourContent,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::UserCf => "user_cf",
            EntityKind::TourCf => "tour_cf",
            EntityKind::UserContent => "user_content",
            EntityKind::TourContent => "tour_content",
        }
    }
}

/// Dense latent-factor vectors for CF entities, sparse term-weight vectors
/// for content entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmbeddingVector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

impl EmbeddingVector {
    pub fn is_empty(&self) -> bool {
        match self {
            EmbeddingVector::Dense(v) => v.is_empty(),
            EmbeddingVector::Sparse(v) => v.is_empty(),
        }
    }

    pub fn as_dense(&self) -> Option<&[f32]> {
        match self {
            EmbeddingVector::Dense(v) => Some(v),
            EmbeddingVector::Sparse(_) => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&SparseVector> {
        match self {
            EmbeddingVector::Sparse(v) => Some(v),
            EmbeddingVector::Dense(_) => None,
        }
    }
}

/// Persisted vector, upserted by (entity_kind, entity_id). A training run
/// replaces the prior row atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub vector: EmbeddingVector,
    pub generated_at: DateTime<Utc>,
}

impl Embedding {
    pub fn dense(kind: EntityKind, entity_id: Uuid, vector: Vec<f32>) -> Self {
        Self {
            entity_kind: kind,
            entity_id,
            vector: EmbeddingVector::Dense(vector),
            generated_at: Utc::now(),
        }
    }

    pub fn sparse(kind: EntityKind, entity_id: Uuid, vector: SparseVector) -> Self {
        Self {
            entity_kind: kind,
            entity_id,
            vector: EmbeddingVector::Sparse(vector),
            generated_at: Utc::now(),
        }
    }
}

/// Cached per-tour feature snapshot used for preference boosts. Falls back
/// to a live catalog read when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourFeature {
    pub tour_id: Uuid,
    pub destination: String,
    pub tour_type: String,
    pub tags: Vec<String>,
    pub duration_days: u32,
    pub base_price: f64,
    pub child_age_limit: u32,
    pub requires_passport: bool,
    pub requires_visa: bool,
    pub avg_rating: Option<f32>,
    pub rating_count: u32,
    pub calculated_at: DateTime<Utc>,
}

impl TourFeature {
    pub fn from_tour(tour: &Tour, rating: Option<&RatingAggregate>) -> Self {
        Self {
            tour_id: tour.id,
            destination: tour.destination.clone(),
            tour_type: tour.tour_type.clone(),
            tags: tour.tags.clone(),
            duration_days: tour.duration_days,
            base_price: tour.base_price,
            child_age_limit: tour.child_age_limit,
            requires_passport: tour.requires_passport,
            requires_visa: tour.requires_visa,
            avg_rating: rating.map(|r| r.avg_rating),
            rating_count: rating.map(|r| r.rating_count).unwrap_or(0),
            calculated_at: Utc::now(),
        }
    }
}

pub const POPULARITY_WINDOW_OVERALL: &str = "overall";

/// Lifetime (non-decayed) popularity aggregate, unique per (tour, window).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularityScore {
    pub tour_id: Uuid,
    pub bookings_count: u64,
    pub wishlist_count: u64,
    pub views_count: u64,
    pub score: f32,
    pub window: String,
}

impl PopularityScore {
    pub fn overall(tour_id: Uuid, bookings: u64, wishlists: u64, views: u64) -> Self {
        Self {
            tour_id,
            bookings_count: bookings,
            wishlist_count: wishlists,
            views_count: views,
            score: Self::compute(bookings, wishlists, views),
            window: POPULARITY_WINDOW_OVERALL.to_string(),
        }
    }

    pub fn compute(bookings: u64, wishlists: u64, views: u64) -> f32 {
        bookings as f32 * 3.0 + wishlists as f32 * 2.0 + views as f32 * 0.5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationEntry {
    pub tour_id: Uuid,
    pub score: f32,
    pub reasons: Vec<String>,
}

/// The per-user cache row. Exactly one live row per user; every generation
/// is a full-list replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecommendation {
    pub user_id: Uuid,
    pub entries: Vec<RecommendationEntry>,
    pub generated_at: DateTime<Utc>,
}

impl UserRecommendation {
    pub fn new(user_id: Uuid, entries: Vec<RecommendationEntry>) -> Self {
        Self {
            user_id,
            entries,
            generated_at: Utc::now(),
        }
    }
}

/// Result of one offline training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub users_trained: usize,
    pub tours_trained: usize,
    pub users_refreshed: usize,
}
