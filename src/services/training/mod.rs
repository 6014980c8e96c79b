use crate::algorithms::{build_tour_vectors, user_content_vector, MatrixFactorization};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::models::*;
use crate::services::aggregation::InteractionAggregator;
use crate::services::recommendation::RecommendationService;
use crate::store::FeatureStore;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Offline training orchestrator. One `run` rebuilds every derived table:
/// CF factors, content vectors, feature snapshots, popularity aggregates,
/// and finally the per-user recommendation caches.
pub struct TrainingService {
    catalog: Arc<dyn Catalog>,
    store: Arc<FeatureStore>,
    config: Arc<Config>,
    recommendation: Arc<RecommendationService>,
}

impl TrainingService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        store: Arc<FeatureStore>,
        config: Arc<Config>,
        recommendation: Arc<RecommendationService>,
    ) -> Self {
        Self {
            catalog,
            store,
            config,
            recommendation,
        }
    }

    pub async fn run(&self) -> Result<TrainingReport> {
        let now = Utc::now();
        let started = std::time::Instant::now();
        info!("training run started");

        let aggregator = InteractionAggregator::new(&self.config.aggregation);
        let matrix = aggregator.build(self.catalog.as_ref(), now).await?;

        if matrix.is_empty() {
            warn!("no interactions inside the window, skipping factorization");
        } else {
            self.train_factors(&matrix);
        }

        let tours = self.catalog.approved_tours().await?;
        self.build_content_model(&tours, &matrix.scores);
        self.snapshot_features(&tours).await?;
        self.rebuild_popularity(&tours).await?;

        let users_refreshed = self.refresh_recommendations(&matrix.user_ids).await;

        let report = TrainingReport {
            users_trained: matrix.user_ids.len(),
            tours_trained: matrix.tour_ids.len(),
            users_refreshed,
        };
        info!(
            users = report.users_trained,
            tours = report.tours_trained,
            refreshed = report.users_refreshed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "training run finished"
        );
        Ok(report)
    }

    fn train_factors(&self, matrix: &crate::services::aggregation::RatingMatrix) {
        let mut factorization = MatrixFactorization::new(&self.config.training);
        let model = factorization.fit(
            matrix.user_ids.len(),
            matrix.tour_ids.len(),
            &matrix.ratings,
        );
        if model.is_empty() {
            return;
        }

        for (idx, user_id) in matrix.user_ids.iter().enumerate() {
            self.store.upsert_embedding(Embedding::dense(
                EntityKind::UserCf,
                *user_id,
                model.user_factors[idx].clone(),
            ));
        }
        for (idx, tour_id) in matrix.tour_ids.iter().enumerate() {
            self.store.upsert_embedding(Embedding::dense(
                EntityKind::TourCf,
                *tour_id,
                model.tour_factors[idx].clone(),
            ));
        }

        info!(
            users = matrix.user_ids.len(),
            tours = matrix.tour_ids.len(),
            factors = self.config.training.sanitized().factors,
            "latent factors stored"
        );
    }

    /// TF-IDF vectors for every approved tour, then a weighted profile for
    /// every user with in-window interactions.
    fn build_content_model(&self, tours: &[Tour], scores: &HashMap<Uuid, HashMap<Uuid, f32>>) {
        let tour_vectors = build_tour_vectors(tours);
        for (tour_id, vector) in &tour_vectors {
            self.store.upsert_embedding(Embedding::sparse(
                EntityKind::TourContent,
                *tour_id,
                vector.clone(),
            ));
        }

        let mut profiles = 0usize;
        for (user_id, tour_scores) in scores {
            let profile = user_content_vector(tour_scores, &tour_vectors);
            if profile.is_empty() {
                continue;
            }
            self.store.upsert_embedding(Embedding::sparse(
                EntityKind::UserContent,
                *user_id,
                profile,
            ));
            profiles += 1;
        }

        info!(
            tours = tour_vectors.len(),
            users = profiles,
            "content model stored"
        );
    }

    async fn snapshot_features(&self, tours: &[Tour]) -> Result<()> {
        let ratings = self.catalog.rating_aggregates().await?;
        for tour in tours {
            self.store
                .upsert_feature(TourFeature::from_tour(tour, ratings.get(&tour.id)));
        }
        Ok(())
    }

    /// Lifetime popularity counts from the full canonical stream, no decay.
    async fn rebuild_popularity(&self, tours: &[Tour]) -> Result<()> {
        let events = self
            .catalog
            .interactions_since(chrono::DateTime::<Utc>::MIN_UTC)
            .await?;

        let mut counts: HashMap<Uuid, (u64, u64, u64)> = HashMap::new();
        for event in &events {
            let entry = counts.entry(event.tour_id).or_default();
            match event.kind {
                ActionKind::BookingSuccess => entry.0 += 1,
                ActionKind::WishlistAdd => entry.1 += 1,
                ActionKind::View => entry.2 += 1,
                ActionKind::CartAdd | ActionKind::ReviewSubmit => {}
            }
        }

        for tour in tours {
            let (bookings, wishlists, views) = counts.get(&tour.id).copied().unwrap_or_default();
            self.store
                .upsert_popularity(PopularityScore::overall(tour.id, bookings, wishlists, views));
        }
        Ok(())
    }

    /// Proactively regenerates the cache for every user the run touched.
    /// One failed user does not abort the sweep.
    async fn refresh_recommendations(&self, user_ids: &[Uuid]) -> usize {
        let top_k = self.config.training.sanitized().top_k;
        let mut refreshed = 0usize;
        for user_id in user_ids {
            match self.recommendation.generate_for_user(*user_id, top_k).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(user = %user_id, error = %e, "cache refresh failed"),
            }
        }
        refreshed
    }
}
