pub mod algorithms;
pub mod catalog;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use models::*;

use catalog::Catalog;
use services::recommendation::RecommendationService;
use services::training::TrainingService;
use std::sync::Arc;
use store::FeatureStore;

/// Shared engine wiring. Everything hangs off `Arc`s so the serving and
/// training halves can be driven concurrently over the same store.
#[derive(Clone)]
pub struct EngineState {
    pub config: Arc<Config>,
    pub catalog: Arc<dyn Catalog>,
    pub store: Arc<FeatureStore>,
    pub recommendation_service: Arc<RecommendationService>,
    pub training_service: Arc<TrainingService>,
}

impl EngineState {
    pub fn new(catalog: Arc<dyn Catalog>, config: Config) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(FeatureStore::new());

        let recommendation_service = Arc::new(RecommendationService::new(
            catalog.clone(),
            store.clone(),
            config.clone(),
        ));

        let training_service = Arc::new(TrainingService::new(
            catalog.clone(),
            store.clone(),
            config.clone(),
            recommendation_service.clone(),
        ));

        Self {
            config,
            catalog,
            store,
            recommendation_service,
            training_service,
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
