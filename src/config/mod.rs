use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub aggregation: AggregationConfig,
    pub training: TrainingConfig,
    pub blending: BlendingConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Exponential half-life for implicit-feedback decay, in days.
    pub half_life_days: f32,
    /// Only events inside this window feed the rating matrix.
    pub window_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub factors: usize,
    pub iterations: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    pub top_k: usize,
    /// RNG seed for factor initialization and epoch shuffles.
    pub seed: u64,
}

impl TrainingConfig {
    /// Clamps every hyperparameter to its enforced minimum.
    pub fn sanitized(&self) -> Self {
        Self {
            factors: self.factors.max(2),
            iterations: self.iterations.max(1),
            learning_rate: self.learning_rate.max(0.0001),
            regularization: self.regularization.max(0.0001),
            top_k: self.top_k.max(1),
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendingConfig {
    pub cf_weight: f32,
    pub content_weight: f32,
    pub popularity_weight: f32,
    pub fallback_weight: f32,
    pub cf_pool_size: usize,
    pub content_pool_size: usize,
    pub popularity_pool_size: usize,
    pub destination_boost: f32,
    pub type_boost: f32,
    pub tag_boost: f32,
    pub popularity_boost: f32,
    pub fallback_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// A cached list older than this is regenerated.
    pub stale_minutes: i64,
    /// Regenerate once this many qualifying events arrive after generation.
    pub refresh_event_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aggregation: AggregationConfig {
                half_life_days: 14.0,
                window_days: 365,
            },
            training: TrainingConfig {
                factors: 16,
                iterations: 15,
                learning_rate: 0.05,
                regularization: 0.01,
                top_k: 50,
                seed: 42,
            },
            blending: BlendingConfig {
                cf_weight: 0.6,
                content_weight: 0.3,
                popularity_weight: 0.1,
                fallback_weight: 0.05,
                cf_pool_size: 100,
                content_pool_size: 120,
                popularity_pool_size: 120,
                destination_boost: 0.08,
                type_boost: 0.06,
                tag_boost: 0.05,
                popularity_boost: 0.02,
                fallback_score: 0.4,
            },
            cache: CacheConfig {
                stale_minutes: 30,
                refresh_event_threshold: 2,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("TOURREC"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_minimums_enforced() {
        let cfg = TrainingConfig {
            factors: 0,
            iterations: 0,
            learning_rate: 0.0,
            regularization: -1.0,
            top_k: 0,
            seed: 7,
        }
        .sanitized();

        assert_eq!(cfg.factors, 2);
        assert_eq!(cfg.iterations, 1);
        assert!((cfg.learning_rate - 0.0001).abs() < 1e-9);
        assert!((cfg.regularization - 0.0001).abs() < 1e-9);
        assert_eq!(cfg.top_k, 1);
    }

    #[test]
    fn test_defaults_untouched_by_sanitize() {
        let cfg = Config::default().training;
        let sane = cfg.sanitized();
        assert_eq!(sane.factors, cfg.factors);
        assert_eq!(sane.iterations, cfg.iterations);
    }
}
