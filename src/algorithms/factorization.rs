use crate::config::TrainingConfig;
use crate::utils::{dot, sanitize_vector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Learned latent factors, row-aligned with the rating matrix's user and
/// tour index orders.
#[derive(Debug, Clone, Default)]
pub struct FactorModel {
    pub user_factors: Vec<Vec<f32>>,
    pub tour_factors: Vec<Vec<f32>>,
}

impl FactorModel {
    pub fn is_empty(&self) -> bool {
        self.user_factors.is_empty() || self.tour_factors.is_empty()
    }

    pub fn predict(&self, user_idx: usize, tour_idx: usize) -> f32 {
        dot(&self.user_factors[user_idx], &self.tour_factors[tour_idx])
    }
}

/// Latent-factor trainer: plain SGD over (user, tour, rating) triples with
/// L2 regularization. The RNG is owned and seeded so a run is reproducible.
pub struct MatrixFactorization {
    factors: usize,
    iterations: usize,
    learning_rate: f32,
    regularization: f32,
    rng: StdRng,
}

impl MatrixFactorization {
    pub fn new(config: &TrainingConfig) -> Self {
        let config = config.sanitized();
        Self {
            factors: config.factors,
            iterations: config.iterations,
            learning_rate: config.learning_rate,
            regularization: config.regularization,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Small positive values scaled by 1/factors.
    fn init_matrix(&mut self, rows: usize) -> Vec<Vec<f32>> {
        let scale = 1.0 / self.factors as f32;
        (0..rows)
            .map(|_| (0..self.factors).map(|_| self.rng.gen::<f32>() * scale).collect())
            .collect()
    }

    /// Trains over the triples and returns the factor matrices. An empty
    /// rating set is a no-op yielding an empty model.
    pub fn fit(
        &mut self,
        user_count: usize,
        tour_count: usize,
        ratings: &[(usize, usize, f32)],
    ) -> FactorModel {
        if ratings.is_empty() || user_count == 0 || tour_count == 0 {
            return FactorModel::default();
        }

        let mut user_factors = self.init_matrix(user_count);
        let mut tour_factors = self.init_matrix(tour_count);
        let mut order: Vec<usize> = (0..ratings.len()).collect();

        for _ in 0..self.iterations {
            order.shuffle(&mut self.rng);

            for &idx in &order {
                let (u, i, rating) = ratings[idx];
                let prediction = dot(&user_factors[u], &tour_factors[i]);
                let error = rating - prediction;

                for k in 0..self.factors {
                    // Both old values are read before either side is written.
                    let user_value = user_factors[u][k];
                    let tour_value = tour_factors[i][k];

                    user_factors[u][k] +=
                        self.learning_rate * (error * tour_value - self.regularization * user_value);
                    tour_factors[i][k] +=
                        self.learning_rate * (error * user_value - self.regularization * tour_value);
                }
            }
        }

        for row in user_factors.iter_mut().chain(tour_factors.iter_mut()) {
            sanitize_vector(row);
        }

        FactorModel {
            user_factors,
            tour_factors,
        }
    }
}
