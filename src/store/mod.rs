use crate::models::*;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Embedding/feature store. Every table is keyed for atomic upsert, so a
/// training run replaces rows without a read-then-write race. Concurrent
/// cache regenerations for the same user are serialized through
/// [`FeatureStore::user_lock`].
#[derive(Default)]
pub struct FeatureStore {
    embeddings: DashMap<(EntityKind, Uuid), Embedding>,
    features: DashMap<Uuid, TourFeature>,
    popularity: DashMap<(Uuid, String), PopularityScore>,
    recommendations: DashMap<Uuid, UserRecommendation>,
    regen_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_embedding(&self, embedding: Embedding) {
        self.embeddings
            .insert((embedding.entity_kind, embedding.entity_id), embedding);
    }

    pub fn embedding(&self, kind: EntityKind, entity_id: Uuid) -> Option<Embedding> {
        self.embeddings
            .get(&(kind, entity_id))
            .map(|e| e.value().clone())
    }

    pub fn embeddings_of(&self, kind: EntityKind) -> Vec<Embedding> {
        self.embeddings
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn upsert_feature(&self, feature: TourFeature) {
        self.features.insert(feature.tour_id, feature);
    }

    pub fn feature(&self, tour_id: Uuid) -> Option<TourFeature> {
        self.features.get(&tour_id).map(|f| f.value().clone())
    }

    pub fn upsert_popularity(&self, popularity: PopularityScore) {
        self.popularity
            .insert((popularity.tour_id, popularity.window.clone()), popularity);
    }

    pub fn popularity(&self, tour_id: Uuid, window: &str) -> Option<PopularityScore> {
        self.popularity
            .get(&(tour_id, window.to_string()))
            .map(|p| p.value().clone())
    }

    /// Top scores for a window, descending with ascending tour id breaking
    /// ties.
    pub fn top_popularity(&self, window: &str, limit: usize) -> Vec<PopularityScore> {
        let mut scores: Vec<PopularityScore> = self
            .popularity
            .iter()
            .filter(|entry| entry.key().1 == window)
            .map(|entry| entry.value().clone())
            .collect();

        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tour_id.cmp(&b.tour_id))
        });
        scores.truncate(limit);
        scores
    }

    /// Full-list replacement of the user's cached recommendations.
    pub fn upsert_recommendation(&self, recommendation: UserRecommendation) {
        self.recommendations
            .insert(recommendation.user_id, recommendation);
    }

    pub fn recommendation(&self, user_id: Uuid) -> Option<UserRecommendation> {
        self.recommendations
            .get(&user_id)
            .map(|r| r.value().clone())
    }

    /// Lock guarding cache regeneration for one user. The guard is held
    /// across await points, hence the async mutex.
    pub fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.regen_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn embedding_count(&self) -> usize {
        self.embeddings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SparseVector;

    #[test]
    fn test_embedding_upsert_replaces() {
        let store = FeatureStore::new();
        let id = Uuid::new_v4();

        store.upsert_embedding(Embedding::dense(EntityKind::UserCf, id, vec![1.0, 2.0]));
        store.upsert_embedding(Embedding::dense(EntityKind::UserCf, id, vec![3.0, 4.0]));

        let stored = store.embedding(EntityKind::UserCf, id).unwrap();
        assert_eq!(stored.vector.as_dense().unwrap(), &[3.0, 4.0]);
        assert_eq!(store.embedding_count(), 1);
    }

    #[test]
    fn test_embeddings_keyed_by_kind() {
        let store = FeatureStore::new();
        let id = Uuid::new_v4();

        store.upsert_embedding(Embedding::dense(EntityKind::TourCf, id, vec![1.0]));
        store.upsert_embedding(Embedding::sparse(
            EntityKind::TourContent,
            id,
            SparseVector::new(),
        ));

        assert_eq!(store.embeddings_of(EntityKind::TourCf).len(), 1);
        assert_eq!(store.embeddings_of(EntityKind::TourContent).len(), 1);
        assert!(store.embedding(EntityKind::UserCf, id).is_none());
    }

    #[test]
    fn test_top_popularity_ordering() {
        let store = FeatureStore::new();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);

        store.upsert_popularity(PopularityScore::overall(b, 1, 0, 0));
        store.upsert_popularity(PopularityScore::overall(a, 1, 0, 0));
        store.upsert_popularity(PopularityScore::overall(c, 5, 0, 0));

        let top = store.top_popularity(POPULARITY_WINDOW_OVERALL, 3);
        assert_eq!(top[0].tour_id, c);
        // Equal scores fall back to ascending tour id.
        assert_eq!(top[1].tour_id, a);
        assert_eq!(top[2].tour_id, b);
    }

    #[test]
    fn test_recommendation_full_replace() {
        let store = FeatureStore::new();
        let user = Uuid::new_v4();

        store.upsert_recommendation(UserRecommendation::new(
            user,
            vec![RecommendationEntry {
                tour_id: Uuid::new_v4(),
                score: 0.9,
                reasons: vec!["popular".to_string()],
            }],
        ));
        store.upsert_recommendation(UserRecommendation::new(user, vec![]));

        assert!(store.recommendation(user).unwrap().entries.is_empty());
    }
}
