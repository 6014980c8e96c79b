use crate::catalog::Catalog;
use crate::config::Config;
use crate::models::*;
use crate::store::FeatureStore;
use crate::utils::{dot, sort_ranked};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Pool {
    Cf,
    Content,
    Popular,
    Fallback,
}

impl Pool {
    fn weight(&self, config: &Config) -> f32 {
        let blending = &config.blending;
        match self {
            Pool::Cf => blending.cf_weight,
            Pool::Content => blending.content_weight,
            Pool::Popular => blending.popularity_weight,
            Pool::Fallback => blending.fallback_weight,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Pool::Cf => "ml_collaborative_filtering",
            Pool::Content => "content_match",
            Pool::Popular => "popular",
            Pool::Fallback => "fallback",
        }
    }
}

/// One pool's shortlist entry, already normalized to [0, 1] against the
/// pool's own maximum.
struct PoolCandidate {
    tour_id: Uuid,
    score: f32,
}

#[derive(Default)]
struct Candidate {
    components: HashMap<Pool, f32>,
    reasons: BTreeSet<String>,
}

/// Historical preference profile for one user, derived from the canonical
/// interaction set. `interacted` drives the hard exclusion rule:
/// recommendations are for discovery, never re-surfacing.
struct UserContext {
    interacted: HashSet<Uuid>,
    favorite_destinations: HashMap<String, u32>,
    favorite_types: HashMap<String, u32>,
    favorite_tags: HashMap<String, u32>,
}

/// Request-time half of the engine: merges per-source candidate pools,
/// reranks with preference boosts, maintains the per-user cache, and
/// answers ad hoc similarity queries.
pub struct RecommendationService {
    catalog: Arc<dyn Catalog>,
    store: Arc<FeatureStore>,
    config: Arc<Config>,
}

impl RecommendationService {
    pub fn new(catalog: Arc<dyn Catalog>, store: Arc<FeatureStore>, config: Arc<Config>) -> Self {
        Self {
            catalog,
            store,
            config,
        }
    }

    /// Serves the cached list, regenerating it first when the staleness
    /// policy says so.
    pub async fn get_recommendations(&self, user_id: Uuid, limit: usize) -> Result<UserRecommendation> {
        let record = self.store.recommendation(user_id);

        let record = if self.should_refresh(user_id, record.as_ref()).await? {
            self.generate_for_user(user_id, limit.max(20)).await?
        } else {
            // should_refresh returned false, so the row exists.
            record.unwrap_or(UserRecommendation::new(user_id, vec![]))
        };

        let mut served = record;
        served.entries.truncate(limit);
        Ok(served)
    }

    /// Staleness policy: regenerate on a missing row, an empty list, an
    /// expired row, or enough fresh qualifying events.
    pub async fn should_refresh(
        &self,
        user_id: Uuid,
        record: Option<&UserRecommendation>,
    ) -> Result<bool> {
        let Some(record) = record else {
            return Ok(true);
        };
        if record.entries.is_empty() {
            return Ok(true);
        }

        let stale_after = Duration::minutes(self.config.cache.stale_minutes);
        if record.generated_at <= Utc::now() - stale_after {
            return Ok(true);
        }

        let new_events = self
            .catalog
            .user_event_count_since(user_id, record.generated_at)
            .await?;
        Ok(new_events >= self.config.cache.refresh_event_threshold)
    }

    /// Runs the full blending pipeline and replaces the user's cached list.
    pub async fn generate_for_user(&self, user_id: Uuid, limit: usize) -> Result<UserRecommendation> {
        let lock = self.store.user_lock(user_id);
        let _guard = lock.lock().await;

        let candidate_limit = (limit * 4).max(80);
        let mut entries = self.build_pipeline(user_id, candidate_limit).await?;

        // The last resort also honors the exclusion rule; a user who has
        // seen the whole catalog legitimately gets an empty list.
        if entries.is_empty() {
            let interactions = self.catalog.user_interactions(user_id).await?;
            let exclude: HashSet<Uuid> = interactions.iter().map(|e| e.tour_id).collect();
            entries = self.popular_fallback(candidate_limit, &exclude).await?;
        }

        entries.truncate(limit);
        let recommendation = UserRecommendation::new(user_id, entries);
        self.store.upsert_recommendation(recommendation.clone());

        info!(
            user = %user_id,
            count = recommendation.entries.len(),
            "regenerated recommendations"
        );
        Ok(recommendation)
    }

    /// Gathers, merges, and reranks the candidate pools. Returns up to
    /// 2x the requested limit; the caller truncates.
    async fn build_pipeline(&self, user_id: Uuid, limit: usize) -> Result<Vec<RecommendationEntry>> {
        let context = self.build_user_context(user_id).await?;
        let exclude = &context.interacted;

        let mut bucket: HashMap<Uuid, Candidate> = HashMap::new();
        merge_candidates(&mut bucket, Pool::Cf, self.collaborative_candidates(user_id, limit, exclude));
        merge_candidates(&mut bucket, Pool::Content, self.content_candidates(user_id, limit, exclude));
        merge_candidates(&mut bucket, Pool::Popular, self.popularity_candidates(limit, exclude));

        // The fallback pool only participates when nothing else produced a
        // single candidate.
        if bucket.is_empty() {
            let fallback = self.fallback_candidates(limit, exclude).await?;
            merge_candidates(&mut bucket, Pool::Fallback, fallback);
        }

        if bucket.is_empty() {
            return Ok(vec![]);
        }

        let tour_ids: Vec<Uuid> = bucket.keys().copied().collect();
        let features = self.load_features(&tour_ids).await?;
        let popularity_norm = self.normalized_popularity(&tour_ids);

        Ok(self.rerank(bucket, &features, &context, &popularity_norm, limit))
    }

    fn collaborative_candidates(
        &self,
        user_id: Uuid,
        limit: usize,
        exclude: &HashSet<Uuid>,
    ) -> Vec<PoolCandidate> {
        let Some(embedding) = self.store.embedding(EntityKind::UserCf, user_id) else {
            return vec![];
        };
        let Some(user_vector) = embedding.vector.as_dense().map(<[f32]>::to_vec) else {
            return vec![];
        };
        if user_vector.is_empty() {
            return vec![];
        }

        let mut scored: Vec<(Uuid, f32)> = self
            .store
            .embeddings_of(EntityKind::TourCf)
            .into_iter()
            .filter(|e| !exclude.contains(&e.entity_id))
            .filter_map(|e| {
                let tour_vector = e.vector.as_dense()?;
                let score = dot(&user_vector, tour_vector);
                (score > 0.0).then_some((e.entity_id, score))
            })
            .collect();

        normalize_pool(&mut scored, limit.max(self.config.blending.cf_pool_size))
    }

    fn content_candidates(
        &self,
        user_id: Uuid,
        limit: usize,
        exclude: &HashSet<Uuid>,
    ) -> Vec<PoolCandidate> {
        let Some(embedding) = self.store.embedding(EntityKind::UserContent, user_id) else {
            return vec![];
        };
        let Some(user_vector) = embedding.vector.as_sparse().cloned() else {
            return vec![];
        };
        if user_vector.is_empty() {
            return vec![];
        }

        let mut scored: Vec<(Uuid, f32)> = self
            .store
            .embeddings_of(EntityKind::TourContent)
            .into_iter()
            .filter(|e| !exclude.contains(&e.entity_id))
            .filter_map(|e| {
                let score = user_vector.dot(e.vector.as_sparse()?);
                (score > 0.0).then_some((e.entity_id, score))
            })
            .collect();

        normalize_pool(&mut scored, limit.max(self.config.blending.content_pool_size))
    }

    fn popularity_candidates(&self, limit: usize, exclude: &HashSet<Uuid>) -> Vec<PoolCandidate> {
        let pool_size = limit.max(self.config.blending.popularity_pool_size);
        let batch = self
            .store
            .top_popularity(POPULARITY_WINDOW_OVERALL, pool_size);

        let max = batch.iter().map(|p| p.score).fold(0.0_f32, f32::max);
        if max <= 0.0 {
            return vec![];
        }

        batch
            .into_iter()
            .filter(|p| p.score > 0.0 && !exclude.contains(&p.tour_id))
            .map(|p| PoolCandidate {
                tour_id: p.tour_id,
                score: p.score / max,
            })
            .collect()
    }

    async fn fallback_candidates(
        &self,
        limit: usize,
        exclude: &HashSet<Uuid>,
    ) -> Result<Vec<PoolCandidate>> {
        let fixed = self.config.blending.fallback_score;
        Ok(self
            .catalog
            .recent_approved_tours(limit)
            .await?
            .into_iter()
            .filter(|t| !exclude.contains(&t.id))
            .map(|t| PoolCandidate {
                tour_id: t.id,
                score: fixed,
            })
            .collect())
    }

    fn rerank(
        &self,
        bucket: HashMap<Uuid, Candidate>,
        features: &HashMap<Uuid, TourFeature>,
        context: &UserContext,
        popularity_norm: &HashMap<Uuid, f32>,
        limit: usize,
    ) -> Vec<RecommendationEntry> {
        let mut ranked: Vec<(Uuid, f32)> = bucket
            .iter()
            .map(|(tour_id, candidate)| {
                let mut score: f32 = candidate
                    .components
                    .iter()
                    .map(|(pool, value)| pool.weight(&self.config) * value)
                    .sum();

                score += self.preference_boost(features.get(tour_id), context);

                if let Some(pop) = popularity_norm.get(tour_id) {
                    score += self.config.blending.popularity_boost * pop;
                }

                (*tour_id, score)
            })
            .collect();

        sort_ranked(&mut ranked);
        ranked.truncate(limit * 2);

        ranked
            .into_iter()
            .map(|(tour_id, score)| RecommendationEntry {
                tour_id,
                score,
                reasons: bucket[&tour_id].reasons.iter().cloned().collect(),
            })
            .collect()
    }

    fn preference_boost(&self, feature: Option<&TourFeature>, context: &UserContext) -> f32 {
        let Some(feature) = feature else {
            return 0.0;
        };
        let blending = &self.config.blending;
        let mut bonus = 0.0;

        if !feature.destination.is_empty()
            && context.favorite_destinations.contains_key(&feature.destination)
        {
            bonus += blending.destination_boost;
        }
        if !feature.tour_type.is_empty() && context.favorite_types.contains_key(&feature.tour_type) {
            bonus += blending.type_boost;
        }
        if feature
            .tags
            .iter()
            .any(|tag| context.favorite_tags.contains_key(tag))
        {
            bonus += blending.tag_boost;
        }

        bonus
    }

    /// Stored feature snapshots, with a live catalog read for any tour that
    /// has no snapshot yet.
    async fn load_features(&self, tour_ids: &[Uuid]) -> Result<HashMap<Uuid, TourFeature>> {
        let mut features = HashMap::with_capacity(tour_ids.len());
        for tour_id in tour_ids {
            if let Some(feature) = self.store.feature(*tour_id) {
                features.insert(*tour_id, feature);
            } else if let Some(tour) = self.catalog.tour(*tour_id).await? {
                features.insert(*tour_id, TourFeature::from_tour(&tour, None));
            }
        }
        Ok(features)
    }

    fn normalized_popularity(&self, tour_ids: &[Uuid]) -> HashMap<Uuid, f32> {
        let scores: HashMap<Uuid, f32> = tour_ids
            .iter()
            .filter_map(|id| {
                self.store
                    .popularity(*id, POPULARITY_WINDOW_OVERALL)
                    .map(|p| (*id, p.score))
            })
            .collect();

        let max = scores.values().copied().fold(0.0_f32, f32::max);
        if max <= 0.0 {
            return HashMap::new();
        }
        scores.into_iter().map(|(id, s)| (id, s / max)).collect()
    }

    async fn build_user_context(&self, user_id: Uuid) -> Result<UserContext> {
        let interactions = self.catalog.user_interactions(user_id).await?;
        let interacted: HashSet<Uuid> = interactions.iter().map(|e| e.tour_id).collect();

        let mut favorite_destinations: HashMap<String, u32> = HashMap::new();
        let mut favorite_types: HashMap<String, u32> = HashMap::new();
        let mut favorite_tags: HashMap<String, u32> = HashMap::new();

        for tour_id in &interacted {
            let Some(tour) = self.catalog.tour(*tour_id).await? else {
                continue;
            };
            if !tour.destination.is_empty() {
                *favorite_destinations.entry(tour.destination).or_insert(0) += 1;
            }
            if !tour.tour_type.is_empty() {
                *favorite_types.entry(tour.tour_type).or_insert(0) += 1;
            }
            for tag in tour.tags {
                *favorite_tags.entry(tag).or_insert(0) += 1;
            }
        }

        Ok(UserContext {
            interacted,
            favorite_destinations,
            favorite_types,
            favorite_tags,
        })
    }

    /// Popularity-ordered list used when the pipeline yields nothing, and
    /// as a public fallback surface. Falls back again to the most recently
    /// published tours when no popularity rows exist.
    pub async fn popular_fallback(
        &self,
        limit: usize,
        exclude: &HashSet<Uuid>,
    ) -> Result<Vec<RecommendationEntry>> {
        let entries: Vec<RecommendationEntry> = self
            .store
            .top_popularity(POPULARITY_WINDOW_OVERALL, limit + exclude.len())
            .into_iter()
            .filter(|p| !exclude.contains(&p.tour_id))
            .take(limit)
            .map(|p| RecommendationEntry {
                tour_id: p.tour_id,
                score: p.score,
                reasons: vec!["popular".to_string()],
            })
            .collect();

        if !entries.is_empty() {
            return Ok(entries);
        }

        Ok(self
            .catalog
            .recent_approved_tours((limit * 3).max(10))
            .await?
            .into_iter()
            .filter(|t| !exclude.contains(&t.id))
            .take(limit)
            .map(|t| RecommendationEntry {
                tour_id: t.id,
                score: 1.0,
                reasons: vec!["recent".to_string()],
            })
            .collect())
    }

    /// "Tours similar to X": stored content vectors when available, a
    /// metadata heuristic otherwise. Scores are normalized to [0, 1] on
    /// both paths and the source tour is never returned.
    pub async fn similar_tours(&self, tour_id: Uuid, limit: usize) -> Result<Vec<RecommendationEntry>> {
        let base = self
            .store
            .embedding(EntityKind::TourContent, tour_id)
            .and_then(|e| e.vector.as_sparse().cloned())
            .filter(|v| !v.is_empty());

        let Some(base_vector) = base else {
            return self.heuristic_similar_tours(tour_id, limit).await;
        };

        let mut scored: Vec<(Uuid, f32)> = self
            .store
            .embeddings_of(EntityKind::TourContent)
            .into_iter()
            .filter(|e| e.entity_id != tour_id)
            .filter_map(|e| {
                let score = base_vector.dot(e.vector.as_sparse()?);
                (score > 0.0).then_some((e.entity_id, score))
            })
            .collect();

        if scored.is_empty() {
            return self.heuristic_similar_tours(tour_id, limit).await;
        }

        sort_ranked(&mut scored);
        scored.truncate((limit * 3).max(30));

        let max = scored[0].1;
        let entries = scored
            .into_iter()
            .take(limit)
            .map(|(id, score)| RecommendationEntry {
                tour_id: id,
                score: score / max,
                reasons: vec!["content_match".to_string()],
            })
            .collect();
        Ok(entries)
    }

    /// Tag/destination/type heuristic for tours that have no content
    /// vector. O(catalog size).
    async fn heuristic_similar_tours(
        &self,
        tour_id: Uuid,
        limit: usize,
    ) -> Result<Vec<RecommendationEntry>> {
        let Some(source) = self.catalog.tour(tour_id).await? else {
            return Ok(vec![]);
        };

        let mut tag_counts: HashMap<&str, u32> = HashMap::new();
        for tag in &source.tags {
            *tag_counts.entry(tag.as_str()).or_insert(0) += 1;
        }
        let tag_total: u32 = tag_counts.values().sum();

        let mut scored: Vec<(Uuid, f32, Vec<String>)> = Vec::new();
        for candidate in self.catalog.approved_tours().await? {
            if candidate.id == tour_id {
                continue;
            }

            let matched: u32 = candidate
                .tags
                .iter()
                .filter_map(|tag| tag_counts.get(tag.as_str()))
                .sum();
            let tag_score = if tag_total > 0 {
                matched as f32 / tag_total as f32
            } else {
                0.0
            };
            let destination_score =
                if !source.destination.is_empty() && candidate.destination == source.destination {
                    1.0
                } else {
                    0.0
                };
            let type_score = if !source.tour_type.is_empty() && candidate.tour_type == source.tour_type
            {
                0.5
            } else {
                0.0
            };

            let score = tag_score * 3.0 + destination_score + type_score;
            if score <= 0.0 {
                continue;
            }

            let mut reasons = Vec::new();
            if tag_score > 0.0 {
                reasons.push("shared_tags".to_string());
            }
            if destination_score > 0.0 {
                reasons.push("same_destination".to_string());
            }
            if type_score > 0.0 {
                reasons.push("same_type".to_string());
            }
            scored.push((candidate.id, score, reasons));
        }

        if scored.is_empty() {
            return Ok(vec![]);
        }

        let max = scored.iter().map(|(_, s, _)| *s).fold(0.0_f32, f32::max);
        let mut ranked: Vec<(Uuid, f32)> = scored.iter().map(|(id, s, _)| (*id, *s)).collect();
        sort_ranked(&mut ranked);
        let reasons_by_id: HashMap<Uuid, Vec<String>> =
            scored.into_iter().map(|(id, _, r)| (id, r)).collect();

        debug!(tour = %tour_id, "similarity served from metadata heuristic");

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(id, score)| RecommendationEntry {
                tour_id: id,
                score: score / max,
                reasons: reasons_by_id[&id].clone(),
            })
            .collect())
    }
}

fn merge_candidates(bucket: &mut HashMap<Uuid, Candidate>, pool: Pool, candidates: Vec<PoolCandidate>) {
    for item in candidates {
        let entry = bucket.entry(item.tour_id).or_default();
        let component = entry.components.entry(pool).or_insert(0.0);
        *component = component.max(item.score);
        entry.reasons.insert(pool.reason().to_string());
    }
}

/// Sorts, caps, and divides a pool by its own maximum raw score.
fn normalize_pool(scored: &mut Vec<(Uuid, f32)>, cap: usize) -> Vec<PoolCandidate> {
    if scored.is_empty() {
        return vec![];
    }

    sort_ranked(scored);
    scored.truncate(cap);

    let max = scored[0].1;
    scored
        .iter()
        .map(|(tour_id, score)| PoolCandidate {
            tour_id: *tour_id,
            score: if max > 0.0 { score / max } else { 0.0 },
        })
        .collect()
}
