use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::Feedback;
use crate::store::{cache, CacheStore, DataStore, Scored};

use super::top_k::TopKFilter;

/// One stage of the recommendation pipeline. The offline stage always runs
/// first; the rest form the configured fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommender {
    Offline,
    Collaborative,
    ItemBased,
    UserBased,
    Latest,
    Popular,
}

impl FromStr for Recommender {
    type Err = AppError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "collaborative" => Ok(Self::Collaborative),
            "item_based" => Ok(Self::ItemBased),
            "user_based" => Ok(Self::UserBased),
            "latest" => Ok(Self::Latest),
            "popular" => Ok(Self::Popular),
            _ => Err(AppError::Internal(format!(
                "unknown fallback recommendation method `{}`",
                name
            ))),
        }
    }
}

/// Mutable per-request state threaded through the pipeline stages.
#[derive(Debug, Default)]
pub struct RecommendContext {
    pub user_id: String,
    pub category: String,
    pub n: usize,
    pub results: Vec<String>,
    pub exclude_set: HashSet<String>,
    pub user_feedback: Option<Vec<Feedback>>,

    pub num_prev_stage: usize,
    pub num_from_offline: usize,
    pub num_from_collaborative: usize,
    pub num_from_item_based: usize,
    pub num_from_user_based: usize,
    pub num_from_latest: usize,
    pub num_from_popular: usize,

    pub load_offline_rec_time: Duration,
    pub load_col_rec_time: Duration,
    pub load_hist_time: Duration,
    pub item_based_time: Duration,
    pub user_based_time: Duration,
    pub load_latest_time: Duration,
    pub load_popular_time: Duration,
}

/// Serves recommendations by composing ranked lists from the cache store
/// with feedback and item rows from the data store.
pub struct RecommendationService {
    pub cache: Arc<dyn CacheStore>,
    pub data: Arc<dyn DataStore>,
    pub config: Arc<Config>,
}

impl RecommendationService {
    pub fn new(cache: Arc<dyn CacheStore>, data: Arc<dyn DataStore>, config: Arc<Config>) -> Self {
        Self {
            cache,
            data,
            config,
        }
    }

    /// Recommends items to a user.
    ///
    /// 1. If there are precomputed recommendations in the cache, return those.
    /// 2. If the user has historical interactions, return similar items.
    /// 3. Otherwise fall back to unpersonalized lists (popular/latest).
    pub async fn recommend(
        &self,
        user_id: &str,
        category: &str,
        n: usize,
        recommenders: &[Recommender],
    ) -> AppResult<Vec<String>> {
        let ctx = self.run_pipeline(user_id, category, n, recommenders).await?;
        Ok(ctx.results)
    }

    /// Runs the pipeline and returns the full context with per-stage
    /// counters and timings.
    pub async fn run_pipeline(
        &self,
        user_id: &str,
        category: &str,
        n: usize,
        recommenders: &[Recommender],
    ) -> AppResult<RecommendContext> {
        let init_start = Instant::now();
        let mut ctx = self.create_recommend_context(user_id, category, n).await?;

        for recommender in recommenders {
            if ctx.results.len() >= n {
                break;
            }
            match recommender {
                Recommender::Offline => self.recommend_offline(&mut ctx).await?,
                Recommender::Collaborative => self.recommend_collaborative(&mut ctx).await?,
                Recommender::ItemBased => self.recommend_item_based(&mut ctx).await?,
                Recommender::UserBased => self.recommend_user_based(&mut ctx).await?,
                Recommender::Latest => self.recommend_latest(&mut ctx).await?,
                Recommender::Popular => self.recommend_popular(&mut ctx).await?,
            }
        }

        ctx.results.truncate(n);
        tracing::info!(
            user_id = %ctx.user_id,
            num_from_offline = ctx.num_from_offline,
            num_from_collaborative = ctx.num_from_collaborative,
            num_from_item_based = ctx.num_from_item_based,
            num_from_user_based = ctx.num_from_user_based,
            num_from_latest = ctx.num_from_latest,
            num_from_popular = ctx.num_from_popular,
            total_time = ?init_start.elapsed(),
            load_offline_recommend_time = ?ctx.load_offline_rec_time,
            load_collaborative_recommend_time = ?ctx.load_col_rec_time,
            load_hist_time = ?ctx.load_hist_time,
            item_based_recommend_time = ?ctx.item_based_time,
            user_based_recommend_time = ?ctx.user_based_time,
            load_latest_time = ?ctx.load_latest_time,
            load_popular_time = ?ctx.load_popular_time,
            "Complete recommendation"
        );
        Ok(ctx)
    }

    /// Seeds the per-request context. Ignored items whose expiry is not in
    /// the future go straight into the exclusion set.
    async fn create_recommend_context(
        &self,
        user_id: &str,
        category: &str,
        n: usize,
    ) -> AppResult<RecommendContext> {
        let ignored = self
            .cache
            .get_scores(cache::IGNORE_ITEMS, user_id, 0, -1)
            .await?;
        let now = Utc::now().timestamp() as f32;
        let mut exclude_set = HashSet::new();
        for entry in ignored {
            if entry.score <= now {
                exclude_set.insert(entry.id);
            }
        }
        Ok(RecommendContext {
            user_id: user_id.to_string(),
            category: category.to_string(),
            n,
            exclude_set,
            ..RecommendContext::default()
        })
    }

    /// Loads the user's feedback once per request and excludes every item
    /// the user has already interacted with.
    async fn require_user_feedback(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.user_feedback.is_none() {
            let start = Instant::now();
            let feedback = self
                .data
                .get_user_feedback(&ctx.user_id, false, &[])
                .await?;
            for row in &feedback {
                ctx.exclude_set.insert(row.key.item_id.clone());
            }
            ctx.user_feedback = Some(feedback);
            ctx.load_hist_time = start.elapsed();
        }
        Ok(())
    }

    /// Drops entries flagged in the hidden-items keyspace. A failing check
    /// is logged and the input returned unfiltered, trading strictness for
    /// availability.
    async fn filter_out_hidden_scores(&self, items: Vec<Scored>) -> Vec<Scored> {
        let ids: Vec<String> = items.iter().map(|entry| entry.id.clone()).collect();
        match self.cache.exists(cache::HIDDEN_ITEMS, &ids).await {
            Ok(flags) => items
                .into_iter()
                .zip(flags)
                .filter(|(_, hidden)| *hidden == 0)
                .map(|(entry, _)| entry)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to check hidden items");
                items
            }
        }
    }

    /// Same fail-open policy as `filter_out_hidden_scores`, over feedback rows.
    async fn filter_out_hidden_feedback(&self, feedback: Vec<Feedback>) -> Vec<Feedback> {
        let ids: Vec<String> = feedback
            .iter()
            .map(|row| row.key.item_id.clone())
            .collect();
        match self.cache.exists(cache::HIDDEN_ITEMS, &ids).await {
            Ok(flags) => feedback
                .into_iter()
                .zip(flags)
                .filter(|(_, hidden)| *hidden == 0)
                .map(|(row, _)| row)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to check hidden items");
                feedback
            }
        }
    }

    fn candidate_fetch_end(&self) -> isize {
        self.config.cache_size as isize - 1
    }

    /// Appends ids from a producer-ranked list, skipping excluded ones.
    fn append_ranked(ctx: &mut RecommendContext, entries: Vec<Scored>) {
        for entry in entries {
            if !ctx.exclude_set.contains(&entry.id) {
                ctx.exclude_set.insert(entry.id.clone());
                ctx.results.push(entry.id);
            }
        }
    }

    /// Ranks a candidate map and appends the best `n - len(results)` ids.
    fn append_top_k(ctx: &mut RecommendContext, candidates: HashMap<String, f32>) {
        let k = ctx.n - ctx.results.len();
        let mut filter = TopKFilter::new(k);
        for (id, score) in candidates {
            filter.push(id, score);
        }
        for entry in filter.pop_all() {
            ctx.exclude_set.insert(entry.id.clone());
            ctx.results.push(entry.id);
        }
    }

    fn end_stage(ctx: &mut RecommendContext) -> usize {
        let contributed = ctx.results.len() - ctx.num_prev_stage;
        ctx.num_prev_stage = ctx.results.len();
        contributed
    }

    pub async fn recommend_offline(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.results.len() < ctx.n {
            let start = Instant::now();
            let recommendation = self
                .cache
                .get_category_scores(
                    cache::OFFLINE_RECOMMEND,
                    &ctx.user_id,
                    &ctx.category,
                    0,
                    self.candidate_fetch_end(),
                )
                .await?;
            let recommendation = self.filter_out_hidden_scores(recommendation).await;
            Self::append_ranked(ctx, recommendation);
            ctx.load_offline_rec_time = start.elapsed();
            metrics::LOAD_CTR_RECOMMEND_CACHE_SECONDS
                .observe(ctx.load_offline_rec_time.as_secs_f64());
            ctx.num_from_offline = Self::end_stage(ctx);
        }
        Ok(())
    }

    pub async fn recommend_collaborative(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.results.len() < ctx.n {
            let start = Instant::now();
            let recommendation = self
                .cache
                .get_category_scores(
                    cache::COLLABORATIVE_RECOMMEND,
                    &ctx.user_id,
                    &ctx.category,
                    0,
                    self.candidate_fetch_end(),
                )
                .await?;
            let recommendation = self.filter_out_hidden_scores(recommendation).await;
            Self::append_ranked(ctx, recommendation);
            ctx.load_col_rec_time = start.elapsed();
            metrics::LOAD_COLLABORATIVE_RECOMMEND_CACHE_SECONDS
                .observe(ctx.load_col_rec_time.as_secs_f64());
            ctx.num_from_collaborative = Self::end_stage(ctx);
        }
        Ok(())
    }

    pub async fn recommend_user_based(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.results.len() < ctx.n {
            self.require_user_feedback(ctx).await?;
            let start = Instant::now();
            let mut candidates: HashMap<String, f32> = HashMap::new();
            // accumulate items liked by similar users, weighted by similarity
            let similar_users = self
                .cache
                .get_scores(
                    cache::USER_NEIGHBORS,
                    &ctx.user_id,
                    0,
                    self.candidate_fetch_end(),
                )
                .await?;
            for user in similar_users {
                let feedback = self
                    .data
                    .get_user_feedback(&user.id, false, &self.config.positive_feedback_types)
                    .await?;
                let feedback = self.filter_out_hidden_feedback(feedback).await;
                for row in feedback {
                    if !ctx.exclude_set.contains(&row.key.item_id) {
                        let item = self.data.get_item(&row.key.item_id).await?;
                        if ctx.category.is_empty() || item.categories.contains(&ctx.category) {
                            *candidates.entry(row.key.item_id).or_insert(0.0) += user.score;
                        }
                    }
                }
            }
            Self::append_top_k(ctx, candidates);
            ctx.user_based_time = start.elapsed();
            metrics::USER_BASED_RECOMMEND_SECONDS.observe(ctx.user_based_time.as_secs_f64());
            ctx.num_from_user_based = Self::end_stage(ctx);
        }
        Ok(())
    }

    pub async fn recommend_item_based(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.results.len() < ctx.n {
            self.require_user_feedback(ctx).await?;
            let start = Instant::now();
            // accumulate neighbors of items in the user's history
            let mut candidates: HashMap<String, f32> = HashMap::new();
            let history = ctx.user_feedback.clone().unwrap_or_default();
            for row in &history {
                let similar_items = self
                    .cache
                    .get_category_scores(
                        cache::ITEM_NEIGHBORS,
                        &row.key.item_id,
                        &ctx.category,
                        0,
                        self.candidate_fetch_end(),
                    )
                    .await?;
                let similar_items = self.filter_out_hidden_scores(similar_items).await;
                for entry in similar_items {
                    if !ctx.exclude_set.contains(&entry.id) {
                        *candidates.entry(entry.id).or_insert(0.0) += entry.score;
                    }
                }
            }
            Self::append_top_k(ctx, candidates);
            ctx.item_based_time = start.elapsed();
            metrics::ITEM_BASED_RECOMMEND_SECONDS.observe(ctx.item_based_time.as_secs_f64());
            ctx.num_from_item_based = Self::end_stage(ctx);
        }
        Ok(())
    }

    pub async fn recommend_latest(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.results.len() < ctx.n {
            self.require_user_feedback(ctx).await?;
            let start = Instant::now();
            let wanted = (ctx.n - ctx.results.len()) as isize;
            let items = self
                .cache
                .get_scores(cache::LATEST_ITEMS, &ctx.category, 0, wanted - 1)
                .await?;
            let items = self.filter_out_hidden_scores(items).await;
            Self::append_ranked(ctx, items);
            ctx.load_latest_time = start.elapsed();
            metrics::LOAD_LATEST_RECOMMEND_CACHE_SECONDS
                .observe(ctx.load_latest_time.as_secs_f64());
            ctx.num_from_latest = Self::end_stage(ctx);
        }
        Ok(())
    }

    pub async fn recommend_popular(&self, ctx: &mut RecommendContext) -> AppResult<()> {
        if ctx.results.len() < ctx.n {
            self.require_user_feedback(ctx).await?;
            let start = Instant::now();
            let wanted = (ctx.n - ctx.results.len()) as isize;
            let items = self
                .cache
                .get_scores(cache::POPULAR_ITEMS, &ctx.category, 0, wanted - 1)
                .await?;
            let items = self.filter_out_hidden_scores(items).await;
            Self::append_ranked(ctx, items);
            ctx.load_popular_time = start.elapsed();
            metrics::LOAD_POPULAR_RECOMMEND_CACHE_SECONDS
                .observe(ctx.load_popular_time.as_secs_f64());
            ctx.num_from_popular = Self::end_stage(ctx);
        }
        Ok(())
    }

    /// Mirrors feedback rows into the ignored-items keyspace so follow-up
    /// requests exclude them once the stamped instant is reached.
    pub async fn insert_feedback_to_cache(&self, feedback: &[Feedback]) -> AppResult<()> {
        for row in feedback {
            self.cache
                .append_scores(
                    cache::IGNORE_ITEMS,
                    &row.key.user_id,
                    &[Scored::new(
                        row.key.item_id.clone(),
                        row.timestamp.timestamp() as f32,
                    )],
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_names_parse() {
        assert_eq!(
            Recommender::from_str("collaborative").unwrap(),
            Recommender::Collaborative
        );
        assert_eq!(
            Recommender::from_str("item_based").unwrap(),
            Recommender::ItemBased
        );
        assert_eq!(
            Recommender::from_str("user_based").unwrap(),
            Recommender::UserBased
        );
        assert_eq!(Recommender::from_str("latest").unwrap(), Recommender::Latest);
        assert_eq!(
            Recommender::from_str("popular").unwrap(),
            Recommender::Popular
        );
    }

    #[test]
    fn test_unknown_fallback_name_is_rejected() {
        let err = Recommender::from_str("offline").unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(Recommender::from_str("random").is_err());
    }
}
