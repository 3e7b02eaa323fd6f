use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::time::Instant;

use crate::error::AppResult;
use crate::metrics;
use crate::models::Feedback;
use crate::services::Recommender;
use crate::store::{cache, Scored};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub n: Option<usize>,
    pub offset: Option<usize>,
}

/// Shared implementation of the ranked-list read endpoints: reads the
/// requested window of a producer-ranked list from the cache store.
async fn get_list(
    state: &AppState,
    prefix: &str,
    name: &str,
    query: &ListQuery,
) -> AppResult<Json<Vec<Scored>>> {
    let begin = query.offset.unwrap_or(0) as isize;
    let n = query.n.unwrap_or(state.service.config.default_n) as isize;
    let end = begin + n - 1;
    let scores = state.service.cache.get_scores(prefix, name, begin, end).await?;
    Ok(Json(scores))
}

/// Handler for global popular items
pub async fn get_popular(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    tracing::debug!("get popular items");
    get_list(&state, cache::POPULAR_ITEMS, "", &query).await
}

/// Handler for popular items in a category
pub async fn get_category_popular(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    tracing::debug!(category = %category, "get popular items in category");
    get_list(&state, cache::POPULAR_ITEMS, &category, &query).await
}

/// Handler for globally latest items
pub async fn get_latest(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    tracing::debug!("get latest items");
    get_list(&state, cache::LATEST_ITEMS, "", &query).await
}

/// Handler for latest items in a category
pub async fn get_category_latest(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    tracing::debug!(category = %category, "get latest items in category");
    get_list(&state, cache::LATEST_ITEMS, &category, &query).await
}

/// Handler for neighbors of an item
pub async fn get_item_neighbors(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    get_list(&state, cache::ITEM_NEIGHBORS, &item_id, &query).await
}

/// Handler for neighbors of an item within a category
pub async fn get_item_category_neighbors(
    State(state): State<AppState>,
    Path((item_id, category)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    let name = format!("{}/{}", item_id, category);
    get_list(&state, cache::ITEM_NEIGHBORS, &name, &query).await
}

/// Handler for neighbors of a user
pub async fn get_user_neighbors(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    get_list(&state, cache::USER_NEIGHBORS, &user_id, &query).await
}

/// Handler for the intermediate (precomputed) recommendation list
pub async fn get_collaborative(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    get_list(&state, cache::OFFLINE_RECOMMEND, &user_id, &query).await
}

/// Handler for the intermediate recommendation list within a category
pub async fn get_category_collaborative(
    State(state): State<AppState>,
    Path((user_id, category)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Scored>>> {
    let name = format!("{}/{}", user_id, category);
    get_list(&state, cache::OFFLINE_RECOMMEND, &name, &query).await
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub n: Option<usize>,
    pub offset: Option<usize>,
    #[serde(rename = "write-back-type")]
    pub write_back_type: Option<String>,
    #[serde(rename = "write-back-delay")]
    pub write_back_delay: Option<i64>,
}

/// Handler for personalized recommendations
pub async fn get_recommend(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<RecommendQuery>,
) -> AppResult<Json<Vec<String>>> {
    recommend_for(state, user_id, String::new(), query).await
}

/// Handler for personalized recommendations within a category
pub async fn get_recommend_in_category(
    State(state): State<AppState>,
    Path((user_id, category)): Path<(String, String)>,
    Query(query): Query<RecommendQuery>,
) -> AppResult<Json<Vec<String>>> {
    recommend_for(state, user_id, category, query).await
}

async fn recommend_for(
    state: AppState,
    user_id: String,
    category: String,
    query: RecommendQuery,
) -> AppResult<Json<Vec<String>>> {
    let start = Instant::now();
    let config = &state.service.config;
    let n = query.n.unwrap_or(config.default_n);
    let offset = query.offset.unwrap_or(0);
    let write_back_type = query.write_back_type.unwrap_or_default();
    let write_back_delay = query.write_back_delay.unwrap_or(0);

    // the offline stage always runs first, then the configured chain
    let mut recommenders = vec![Recommender::Offline];
    for name in &config.fallback_recommend {
        recommenders.push(name.parse()?);
    }

    let results = state
        .service
        .recommend(&user_id, &category, offset + n, &recommenders)
        .await?;
    let results: Vec<String> = results.into_iter().skip(offset).collect();

    if !write_back_type.is_empty() {
        for item_id in &results {
            let row = Feedback::new(
                write_back_type.clone(),
                user_id.clone(),
                item_id.clone(),
                Utc::now() + chrono::Duration::minutes(write_back_delay),
            );
            // data store first; the cache mirror is best-effort repairable
            // from feedback on the next request
            state
                .service
                .data
                .batch_insert_feedback(vec![row.clone()], false, false, false)
                .await?;
            state.service.insert_feedback_to_cache(&[row]).await?;
        }
    }

    metrics::GET_RECOMMEND_SECONDS.observe(start.elapsed().as_secs_f64());
    Ok(Json(results))
}
