use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::models::{Feedback, User, UserPatch};
use crate::store::cache;

use super::{AppState, RowsAffected};

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    pub cursor: Option<String>,
    pub n: Option<usize>,
}

/// Page of users with the cursor to resume from
#[derive(Debug, Serialize)]
pub struct UserIterator {
    pub cursor: String,
    pub users: Vec<User>,
}

/// Stamps the user's last-modified instant. The stamp is advisory: a cache
/// failure here is logged and the mutation still reported as successful.
async fn touch_user(state: &AppState, user_id: &str) {
    if let Err(e) = state
        .service
        .cache
        .set_time(cache::LAST_MODIFY_USER_TIME, user_id, Utc::now())
        .await
    {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to stamp user modification time");
    }
}

/// Handler for inserting a single user
pub async fn insert_user(
    State(state): State<AppState>,
    Json(user): Json<User>,
) -> AppResult<Json<RowsAffected>> {
    state.service.data.batch_insert_users(&[user.clone()]).await?;
    touch_user(&state, &user.user_id).await;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for inserting a batch of users
pub async fn insert_users(
    State(state): State<AppState>,
    Json(users): Json<Vec<User>>,
) -> AppResult<Json<RowsAffected>> {
    state.service.data.batch_insert_users(&users).await?;
    for user in &users {
        touch_user(&state, &user.user_id).await;
    }
    Ok(Json(RowsAffected {
        rows_affected: users.len(),
    }))
}

/// Handler for fetching a single user
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<User>> {
    let user = state.service.data.get_user(&user_id).await?;
    Ok(Json(user))
}

/// Handler for listing users with cursor pagination
pub async fn get_users(
    State(state): State<AppState>,
    Query(query): Query<CursorQuery>,
) -> AppResult<Json<UserIterator>> {
    let cursor = query.cursor.unwrap_or_default();
    let n = query.n.unwrap_or(state.service.config.default_n);
    let (cursor, users) = state.service.data.get_users(&cursor, n).await?;
    Ok(Json(UserIterator { cursor, users }))
}

/// Handler for partially updating a user
pub async fn modify_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> AppResult<Json<RowsAffected>> {
    state.service.data.modify_user(&user_id, patch).await?;
    touch_user(&state, &user_id).await;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for deleting a user
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<RowsAffected>> {
    state.service.data.delete_user(&user_id).await?;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for a user's feedback across all types
pub async fn get_feedback_by_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<Feedback>>> {
    let feedback = state
        .service
        .data
        .get_user_feedback(&user_id, false, &[])
        .await?;
    Ok(Json(feedback))
}

/// Handler for a user's feedback of one type
pub async fn get_typed_feedback_by_user(
    State(state): State<AppState>,
    Path((user_id, feedback_type)): Path<(String, String)>,
) -> AppResult<Json<Vec<Feedback>>> {
    let feedback = state
        .service
        .data
        .get_user_feedback(&user_id, false, &[feedback_type])
        .await?;
    Ok(Json(feedback))
}
