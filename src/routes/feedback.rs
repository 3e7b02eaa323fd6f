use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;

use crate::error::{AppError, AppResult};
use crate::models::Feedback;
use crate::store::cache;

use super::items::parse_timestamp;
use super::{AppState, RowsAffected};

/// Wire form of a feedback row with a string timestamp
#[derive(Debug, Deserialize)]
pub struct InsertFeedbackRequest {
    pub feedback_type: String,
    pub user_id: String,
    pub item_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub comment: String,
}

impl InsertFeedbackRequest {
    fn into_feedback(self) -> AppResult<Feedback> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        let mut feedback = Feedback::new(self.feedback_type, self.user_id, self.item_id, timestamp);
        feedback.comment = self.comment;
        Ok(feedback)
    }
}

/// Handler for inserting feedback; existing rows are kept
pub async fn insert_feedback(
    State(state): State<AppState>,
    Json(requests): Json<Vec<InsertFeedbackRequest>>,
) -> AppResult<Json<RowsAffected>> {
    insert_rows(state, requests, false).await
}

/// Handler for inserting feedback; existing rows are overwritten
pub async fn overwrite_feedback(
    State(state): State<AppState>,
    Json(requests): Json<Vec<InsertFeedbackRequest>>,
) -> AppResult<Json<RowsAffected>> {
    insert_rows(state, requests, true).await
}

async fn insert_rows(
    state: AppState,
    requests: Vec<InsertFeedbackRequest>,
    overwrite: bool,
) -> AppResult<Json<RowsAffected>> {
    let rows = requests
        .into_iter()
        .map(InsertFeedbackRequest::into_feedback)
        .collect::<AppResult<Vec<_>>>()?;

    let config = &state.service.config;
    state
        .service
        .data
        .batch_insert_feedback(
            rows.clone(),
            config.auto_insert_user,
            config.auto_insert_item,
            overwrite,
        )
        .await?;
    state.service.insert_feedback_to_cache(&rows).await?;

    let users: HashSet<&str> = rows.iter().map(|row| row.key.user_id.as_str()).collect();
    let items: HashSet<&str> = rows.iter().map(|row| row.key.item_id.as_str()).collect();
    for user_id in users {
        state
            .service
            .cache
            .set_time(cache::LAST_MODIFY_USER_TIME, user_id, Utc::now())
            .await?;
    }
    for item_id in items {
        state
            .service
            .cache
            .set_time(cache::LAST_MODIFY_ITEM_TIME, item_id, Utc::now())
            .await?;
    }

    Ok(Json(RowsAffected {
        rows_affected: rows.len(),
    }))
}

/// Handler for feedback between a user and an item across all types
pub async fn get_user_item_feedback(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
) -> AppResult<Json<Vec<Feedback>>> {
    let feedback = state
        .service
        .data
        .get_user_item_feedback(&user_id, &item_id, &[])
        .await?;
    Ok(Json(feedback))
}

/// Handler for deleting feedback between a user and an item
pub async fn delete_user_item_feedback(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(String, String)>,
) -> AppResult<Json<RowsAffected>> {
    let count = state
        .service
        .data
        .delete_user_item_feedback(&user_id, &item_id, &[])
        .await?;
    Ok(Json(RowsAffected {
        rows_affected: count,
    }))
}

/// Handler for one typed feedback row between a user and an item
pub async fn get_typed_user_item_feedback(
    State(state): State<AppState>,
    Path((user_id, item_id, feedback_type)): Path<(String, String, String)>,
) -> AppResult<Json<Feedback>> {
    let feedback = state
        .service
        .data
        .get_user_item_feedback(&user_id, &item_id, &[feedback_type.clone()])
        .await?;
    feedback.into_iter().next().map(Json).ok_or_else(|| {
        AppError::NotFound(format!(
            "no {} feedback between user {} and item {}",
            feedback_type, user_id, item_id
        ))
    })
}

/// Handler for deleting one typed feedback row between a user and an item
pub async fn delete_typed_user_item_feedback(
    State(state): State<AppState>,
    Path((user_id, item_id, feedback_type)): Path<(String, String, String)>,
) -> AppResult<Json<RowsAffected>> {
    let count = state
        .service
        .data
        .delete_user_item_feedback(&user_id, &item_id, &[feedback_type])
        .await?;
    Ok(Json(RowsAffected {
        rows_affected: count,
    }))
}
