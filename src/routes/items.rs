use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{Feedback, Item, ItemPatch};
use crate::store::cache;

use super::users::CursorQuery;
use super::{AppState, RowsAffected};

/// Wire form of an item: the timestamp arrives as a string so malformed
/// values are a client error rather than a deserialization failure.
#[derive(Debug, Deserialize)]
pub struct InsertItemRequest {
    pub item_id: String,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    pub timestamp: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl InsertItemRequest {
    fn into_item(self) -> AppResult<Item> {
        let timestamp = parse_timestamp(&self.timestamp)?;
        Ok(Item {
            item_id: self.item_id,
            is_hidden: self.is_hidden,
            categories: self.categories,
            timestamp,
            labels: self.labels,
            comment: self.comment,
        })
    }
}

pub(crate) fn parse_timestamp(text: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::InvalidInput(format!("failed to parse timestamp `{}`: {}", text, e)))
}

/// Page of items with the cursor to resume from
#[derive(Debug, Serialize)]
pub struct ItemIterator {
    pub cursor: String,
    pub items: Vec<Item>,
}

/// Stamps the item's last-modified instant; failures are logged only.
async fn touch_item(state: &AppState, item_id: &str) {
    if let Err(e) = state
        .service
        .cache
        .set_time(cache::LAST_MODIFY_ITEM_TIME, item_id, Utc::now())
        .await
    {
        tracing::warn!(item_id = %item_id, error = %e, "Failed to stamp item modification time");
    }
}

/// Handler for inserting a single item
pub async fn insert_item(
    State(state): State<AppState>,
    Json(request): Json<InsertItemRequest>,
) -> AppResult<Json<RowsAffected>> {
    let item = request.into_item()?;
    state.service.data.batch_insert_items(&[item.clone()]).await?;
    touch_item(&state, &item.item_id).await;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for inserting a batch of items
pub async fn insert_items(
    State(state): State<AppState>,
    Json(requests): Json<Vec<InsertItemRequest>>,
) -> AppResult<Json<RowsAffected>> {
    let items = requests
        .into_iter()
        .map(InsertItemRequest::into_item)
        .collect::<AppResult<Vec<_>>>()?;
    state.service.data.batch_insert_items(&items).await?;
    for item in &items {
        touch_item(&state, &item.item_id).await;
    }
    Ok(Json(RowsAffected {
        rows_affected: items.len(),
    }))
}

/// Handler for fetching a single item
pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> AppResult<Json<Item>> {
    let item = state.service.data.get_item(&item_id).await?;
    Ok(Json(item))
}

/// Handler for listing items with cursor pagination
pub async fn get_items(
    State(state): State<AppState>,
    Query(query): Query<CursorQuery>,
) -> AppResult<Json<ItemIterator>> {
    let cursor = query.cursor.unwrap_or_default();
    let n = query.n.unwrap_or(state.service.config.default_n);
    let (cursor, items) = state.service.data.get_items(&cursor, n).await?;
    Ok(Json(ItemIterator { cursor, items }))
}

/// Handler for partially updating an item.
///
/// Hidden-flag changes are mirrored into the hidden-items keyspace so the
/// online filters observe them without reading the data store.
pub async fn modify_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(patch): Json<ItemPatch>,
) -> AppResult<Json<RowsAffected>> {
    let is_hidden = patch.is_hidden;
    state.service.data.modify_item(&item_id, patch).await?;
    match is_hidden {
        Some(true) => {
            state
                .service
                .cache
                .set_int(cache::HIDDEN_ITEMS, &item_id, 1)
                .await?
        }
        Some(false) => state.service.cache.delete(cache::HIDDEN_ITEMS, &item_id).await?,
        None => {}
    }
    touch_item(&state, &item_id).await;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for deleting an item. The item is flagged hidden in the cache so
/// stale ranked lists stop recommending it immediately.
pub async fn delete_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> AppResult<Json<RowsAffected>> {
    state.service.data.delete_item(&item_id).await?;
    state
        .service
        .cache
        .set_int(cache::HIDDEN_ITEMS, &item_id, 1)
        .await?;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for attaching a category to an item
pub async fn insert_item_category(
    State(state): State<AppState>,
    Path((item_id, category)): Path<(String, String)>,
) -> AppResult<Json<RowsAffected>> {
    let mut item = state.service.data.get_item(&item_id).await?;
    if !item.categories.contains(&category) {
        item.categories.push(category);
    }
    state.service.data.batch_insert_items(&[item]).await?;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for removing a category from an item
pub async fn delete_item_category(
    State(state): State<AppState>,
    Path((item_id, category)): Path<(String, String)>,
) -> AppResult<Json<RowsAffected>> {
    let mut item = state.service.data.get_item(&item_id).await?;
    item.categories.retain(|c| c != &category);
    state.service.data.batch_insert_items(&[item]).await?;
    Ok(Json(RowsAffected { rows_affected: 1 }))
}

/// Handler for an item's feedback across all types
pub async fn get_feedback_by_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> AppResult<Json<Vec<Feedback>>> {
    let feedback = state.service.data.get_item_feedback(&item_id, &[]).await?;
    Ok(Json(feedback))
}

/// Handler for an item's feedback of one type
pub async fn get_typed_feedback_by_item(
    State(state): State<AppState>,
    Path((item_id, feedback_type)): Path<(String, String)>,
) -> AppResult<Json<Vec<Feedback>>> {
    let feedback = state
        .service
        .data
        .get_item_feedback(&item_id, &[feedback_type])
        .await?;
    Ok(Json(feedback))
}
