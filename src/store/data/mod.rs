use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{Feedback, Item, ItemPatch, User, UserPatch};

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryDataStore;
pub use self::postgres::PostgresDataStore;

/// Persistent store of users, items and feedback rows.
///
/// Feedback identity is the (feedback_type, user_id, item_id) triple.
/// Cursor-based listings return an opaque id cursor; an empty cursor starts
/// from the beginning and an empty returned cursor means the scan is done.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn batch_insert_users(&self, users: &[User]) -> AppResult<()>;

    async fn get_user(&self, user_id: &str) -> AppResult<User>;

    async fn get_users(&self, cursor: &str, n: usize) -> AppResult<(String, Vec<User>)>;

    async fn modify_user(&self, user_id: &str, patch: UserPatch) -> AppResult<()>;

    /// Deletes a user and every feedback row referencing it.
    async fn delete_user(&self, user_id: &str) -> AppResult<()>;

    async fn batch_insert_items(&self, items: &[Item]) -> AppResult<()>;

    async fn get_item(&self, item_id: &str) -> AppResult<Item>;

    async fn get_items(&self, cursor: &str, n: usize) -> AppResult<(String, Vec<Item>)>;

    async fn modify_item(&self, item_id: &str, patch: ItemPatch) -> AppResult<()>;

    /// Deletes an item and every feedback row referencing it.
    async fn delete_item(&self, item_id: &str) -> AppResult<()>;

    /// Inserts feedback rows. Rows referencing a missing user or item are
    /// either completed by auto-created rows or skipped; an existing
    /// (type, user, item) row is replaced only when `overwrite` is set.
    async fn batch_insert_feedback(
        &self,
        rows: Vec<Feedback>,
        auto_insert_user: bool,
        auto_insert_item: bool,
        overwrite: bool,
    ) -> AppResult<()>;

    /// Feedback rows of a user. All types when `types` is empty; rows with a
    /// future timestamp are excluded unless `with_future` is set.
    async fn get_user_feedback(
        &self,
        user_id: &str,
        with_future: bool,
        types: &[String],
    ) -> AppResult<Vec<Feedback>>;

    async fn get_item_feedback(&self, item_id: &str, types: &[String])
        -> AppResult<Vec<Feedback>>;

    async fn get_user_item_feedback(
        &self,
        user_id: &str,
        item_id: &str,
        types: &[String],
    ) -> AppResult<Vec<Feedback>>;

    /// Removes feedback between a user and an item, returning the number of
    /// deleted rows.
    async fn delete_user_item_feedback(
        &self,
        user_id: &str,
        item_id: &str,
        types: &[String],
    ) -> AppResult<usize>;
}

/// Opens a data store backend selected by URI scheme.
pub async fn open(url: &str) -> AppResult<Arc<dyn DataStore>> {
    if url.starts_with("postgres://") {
        Ok(Arc::new(PostgresDataStore::connect(url).await?))
    } else if url.starts_with("mem://") {
        Ok(Arc::new(MemoryDataStore::new()))
    } else {
        Err(AppError::Internal(format!(
            "unsupported data store URL `{}`",
            url
        )))
    }
}
