use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, AppResult};

pub mod memory;
pub mod redis;

pub use self::memory::MemoryCacheStore;
pub use self::redis::RedisCacheStore;

/// Ranked list of precomputed recommendations per user
pub const OFFLINE_RECOMMEND: &str = "offline_recommend";
/// Ranked list from the collaborative model per user
pub const COLLABORATIVE_RECOMMEND: &str = "collaborative_recommend";
/// Ranked list of similar items per item
pub const ITEM_NEIGHBORS: &str = "item_neighbors";
/// Ranked list of similar users per user
pub const USER_NEIGHBORS: &str = "user_neighbors";
/// Ranked list of items by descending popularity per category
pub const POPULAR_ITEMS: &str = "popular_items";
/// Ranked list of items by descending timestamp per category
pub const LATEST_ITEMS: &str = "latest_items";
/// Items a user should not be recommended; the score is a Unix-second expiry
pub const IGNORE_ITEMS: &str = "ignore_items";
/// Flag keys for hidden items
pub const HIDDEN_ITEMS: &str = "hidden_items";
/// Last modification instant per user
pub const LAST_MODIFY_USER_TIME: &str = "last_modify_user_time";
/// Last modification instant per item
pub const LAST_MODIFY_ITEM_TIME: &str = "last_modify_item_time";

/// An entry of a ranked list: ranking is defined by the producer and the
/// cache store returns entries in stored order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scored {
    pub id: String,
    pub score: f32,
}

impl Scored {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Builds the storage key for a (prefix, name) pair.
pub(crate) fn key(prefix: &str, name: &str) -> String {
    if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Appends `/category` to a list name when the category is non-empty.
pub(crate) fn categorized(name: &str, category: &str) -> String {
    if category.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", name, category)
    }
}

/// Slices a stored list with LRANGE index semantics: inclusive bounds,
/// negative `end` counts from the tail (-1 is the last entry).
pub(crate) fn slice_scores(list: &[Scored], begin: isize, end: isize) -> Vec<Scored> {
    let len = list.len() as isize;
    let begin = begin.max(0);
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || begin > end || end < 0 {
        return Vec::new();
    }
    list[begin as usize..=end as usize].to_vec()
}

/// Keyed store of producer-ranked scored lists and scalar values.
///
/// Lists are opaque ordered sequences: readers must observe the stored order
/// and repeated reads are stable until a writer mutates the list.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the entries of a list between the inclusive indices `begin`
    /// and `end`; `end = -1` reads to the end of the list.
    async fn get_scores(
        &self,
        prefix: &str,
        name: &str,
        begin: isize,
        end: isize,
    ) -> AppResult<Vec<Scored>>;

    /// Shorthand for reading the per-category variant of a list.
    async fn get_category_scores(
        &self,
        prefix: &str,
        name: &str,
        category: &str,
        begin: isize,
        end: isize,
    ) -> AppResult<Vec<Scored>> {
        self.get_scores(prefix, &categorized(name, category), begin, end)
            .await
    }

    /// Positional membership test: 1 if the name is present, 0 otherwise.
    async fn exists(&self, prefix: &str, names: &[String]) -> AppResult<Vec<i32>>;

    /// Appends entries to the tail of a list, creating it when absent.
    async fn append_scores(&self, prefix: &str, name: &str, entries: &[Scored]) -> AppResult<()>;

    async fn set_int(&self, prefix: &str, name: &str, value: i64) -> AppResult<()>;

    async fn delete(&self, prefix: &str, name: &str) -> AppResult<()>;

    async fn set_time(&self, prefix: &str, name: &str, time: DateTime<Utc>) -> AppResult<()>;

    async fn get_time(&self, prefix: &str, name: &str) -> AppResult<Option<DateTime<Utc>>>;
}

/// Opens a cache store backend selected by URI scheme.
pub fn open(url: &str) -> AppResult<Arc<dyn CacheStore>> {
    if url.starts_with("redis://") {
        Ok(Arc::new(RedisCacheStore::open(url)?))
    } else if url.starts_with("mem://") {
        Ok(Arc::new(MemoryCacheStore::new()))
    } else {
        Err(AppError::Internal(format!(
            "unsupported cache store URL `{}`",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_without_name() {
        assert_eq!(key(POPULAR_ITEMS, ""), "popular_items");
        assert_eq!(key(IGNORE_ITEMS, "alice"), "ignore_items/alice");
    }

    #[test]
    fn test_categorized_name() {
        assert_eq!(categorized("alice", ""), "alice");
        assert_eq!(categorized("alice", "books"), "alice/books");
    }

    #[test]
    fn test_slice_scores_bounds() {
        let list = vec![
            Scored::new("a", 3.0),
            Scored::new("b", 2.0),
            Scored::new("c", 1.0),
        ];
        assert_eq!(slice_scores(&list, 0, -1), list);
        assert_eq!(slice_scores(&list, 0, 1), list[..2].to_vec());
        assert_eq!(slice_scores(&list, 1, 10), list[1..].to_vec());
        assert!(slice_scores(&list, 2, 1).is_empty());
        assert!(slice_scores(&list, 5, -1).is_empty());
        assert!(slice_scores(&[], 0, -1).is_empty());
    }
}
