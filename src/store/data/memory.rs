use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::{Feedback, Item, ItemPatch, User, UserPatch};

use super::DataStore;

/// In-memory data store used by tests and the `mem://` scheme.
pub struct MemoryDataStore {
    inner: RwLock<Inner>,
}

type FeedbackRowKey = (String, String, String);

#[derive(Default)]
struct Inner {
    users: BTreeMap<String, User>,
    items: BTreeMap<String, Item>,
    // keyed by (user_id, item_id, feedback_type) for deterministic scans
    feedback: BTreeMap<FeedbackRowKey, Feedback>,
}

fn row_key(feedback: &Feedback) -> FeedbackRowKey {
    (
        feedback.key.user_id.clone(),
        feedback.key.item_id.clone(),
        feedback.key.feedback_type.clone(),
    )
}

fn type_matches(types: &[String], feedback_type: &str) -> bool {
    types.is_empty() || types.iter().any(|t| t == feedback_type)
}

/// Pages a BTreeMap by id cursor: entries strictly after `cursor`, at most
/// `n`, plus the cursor to resume from (empty when exhausted).
fn paginate<T: Clone>(map: &BTreeMap<String, T>, cursor: &str, n: usize) -> (String, Vec<T>) {
    let mut page = Vec::with_capacity(n);
    let mut last_id = String::new();
    let mut has_more = false;
    for (id, value) in map.range::<str, _>((
        std::ops::Bound::Excluded(cursor),
        std::ops::Bound::Unbounded,
    )) {
        if page.len() == n {
            has_more = true;
            break;
        }
        last_id = id.clone();
        page.push(value.clone());
    }
    let next_cursor = if has_more { last_id } else { String::new() };
    (next_cursor, page)
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn batch_insert_users(&self, users: &[User]) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        for user in users {
            inner.users.insert(user.user_id.clone(), user.clone());
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> AppResult<User> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", user_id)))
    }

    async fn get_users(&self, cursor: &str, n: usize) -> AppResult<(String, Vec<User>)> {
        let inner = self.inner.read().await;
        Ok(paginate(&inner.users, cursor, n))
    }

    async fn modify_user(&self, user_id: &str, patch: UserPatch) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", user_id)))?;
        if let Some(labels) = patch.labels {
            user.labels = labels;
        }
        if let Some(comment) = patch.comment {
            user.comment = comment;
        }
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.users.remove(user_id);
        inner.feedback.retain(|(uid, _, _), _| uid != user_id);
        Ok(())
    }

    async fn batch_insert_items(&self, items: &[Item]) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        for item in items {
            inner.items.insert(item.item_id.clone(), item.clone());
        }
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> AppResult<Item> {
        let inner = self.inner.read().await;
        inner
            .items
            .get(item_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("item {} not found", item_id)))
    }

    async fn get_items(&self, cursor: &str, n: usize) -> AppResult<(String, Vec<Item>)> {
        let inner = self.inner.read().await;
        Ok(paginate(&inner.items, cursor, n))
    }

    async fn modify_item(&self, item_id: &str, patch: ItemPatch) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .items
            .get_mut(item_id)
            .ok_or_else(|| AppError::NotFound(format!("item {} not found", item_id)))?;
        if let Some(is_hidden) = patch.is_hidden {
            item.is_hidden = is_hidden;
        }
        if let Some(categories) = patch.categories {
            item.categories = categories;
        }
        if let Some(timestamp) = patch.timestamp {
            item.timestamp = timestamp;
        }
        if let Some(labels) = patch.labels {
            item.labels = labels;
        }
        if let Some(comment) = patch.comment {
            item.comment = comment;
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.items.remove(item_id);
        inner.feedback.retain(|(_, iid, _), _| iid != item_id);
        Ok(())
    }

    async fn batch_insert_feedback(
        &self,
        rows: Vec<Feedback>,
        auto_insert_user: bool,
        auto_insert_item: bool,
        overwrite: bool,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        for row in rows {
            if !inner.users.contains_key(&row.key.user_id) {
                if !auto_insert_user {
                    continue;
                }
                inner
                    .users
                    .insert(row.key.user_id.clone(), User::new(&row.key.user_id));
            }
            if !inner.items.contains_key(&row.key.item_id) {
                if !auto_insert_item {
                    continue;
                }
                inner.items.insert(
                    row.key.item_id.clone(),
                    Item {
                        item_id: row.key.item_id.clone(),
                        is_hidden: false,
                        categories: Vec::new(),
                        timestamp: row.timestamp,
                        labels: Vec::new(),
                        comment: String::new(),
                    },
                );
            }
            let key = row_key(&row);
            if overwrite || !inner.feedback.contains_key(&key) {
                inner.feedback.insert(key, row);
            }
        }
        Ok(())
    }

    async fn get_user_feedback(
        &self,
        user_id: &str,
        with_future: bool,
        types: &[String],
    ) -> AppResult<Vec<Feedback>> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .feedback
            .values()
            .filter(|f| f.key.user_id == user_id)
            .filter(|f| type_matches(types, &f.key.feedback_type))
            .filter(|f| with_future || f.timestamp <= now)
            .cloned()
            .collect())
    }

    async fn get_item_feedback(
        &self,
        item_id: &str,
        types: &[String],
    ) -> AppResult<Vec<Feedback>> {
        let inner = self.inner.read().await;
        Ok(inner
            .feedback
            .values()
            .filter(|f| f.key.item_id == item_id)
            .filter(|f| type_matches(types, &f.key.feedback_type))
            .cloned()
            .collect())
    }

    async fn get_user_item_feedback(
        &self,
        user_id: &str,
        item_id: &str,
        types: &[String],
    ) -> AppResult<Vec<Feedback>> {
        let inner = self.inner.read().await;
        Ok(inner
            .feedback
            .values()
            .filter(|f| f.key.user_id == user_id && f.key.item_id == item_id)
            .filter(|f| type_matches(types, &f.key.feedback_type))
            .cloned()
            .collect())
    }

    async fn delete_user_item_feedback(
        &self,
        user_id: &str,
        item_id: &str,
        types: &[String],
    ) -> AppResult<usize> {
        let mut inner = self.inner.write().await;
        let before = inner.feedback.len();
        inner.feedback.retain(|(uid, iid, ftype), _| {
            !(uid == user_id && iid == item_id && type_matches(types, ftype))
        });
        Ok(before - inner.feedback.len())
    }
}
