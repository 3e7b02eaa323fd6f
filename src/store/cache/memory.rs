use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::AppResult;

use super::{key, slice_scores, CacheStore, Scored};

/// In-memory cache store used by tests and the `mem://` scheme.
pub struct MemoryCacheStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    scores: HashMap<String, Vec<Scored>>,
    ints: HashMap<String, i64>,
    times: HashMap<String, DateTime<Utc>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Replaces a whole list; convenient for seeding precomputed rankings.
    pub async fn set_scores(&self, prefix: &str, name: &str, entries: Vec<Scored>) {
        let mut inner = self.inner.write().await;
        inner.scores.insert(key(prefix, name), entries);
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_scores(
        &self,
        prefix: &str,
        name: &str,
        begin: isize,
        end: isize,
    ) -> AppResult<Vec<Scored>> {
        let inner = self.inner.read().await;
        let list = inner
            .scores
            .get(&key(prefix, name))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(slice_scores(list, begin, end))
    }

    async fn exists(&self, prefix: &str, names: &[String]) -> AppResult<Vec<i32>> {
        let inner = self.inner.read().await;
        Ok(names
            .iter()
            .map(|name| {
                let full = key(prefix, name);
                let present = inner.ints.contains_key(&full)
                    || inner.scores.contains_key(&full)
                    || inner.times.contains_key(&full);
                i32::from(present)
            })
            .collect())
    }

    async fn append_scores(&self, prefix: &str, name: &str, entries: &[Scored]) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .scores
            .entry(key(prefix, name))
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn set_int(&self, prefix: &str, name: &str, value: i64) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.ints.insert(key(prefix, name), value);
        Ok(())
    }

    async fn delete(&self, prefix: &str, name: &str) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let full = key(prefix, name);
        inner.ints.remove(&full);
        inner.scores.remove(&full);
        inner.times.remove(&full);
        Ok(())
    }

    async fn set_time(&self, prefix: &str, name: &str, time: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        inner.times.insert(key(prefix, name), time);
        Ok(())
    }

    async fn get_time(&self, prefix: &str, name: &str) -> AppResult<Option<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner.times.get(&key(prefix, name)).copied())
    }
}
