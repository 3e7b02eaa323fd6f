use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client};

use crate::error::{AppError, AppResult};

use super::{key, CacheStore, Scored};

/// Cache store backed by Redis.
///
/// Scored lists are Redis lists of JSON-encoded entries, so `LRANGE`
/// preserves the producer's ranking; scalars are plain string keys.
pub struct RedisCacheStore {
    client: Client,
}

impl RedisCacheStore {
    /// Opens a connection to Redis.
    pub fn open(redis_url: &str) -> AppResult<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn decode_entries(raw: Vec<String>) -> AppResult<Vec<Scored>> {
    raw.into_iter()
        .map(|entry| {
            serde_json::from_str(&entry)
                .map_err(|e| AppError::Internal(format!("corrupted cache entry: {}", e)))
        })
        .collect()
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get_scores(
        &self,
        prefix: &str,
        name: &str,
        begin: isize,
        end: isize,
    ) -> AppResult<Vec<Scored>> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(key(prefix, name), begin, end).await?;
        decode_entries(raw)
    }

    async fn exists(&self, prefix: &str, names: &[String]) -> AppResult<Vec<i32>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for name in names {
            pipe.exists(key(prefix, name));
        }
        let flags: Vec<i32> = pipe.query_async(&mut conn).await?;
        Ok(flags)
    }

    async fn append_scores(&self, prefix: &str, name: &str, entries: &[Scored]) -> AppResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let encoded: Vec<String> = entries
            .iter()
            .map(|entry| {
                serde_json::to_string(entry)
                    .map_err(|e| AppError::Internal(format!("failed to encode entry: {}", e)))
            })
            .collect::<AppResult<_>>()?;
        let mut conn = self.connection().await?;
        let _: () = conn.rpush(key(prefix, name), encoded).await?;
        Ok(())
    }

    async fn set_int(&self, prefix: &str, name: &str, value: i64) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(key(prefix, name), value).await?;
        Ok(())
    }

    async fn delete(&self, prefix: &str, name: &str) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key(prefix, name)).await?;
        Ok(())
    }

    async fn set_time(&self, prefix: &str, name: &str, time: DateTime<Utc>) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(key(prefix, name), time.to_rfc3339()).await?;
        Ok(())
    }

    async fn get_time(&self, prefix: &str, name: &str) -> AppResult<Option<DateTime<Utc>>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(key(prefix, name)).await?;
        match raw {
            Some(text) => {
                let time = DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| AppError::Internal(format!("corrupted timestamp: {}", e)))?;
                Ok(Some(time.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }
}
