use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::models::{Feedback, FeedbackKey, Item, ItemPatch, User, UserPatch};

use super::DataStore;

/// Data store backed by PostgreSQL.
pub struct PostgresDataStore {
    pool: PgPool,
}

impl PostgresDataStore {
    /// Connects a pool and creates the schema when it does not exist yet.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                labels JSONB NOT NULL DEFAULT '[]',
                comment TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                item_id TEXT PRIMARY KEY,
                is_hidden BOOLEAN NOT NULL DEFAULT FALSE,
                categories JSONB NOT NULL DEFAULT '[]',
                time_stamp TIMESTAMPTZ NOT NULL,
                labels JSONB NOT NULL DEFAULT '[]',
                comment TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                feedback_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                time_stamp TIMESTAMPTZ NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (feedback_type, user_id, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS feedback_user_id ON feedback (user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS feedback_item_id ON feedback (item_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> AppResult<User> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        labels: row.try_get::<Json<Vec<String>>, _>("labels")?.0,
        comment: row.try_get("comment")?,
    })
}

fn item_from_row(row: &PgRow) -> AppResult<Item> {
    Ok(Item {
        item_id: row.try_get("item_id")?,
        is_hidden: row.try_get("is_hidden")?,
        categories: row.try_get::<Json<Vec<String>>, _>("categories")?.0,
        timestamp: row.try_get::<DateTime<Utc>, _>("time_stamp")?,
        labels: row.try_get::<Json<Vec<String>>, _>("labels")?.0,
        comment: row.try_get("comment")?,
    })
}

fn feedback_from_row(row: &PgRow) -> AppResult<Feedback> {
    Ok(Feedback {
        key: FeedbackKey {
            feedback_type: row.try_get("feedback_type")?,
            user_id: row.try_get("user_id")?,
            item_id: row.try_get("item_id")?,
        },
        timestamp: row.try_get::<DateTime<Utc>, _>("time_stamp")?,
        comment: row.try_get("comment")?,
    })
}

/// Derives the next cursor from a page fetched with `LIMIT n + 1`.
fn page_with_cursor<T>(mut rows: Vec<T>, n: usize, id_of: impl Fn(&T) -> String) -> (String, Vec<T>) {
    if rows.len() > n {
        rows.truncate(n);
        let cursor = rows.last().map(&id_of).unwrap_or_default();
        (cursor, rows)
    } else {
        (String::new(), rows)
    }
}

#[async_trait]
impl DataStore for PostgresDataStore {
    async fn batch_insert_users(&self, users: &[User]) -> AppResult<()> {
        for user in users {
            sqlx::query(
                r#"
                INSERT INTO users (user_id, labels, comment) VALUES ($1, $2, $3)
                ON CONFLICT (user_id)
                DO UPDATE SET labels = EXCLUDED.labels, comment = EXCLUDED.comment
                "#,
            )
            .bind(&user.user_id)
            .bind(Json(&user.labels))
            .bind(&user.comment)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> AppResult<User> {
        let row = sqlx::query("SELECT user_id, labels, comment FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(AppError::NotFound(format!("user {} not found", user_id))),
        }
    }

    async fn get_users(&self, cursor: &str, n: usize) -> AppResult<(String, Vec<User>)> {
        let rows = sqlx::query(
            "SELECT user_id, labels, comment FROM users WHERE user_id > $1 ORDER BY user_id LIMIT $2",
        )
        .bind(cursor)
        .bind((n + 1) as i64)
        .fetch_all(&self.pool)
        .await?;
        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(page_with_cursor(users, n, |u| u.user_id.clone()))
    }

    async fn modify_user(&self, user_id: &str, patch: UserPatch) -> AppResult<()> {
        let mut user = self.get_user(user_id).await?;
        if let Some(labels) = patch.labels {
            user.labels = labels;
        }
        if let Some(comment) = patch.comment {
            user.comment = comment;
        }
        self.batch_insert_users(&[user]).await
    }

    async fn delete_user(&self, user_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM feedback WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_insert_items(&self, items: &[Item]) -> AppResult<()> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO items (item_id, is_hidden, categories, time_stamp, labels, comment)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (item_id)
                DO UPDATE SET is_hidden = EXCLUDED.is_hidden,
                    categories = EXCLUDED.categories,
                    time_stamp = EXCLUDED.time_stamp,
                    labels = EXCLUDED.labels,
                    comment = EXCLUDED.comment
                "#,
            )
            .bind(&item.item_id)
            .bind(item.is_hidden)
            .bind(Json(&item.categories))
            .bind(item.timestamp)
            .bind(Json(&item.labels))
            .bind(&item.comment)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> AppResult<Item> {
        let row = sqlx::query(
            "SELECT item_id, is_hidden, categories, time_stamp, labels, comment FROM items WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => item_from_row(&row),
            None => Err(AppError::NotFound(format!("item {} not found", item_id))),
        }
    }

    async fn get_items(&self, cursor: &str, n: usize) -> AppResult<(String, Vec<Item>)> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, is_hidden, categories, time_stamp, labels, comment
            FROM items WHERE item_id > $1 ORDER BY item_id LIMIT $2
            "#,
        )
        .bind(cursor)
        .bind((n + 1) as i64)
        .fetch_all(&self.pool)
        .await?;
        let items = rows
            .iter()
            .map(item_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(page_with_cursor(items, n, |i| i.item_id.clone()))
    }

    async fn modify_item(&self, item_id: &str, patch: ItemPatch) -> AppResult<()> {
        let mut item = self.get_item(item_id).await?;
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
        self.batch_insert_items(&[item]).await
    }

    async fn delete_item(&self, item_id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM items WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM feedback WHERE item_id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_insert_feedback(
        &self,
        rows: Vec<Feedback>,
        auto_insert_user: bool,
        auto_insert_item: bool,
        overwrite: bool,
    ) -> AppResult<()> {
        for row in rows {
            if auto_insert_user {
                sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
                    .bind(&row.key.user_id)
                    .execute(&self.pool)
                    .await?;
            } else {
                let known = sqlx::query("SELECT 1 FROM users WHERE user_id = $1")
                    .bind(&row.key.user_id)
                    .fetch_optional(&self.pool)
                    .await?;
                if known.is_none() {
                    continue;
                }
            }
            if auto_insert_item {
                sqlx::query(
                    "INSERT INTO items (item_id, time_stamp) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                )
                .bind(&row.key.item_id)
                .bind(row.timestamp)
                .execute(&self.pool)
                .await?;
            } else {
                let known = sqlx::query("SELECT 1 FROM items WHERE item_id = $1")
                    .bind(&row.key.item_id)
                    .fetch_optional(&self.pool)
                    .await?;
                if known.is_none() {
                    continue;
                }
            }
            let conflict_action = if overwrite {
                "DO UPDATE SET time_stamp = EXCLUDED.time_stamp, comment = EXCLUDED.comment"
            } else {
                "DO NOTHING"
            };
            let sql = format!(
                r#"
                INSERT INTO feedback (feedback_type, user_id, item_id, time_stamp, comment)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (feedback_type, user_id, item_id) {}
                "#,
                conflict_action
            );
            sqlx::query(&sql)
                .bind(&row.key.feedback_type)
                .bind(&row.key.user_id)
                .bind(&row.key.item_id)
                .bind(row.timestamp)
                .bind(&row.comment)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn get_user_feedback(
        &self,
        user_id: &str,
        with_future: bool,
        types: &[String],
    ) -> AppResult<Vec<Feedback>> {
        let mut sql = String::from(
            "SELECT feedback_type, user_id, item_id, time_stamp, comment FROM feedback WHERE user_id = $1",
        );
        if !with_future {
            sql.push_str(" AND time_stamp <= NOW()");
        }
        if !types.is_empty() {
            sql.push_str(" AND feedback_type = ANY($2)");
        }
        sql.push_str(" ORDER BY item_id, feedback_type");
        let mut query = sqlx::query(&sql).bind(user_id);
        if !types.is_empty() {
            query = query.bind(types.to_vec());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(feedback_from_row).collect()
    }

    async fn get_item_feedback(
        &self,
        item_id: &str,
        types: &[String],
    ) -> AppResult<Vec<Feedback>> {
        let mut sql = String::from(
            "SELECT feedback_type, user_id, item_id, time_stamp, comment FROM feedback WHERE item_id = $1",
        );
        if !types.is_empty() {
            sql.push_str(" AND feedback_type = ANY($2)");
        }
        sql.push_str(" ORDER BY user_id, feedback_type");
        let mut query = sqlx::query(&sql).bind(item_id);
        if !types.is_empty() {
            query = query.bind(types.to_vec());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(feedback_from_row).collect()
    }

    async fn get_user_item_feedback(
        &self,
        user_id: &str,
        item_id: &str,
        types: &[String],
    ) -> AppResult<Vec<Feedback>> {
        let mut sql = String::from(
            "SELECT feedback_type, user_id, item_id, time_stamp, comment FROM feedback WHERE user_id = $1 AND item_id = $2",
        );
        if !types.is_empty() {
            sql.push_str(" AND feedback_type = ANY($3)");
        }
        sql.push_str(" ORDER BY feedback_type");
        let mut query = sqlx::query(&sql).bind(user_id).bind(item_id);
        if !types.is_empty() {
            query = query.bind(types.to_vec());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(feedback_from_row).collect()
    }

    async fn delete_user_item_feedback(
        &self,
        user_id: &str,
        item_id: &str,
        types: &[String],
    ) -> AppResult<usize> {
        let mut sql = String::from("DELETE FROM feedback WHERE user_id = $1 AND item_id = $2");
        if !types.is_empty() {
            sql.push_str(" AND feedback_type = ANY($3)");
        }
        let mut query = sqlx::query(&sql).bind(user_id).bind(item_id);
        if !types.is_empty() {
            query = query.bind(types.to_vec());
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}
