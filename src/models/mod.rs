use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user known to the data store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl User {
    /// Creates a bare user with the given id
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            labels: Vec::new(),
            comment: String::new(),
        }
    }
}

/// Partial update of a user; absent fields are untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub labels: Option<Vec<String>>,
    pub comment: Option<String>,
}

/// An item known to the data store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub item_id: String,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

/// Partial update of an item; absent fields are untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    pub is_hidden: Option<bool>,
    pub categories: Option<Vec<String>>,
    pub timestamp: Option<DateTime<Utc>>,
    pub labels: Option<Vec<String>>,
    pub comment: Option<String>,
}

/// Identity of a feedback row: one row per (type, user, item) triple
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FeedbackKey {
    pub feedback_type: String,
    pub user_id: String,
    pub item_id: String,
}

/// A feedback event connecting a user and an item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    #[serde(flatten)]
    pub key: FeedbackKey,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub comment: String,
}

impl Feedback {
    pub fn new(
        feedback_type: impl Into<String>,
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: FeedbackKey {
                feedback_type: feedback_type.into(),
                user_id: user_id.into(),
                item_id: item_id.into(),
            },
            timestamp,
            comment: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_key_flattens_into_feedback() {
        let feedback = Feedback::new("like", "alice", "item-1", Utc::now());
        let json = serde_json::to_value(&feedback).unwrap();
        assert_eq!(json["feedback_type"], "like");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["item_id"], "item-1");
    }

    #[test]
    fn test_item_optional_fields_default() {
        let item: Item = serde_json::from_str(
            r#"{"item_id": "movie-1", "timestamp": "2024-03-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(!item.is_hidden);
        assert!(item.categories.is_empty());
        assert!(item.labels.is_empty());
    }
}
