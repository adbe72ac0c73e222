use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::Fields;

/// Append-only notification/audit entry attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_system: bool,
}

impl Comment {
    pub fn system(text: impl Into<String>, user_id: &str, user_name: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            created_at: Utc::now(),
            is_system: true,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Entry for a delivery's `comments` sub-collection.
    pub fn to_thread_entry(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("text".to_string(), Value::String(self.text.clone()));
        fields.insert("userId".to_string(), Value::String(self.user_id.clone()));
        fields.insert("userName".to_string(), Value::String(self.user_name.clone()));
        fields.insert(
            "createdAt".to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        fields.insert("type".to_string(), Value::String("system".to_string()));
        fields
    }
}
