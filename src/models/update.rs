use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StatusKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Add,
    Remove,
}

impl UpdateAction {
    pub fn from_value(value: bool) -> Self {
        if value { UpdateAction::Add } else { UpdateAction::Remove }
    }

    pub fn value(&self) -> bool {
        matches!(self, UpdateAction::Add)
    }
}

/// A confirmed status toggle, fanned out over the sync channel.
///
/// The timestamp is overwritten by the server when the event is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonUpdate {
    pub lesson_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub action: UpdateAction,
    #[serde(with = "chrono::serde::ts_milliseconds", default)]
    pub timestamp: DateTime<Utc>,
}

impl LessonUpdate {
    pub fn new(
        lesson_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: StatusKind,
        value: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            user_id: user_id.into(),
            kind,
            action: UpdateAction::from_value(value),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds", default)]
    pub timestamp: DateTime<Utc>,
}
