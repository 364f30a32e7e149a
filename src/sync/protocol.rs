//! Wire format of the sync channel.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": ...}`.
//!
//! Client → server: `authenticate`, `lesson-update`, `user-activity`,
//! `heartbeat`.
//!
//! Server → client: `recent-updates`, `user-joined`, `user-left`,
//! `lesson-updated`, `user-activity`, `error`, `system-message`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{LessonUpdate, UserActivity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Binds a user id to the connection.
    Authenticate(String),
    LessonUpdate(LessonUpdate),
    UserActivity(UserActivity),
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    RecentUpdates(Vec<LessonUpdate>),
    UserJoined(Presence),
    UserLeft(Presence),
    LessonUpdated(LessonUpdate),
    UserActivity(UserActivity),
    Error(ErrorPayload),
    SystemMessage(SystemMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}
