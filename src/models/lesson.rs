use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DirectionRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub slug: String,
    pub order: i64,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<LessonContent>,
    pub chat_link: Option<String>,
    pub difficulty: Option<i32>,
    pub tags: Vec<String>,
    pub author: Option<String>,
    /// Minutes.
    pub duration: Option<u32>,
    pub estimated_time: Option<u32>,
    pub published: bool,
    pub featured: bool,
    pub direction_id: i64,
    pub direction: Option<DirectionRef>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub user_status: UserStatus,
    /// Status flags the source record actually carried. A flag it left out
    /// is not known to be false.
    #[serde(skip)]
    pub reported: ReportedStatus,
}

impl Lesson {
    /// Bare lesson with default content fields, handy for fixtures.
    pub fn new(id: impl Into<String>, order: i64, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            slug: id.clone(),
            id,
            order,
            title: title.into(),
            description: None,
            content: None,
            chat_link: None,
            difficulty: None,
            tags: Vec::new(),
            author: None,
            duration: None,
            estimated_time: None,
            published: true,
            featured: false,
            direction_id: 0,
            direction: None,
            created_at: None,
            updated_at: None,
            user_status: UserStatus::default(),
            reported: ReportedStatus::default(),
        }
    }

    pub fn is_favorite(&self) -> bool {
        self.user_status.is_favorite
    }

    pub fn is_completed(&self) -> bool {
        self.user_status.is_completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContent {
    pub blocks: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Video,
    Exercise,
    Demo,
    Gallery,
    Examples,
}

/// The only per-user mutable slice of a lesson.
///
/// `favorited_at` is `None` whenever `is_favorite` is false, and likewise for
/// completion. Go through [`UserStatus::set`] to keep that true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub is_favorite: bool,
    pub is_completed: bool,
    pub favorited_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<serde_json::Value>,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl UserStatus {
    pub fn get(&self, kind: StatusKind) -> bool {
        match kind {
            StatusKind::Favorite => self.is_favorite,
            StatusKind::Completed => self.is_completed,
        }
    }

    pub fn stamp(&self, kind: StatusKind) -> Option<DateTime<Utc>> {
        match kind {
            StatusKind::Favorite => self.favorited_at,
            StatusKind::Completed => self.completed_at,
        }
    }

    /// Sets the flag and its timestamp together. An already-set flag keeps
    /// its original timestamp.
    pub fn set(&mut self, kind: StatusKind, value: bool, now: DateTime<Utc>) {
        let (flag, at) = match kind {
            StatusKind::Favorite => (&mut self.is_favorite, &mut self.favorited_at),
            StatusKind::Completed => (&mut self.is_completed, &mut self.completed_at),
        };
        if value {
            if !*flag || at.is_none() {
                *at = Some(now);
            }
        } else {
            *at = None;
        }
        *flag = value;
    }

    /// Restores a flag and timestamp pair captured earlier, verbatim.
    pub fn restore(&mut self, kind: StatusKind, value: bool, at: Option<DateTime<Utc>>) {
        let at = if value { at } else { None };
        match kind {
            StatusKind::Favorite => {
                self.is_favorite = value;
                self.favorited_at = at;
            }
            StatusKind::Completed => {
                self.is_completed = value;
                self.completed_at = at;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportedStatus {
    pub favorite: bool,
    pub completed: bool,
}

impl ReportedStatus {
    pub fn both() -> Self {
        Self {
            favorite: true,
            completed: true,
        }
    }

    pub fn has(&self, kind: StatusKind) -> bool {
        match kind {
            StatusKind::Favorite => self.favorite,
            StatusKind::Completed => self.completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Favorite,
    Completed,
}

impl StatusKind {
    /// Path segment used by the toggle endpoints.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Favorite => "favorite",
            StatusKind::Completed => "completed",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
