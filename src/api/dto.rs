use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{
    BlockKind, ContentBlock, DirectionRef, Lesson, LessonContent, ReportedStatus, StatusKind,
    UserStatus,
};

/// List responses come either wrapped as `{ data, meta }` or as a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Wrapped { data, .. } => data,
            ListEnvelope::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ItemEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ItemEnvelope<T> {
    pub fn into_item(self) -> T {
        match self {
            ItemEnvelope::Wrapped { data } => data,
            ItemEnvelope::Bare(item) => item,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TagsDto {
    List(Vec<String>),
    Joined(String),
}

impl TagsDto {
    fn into_vec(self) -> Vec<String> {
        let raw = match self {
            TagsDto::List(items) => items,
            TagsDto::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusDto {
    #[serde(default, alias = "is_favorite")]
    pub is_favorite: Option<bool>,
    #[serde(default, alias = "is_completed")]
    pub is_completed: Option<bool>,
    #[serde(default, alias = "favorited_at")]
    pub favorited_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "completed_at")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
    #[serde(default, alias = "last_accessed")]
    pub last_accessed: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionRefDto {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Lesson record as the backend sends it. Status flags show up under
/// several names depending on the endpoint; [`LessonDto::into_lesson`]
/// folds them into one [`UserStatus`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDto {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default, alias = "chat_link")]
    pub chat_link: Option<String>,
    #[serde(default)]
    pub difficulty: Option<i32>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default, alias = "estimated_time")]
    pub estimated_time: Option<f64>,
    #[serde(default)]
    pub tags: Option<TagsDto>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published: Option<bool>,
    #[serde(default)]
    pub featured: Option<bool>,
    pub order: i64,
    #[serde(alias = "direction_id")]
    pub direction_id: i64,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, alias = "is_favorite")]
    pub is_favorite: Option<bool>,
    #[serde(default, alias = "is_completed")]
    pub is_completed: Option<bool>,
    #[serde(default, alias = "favorited_at")]
    pub favorited_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "completed_at")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_status: Option<UserStatusDto>,

    #[serde(default)]
    pub direction: Option<DirectionRefDto>,
    #[serde(default, alias = "direction_name")]
    pub direction_name: Option<String>,
    #[serde(default, alias = "direction_slug")]
    pub direction_slug: Option<String>,
    #[serde(default, alias = "direction_icon")]
    pub direction_icon: Option<String>,
    #[serde(default, alias = "direction_color")]
    pub direction_color: Option<String>,
}

impl LessonDto {
    pub fn into_lesson(self) -> Result<Lesson, ApiError> {
        if self.id.trim().is_empty() {
            return Err(ApiError::UnexpectedResponse("lesson without an id".to_string()));
        }
        if self.order <= 0 {
            return Err(ApiError::UnexpectedResponse(format!(
                "lesson {} has invalid order {}",
                self.id, self.order
            )));
        }

        let nested = self.user_status.unwrap_or_default();
        let is_favorite = nested.is_favorite.or(self.is_favorite);
        let is_completed = nested.is_completed.or(self.is_completed);
        let reported = ReportedStatus {
            favorite: is_favorite.is_some(),
            completed: is_completed.is_some(),
        };
        let mut user_status = UserStatus {
            progress: nested.progress,
            last_accessed: nested.last_accessed,
            ..UserStatus::default()
        };
        user_status.restore(
            StatusKind::Favorite,
            is_favorite.unwrap_or(false),
            nested.favorited_at.or(self.favorited_at),
        );
        user_status.restore(
            StatusKind::Completed,
            is_completed.unwrap_or(false),
            nested.completed_at.or(self.completed_at),
        );

        let direction = match self.direction {
            Some(d) => Some(DirectionRef {
                id: d.id,
                name: d.name.unwrap_or_default(),
                slug: d.slug.unwrap_or_default(),
                icon: d.icon,
                color: d.color,
            }),
            None => self.direction_name.map(|name| DirectionRef {
                id: self.direction_id,
                name,
                slug: self.direction_slug.unwrap_or_default(),
                icon: self.direction_icon,
                color: self.direction_color,
            }),
        };

        let content = match self.content {
            Some(raw) => parse_content(raw, &self.id)?,
            None => None,
        };

        Ok(Lesson {
            slug: self.slug.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            order: self.order,
            title: self.title,
            description: self.description,
            content,
            chat_link: self.chat_link,
            difficulty: self.difficulty,
            tags: self.tags.map(TagsDto::into_vec).unwrap_or_default(),
            author: self.author,
            duration: self.duration.map(to_minutes),
            estimated_time: self.estimated_time.map(to_minutes),
            published: self.published.unwrap_or(true),
            featured: self.featured.unwrap_or(false),
            direction_id: self.direction_id,
            direction,
            created_at: self.created_at,
            updated_at: self.updated_at,
            user_status,
            reported,
        })
    }
}

fn to_minutes(raw: f64) -> u32 {
    raw.max(0.0).round() as u32
}

/// Content arrives as a block document, as that document encoded in a
/// string, or as plain text.
fn parse_content(raw: serde_json::Value, lesson_id: &str) -> Result<Option<LessonContent>, ApiError> {
    match raw {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(text) => {
            if text.trim().is_empty() {
                return Ok(None);
            }
            match serde_json::from_str::<LessonContent>(&text) {
                Ok(content) => Ok(Some(content)),
                Err(_) => Ok(Some(LessonContent {
                    blocks: vec![ContentBlock {
                        kind: BlockKind::Text,
                        content: Some(text),
                        url: None,
                        images: Vec::new(),
                        prompts: Vec::new(),
                    }],
                })),
            }
        }
        other => serde_json::from_value::<LessonContent>(other)
            .map(Some)
            .map_err(|e| {
                ApiError::UnexpectedResponse(format!("lesson {} has malformed content: {}", lesson_id, e))
            }),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest<'a> {
    pub user_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "is_favorite")]
    pub is_favorite: Option<bool>,
    #[serde(default, alias = "is_completed")]
    pub is_completed: Option<bool>,
}

impl ToggleResponse {
    pub fn value(&self, kind: StatusKind) -> Result<bool, ApiError> {
        let value = match kind {
            StatusKind::Favorite => self.is_favorite,
            StatusKind::Completed => self.is_completed,
        };
        value.ok_or_else(|| {
            ApiError::UnexpectedResponse(format!("toggle response is missing the {} flag", kind))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonStatus {
    #[serde(alias = "is_favorite")]
    pub is_favorite: bool,
    #[serde(alias = "is_completed")]
    pub is_completed: bool,
}

impl LessonStatus {
    pub fn get(&self, kind: StatusKind) -> bool {
        match kind {
            StatusKind::Favorite => self.is_favorite,
            StatusKind::Completed => self.is_completed,
        }
    }
}

pub const MAX_BATCH_OPERATIONS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub lesson_id: String,
    pub value: bool,
}

#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    pub operations: &'a [BatchOperation],
}

#[derive(Debug, Deserialize)]
pub struct BatchResultDto {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub results: Vec<BatchResultDto>,
}

/// Per-type add/remove counts reported for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub favorites_added: usize,
    pub favorites_removed: usize,
    pub completed_added: usize,
    pub completed_removed: usize,
}

impl BatchSummary {
    pub fn merge(&mut self, other: &BatchSummary) {
        self.processed += other.processed;
        self.favorites_added += other.favorites_added;
        self.favorites_removed += other.favorites_removed;
        self.completed_added += other.completed_added;
        self.completed_removed += other.completed_removed;
    }
}

impl TryFrom<BatchResponse> for BatchSummary {
    type Error = ApiError;

    fn try_from(response: BatchResponse) -> Result<Self, Self::Error> {
        if !response.success {
            return Err(ApiError::UnexpectedResponse(
                "batch endpoint reported failure".to_string(),
            ));
        }
        let mut summary = BatchSummary {
            processed: response.processed,
            ..BatchSummary::default()
        };
        for result in response.results {
            match result.kind.as_str() {
                "favorites_added" => summary.favorites_added += result.count,
                "favorites_removed" => summary.favorites_removed += result.count,
                "completed_added" => summary.completed_added += result.count,
                "completed_removed" => summary.completed_removed += result.count,
                other => tracing::debug!("ignoring unknown batch result type {}", other),
            }
        }
        Ok(summary)
    }
}
