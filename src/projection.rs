//! Filtered, sorted and paginated views over a lesson snapshot.
//!
//! Everything here is a pure function of its inputs.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Lesson;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// Creation-date window. Bounds are explicit inputs, never "now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Every present predicate must hold for a lesson to pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonFilter {
    /// Passes when the lesson carries any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    pub completed: Option<bool>,
    pub favorite: Option<bool>,
    pub author: Option<String>,
    pub duration: Option<DurationRange>,
    pub direction_id: Option<i64>,
    pub created: Option<DateRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Title,
    #[default]
    Order,
    Duration,
    Author,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl LessonSort {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

/// Cumulative "load more" paging: page `n` yields the first `n * page_size`
/// items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(default)]
    pub filter: LessonFilter,
    #[serde(default)]
    pub sort: LessonSort,
    /// `None` disables pagination.
    pub page: Option<PageRequest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedList {
    pub lessons: Vec<Lesson>,
    pub total_filtered: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListStats {
    pub total: usize,
    pub completed: usize,
    pub favorites: usize,
    pub filtered: usize,
}

pub fn project(snapshot: &[Lesson], query: &ListQuery) -> ProjectedList {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);

    let mut lessons: Vec<Lesson> = snapshot
        .iter()
        .filter(|lesson| needle.as_deref().is_none_or(|q| matches_search(lesson, q)))
        .filter(|lesson| matches_filter(lesson, &query.filter))
        .cloned()
        .collect();

    sort_lessons(&mut lessons, query.sort);

    let total_filtered = lessons.len();
    let mut has_more = false;
    if let Some(page) = query.page {
        let visible = page.page.max(1).saturating_mul(page.page_size);
        has_more = total_filtered > visible;
        lessons.truncate(visible);
    }

    ProjectedList {
        lessons,
        total_filtered,
        has_more,
    }
}

/// Case-insensitive substring match on title, description, author or any
/// tag. `query` must already be lowercase.
pub fn matches_search(lesson: &Lesson, query: &str) -> bool {
    let contains = |field: &str| field.to_lowercase().contains(query);
    contains(&lesson.title)
        || lesson.description.as_deref().is_some_and(contains)
        || lesson.author.as_deref().is_some_and(contains)
        || lesson.tags.iter().any(|tag| contains(tag))
}

pub fn matches_filter(lesson: &Lesson, filter: &LessonFilter) -> bool {
    if !filter.tags.is_empty() && !lesson.tags.iter().any(|t| filter.tags.contains(t)) {
        return false;
    }
    if let Some(completed) = filter.completed {
        if lesson.user_status.is_completed != completed {
            return false;
        }
    }
    if let Some(favorite) = filter.favorite {
        if lesson.user_status.is_favorite != favorite {
            return false;
        }
    }
    if let Some(author) = filter.author.as_deref().filter(|a| !a.is_empty()) {
        let author = author.to_lowercase();
        let hit = lesson
            .author
            .as_deref()
            .is_some_and(|a| a.to_lowercase().contains(&author));
        if !hit {
            return false;
        }
    }
    if let Some(range) = filter.duration {
        let Some(duration) = lesson.duration else {
            return false;
        };
        if range.min.is_some_and(|min| duration < min) || range.max.is_some_and(|max| duration > max) {
            return false;
        }
    }
    if let Some(direction_id) = filter.direction_id {
        if lesson.direction_id != direction_id {
            return false;
        }
    }
    if let Some(range) = filter.created {
        let Some(created) = lesson.created_at else {
            return false;
        };
        if range.from.is_some_and(|from| created < from) || range.to.is_some_and(|to| created > to) {
            return false;
        }
    }
    true
}

/// Stable sort; equal keys keep their relative order in both directions.
pub fn sort_lessons(lessons: &mut [Lesson], sort: LessonSort) {
    lessons.sort_by(|a, b| {
        let ord = compare(a, b, sort.field);
        match sort.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

fn compare(a: &Lesson, b: &Lesson, field: SortField) -> Ordering {
    match field {
        SortField::Title => a.title.cmp(&b.title),
        SortField::Order => a.order.cmp(&b.order),
        SortField::Duration => a.duration.unwrap_or(0).cmp(&b.duration.unwrap_or(0)),
        SortField::Author => a
            .author
            .as_deref()
            .unwrap_or("")
            .cmp(b.author.as_deref().unwrap_or("")),
        SortField::CreatedAt => a.created_at.unwrap_or_default().cmp(&b.created_at.unwrap_or_default()),
        SortField::UpdatedAt => a.updated_at.unwrap_or_default().cmp(&b.updated_at.unwrap_or_default()),
    }
}

pub fn stats(snapshot: &[Lesson], projected: &ProjectedList) -> ListStats {
    ListStats {
        total: snapshot.len(),
        completed: snapshot.iter().filter(|l| l.user_status.is_completed).count(),
        favorites: snapshot.iter().filter(|l| l.user_status.is_favorite).count(),
        filtered: projected.total_filtered,
    }
}
