//! In-memory cache of lessons, directions and per-bucket freshness.
//!
//! Every mutation takes the write lock once and finishes before releasing
//! it, so readers never see half of an update.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::models::{Direction, Lesson, StatusKind, UserStatus};

/// Named cache bucket. Constructed only through these variants so that a
/// bucket can't be created under a misspelled key and never invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    All,
    Direction(String),
    Favorites,
    Completed,
}

impl CacheKey {
    pub fn for_status(kind: StatusKind) -> Self {
        match kind {
            StatusKind::Favorite => CacheKey::Favorites,
            StatusKind::Completed => CacheKey::Completed,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::All => f.write_str("lessons"),
            CacheKey::Direction(slug) => write!(f, "lessons:{}", slug),
            CacheKey::Favorites => f.write_str("favorites"),
            CacheKey::Completed => f.write_str("completed"),
        }
    }
}

/// Partial update of a lesson's user status. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub is_favorite: Option<bool>,
    pub favorited_at: Option<Option<DateTime<Utc>>>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub progress: Option<Option<serde_json::Value>>,
    pub last_accessed: Option<Option<DateTime<Utc>>>,
}

impl StatusPatch {
    /// Sets one flag together with its timestamp.
    pub fn flag(kind: StatusKind, value: bool, at: Option<DateTime<Utc>>) -> Self {
        let at = if value { at } else { None };
        match kind {
            StatusKind::Favorite => StatusPatch {
                is_favorite: Some(value),
                favorited_at: Some(at),
                ..StatusPatch::default()
            },
            StatusKind::Completed => StatusPatch {
                is_completed: Some(value),
                completed_at: Some(at),
                ..StatusPatch::default()
            },
        }
    }

    /// Sets one flag; a newly raised flag is stamped with the store's clock,
    /// an already raised one keeps its timestamp.
    pub fn set(kind: StatusKind, value: bool) -> Self {
        match kind {
            StatusKind::Favorite => StatusPatch {
                is_favorite: Some(value),
                ..StatusPatch::default()
            },
            StatusKind::Completed => StatusPatch {
                is_completed: Some(value),
                ..StatusPatch::default()
            },
        }
    }

    fn apply(self, status: &mut UserStatus, now: DateTime<Utc>) {
        if let Some(value) = self.is_favorite {
            match self.favorited_at {
                Some(at) => status.restore(StatusKind::Favorite, value, at),
                None => status.set(StatusKind::Favorite, value, now),
            }
        }
        if let Some(value) = self.is_completed {
            match self.completed_at {
                Some(at) => status.restore(StatusKind::Completed, value, at),
                None => status.set(StatusKind::Completed, value, now),
            }
        }
        if let Some(progress) = self.progress {
            status.progress = progress;
        }
        if let Some(last_accessed) = self.last_accessed {
            status.last_accessed = last_accessed;
        }
    }
}

#[derive(Default)]
struct Inner {
    lessons: HashMap<String, Lesson>,
    buckets: HashMap<CacheKey, Vec<String>>,
    last_fetch: HashMap<CacheKey, DateTime<Utc>>,
    favorites: HashSet<String>,
    completed: HashSet<String>,
    directions_by_id: HashMap<i64, Direction>,
    directions_by_slug: HashMap<String, i64>,
    directions_fetched_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn sync_membership(&mut self, id: &str) {
        let Some(lesson) = self.lessons.get(id) else {
            return;
        };
        let (fav, done) = (lesson.user_status.is_favorite, lesson.user_status.is_completed);
        if fav {
            self.favorites.insert(id.to_string());
        } else {
            self.favorites.remove(id);
        }
        if done {
            self.completed.insert(id.to_string());
        } else {
            self.completed.remove(id);
        }
    }

    /// Carries the cached flag and stamp over for every status flag the
    /// incoming record didn't report.
    fn keep_unreported(&self, lesson: &mut Lesson) {
        let Some(cached) = self.lessons.get(&lesson.id) else {
            return;
        };
        for kind in [StatusKind::Favorite, StatusKind::Completed] {
            if !lesson.reported.has(kind) {
                let status = &cached.user_status;
                lesson.user_status.restore(kind, status.get(kind), status.stamp(kind));
            }
        }
    }

    fn collect(&self, ids: &[String]) -> Vec<Lesson> {
        ids.iter().filter_map(|id| self.lessons.get(id).cloned()).collect()
    }
}

/// Authoritative local copy of fetched lessons and directions.
///
/// Owns no I/O: the loader fills it, the mutation engine and sync channel
/// patch statuses through [`CacheStore::update_status`].
pub struct CacheStore {
    inner: RwLock<Inner>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            ttl: config.ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lessons of a bucket in the order they were fetched. Never does I/O.
    pub fn get_bucket(&self, key: &CacheKey) -> Option<Vec<Lesson>> {
        let inner = self.read();
        inner.buckets.get(key).map(|ids| inner.collect(ids))
    }

    /// True while `now - last_fetch < ttl`; false if never fetched.
    pub fn is_valid(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        self.read()
            .last_fetch
            .get(key)
            .is_some_and(|fetched| now - *fetched < self.ttl)
    }

    pub fn last_fetch(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.read().last_fetch.get(key).copied()
    }

    /// Replaces a bucket's contents and stamps it fresh. Each lesson
    /// overwrites the cached copy with the same id, except for status flags
    /// the record didn't report, which keep their cached value.
    ///
    /// The favorites and completed buckets are the server's full membership
    /// lists for their own flag: lessons they no longer contain lose it.
    pub fn set_bucket(&self, key: CacheKey, lessons: Vec<Lesson>) {
        let now = self.clock.now();
        let mut inner = self.write();

        let ids: Vec<String> = lessons.iter().map(|l| l.id.clone()).collect();

        let membership = match key {
            CacheKey::Favorites => Some(StatusKind::Favorite),
            CacheKey::Completed => Some(StatusKind::Completed),
            _ => None,
        };
        if let Some(kind) = membership {
            let incoming: HashSet<&String> = ids.iter().collect();
            let dropped: Vec<String> = match kind {
                StatusKind::Favorite => &inner.favorites,
                StatusKind::Completed => &inner.completed,
            }
            .iter()
            .filter(|id| !incoming.contains(id))
            .cloned()
            .collect();
            for id in dropped {
                if let Some(lesson) = inner.lessons.get_mut(&id) {
                    lesson.user_status.restore(kind, false, None);
                }
                inner.sync_membership(&id);
            }
        }

        for mut lesson in lessons {
            inner.keep_unreported(&mut lesson);
            if let Some(kind) = membership {
                lesson.user_status.set(kind, true, now);
            }
            let id = lesson.id.clone();
            inner.lessons.insert(id.clone(), lesson);
            inner.sync_membership(&id);
        }

        debug!("cache bucket {} set with {} lessons", key, ids.len());
        inner.buckets.insert(key.clone(), ids);
        inner.last_fetch.insert(key, now);
    }

    /// Inserts or replaces one lesson without touching bucket freshness.
    /// Unreported status flags keep their cached value.
    pub fn upsert_lesson(&self, mut lesson: Lesson) {
        let mut inner = self.write();
        inner.keep_unreported(&mut lesson);
        let id = lesson.id.clone();
        inner.lessons.insert(id.clone(), lesson);
        inner.sync_membership(&id);
    }

    pub fn get_by_id(&self, id: &str) -> Option<Lesson> {
        self.read().lessons.get(id).cloned()
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Lesson> {
        self.read().lessons.values().find(|l| l.slug == slug).cloned()
    }

    /// Shallow-merges into one lesson's status and updates the favorite and
    /// completed sets. Returns the resulting status, or `None` when the
    /// lesson isn't cached.
    pub fn update_status(&self, id: &str, patch: StatusPatch) -> Option<UserStatus> {
        let now = self.clock.now();
        let mut inner = self.write();
        let lesson = inner.lessons.get_mut(id)?;
        patch.apply(&mut lesson.user_status, now);
        let status = lesson.user_status.clone();
        inner.sync_membership(id);
        Some(status)
    }

    /// Forgets when a bucket was fetched. The data stays readable until the
    /// next fetch overwrites it.
    pub fn invalidate(&self, key: &CacheKey) {
        self.write().last_fetch.remove(key);
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.write();
        inner.last_fetch.clear();
        inner.directions_fetched_at = None;
    }

    /// Drops everything, data included.
    pub fn clear(&self) {
        *self.write() = Inner::default();
    }

    pub fn all_lessons(&self) -> Vec<Lesson> {
        let inner = self.read();
        let mut lessons: Vec<Lesson> = inner.lessons.values().cloned().collect();
        lessons.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        lessons
    }

    pub fn favorite_lessons(&self) -> Vec<Lesson> {
        let inner = self.read();
        let mut lessons: Vec<Lesson> = inner
            .favorites
            .iter()
            .filter_map(|id| inner.lessons.get(id).cloned())
            .collect();
        lessons.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        lessons
    }

    pub fn completed_lessons(&self) -> Vec<Lesson> {
        let inner = self.read();
        let mut lessons: Vec<Lesson> = inner
            .completed
            .iter()
            .filter_map(|id| inner.lessons.get(id).cloned())
            .collect();
        lessons.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        lessons
    }

    pub fn lessons_by_direction(&self, slug: &str) -> Vec<Lesson> {
        let inner = self.read();
        let direction_id = inner.directions_by_slug.get(slug).copied();
        let mut lessons: Vec<Lesson> = inner
            .lessons
            .values()
            .filter(|l| {
                l.direction.as_ref().is_some_and(|d| d.slug == slug)
                    || direction_id.is_some_and(|id| l.direction_id == id)
            })
            .cloned()
            .collect();
        lessons.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        lessons
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.read().favorites.contains(id)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.read().completed.contains(id)
    }

    pub fn set_directions(&self, directions: Vec<Direction>) {
        let now = self.clock.now();
        let mut inner = self.write();
        inner.directions_by_id.clear();
        inner.directions_by_slug.clear();
        for direction in directions {
            inner.directions_by_slug.insert(direction.slug.clone(), direction.id);
            inner.directions_by_id.insert(direction.id, direction);
        }
        inner.directions_fetched_at = Some(now);
    }

    pub fn upsert_direction(&self, direction: Direction) {
        let mut inner = self.write();
        inner.directions_by_slug.insert(direction.slug.clone(), direction.id);
        inner.directions_by_id.insert(direction.id, direction);
    }

    pub fn directions_valid(&self) -> bool {
        let now = self.clock.now();
        self.read()
            .directions_fetched_at
            .is_some_and(|fetched| now - fetched < self.ttl)
    }

    pub fn directions(&self) -> Vec<Direction> {
        let mut directions: Vec<Direction> = self.read().directions_by_id.values().cloned().collect();
        directions.sort_by_key(|d| d.id);
        directions
    }

    pub fn direction_by_id(&self, id: i64) -> Option<Direction> {
        self.read().directions_by_id.get(&id).cloned()
    }

    pub fn direction_by_slug(&self, slug: &str) -> Option<Direction> {
        let inner = self.read();
        inner
            .directions_by_slug
            .get(slug)
            .and_then(|id| inner.directions_by_id.get(id))
            .cloned()
    }
}
