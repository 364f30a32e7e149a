use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::api::LessonApi;
use crate::error::ApiError;
use crate::models::{Direction, Lesson};
use crate::store::{CacheKey, CacheStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoadTarget {
    Bucket(CacheKey),
    Directions,
    Direction(String),
    Lesson(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Cache was still valid; nothing fetched.
    Fresh,
    Fetched(usize),
    /// Fetch failed; the previous data (if any) is still served.
    Failed,
}

/// Fills the cache store from the remote API on demand.
///
/// Loads are serialized and re-check validity after waiting, so many
/// readers of the same stale bucket trigger a single fetch.
pub struct LessonLoader {
    store: Arc<CacheStore>,
    api: Arc<dyn LessonApi>,
    user_id: String,
    refresh: AsyncMutex<()>,
    errors: Mutex<HashMap<LoadTarget, ApiError>>,
}

impl LessonLoader {
    pub fn new(store: Arc<CacheStore>, api: Arc<dyn LessonApi>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            api,
            user_id: user_id.into(),
            refresh: AsyncMutex::new(()),
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub async fn load(&self, key: &CacheKey, force: bool) -> LoadOutcome {
        if !force && self.store.is_valid(key) {
            return LoadOutcome::Fresh;
        }

        let _guard = self.refresh.lock().await;
        if !force && self.store.is_valid(key) {
            return LoadOutcome::Fresh;
        }

        let result = match key {
            CacheKey::All => self.api.list_lessons().await,
            CacheKey::Direction(slug) => self.api.direction_lessons(slug).await,
            CacheKey::Favorites => self.api.favorites(&self.user_id).await,
            CacheKey::Completed => self.api.completed(&self.user_id).await,
        };

        let target = LoadTarget::Bucket(key.clone());
        match result {
            Ok(lessons) => {
                let count = lessons.len();
                self.store.set_bucket(key.clone(), lessons);
                self.clear_error(&target);
                info!("loaded {} lessons into {}", count, key);
                LoadOutcome::Fetched(count)
            }
            Err(err) => {
                warn!("failed to load {}: {}", key, err);
                self.record_error(target, err);
                LoadOutcome::Failed
            }
        }
    }

    /// Loads the bucket if stale and returns whatever the store holds for it.
    pub async fn bucket(&self, key: &CacheKey) -> Vec<Lesson> {
        self.load(key, false).await;
        self.store.get_bucket(key).unwrap_or_default()
    }

    pub async fn load_directions(&self, force: bool) -> LoadOutcome {
        if !force && self.store.directions_valid() {
            return LoadOutcome::Fresh;
        }

        let _guard = self.refresh.lock().await;
        if !force && self.store.directions_valid() {
            return LoadOutcome::Fresh;
        }

        match self.api.list_directions().await {
            Ok(directions) => {
                let count = directions.len();
                self.store.set_directions(directions);
                self.clear_error(&LoadTarget::Directions);
                LoadOutcome::Fetched(count)
            }
            Err(err) => {
                warn!("failed to load directions: {}", err);
                self.record_error(LoadTarget::Directions, err);
                LoadOutcome::Failed
            }
        }
    }

    /// Direction by slug, served from cache when present.
    pub async fn direction(&self, slug: &str) -> Option<Direction> {
        if let Some(direction) = self.store.direction_by_slug(slug) {
            return Some(direction);
        }
        let target = LoadTarget::Direction(slug.to_string());
        match self.api.get_direction(slug).await {
            Ok(direction) => {
                self.store.upsert_direction(direction.clone());
                self.clear_error(&target);
                Some(direction)
            }
            Err(err) => {
                warn!("failed to load direction {}: {}", slug, err);
                self.record_error(target, err);
                None
            }
        }
    }

    /// Fetches one lesson and merges it into the store. Falls back to the
    /// cached copy when the fetch fails.
    pub async fn load_lesson(&self, slug: &str) -> Option<Lesson> {
        let target = LoadTarget::Lesson(slug.to_string());
        match self.api.get_lesson(slug).await {
            Ok(lesson) => {
                self.store.upsert_lesson(lesson.clone());
                self.clear_error(&target);
                Some(lesson)
            }
            Err(err) => {
                warn!("failed to load lesson {}: {}", slug, err);
                self.record_error(target, err);
                self.store.get_by_slug(slug)
            }
        }
    }

    /// Marks every bucket stale, e.g. after an admin edit elsewhere.
    pub fn clear_cache(&self) {
        debug!("invalidating all cache buckets");
        self.store.invalidate_all();
    }

    pub fn last_error(&self, target: &LoadTarget) -> Option<ApiError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    fn record_error(&self, target: LoadTarget, err: ApiError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, err);
    }

    fn clear_error(&self, target: &LoadTarget) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
    }
}
