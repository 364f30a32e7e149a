#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lessonsync::api::{BatchOperation, BatchSummary, LessonApi, LessonStatus};
use lessonsync::clock::ManualClock;
use lessonsync::config::CacheConfig;
use lessonsync::error::ApiError;
use lessonsync::models::{Direction, Lesson, LessonUpdate, StatusKind};
use lessonsync::services::UpdatePublisher;
use lessonsync::store::CacheStore;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

pub fn store_with(clock: Arc<ManualClock>, lessons: Vec<Lesson>) -> Arc<CacheStore> {
    let store = Arc::new(CacheStore::new(CacheConfig::default(), clock));
    for lesson in lessons {
        store.upsert_lesson(lesson);
    }
    store
}

pub fn lesson(id: &str, order: i64, title: &str) -> Lesson {
    Lesson::new(id, order, title)
}

/// In-memory backend. Toggles flip a server-side flag keyed by order.
#[derive(Default)]
pub struct MockLessonApi {
    pub lessons: Mutex<Vec<Lesson>>,
    pub favorites: Mutex<Vec<Lesson>>,
    pub completed: Mutex<Vec<Lesson>>,
    pub server_flags: Mutex<HashMap<(i64, StatusKind), bool>>,
    pub fail_with: Mutex<Option<ApiError>>,
    pub list_calls: AtomicUsize,
    pub toggle_calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<BatchOperation>>>,
    /// Toggles wait on this lock, so a test can hold a request in flight.
    pub hold: tokio::sync::Mutex<()>,
}

impl MockLessonApi {
    pub fn with_lessons(lessons: Vec<Lesson>) -> Self {
        let api = Self::default();
        *api.lessons.lock().unwrap() = lessons;
        api
    }

    pub fn fail(&self, err: ApiError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    pub fn set_flag(&self, order: i64, kind: StatusKind, value: bool) {
        self.server_flags.lock().unwrap().insert((order, kind), value);
    }

    fn check(&self) -> Result<(), ApiError> {
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LessonApi for MockLessonApi {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.check()?;
        Ok(self.lessons.lock().unwrap().clone())
    }

    async fn get_lesson(&self, slug: &str) -> Result<Lesson, ApiError> {
        self.check()?;
        self.lessons
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.slug == slug)
            .cloned()
            .ok_or_else(|| ApiError::from_status(404, None))
    }

    async fn list_directions(&self) -> Result<Vec<Direction>, ApiError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn get_direction(&self, _slug: &str) -> Result<Direction, ApiError> {
        Err(ApiError::from_status(404, None))
    }

    async fn direction_lessons(&self, _slug: &str) -> Result<Vec<Lesson>, ApiError> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn favorites(&self, _user_id: &str) -> Result<Vec<Lesson>, ApiError> {
        self.check()?;
        Ok(self.favorites.lock().unwrap().clone())
    }

    async fn completed(&self, _user_id: &str) -> Result<Vec<Lesson>, ApiError> {
        self.check()?;
        Ok(self.completed.lock().unwrap().clone())
    }

    async fn toggle(&self, order: i64, kind: StatusKind, _user_id: &str) -> Result<bool, ApiError> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        let _held = self.hold.lock().await;
        self.check()?;
        let mut flags = self.server_flags.lock().unwrap();
        let flag = flags.entry((order, kind)).or_insert(false);
        *flag = !*flag;
        Ok(*flag)
    }

    async fn lesson_status(&self, order: i64, _user_id: &str) -> Result<LessonStatus, ApiError> {
        self.check()?;
        let flags = self.server_flags.lock().unwrap();
        Ok(LessonStatus {
            is_favorite: flags.get(&(order, StatusKind::Favorite)).copied().unwrap_or(false),
            is_completed: flags.get(&(order, StatusKind::Completed)).copied().unwrap_or(false),
        })
    }

    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchSummary, ApiError> {
        self.check()?;
        self.batches.lock().unwrap().push(operations.to_vec());
        Ok(BatchSummary {
            processed: operations.len(),
            ..BatchSummary::default()
        })
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub connected: AtomicBool,
    pub published: Mutex<Vec<LessonUpdate>>,
}

impl RecordingPublisher {
    pub fn connected() -> Self {
        Self {
            connected: AtomicBool::new(true),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl UpdatePublisher for RecordingPublisher {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, update: LessonUpdate) -> bool {
        self.published.lock().unwrap().push(update);
        true
    }
}
