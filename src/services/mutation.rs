use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::api::{LessonApi, LessonStatus};
use crate::clock::Clock;
use crate::error::ApiError;
use crate::models::{LessonUpdate, StatusKind};
use crate::store::{CacheKey, CacheStore, StatusPatch};

/// Where one `(lesson, kind)` toggle currently stands.
///
/// `Idle → Pending → Confirmed | RolledBack`. A new toggle moves any state
/// back to `Pending`. With overlapping requests the state reflects whichever
/// response arrived last.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToggleState {
    #[default]
    Idle,
    Pending { optimistic: bool },
    Confirmed { value: bool },
    RolledBack { restored: bool, error: ApiError },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    /// The lesson isn't cached; nothing was sent.
    Skipped,
    Confirmed(bool),
    RolledBack(ApiError),
}

/// Outbound side of the sync channel as seen by the mutation engine.
pub trait UpdatePublisher: Send + Sync {
    fn is_connected(&self) -> bool;
    /// Queues the update for sending. Returns false if it was dropped.
    fn publish(&self, update: LessonUpdate) -> bool;
}

#[derive(Debug, Default)]
struct Track {
    state: ToggleState,
    in_flight: usize,
}

type ToggleKey = (String, StatusKind);

/// Applies status toggles optimistically and reconciles them with the
/// server's answer.
pub struct MutationEngine {
    store: Arc<CacheStore>,
    api: Arc<dyn LessonApi>,
    clock: Arc<dyn Clock>,
    user_id: String,
    publisher: Option<Arc<dyn UpdatePublisher>>,
    toggles: Mutex<HashMap<ToggleKey, Track>>,
    errors: Mutex<HashMap<String, ApiError>>,
}

impl MutationEngine {
    pub fn new(
        store: Arc<CacheStore>,
        api: Arc<dyn LessonApi>,
        clock: Arc<dyn Clock>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            api,
            clock,
            user_id: user_id.into(),
            publisher: None,
            toggles: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn UpdatePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn toggle(&self, lesson_id: &str, kind: StatusKind) -> ToggleOutcome {
        let Some(lesson) = self.store.get_by_id(lesson_id) else {
            debug!("toggle {} skipped: lesson {} is not cached", kind, lesson_id);
            return ToggleOutcome::Skipped;
        };

        let previous = lesson.user_status.get(kind);
        let previous_at = lesson.user_status.stamp(kind);
        let target = !previous;

        self.store.update_status(
            lesson_id,
            StatusPatch::flag(kind, target, Some(self.clock.now())),
        );
        self.begin(lesson_id, kind, target);

        let result = self.api.toggle(lesson.order, kind, &self.user_id).await;

        match result {
            Ok(value) => {
                self.store.update_status(lesson_id, StatusPatch::set(kind, value));
                self.store.invalidate(&CacheKey::for_status(kind));
                if value != target {
                    info!(
                        "server answered {}={} for lesson {} (expected {})",
                        kind, value, lesson_id, target
                    );
                }
                self.publish(lesson_id, kind, value);
                self.finish(lesson_id, kind, ToggleState::Confirmed { value });
                ToggleOutcome::Confirmed(value)
            }
            Err(err) => {
                warn!("toggle {} on lesson {} failed, rolling back: {}", kind, lesson_id, err);
                self.store.update_status(
                    lesson_id,
                    StatusPatch::flag(kind, previous, previous_at),
                );
                self.errors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(lesson_id.to_string(), err.clone());
                self.finish(
                    lesson_id,
                    kind,
                    ToggleState::RolledBack {
                        restored: previous,
                        error: err.clone(),
                    },
                );
                ToggleOutcome::RolledBack(err)
            }
        }
    }

    /// Re-reads both flags of one lesson from the server.
    pub async fn refresh_status(&self, lesson_id: &str) -> Result<LessonStatus, ApiError> {
        let Some(lesson) = self.store.get_by_id(lesson_id) else {
            return Err(ApiError::InvalidInput(format!("lesson {} is not cached", lesson_id)));
        };
        let status = self.api.lesson_status(lesson.order, &self.user_id).await?;
        self.store.update_status(
            lesson_id,
            StatusPatch {
                is_favorite: Some(status.is_favorite),
                is_completed: Some(status.is_completed),
                ..StatusPatch::default()
            },
        );
        Ok(status)
    }

    pub fn toggle_state(&self, lesson_id: &str, kind: StatusKind) -> ToggleState {
        self.toggles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(lesson_id.to_string(), kind))
            .map(|t| t.state.clone())
            .unwrap_or_default()
    }

    /// True while any toggle on the lesson awaits its response.
    pub fn is_in_flight(&self, lesson_id: &str) -> bool {
        self.toggles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|((id, _), track)| id == lesson_id && track.in_flight > 0)
    }

    pub fn in_flight_count(&self, lesson_id: &str, kind: StatusKind) -> usize {
        self.toggles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(lesson_id.to_string(), kind))
            .map_or(0, |t| t.in_flight)
    }

    pub fn toggle_error(&self, lesson_id: &str) -> Option<ApiError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(lesson_id)
            .cloned()
    }

    pub fn clear_toggle_error(&self, lesson_id: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(lesson_id);
    }

    fn begin(&self, lesson_id: &str, kind: StatusKind, optimistic: bool) {
        self.clear_toggle_error(lesson_id);
        let mut toggles = self.toggles.lock().unwrap_or_else(PoisonError::into_inner);
        let track = toggles.entry((lesson_id.to_string(), kind)).or_default();
        track.state = ToggleState::Pending { optimistic };
        track.in_flight += 1;
    }

    fn finish(&self, lesson_id: &str, kind: StatusKind, state: ToggleState) {
        let mut toggles = self.toggles.lock().unwrap_or_else(PoisonError::into_inner);
        let track = toggles.entry((lesson_id.to_string(), kind)).or_default();
        track.in_flight = track.in_flight.saturating_sub(1);
        track.state = state;
    }

    fn publish(&self, lesson_id: &str, kind: StatusKind, value: bool) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if !publisher.is_connected() {
            debug!("sync channel offline, not publishing {} on {}", kind, lesson_id);
            return;
        }
        let update = LessonUpdate::new(lesson_id, self.user_id.clone(), kind, value, self.clock.now());
        if !publisher.publish(update) {
            warn!("sync update for lesson {} was dropped", lesson_id);
        }
    }
}
