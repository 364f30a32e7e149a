use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{BatchOperation, BatchSummary, LessonApi, MAX_BATCH_OPERATIONS};
use crate::clock::Clock;
use crate::error::ApiError;
use crate::models::{LessonUpdate, StatusKind};
use crate::services::mutation::UpdatePublisher;
use crate::store::{CacheKey, CacheStore, StatusPatch};

pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct Queued {
    operation: BatchOperation,
    previous: bool,
    previous_at: Option<DateTime<Utc>>,
}

/// Collects status changes and sends them through the batch endpoint.
///
/// Changes are visible in the store as soon as they are queued. A failed
/// flush puts every lesson of the unsent operations back to the value it had
/// before it was first queued. Every operation the server accepted is
/// published to the sync channel when one is attached and connected.
pub struct BatchQueue {
    store: Arc<CacheStore>,
    api: Arc<dyn LessonApi>,
    clock: Arc<dyn Clock>,
    user_id: String,
    publisher: Option<Arc<dyn UpdatePublisher>>,
    pending: Mutex<Vec<Queued>>,
    last_error: Mutex<Option<ApiError>>,
    flushing: AsyncMutex<()>,
    generation: AtomicU64,
}

impl BatchQueue {
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
            pending: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            flushing: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn UpdatePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Sets a flag locally and queues it. Returns false when the lesson
    /// isn't cached.
    pub fn enqueue(&self, lesson_id: &str, kind: StatusKind, value: bool) -> bool {
        let Some(lesson) = self.store.get_by_id(lesson_id) else {
            return false;
        };
        let queued = Queued {
            operation: BatchOperation {
                kind,
                lesson_id: lesson_id.to_string(),
                value,
            },
            previous: lesson.user_status.get(kind),
            previous_at: lesson.user_status.stamp(kind),
        };
        self.store
            .update_status(lesson_id, StatusPatch::flag(kind, value, Some(self.clock.now())));
        self.lock_pending().push(queued);
        true
    }

    /// Queues the opposite of the lesson's current flag and returns it.
    pub fn toggle(&self, lesson_id: &str, kind: StatusKind) -> Option<bool> {
        let current = self.store.get_by_id(lesson_id)?.user_status.get(kind);
        let target = !current;
        self.enqueue(lesson_id, kind, target).then_some(target)
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn last_error(&self) -> Option<ApiError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends everything queued so far.
    pub async fn flush(&self) -> Result<BatchSummary, ApiError> {
        let _guard = self.flushing.lock().await;
        let queued = std::mem::take(&mut *self.lock_pending());
        let operations = dedupe(queued);
        if operations.is_empty() {
            return Ok(BatchSummary::default());
        }

        let mut summary = BatchSummary::default();
        let mut sent = 0;
        let mut failure = None;
        for chunk in operations.chunks(MAX_BATCH_OPERATIONS) {
            let ops: Vec<BatchOperation> = chunk.iter().map(|q| q.operation.clone()).collect();
            match self.api.batch(&ops).await {
                Ok(result) => {
                    summary.merge(&result);
                    sent += chunk.len();
                    self.publish(&ops);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if sent > 0 {
            self.store.invalidate(&CacheKey::All);
            self.store.invalidate(&CacheKey::Favorites);
            self.store.invalidate(&CacheKey::Completed);
        }

        match failure {
            None => {
                info!("batch flushed {} operations", sent);
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                Ok(summary)
            }
            Some(err) => {
                let unsent = &operations[sent..];
                warn!("batch flush failed, rolling back {} operations: {}", unsent.len(), err);
                for queued in unsent {
                    self.store.update_status(
                        &queued.operation.lesson_id,
                        StatusPatch::flag(queued.operation.kind, queued.previous, queued.previous_at),
                    );
                }
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Flushes once no further call has been made for `delay`.
    pub fn spawn_flusher(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            // failures end up in last_error
            let _ = queue.flush().await;
        })
    }

    fn publish(&self, operations: &[BatchOperation]) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if !publisher.is_connected() {
            return;
        }
        let now = self.clock.now();
        for op in operations {
            publisher.publish(LessonUpdate::new(
                op.lesson_id.as_str(),
                self.user_id.as_str(),
                op.kind,
                op.value,
                now,
            ));
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<Queued>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps the last value per `(lesson, kind)` in first-queued order, along
/// with the state from before the first of them.
fn dedupe(queued: Vec<Queued>) -> Vec<Queued> {
    let mut index: HashMap<(String, StatusKind), usize> = HashMap::new();
    let mut out: Vec<Queued> = Vec::new();
    for item in queued {
        let key = (item.operation.lesson_id.clone(), item.operation.kind);
        match index.get(&key) {
            Some(&at) => out[at].operation.value = item.operation.value,
            None => {
                index.insert(key, out.len());
                out.push(item);
            }
        }
    }
    out
}
