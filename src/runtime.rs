//! Explicit wiring of the client-side core.
//!
//! Nothing here is global: every [`LessonRuntime`] owns its own store, so
//! tests can build as many independent instances as they like.

use std::sync::Arc;

use tracing::info;

use crate::api::{LessonApi, LessonHttpClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{ApiConfig, CacheConfig, SyncClientConfig};
use crate::error::AppError;
use crate::models::StatusKind;
use crate::projection::{ListQuery, ProjectedList, project};
use crate::services::batch::BatchQueue;
use crate::services::debounce::{DEFAULT_DEBOUNCE_WINDOW, ToggleDebouncer};
use crate::services::{LessonLoader, MutationEngine, ToggleOutcome};
use crate::store::{CacheKey, CacheStore};
use crate::sync::SyncChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Tap,
    Success,
    Failure,
}

/// Capabilities of the shell hosting the core, handed in at startup.
pub trait HostShell: Send + Sync {
    /// True when running embedded in a messenger web-app container.
    fn is_embedded(&self) -> bool {
        false
    }

    fn feedback(&self, _kind: Feedback) {}
}

/// A plain host with no extra capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl HostShell for DetachedHost {}

pub struct RuntimeParts {
    pub user_id: String,
    pub api: Arc<dyn LessonApi>,
    pub clock: Arc<dyn Clock>,
    pub cache: CacheConfig,
    pub sync: Option<SyncClientConfig>,
    pub host: Arc<dyn HostShell>,
}

impl RuntimeParts {
    pub fn new(user_id: impl Into<String>, api: Arc<dyn LessonApi>) -> Self {
        Self {
            user_id: user_id.into(),
            api,
            clock: Arc::new(SystemClock),
            cache: CacheConfig::default(),
            sync: None,
            host: Arc::new(DetachedHost),
        }
    }
}

pub struct LessonRuntime {
    store: Arc<CacheStore>,
    loader: LessonLoader,
    mutation: Arc<MutationEngine>,
    batch: Arc<BatchQueue>,
    debouncer: Arc<ToggleDebouncer>,
    sync: Option<Arc<SyncChannel>>,
    host: Arc<dyn HostShell>,
}

impl LessonRuntime {
    /// Builds the runtime. With a sync config this spawns the channel task,
    /// so it must run inside a tokio runtime.
    pub fn create(parts: RuntimeParts) -> Self {
        let store = Arc::new(CacheStore::new(parts.cache, parts.clock.clone()));
        let loader = LessonLoader::new(store.clone(), parts.api.clone(), parts.user_id.clone());

        let sync = parts
            .sync
            .map(|config| {
                SyncChannel::connect(config, parts.user_id.clone(), store.clone(), parts.clock.clone())
            });

        let mut mutation = MutationEngine::new(
            store.clone(),
            parts.api.clone(),
            parts.clock.clone(),
            parts.user_id.clone(),
        );
        if let Some(channel) = &sync {
            mutation = mutation.with_publisher(channel.clone());
        }
        let mutation = Arc::new(mutation);

        let mut batch = BatchQueue::new(store.clone(), parts.api, parts.clock.clone(), parts.user_id.clone());
        if let Some(channel) = &sync {
            batch = batch.with_publisher(channel.clone());
        }
        let batch = Arc::new(batch);
        let debouncer = Arc::new(ToggleDebouncer::new(mutation.clone(), DEFAULT_DEBOUNCE_WINDOW));

        info!(
            "lesson runtime created for user {} (sync: {})",
            parts.user_id,
            sync.is_some()
        );
        Self {
            store,
            loader,
            mutation,
            batch,
            debouncer,
            sync,
            host: parts.host,
        }
    }

    /// Runtime against the HTTP API, configured from the environment.
    /// Sync is enabled when `SYNC_URL` is set.
    pub fn from_env(user_id: impl Into<String>) -> Result<Self, AppError> {
        let api = LessonHttpClient::new(ApiConfig::new_from_env()?)
            .map_err(|e| AppError::Config(e.to_string()))?;
        let mut parts = RuntimeParts::new(user_id, Arc::new(api));
        parts.sync = SyncClientConfig::new_from_env().ok();
        Ok(Self::create(parts))
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn loader(&self) -> &LessonLoader {
        &self.loader
    }

    pub fn mutation(&self) -> &Arc<MutationEngine> {
        &self.mutation
    }

    pub fn batch(&self) -> &Arc<BatchQueue> {
        &self.batch
    }

    pub fn debouncer(&self) -> &Arc<ToggleDebouncer> {
        &self.debouncer
    }

    pub fn sync(&self) -> Option<&Arc<SyncChannel>> {
        self.sync.as_ref()
    }

    pub fn host(&self) -> &Arc<dyn HostShell> {
        &self.host
    }

    /// Refreshes the bucket if stale and projects it.
    pub async fn view(&self, key: &CacheKey, query: &ListQuery) -> ProjectedList {
        let lessons = self.loader.bucket(key).await;
        project(&lessons, query)
    }

    pub async fn toggle(&self, lesson_id: &str, kind: StatusKind) -> ToggleOutcome {
        self.host.feedback(Feedback::Tap);
        let outcome = self.mutation.toggle(lesson_id, kind).await;
        match &outcome {
            ToggleOutcome::Confirmed(_) => self.host.feedback(Feedback::Success),
            ToggleOutcome::RolledBack(_) => self.host.feedback(Feedback::Failure),
            ToggleOutcome::Skipped => {}
        }
        outcome
    }

    /// Closes the sync channel and drops all cached data.
    pub async fn dispose(self) {
        if let Some(channel) = &self.sync {
            channel.close().await;
        }
        self.store.clear();
        info!("lesson runtime disposed");
    }
}
