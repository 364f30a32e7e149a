use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::models::StatusKind;
use crate::services::mutation::{MutationEngine, ToggleOutcome};

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
struct Burst {
    generation: u64,
    clicks: u32,
}

/// Coalesces rapid clicks on one toggle control.
///
/// Each click restarts the window. When it closes, an odd number of clicks
/// toggles once and an even number cancels out.
pub struct ToggleDebouncer {
    engine: Arc<MutationEngine>,
    window: Duration,
    bursts: Mutex<HashMap<(String, StatusKind), Burst>>,
}

impl ToggleDebouncer {
    pub fn new(engine: Arc<MutationEngine>, window: Duration) -> Self {
        Self {
            engine,
            window,
            bursts: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a click. The returned task resolves to `None` when a later
    /// click superseded this one or the burst cancelled out.
    pub fn click(self: &Arc<Self>, lesson_id: &str, kind: StatusKind) -> JoinHandle<Option<ToggleOutcome>> {
        let key = (lesson_id.to_string(), kind);
        let generation = {
            let mut bursts = self.bursts.lock().unwrap_or_else(PoisonError::into_inner);
            let burst = bursts.entry(key.clone()).or_default();
            burst.generation += 1;
            burst.clicks += 1;
            burst.generation
        };

        let debouncer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(debouncer.window).await;

            let clicks = {
                let mut bursts = debouncer.bursts.lock().unwrap_or_else(PoisonError::into_inner);
                match bursts.get(&key) {
                    Some(burst) if burst.generation == generation => {
                        bursts.remove(&key).map_or(0, |b| b.clicks)
                    }
                    _ => return None,
                }
            };

            if clicks % 2 == 0 {
                debug!("{} clicks on {} {} cancel out", clicks, key.1, key.0);
                return None;
            }
            Some(debouncer.engine.toggle(&key.0, key.1).await)
        })
    }
}
