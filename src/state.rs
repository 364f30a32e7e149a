use std::sync::Arc;

use crate::sync::SyncHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SyncHub>,
}
