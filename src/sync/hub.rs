use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::models::{LessonUpdate, UserActivity};
use crate::sync::protocol::{ClientEvent, Presence, ServerEvent, SystemMessage};

pub type ClientId = Uuid;

struct Session {
    user_id: Option<String>,
    last_activity: DateTime<Utc>,
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<ClientId, Session>,
    recent: VecDeque<LessonUpdate>,
}

impl HubState {
    fn send_to(&self, client: ClientId, event: ServerEvent) {
        if let Some(session) = self.sessions.get(&client) {
            // a closed outbox means the socket task is already gone
            let _ = session.outbox.send(event);
        }
    }

    fn broadcast_except(&self, sender: ClientId, event: &ServerEvent) {
        for (id, session) in &self.sessions {
            if *id != sender {
                let _ = session.outbox.send(event.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedUser {
    pub user_id: String,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub connected_users: usize,
    pub connections: usize,
    pub recent_updates: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub dropped_clients: usize,
    pub pruned_updates: usize,
}

/// Fan-out point for lesson updates between connected clients.
///
/// The hub only relays: it checks that an update carries the identity the
/// connection authenticated with, stamps it, buffers it for late joiners and
/// forwards it to every other connection.
pub struct SyncHub {
    state: Mutex<HubState>,
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    started_at: DateTime<Utc>,
}

impl SyncHub {
    pub fn new(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            state: Mutex::new(HubState::default()),
            config,
            clock,
            started_at,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection. Events for it arrive on the receiver.
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let now = self.clock.now();
        self.lock().sessions.insert(
            id,
            Session {
                user_id: None,
                last_activity: now,
                outbox: tx,
            },
        );
        debug!("client connected: {}", id);
        (id, rx)
    }

    pub fn handle(&self, client: ClientId, event: ClientEvent) {
        match event {
            ClientEvent::Authenticate(user_id) => self.authenticate(client, user_id),
            ClientEvent::LessonUpdate(update) => self.lesson_update(client, update),
            ClientEvent::UserActivity(activity) => self.user_activity(client, activity),
            ClientEvent::Heartbeat => {
                let now = self.clock.now();
                if let Some(session) = self.lock().sessions.get_mut(&client) {
                    session.last_activity = now;
                }
            }
        }
    }

    /// Sends an error to one connection only.
    pub fn send_error(&self, client: ClientId, message: impl Into<String>) {
        self.lock().send_to(client, ServerEvent::error(message));
    }

    fn authenticate(&self, client: ClientId, user_id: String) {
        if user_id.trim().is_empty() {
            self.send_error(client, "User ID is required");
            return;
        }
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(&client) else {
            return;
        };
        session.user_id = Some(user_id.clone());
        session.last_activity = now;

        let skip = state.recent.len().saturating_sub(self.config.replay_count);
        let replay: Vec<LessonUpdate> = state.recent.iter().skip(skip).cloned().collect();
        state.send_to(client, ServerEvent::RecentUpdates(replay));
        state.broadcast_except(
            client,
            &ServerEvent::UserJoined(Presence {
                user_id: user_id.clone(),
                timestamp: now,
            }),
        );
        info!("user authenticated: {}", user_id);
    }

    /// Returns the user bound to `client`, or `None` if it never
    /// authenticated.
    fn bound_user(state: &HubState, client: ClientId) -> Option<String> {
        state.sessions.get(&client).and_then(|s| s.user_id.clone())
    }

    fn lesson_update(&self, client: ClientId, mut update: LessonUpdate) {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(user_id) = Self::bound_user(&state, client) else {
            debug!("ignoring lesson update from unauthenticated client {}", client);
            return;
        };
        if update.user_id != user_id {
            warn!("rejected lesson update for {} from user {}", update.user_id, user_id);
            state.send_to(client, ServerEvent::error("Invalid user ID in update"));
            return;
        }

        update.timestamp = now;
        state.recent.push_back(update.clone());
        while state.recent.len() > self.config.recent_capacity {
            state.recent.pop_front();
        }
        if let Some(session) = state.sessions.get_mut(&client) {
            session.last_activity = now;
        }
        state.broadcast_except(client, &ServerEvent::LessonUpdated(update.clone()));
        debug!(
            "lesson update from {}: {} {:?} {}",
            user_id, update.kind, update.action, update.lesson_id
        );
    }

    fn user_activity(&self, client: ClientId, mut activity: UserActivity) {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(user_id) = Self::bound_user(&state, client) else {
            return;
        };
        if activity.user_id != user_id {
            warn!("rejected activity for {} from user {}", activity.user_id, user_id);
            state.send_to(client, ServerEvent::error("Invalid user ID in activity"));
            return;
        }

        activity.timestamp = now;
        state.broadcast_except(client, &ServerEvent::UserActivity(activity));
        if let Some(session) = state.sessions.get_mut(&client) {
            session.last_activity = now;
        }
    }

    pub fn disconnect(&self, client: ClientId) {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(session) = state.sessions.remove(&client) else {
            return;
        };
        if let Some(user_id) = session.user_id {
            info!("user disconnected: {}", user_id);
            state.broadcast_except(
                client,
                &ServerEvent::UserLeft(Presence {
                    user_id,
                    timestamp: now,
                }),
            );
        }
    }

    /// Drops idle connections and buffered updates past retention.
    ///
    /// Dropping a session closes its outbox, which ends the socket task.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut state = self.lock();

        let before = state.sessions.len();
        state.sessions.retain(|id, session| {
            let idle = now - session.last_activity > self.config.inactive_after;
            if idle {
                info!(
                    "cleaning up inactive client {} ({})",
                    id,
                    session.user_id.as_deref().unwrap_or("anonymous")
                );
            }
            !idle
        });
        let dropped_clients = before - state.sessions.len();

        let before = state.recent.len();
        let retention = self.config.event_retention;
        state.recent.retain(|update| now - update.timestamp < retention);
        let pruned_updates = before - state.recent.len();

        SweepReport {
            dropped_clients,
            pruned_updates,
        }
    }

    /// Sends a `system-message` to every connection.
    pub fn broadcast_system(&self, message: impl Into<String>, data: Option<serde_json::Value>) {
        let event = ServerEvent::SystemMessage(SystemMessage {
            message: message.into(),
            data,
            timestamp: self.clock.now(),
        });
        let state = self.lock();
        for session in state.sessions.values() {
            let _ = session.outbox.send(event.clone());
        }
    }

    pub fn connected_users(&self) -> Vec<ConnectedUser> {
        let mut users: Vec<ConnectedUser> = self
            .lock()
            .sessions
            .values()
            .filter_map(|s| {
                s.user_id.clone().map(|user_id| ConnectedUser {
                    user_id,
                    last_activity: s.last_activity,
                })
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn recent_updates(&self) -> Vec<LessonUpdate> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn stats(&self) -> HubStats {
        let state = self.lock();
        HubStats {
            connected_users: state.sessions.values().filter(|s| s.user_id.is_some()).count(),
            connections: state.sessions.len(),
            recent_updates: state.recent.len(),
            uptime_secs: (self.clock.now() - self.started_at).num_seconds(),
        }
    }
}
