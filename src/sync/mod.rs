pub mod client;
pub mod hub;
pub mod protocol;
pub mod ws;

pub use client::{SyncChannel, apply_server_event};
pub use hub::{ClientId, ConnectedUser, HubStats, SweepReport, SyncHub};
pub use protocol::{ClientEvent, ServerEvent};
