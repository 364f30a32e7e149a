pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod projection;
pub mod routes;
pub mod runtime;
pub mod services;
pub mod state;
pub mod store;
pub mod sync;
