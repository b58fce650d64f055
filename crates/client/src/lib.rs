//! AutoMed Client - simulation dashboard synchronization layer
//!
//! This crate keeps a local view of remote simulation state fresh: it polls
//! the AutoMed service, supervises the push channel, and merges every
//! response into a single store the dashboard reads from.

pub mod logging;

pub mod api_client;
pub mod config;
pub mod push;
pub mod scheduler;
pub mod session;
pub mod stores;
pub mod timers;

#[cfg(test)]
mod testing;

pub use api_client::{ApiClient, SimulationApi};
pub use config::{ConfigError, SyncConfig};
pub use push::{ConnectionState, ConnectionSupervisor, WsConnector};
pub use session::{DetailTab, Focus, FocusMode, SyncSession, TaskKey};
pub use stores::{ItemSnapshot, Notification, NotificationKind, Notifier, SyncStore};
