//! Server push channel: transport, observers and reconnection.

pub mod connection;
pub mod observers;
pub mod supervisor;

pub use connection::{PushConnector, PushError, PushLink, WsConnector};
pub use observers::{ChannelEvent, EventCategory, SubscriptionId};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
