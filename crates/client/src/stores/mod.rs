//! State the consumer surface reads from.

pub mod notifications;
pub mod sync_store;

pub use notifications::{Notification, NotificationKind, Notifier};
pub use sync_store::{FetchSeq, ItemSnapshot, MergeOutcome, SnapshotPatch, SyncStore};
