//! Transient operator notifications.
//!
//! At most one notification is visible. Showing a new one replaces the
//! current one; each expires after a fixed delay unless dismissed first.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::spawn_local;

use crate::timers::TimerTable;

const EXPIRY_TIMER: &str = "notification-expiry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

struct NotifierShared {
    ttl: Duration,
    current: watch::Sender<Option<Notification>>,
    next_id: Cell<u64>,
    timers: RefCell<TimerTable<&'static str>>,
}

pub struct Notifier {
    shared: Rc<NotifierShared>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            shared: Rc::new(NotifierShared {
                ttl,
                current,
                next_id: Cell::new(1),
                timers: RefCell::new(TimerTable::new()),
            }),
        }
    }

    /// Show `message`, replacing whatever is visible. Must be called from
    /// inside a `LocalSet`.
    pub fn show(&self, kind: NotificationKind, message: impl Into<String>) -> u64 {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);

        let notification = Notification {
            id,
            kind,
            message: message.into(),
            created_at: Utc::now(),
        };
        crate::log_debug!("notification #{id} ({kind:?}): {}", notification.message);
        self.shared.current.send_replace(Some(notification));

        let weak: Weak<NotifierShared> = Rc::downgrade(&self.shared);
        let ttl = self.shared.ttl;
        let handle = spawn_local(async move {
            tokio::time::sleep(ttl).await;
            if let Some(shared) = weak.upgrade() {
                shared.timers.borrow_mut().disarm(&EXPIRY_TIMER);
                shared.current.send_if_modified(|current| {
                    if current.as_ref().is_some_and(|n| n.id == id) {
                        *current = None;
                        true
                    } else {
                        false
                    }
                });
            }
        });
        self.shared.timers.borrow_mut().arm(EXPIRY_TIMER, handle);
        id
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.show(NotificationKind::Success, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.show(NotificationKind::Error, message)
    }

    pub fn dismiss(&self) {
        self.shared.timers.borrow_mut().cancel(&EXPIRY_TIMER);
        self.shared.current.send_if_modified(|current| current.take().is_some());
    }

    pub fn current(&self) -> Option<Notification> {
        self.shared.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Notification>> {
        self.shared.current.subscribe()
    }

    pub(crate) fn shutdown(&self) {
        self.shared.timers.borrow_mut().cancel_all();
    }
}
