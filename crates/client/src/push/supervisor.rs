//! Push channel lifecycle and reconnection policy.
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!                                 │  ▲                     │
//!                       open fail │  │ after delay         │ close / error
//!                                 ▼  │                     ▼
//!                           ReconnectPending ◀─────────────┘
//! ```
//!
//! Reconnection uses a fixed delay and never gives up; only
//! [`ConnectionSupervisor::disconnect`] ends it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures_channel::mpsc::UnboundedSender;
use futures_util::stream::LocalBoxStream;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::{spawn_local, JoinHandle};

use super::connection::{PushConnector, PushError, PushLink};
use super::observers::{ChannelEvent, EventCategory, ObserverRegistry, SubscriptionId};
use crate::timers::TimerTable;

const RECONNECT_TIMER: &str = "push-reconnect";

/// Connection state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::ReconnectPending
        )
    }
}

struct LiveLink {
    outgoing: UnboundedSender<String>,
    reader: JoinHandle<()>,
}

struct Shared {
    connector: Rc<dyn PushConnector>,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    url: RefCell<Option<String>>,
    link: RefCell<Option<LiveLink>>,
    opening: RefCell<Option<JoinHandle<()>>>,
    timers: RefCell<TimerTable<&'static str>>,
    observers: RefCell<ObserverRegistry>,
    /// Bumped by every connect attempt and by `disconnect`; work started
    /// under an older epoch is discarded when it resumes.
    epoch: Cell<u64>,
    attempts: Cell<u64>,
}

/// Owns the push channel. Must be used from inside a `LocalSet`.
pub struct ConnectionSupervisor {
    shared: Rc<Shared>,
}

impl ConnectionSupervisor {
    pub fn new(connector: Rc<dyn PushConnector>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Rc::new(Shared {
                connector,
                reconnect_delay,
                state,
                url: RefCell::new(None),
                link: RefCell::new(None),
                opening: RefCell::new(None),
                timers: RefCell::new(TimerTable::new()),
                observers: RefCell::new(ObserverRegistry::default()),
                epoch: Cell::new(0),
                attempts: Cell::new(0),
            }),
        }
    }

    /// Open the channel to `url`. No-op while connecting or connected.
    pub fn connect(&self, url: impl Into<String>) {
        let url = url.into();
        if self.shared.state().is_connected() || self.shared.state() == ConnectionState::Connecting
        {
            crate::log_debug!("connect({url}) ignored: already {:?}", self.shared.state());
            return;
        }
        if self.shared.state() == ConnectionState::Disconnected {
            self.shared.attempts.set(0);
        }
        Shared::connect(&self.shared, url);
    }

    /// Close the channel and stop reconnecting until `connect` is called again.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// Write `payload` if connected. Nothing is queued otherwise.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        let state = self.shared.state();
        if !state.is_connected() {
            crate::log_warn!("push channel not connected ({state:?}); message dropped");
            return false;
        }
        match self.shared.link.borrow().as_ref() {
            Some(link) => link.outgoing.unbounded_send(payload.into()).is_ok(),
            None => false,
        }
    }

    pub fn on(
        &self,
        category: EventCategory,
        handler: impl Fn(&ChannelEvent) + 'static,
    ) -> SubscriptionId {
        self.shared
            .observers
            .borrow_mut()
            .on(category, Rc::new(handler))
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.observers.borrow_mut().off(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Open attempts since the last `connect` from `Disconnected`.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.get()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.shared.timers.borrow().is_armed(&RECONNECT_TIMER)
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.shared.disconnect();
        self.shared.observers.borrow_mut().clear();
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            crate::log_debug!("push channel {previous:?} -> {next:?}");
        }
    }

    fn connect(self: &Rc<Self>, url: String) {
        self.timers.borrow_mut().cancel(&RECONNECT_TIMER);
        *self.url.borrow_mut() = Some(url.clone());
        self.set_state(ConnectionState::Connecting);

        let epoch = self.epoch.get() + 1;
        self.epoch.set(epoch);
        self.attempts.set(self.attempts.get() + 1);
        crate::log_info!("connecting push channel to {url} (attempt {})", self.attempts.get());

        let shared = self.clone();
        let handle = spawn_local(async move {
            let result = shared.connector.open(&url).await;
            if shared.epoch.get() != epoch {
                return;
            }
            match result {
                Ok(link) => shared.on_open(link, epoch),
                Err(e) => shared.on_failure(e, epoch),
            }
        });
        if let Some(previous) = self.opening.borrow_mut().replace(handle) {
            previous.abort();
        }
    }

    fn on_open(self: &Rc<Self>, link: PushLink, epoch: u64) {
        self.timers.borrow_mut().cancel(&RECONNECT_TIMER);

        let PushLink { outgoing, incoming } = link;
        let reader = spawn_local(self.clone().read_loop(incoming, epoch));
        *self.link.borrow_mut() = Some(LiveLink { outgoing, reader });
        self.set_state(ConnectionState::Connected);

        self.dispatch(&ChannelEvent::Open);
    }

    fn on_failure(self: &Rc<Self>, error: PushError, epoch: u64) {
        crate::log_warn!("{error}");
        self.dispatch(&ChannelEvent::Error(error.to_string()));
        // An error observer may have called `disconnect`.
        if self.epoch.get() == epoch {
            self.schedule_reconnect();
        }
    }

    async fn read_loop(
        self: Rc<Self>,
        mut incoming: LocalBoxStream<'static, Result<String, PushError>>,
        epoch: u64,
    ) {
        while let Some(item) = incoming.next().await {
            match item {
                Ok(payload) => self.dispatch(&ChannelEvent::Message(payload)),
                Err(e) => {
                    crate::log_error!("{e}");
                    self.dispatch(&ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
            if self.epoch.get() != epoch {
                return;
            }
        }
        if self.epoch.get() != epoch {
            return;
        }

        crate::log_info!("push channel closed");
        self.link.borrow_mut().take();
        self.dispatch(&ChannelEvent::Close);
        // A close observer may have called `disconnect`.
        if self.epoch.get() == epoch {
            self.schedule_reconnect();
        }
    }

    /// Arm the single reconnect timer unless it is already armed.
    fn schedule_reconnect(self: &Rc<Self>) {
        self.set_state(ConnectionState::ReconnectPending);
        if self.timers.borrow().is_armed(&RECONNECT_TIMER) {
            return;
        }
        let Some(url) = self.url.borrow().clone() else {
            return;
        };

        let delay = self.reconnect_delay;
        crate::log_info!("reconnecting push channel in {}ms", delay.as_millis());
        let shared = self.clone();
        let handle = spawn_local(async move {
            tokio::time::sleep(delay).await;
            shared.timers.borrow_mut().disarm(&RECONNECT_TIMER);
            if shared.state() == ConnectionState::ReconnectPending {
                Shared::connect(&shared, url);
            }
        });
        self.timers.borrow_mut().arm(RECONNECT_TIMER, handle);
    }

    fn disconnect(&self) {
        self.epoch.set(self.epoch.get() + 1);
        self.timers.borrow_mut().cancel_all();
        if let Some(opening) = self.opening.borrow_mut().take() {
            opening.abort();
        }
        let link = self.link.borrow_mut().take();
        self.set_state(ConnectionState::Disconnected);

        if let Some(link) = link {
            link.reader.abort();
            drop(link.outgoing);
            crate::log_info!("push channel closed by client");
            self.dispatch(&ChannelEvent::Close);
        }
    }

    fn dispatch(&self, event: &ChannelEvent) {
        let handlers = self.observers.borrow().handlers_for(event.category());
        for handler in handlers {
            handler(event);
        }
    }
}
