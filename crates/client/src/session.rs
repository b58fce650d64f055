//! The synchronization session.
//!
//! [`SyncSession`] owns everything the dashboard keeps in sync: the
//! connected flag driven by the liveness task, the push channel supervisor,
//! the refresh scheduler, the store and the notifier. It is created once,
//! started with [`SyncSession::start`] and torn down with
//! [`SyncSession::shutdown`] (or on drop).
//!
//! Refresh tasks:
//!
//! | task           | period              | active while                          |
//! |----------------|---------------------|---------------------------------------|
//! | `Liveness`     | `liveness_period`   | started                               |
//! | `Roster`       | `roster_period`     | connected                             |
//! | `Detail(id)`   | detail or expanded  | connected, `id` tracked and focused   |
//! |                |                     | with auto-refresh on                  |

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use automed_shared::{EchoResponse, ServerInfo, SimulationConfig, SimulationId, TransportError};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::spawn_local;

use crate::api_client::SimulationApi;
use crate::config::SyncConfig;
use crate::push::{
    ChannelEvent, ConnectionState, ConnectionSupervisor, EventCategory, PushConnector,
    SubscriptionId,
};
use crate::scheduler::{PollScheduler, TaskRunner};
use crate::stores::{ItemSnapshot, MergeOutcome, Notifier, SnapshotPatch, SyncStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Liveness,
    Roster,
    Detail(SimulationId),
}

/// Section shown by the details panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTab {
    Status,
    Stats,
    Events,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// Details panel: one section at `detail_period`.
    Tab(DetailTab),
    /// Large view: every section at `expanded_period`.
    Expanded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Focus {
    pub id: SimulationId,
    pub mode: FocusMode,
    /// Off: the focused section is loaded once per focus change and not polled.
    pub auto_refresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sections {
    status: bool,
    stats: bool,
    events: bool,
}

impl Sections {
    const STATUS: Sections = Sections {
        status: true,
        stats: false,
        events: false,
    };
    const ALL: Sections = Sections {
        status: true,
        stats: true,
        events: true,
    };

    fn for_mode(mode: FocusMode) -> Self {
        match mode {
            FocusMode::Tab(DetailTab::Status) => Sections::STATUS,
            FocusMode::Tab(DetailTab::Stats) => Sections {
                status: false,
                stats: true,
                events: false,
            },
            FocusMode::Tab(DetailTab::Events) => Sections {
                status: false,
                stats: false,
                events: true,
            },
            FocusMode::Expanded => Sections::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    Delete,
}

impl Command {
    fn action(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Delete => "delete",
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Command::Start => "started",
            Command::Pause => "paused",
            Command::Resume => "resumed",
            Command::Stop => "stopped",
            Command::Delete => "deleted",
        }
    }
}

struct SessionInner {
    me: Weak<SessionInner>,
    config: SyncConfig,
    api: Rc<dyn SimulationApi>,
    supervisor: ConnectionSupervisor,
    scheduler: PollScheduler<TaskKey>,
    store: RefCell<SyncStore>,
    notifier: Notifier,
    connected: watch::Sender<bool>,
    server_info: watch::Sender<Option<ServerInfo>>,
    info_requested: Cell<bool>,
    focus: Cell<Option<Focus>>,
    started: Cell<bool>,
    closed: Cell<bool>,
}

/// Client-side synchronization session. Must be used from inside a
/// `LocalSet`.
pub struct SyncSession {
    inner: Rc<SessionInner>,
}

impl SyncSession {
    pub fn new(
        config: SyncConfig,
        api: Rc<dyn SimulationApi>,
        connector: Rc<dyn PushConnector>,
    ) -> Self {
        let inner = Rc::new_cyclic(|me: &Weak<SessionInner>| {
            let supervisor = ConnectionSupervisor::new(connector, config.reconnect_delay);
            for category in [EventCategory::Open, EventCategory::Message] {
                let me = me.clone();
                supervisor.on(category, move |event| {
                    if let Some(inner) = me.upgrade() {
                        inner.on_push_event(event);
                    }
                });
            }

            let (connected, _) = watch::channel(false);
            let (server_info, _) = watch::channel(None);
            SessionInner {
                me: me.clone(),
                notifier: Notifier::new(config.notification_ttl),
                config,
                api,
                supervisor,
                scheduler: PollScheduler::new(),
                store: RefCell::new(SyncStore::new()),
                connected,
                server_info,
                info_requested: Cell::new(false),
                focus: Cell::new(None),
                started: Cell::new(false),
                closed: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Start the liveness task and open the push channel if one is
    /// configured. Calling it again is a no-op.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.closed.get() || inner.started.replace(true) {
            return;
        }
        crate::log_info!("sync session started against {}", inner.config.api_url);
        inner.arm(TaskKey::Liveness, Duration::ZERO);
        if let Some(url) = &inner.config.push_url {
            inner.supervisor.connect(url.clone());
        }
    }

    /// Cancel every timer, close the push channel and refuse further work.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.closed.replace(true) {
            return;
        }
        inner.scheduler.shutdown();
        inner.supervisor.disconnect();
        inner.notifier.shutdown();
        crate::log_info!("sync session shut down");
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.server_info.borrow().clone()
    }

    pub fn watch_server_info(&self) -> watch::Receiver<Option<ServerInfo>> {
        self.inner.server_info.subscribe()
    }

    pub fn roster(&self) -> Vec<SimulationId> {
        self.inner.store.borrow().roster().to_vec()
    }

    pub fn snapshot(&self, id: SimulationId) -> Option<ItemSnapshot> {
        self.inner.store.borrow().snapshot(id).cloned()
    }

    pub fn revision(&self) -> u64 {
        self.inner.store.borrow().revision()
    }

    /// Bumped whenever the roster or a snapshot changes.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.inner.store.borrow().subscribe()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.supervisor.watch_state()
    }

    /// Write to the push channel. False if it is not connected.
    pub fn send_push(&self, payload: impl Into<String>) -> bool {
        self.inner.supervisor.send(payload)
    }

    /// Receive push payloads verbatim, in arrival order.
    pub fn on_push_message(&self, handler: impl Fn(&str) + 'static) -> SubscriptionId {
        self.inner
            .supervisor
            .on(EventCategory::Message, move |event| {
                if let ChannelEvent::Message(payload) = event {
                    handler(payload);
                }
            })
    }

    pub fn on_push_event(
        &self,
        category: EventCategory,
        handler: impl Fn(&ChannelEvent) + 'static,
    ) -> SubscriptionId {
        self.inner.supervisor.on(category, handler)
    }

    pub fn off_push(&self, id: SubscriptionId) -> bool {
        self.inner.supervisor.off(id)
    }

    pub fn focused(&self) -> Option<Focus> {
        self.inner.focus.get()
    }

    /// Load the details of `id` now and poll them on a fast period,
    /// replacing any previous focus. Switching mode on the same simulation
    /// keeps its auto-refresh setting; a new simulation starts with it on.
    /// Returns false if `id` is not in the roster.
    pub fn focus(&self, id: SimulationId, mode: FocusMode) -> bool {
        let inner = &self.inner;
        if !inner.store.borrow().is_tracked(id) {
            crate::log_debug!("focus on untracked simulation {id} ignored");
            return false;
        }
        let previous = inner.focus.get();
        let auto_refresh = match previous {
            Some(previous) if previous.id == id => previous.auto_refresh,
            Some(previous) => {
                inner.scheduler.stop(&TaskKey::Detail(previous.id));
                true
            }
            None => true,
        };
        inner.focus.set(Some(Focus {
            id,
            mode,
            auto_refresh,
        }));
        inner.load_focus();
        true
    }

    /// Turn polling of the focused simulation on or off. Either way its
    /// details are loaded once right away. Returns false without a focus.
    pub fn set_auto_refresh(&self, on: bool) -> bool {
        let inner = &self.inner;
        let Some(mut focus) = inner.focus.get() else {
            return false;
        };
        focus.auto_refresh = on;
        inner.focus.set(Some(focus));
        if !on {
            inner.scheduler.stop(&TaskKey::Detail(focus.id));
        }
        inner.load_focus();
        true
    }

    pub fn unfocus(&self) {
        if let Some(previous) = self.inner.focus.take() {
            self.inner.scheduler.stop(&TaskKey::Detail(previous.id));
        }
    }

    pub async fn echo(&self, payload: &serde_json::Value) -> Result<EchoResponse, TransportError> {
        self.inner.api.echo(payload).await
    }

    pub async fn create_simulation(
        &self,
        config: &SimulationConfig,
    ) -> Result<SimulationId, TransportError> {
        let inner = &self.inner;
        match inner.api.create_simulation(config).await {
            Ok(id) => {
                crate::log_info!("simulation {id} created ({})", config.nom);
                inner.refresh_after_command(id).await;
                inner.notifier.success(format!("Simulation {id} created"));
                Ok(id)
            }
            Err(e) => {
                crate::log_warn!("create failed: {e}");
                inner
                    .notifier
                    .error(format!("Could not create simulation: {}", e.summary()));
                Err(e)
            }
        }
    }

    pub async fn start_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.inner.run_command(Command::Start, id).await
    }

    pub async fn pause_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.inner.run_command(Command::Pause, id).await
    }

    pub async fn resume_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.inner.run_command(Command::Resume, id).await
    }

    pub async fn stop_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.inner.run_command(Command::Stop, id).await
    }

    pub async fn delete_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.inner.run_command(Command::Delete, id).await
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SessionInner {
    fn arm(&self, key: TaskKey, delay: Duration) {
        if let Some(me) = self.me.upgrade() {
            self.scheduler.arm(&me, key, delay);
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Whether the focused simulation can be loaded at all, polled or not.
    fn focus_loadable(&self, id: SimulationId) -> bool {
        !self.closed.get()
            && self.started.get()
            && self.is_connected()
            && self.focus.get().is_some_and(|focus| focus.id == id)
            && self.store.borrow().is_tracked(id)
    }

    /// Load the focused simulation now: through its polling task when
    /// auto-refresh is on, as a one-shot otherwise.
    fn load_focus(&self) {
        let Some(focus) = self.focus.get() else {
            return;
        };
        if !self.focus_loadable(focus.id) {
            return;
        }
        if focus.auto_refresh {
            self.arm(TaskKey::Detail(focus.id), Duration::ZERO);
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        spawn_local(async move {
            if me.focus_loadable(focus.id) {
                me.refresh_detail(focus.id, Sections::for_mode(focus.mode))
                    .await;
            }
        });
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.send_replace(connected) == connected {
            return;
        }
        if connected {
            crate::log_info!("service reachable");
            self.arm(TaskKey::Roster, Duration::ZERO);
            self.load_focus();
        } else {
            crate::log_warn!("service unreachable; polling paused");
            self.scheduler.stop(&TaskKey::Roster);
            self.scheduler
                .stop_where(|key| matches!(key, TaskKey::Detail(_)));
        }
    }

    fn on_push_event(&self, event: &ChannelEvent) {
        if self.closed.get() || !self.is_active(&TaskKey::Roster) {
            return;
        }
        if let ChannelEvent::Message(payload) = event {
            crate::log_debug!("push message ({} bytes); refreshing roster", payload.len());
        }
        self.arm(TaskKey::Roster, Duration::ZERO);
    }

    async fn check_liveness(&self) {
        let healthy = match self.api.health_check().await {
            Ok(()) => true,
            Err(e) => {
                crate::log_debug!("health check failed: {e}");
                false
            }
        };
        if self.closed.get() {
            return;
        }
        self.set_connected(healthy);

        if healthy && self.server_info.borrow().is_none() && !self.info_requested.replace(true) {
            match self.api.server_info().await {
                Ok(info) => {
                    crate::log_info!("connected to {} {}", info.name, info.version);
                    self.server_info.send_replace(Some(info));
                }
                Err(e) => {
                    crate::log_warn!("could not fetch server info: {e}");
                    self.info_requested.set(false);
                }
            }
        }
    }

    /// Fetch and apply the roster. Returns false if the iteration was
    /// dropped.
    async fn fetch_roster(&self) -> bool {
        let seq = self.store.borrow_mut().next_fetch_seq();
        let list = match self.api.list_simulations().await {
            Ok(list) => list,
            Err(e) => {
                log_refresh_failure("roster", &e);
                return false;
            }
        };
        if !self.store.borrow_mut().replace_roster(list.simulations, seq) {
            return false;
        }

        if let Some(focus) = self.focus.get() {
            if !self.store.borrow().is_tracked(focus.id) {
                crate::log_info!("focused simulation {} left the roster", focus.id);
                self.focus.set(None);
                self.scheduler.stop(&TaskKey::Detail(focus.id));
            }
        }
        true
    }

    async fn refresh_roster(&self) {
        if !self.fetch_roster().await {
            return;
        }
        let ids = self.store.borrow().roster().to_vec();
        join_all(
            ids.into_iter()
                .map(|id| self.refresh_detail(id, Sections::STATUS)),
        )
        .await;
    }

    async fn refresh_detail(&self, id: SimulationId, sections: Sections) {
        let seq = self.store.borrow_mut().next_fetch_seq();
        let patch = match self.fetch_patch(id, sections).await {
            Ok(patch) => patch,
            Err(e) => {
                log_refresh_failure(&format!("simulation {id}"), &e);
                return;
            }
        };
        let outcome = self.store.borrow_mut().merge_snapshot(id, patch, seq);
        if outcome != MergeOutcome::Applied {
            crate::log_debug!("snapshot for {id} not applied: {outcome:?}");
        }
    }

    async fn fetch_patch(
        &self,
        id: SimulationId,
        sections: Sections,
    ) -> Result<SnapshotPatch, TransportError> {
        let mut patch = SnapshotPatch::default();
        if sections.status {
            patch.status = Some(self.api.simulation_status(id).await?);
        }
        if sections.stats {
            patch.stats = Some(self.api.simulation_stats(id).await?);
        }
        if sections.events {
            patch.events = Some(self.api.simulation_events(id).await?.into_ordered());
        }
        Ok(patch)
    }

    /// Refresh the roster and `id` right away so the caller sees the effect
    /// of a successful command when it returns.
    async fn refresh_after_command(&self, id: SimulationId) {
        if self.closed.get() || !self.fetch_roster().await {
            return;
        }
        if !self.store.borrow().is_tracked(id) {
            return;
        }
        let sections = match self.focus.get() {
            Some(focus) if focus.id == id => Sections::ALL,
            _ => Sections::STATUS,
        };
        self.refresh_detail(id, sections).await;
    }

    async fn run_command(&self, command: Command, id: SimulationId) -> Result<(), TransportError> {
        let result = match command {
            Command::Start => self.api.start_simulation(id).await,
            Command::Pause => self.api.pause_simulation(id).await,
            Command::Resume => self.api.resume_simulation(id).await,
            Command::Stop => self.api.stop_simulation(id).await,
            Command::Delete => self.api.delete_simulation(id).await,
        };
        match result {
            Ok(()) => {
                crate::log_info!("simulation {id} {}", command.outcome());
                self.refresh_after_command(id).await;
                self.notifier
                    .success(format!("Simulation {id} {}", command.outcome()));
                Ok(())
            }
            Err(e) => {
                crate::log_warn!("{} {id} failed: {e}", command.action());
                self.notifier.error(format!(
                    "Could not {} simulation {id}: {}",
                    command.action(),
                    e.summary()
                ));
                Err(e)
            }
        }
    }
}

fn log_refresh_failure(what: &str, error: &TransportError) {
    match error {
        // The liveness task reports reachability.
        TransportError::Unreachable(_) => crate::log_debug!("{what} refresh skipped: {error}"),
        TransportError::DecodeFailed(_) => crate::log_warn!("{what} refresh dropped: {error}"),
        TransportError::RemoteRejected { .. } => {
            crate::log_warn!("{what} refresh rejected: {error}")
        }
    }
}

#[async_trait(?Send)]
impl TaskRunner<TaskKey> for SessionInner {
    fn is_active(&self, key: &TaskKey) -> bool {
        if self.closed.get() || !self.started.get() {
            return false;
        }
        match key {
            TaskKey::Liveness => true,
            TaskKey::Roster => self.is_connected(),
            TaskKey::Detail(id) => {
                self.focus_loadable(*id)
                    && self.focus.get().is_some_and(|focus| focus.auto_refresh)
            }
        }
    }

    fn period(&self, key: &TaskKey) -> Duration {
        match key {
            TaskKey::Liveness => self.config.liveness_period,
            TaskKey::Roster => self.config.roster_period,
            TaskKey::Detail(_) => match self.focus.get().map(|focus| focus.mode) {
                Some(FocusMode::Expanded) => self.config.expanded_period,
                _ => self.config.detail_period,
            },
        }
    }

    async fn run(&self, key: &TaskKey) {
        match key {
            TaskKey::Liveness => self.check_liveness().await,
            TaskKey::Roster => self.refresh_roster().await,
            TaskKey::Detail(id) => {
                let Some(focus) = self.focus.get().filter(|focus| focus.id == *id) else {
                    return;
                };
                self.refresh_detail(*id, Sections::for_mode(focus.mode)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use automed_shared::SimulationState;
    use tokio::task::LocalSet;

    use super::*;
    use crate::stores::NotificationKind;
    use crate::testing::{FakeService, ScriptedConnector};

    fn polling_only() -> SyncConfig {
        SyncConfig {
            push_url: None,
            ..SyncConfig::default()
        }
    }

    fn session(service: &Rc<FakeService>, config: SyncConfig) -> SyncSession {
        SyncSession::new(config, service.clone(), ScriptedConnector::new())
    }

    fn etat(session: &SyncSession, id: u64) -> Option<SimulationState> {
        session
            .snapshot(SimulationId(id))
            .and_then(|snapshot| snapshot.status)
            .map(|status| status.etat)
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn roster_waits_for_first_successful_health_check() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(1, SimulationState::Created);
                service.script_health(&[false, false, false]);
                let session = session(&service, polling_only());
                session.start();

                let mut flags = Vec::new();
                sleep_ms(10).await;
                for _ in 0..3 {
                    flags.push(session.is_connected());
                    assert_eq!(service.count("list"), 0);
                    sleep_ms(5_000).await;
                }
                flags.push(session.is_connected());

                assert_eq!(flags, vec![false, false, false, true]);
                assert_eq!(service.count("list"), 1);
                assert_eq!(etat(&session, 1), Some(SimulationState::Created));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_service_stops_the_roster_task_until_it_returns() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;
                assert!(session.inner.scheduler.is_armed(&TaskKey::Roster));

                service.set_healthy(false);
                sleep_ms(5_000).await;
                assert!(!session.is_connected());
                assert!(!session.inner.scheduler.is_armed(&TaskKey::Roster));
                assert!(session.inner.scheduler.is_armed(&TaskKey::Liveness));

                service.clear_calls();
                service.set_healthy(true);
                sleep_ms(5_000).await;
                assert!(session.is_connected());
                assert_eq!(service.calls(), vec!["health", "list"]);
                assert!(session.inner.scheduler.is_armed(&TaskKey::Roster));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn successful_command_is_visible_when_it_returns() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(7, SimulationState::Created);
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;
                assert_eq!(etat(&session, 7), Some(SimulationState::Created));

                session.start_simulation(SimulationId(7)).await.unwrap();

                assert_eq!(etat(&session, 7), Some(SimulationState::Running));
                let notification = session.notifier().current().unwrap();
                assert_eq!(notification.kind, NotificationKind::Success);
                assert_eq!(notification.message, "Simulation 7 started");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_notifies_and_changes_nothing() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(7, SimulationState::Running);
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;
                let revision = session.revision();

                service.reject_commands(409, "Simulation déjà en pause");
                let err = session.pause_simulation(SimulationId(7)).await.unwrap_err();

                assert!(matches!(err, TransportError::RemoteRejected { status: 409, .. }));
                assert_eq!(session.revision(), revision);
                assert_eq!(etat(&session, 7), Some(SimulationState::Running));
                let notification = session.notifier().current().unwrap();
                assert_eq!(notification.kind, NotificationKind::Error);
                assert_eq!(
                    notification.message,
                    "Could not pause simulation 7: Simulation déjà en pause"
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn create_and_delete_update_the_roster_before_returning() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;

                let config = SimulationConfig {
                    nom: "Bloc A".into(),
                    ..SimulationConfig::default()
                };
                let id = session.create_simulation(&config).await.unwrap();
                assert_eq!(session.roster(), vec![id]);
                let status = session.snapshot(id).unwrap().status.unwrap();
                assert_eq!(status.nom, "Bloc A");
                assert_eq!(status.etat, SimulationState::Created);

                service.clear_calls();
                session.delete_simulation(id).await.unwrap();
                assert!(session.roster().is_empty());
                assert!(session.snapshot(id).is_none());
                // No status request for a simulation that no longer exists.
                assert_eq!(service.calls(), vec![format!("delete:{id}"), "list".to_string()]);
                assert_eq!(service.state_of(id.0), None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn server_info_is_fetched_once() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(21_000).await;

                assert_eq!(service.count("health"), 5);
                assert_eq!(service.count("info"), 1);
                assert_eq!(session.server_info().unwrap().name, "AutoMed");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn expanded_focus_polls_every_section_each_second() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(3, SimulationState::Running);
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;

                assert!(session.focus(SimulationId(3), FocusMode::Expanded));
                sleep_ms(1_500).await;

                assert_eq!(service.count("stats:3"), 2);
                assert_eq!(service.count("events:3"), 2);
                let snapshot = session.snapshot(SimulationId(3)).unwrap();
                assert_eq!(snapshot.stats.unwrap().number("patientsTraites"), Some(4.0));
                assert_eq!(snapshot.events.unwrap().len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn tab_focus_polls_only_its_section_until_unfocused() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(3, SimulationState::Running);
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;

                assert!(session.focus(SimulationId(3), FocusMode::Tab(DetailTab::Events)));
                sleep_ms(4_500).await;
                assert_eq!(service.count("events:3"), 3);
                assert_eq!(service.count("stats:3"), 0);

                session.unfocus();
                assert!(!session.inner.scheduler.is_armed(&TaskKey::Detail(SimulationId(3))));
                service.clear_calls();
                sleep_ms(5_000).await;
                assert_eq!(service.count("events:3"), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn focus_without_auto_refresh_loads_once_per_change() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(3, SimulationState::Running);
                let session = session(&service, polling_only());
                assert!(!session.set_auto_refresh(false));
                session.start();
                sleep_ms(10).await;

                assert!(session.focus(SimulationId(3), FocusMode::Tab(DetailTab::Stats)));
                assert!(session.set_auto_refresh(false));
                sleep_ms(5_000).await;
                assert_eq!(service.count("stats:3"), 1);
                assert!(!session.inner.scheduler.is_armed(&TaskKey::Detail(SimulationId(3))));

                // Same simulation, new tab: the setting sticks.
                assert!(session.focus(SimulationId(3), FocusMode::Tab(DetailTab::Events)));
                sleep_ms(10).await;
                assert!(!session.focused().unwrap().auto_refresh);
                assert_eq!(service.count("events:3"), 1);
                sleep_ms(5_000).await;
                assert_eq!(service.count("events:3"), 1);

                service.clear_calls();
                assert!(session.set_auto_refresh(true));
                sleep_ms(4_500).await;
                assert_eq!(service.count("events:3"), 3);
                assert!(session.inner.scheduler.is_armed(&TaskKey::Detail(SimulationId(3))));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refreshes_keep_the_last_view_and_polling_armed() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(1, SimulationState::Running);
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;
                assert!(session.focus(SimulationId(1), FocusMode::Tab(DetailTab::Stats)));
                sleep_ms(10).await;

                let revision = session.revision();
                let before = session.snapshot(SimulationId(1)).unwrap();
                assert!(before.stats.is_some());

                service.fail_reads(
                    "list",
                    TransportError::RemoteRejected {
                        status: 500,
                        message: Some("Erreur interne".into()),
                    },
                );
                service.fail_reads("status", TransportError::DecodeFailed("bad etat".into()));
                service.fail_reads("stats", TransportError::DecodeFailed("bad stats".into()));
                service.add_simulation(2, SimulationState::Created);
                sleep_ms(3_500).await;

                assert!(service.count("list") >= 2);
                assert!(service.count("stats:1") >= 2);
                assert_eq!(session.roster(), vec![SimulationId(1)]);
                assert_eq!(session.revision(), revision);
                let after = session.snapshot(SimulationId(1)).unwrap();
                assert_eq!(after.fetch_seq, before.fetch_seq);
                assert!(after.stats.is_some());
                assert!(session.inner.scheduler.is_armed(&TaskKey::Roster));
                assert!(session.inner.scheduler.is_armed(&TaskKey::Detail(SimulationId(1))));

                service.clear_read_failures();
                sleep_ms(3_500).await;
                assert_eq!(session.roster(), vec![SimulationId(1), SimulationId(2)]);
                assert_eq!(etat(&session, 2), Some(SimulationState::Created));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn focus_is_lost_when_the_simulation_leaves_the_roster() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(1, SimulationState::Running);
                service.add_simulation(3, SimulationState::Running);
                let session = session(&service, polling_only());
                session.start();
                sleep_ms(10).await;

                assert!(!session.focus(SimulationId(9), FocusMode::Expanded));
                assert!(session.focus(SimulationId(3), FocusMode::Tab(DetailTab::Status)));
                service.remove_simulation(3);
                sleep_ms(3_000).await;

                assert_eq!(session.roster(), vec![SimulationId(1)]);
                assert_eq!(session.focused(), None);
                assert!(session.snapshot(SimulationId(3)).is_none());
                assert!(!session.inner.scheduler.is_armed(&TaskKey::Detail(SimulationId(3))));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn push_messages_reach_consumers_and_refresh_the_roster() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                let connector = ScriptedConnector::new();
                let config = SyncConfig {
                    push_url: Some("ws://sim".into()),
                    ..SyncConfig::default()
                };
                let session = SyncSession::new(config, service.clone(), connector.clone());
                let received = Rc::new(RefCell::new(Vec::new()));
                let sink = received.clone();
                session.on_push_message(move |payload| sink.borrow_mut().push(payload.to_string()));

                session.start();
                sleep_ms(10).await;
                assert_eq!(session.connection_state(), ConnectionState::Connected);
                assert!(session.send_push("hello"));

                service.clear_calls();
                let mut probe = connector.take_probe().unwrap();
                probe.deliver("{\"simulationId\":1}");
                sleep_ms(10).await;

                assert_eq!(*received.borrow(), vec!["{\"simulationId\":1}".to_string()]);
                assert_eq!(service.count("list"), 1);
                assert_eq!(probe.written(), vec!["hello".to_string()]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_every_timer_and_closes_the_channel() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                service.add_simulation(2, SimulationState::Running);
                let connector = ScriptedConnector::new();
                let config = SyncConfig {
                    push_url: Some("ws://sim".into()),
                    ..SyncConfig::default()
                };
                let session = SyncSession::new(config, service.clone(), connector.clone());
                session.start();
                sleep_ms(10).await;
                assert!(session.focus(SimulationId(2), FocusMode::Expanded));
                session.notifier().success("ok");
                sleep_ms(10).await;

                session.shutdown();
                assert_eq!(session.inner.scheduler.pending_count(), 0);
                assert_eq!(session.connection_state(), ConnectionState::Disconnected);

                service.clear_calls();
                sleep_ms(30_000).await;
                assert!(service.calls().is_empty());
                assert_eq!(connector.attempt_times().len(), 1);
                assert!(!session.send_push("late"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn echo_passes_the_payload_through() {
        LocalSet::new()
            .run_until(async {
                let service = FakeService::new();
                let session = session(&service, polling_only());
                let payload = serde_json::json!({ "message": "bonjour" });

                let response = session.echo(&payload).await.unwrap();
                assert_eq!(response.received, payload);
                assert_eq!(service.calls(), vec!["echo"]);
            })
            .await;
    }
}
