//! Scripted stand-ins for the remote service and the push channel.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use automed_shared::{
    EchoResponse, EventLog, ServerInfo, SimulationConfig, SimulationEvent, SimulationId,
    SimulationList, SimulationState, SimulationStats, SimulationStatus, TransportError,
};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{FutureExt, StreamExt};
use tokio::time::Instant;

use crate::api_client::SimulationApi;
use crate::push::{PushConnector, PushError, PushLink};

/// In-memory simulation service. Every call is recorded in `calls`.
pub struct FakeService {
    healthy: Cell<bool>,
    health_script: RefCell<VecDeque<bool>>,
    simulations: RefCell<BTreeMap<SimulationId, SimulationStatus>>,
    next_id: Cell<u64>,
    rejection: RefCell<Option<(u16, String)>>,
    read_failures: RefCell<HashMap<&'static str, TransportError>>,
    calls: RefCell<Vec<String>>,
}

impl FakeService {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            healthy: Cell::new(true),
            health_script: RefCell::new(VecDeque::new()),
            simulations: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
            rejection: RefCell::new(None),
            read_failures: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.set(healthy);
    }

    /// Health outcomes consumed one per check before falling back to `set_healthy`.
    pub fn script_health(&self, outcomes: &[bool]) {
        self.health_script.borrow_mut().extend(outcomes.iter().copied());
    }

    pub fn add_simulation(&self, id: u64, etat: SimulationState) {
        let id = SimulationId(id);
        self.simulations
            .borrow_mut()
            .insert(id, SimulationStatus::new(format!("Simulation {id}"), etat));
        self.next_id.set(self.next_id.get().max(id.0 + 1));
    }

    pub fn remove_simulation(&self, id: u64) {
        self.simulations.borrow_mut().remove(&SimulationId(id));
    }

    /// Reject every mutating command with this HTTP status and message.
    pub fn reject_commands(&self, status: u16, message: &str) {
        *self.rejection.borrow_mut() = Some((status, message.to_string()));
    }

    /// Fail every `list`, `status`, `stats` or `events` read with `error`
    /// until [`FakeService::clear_read_failures`].
    pub fn fail_reads(&self, read: &'static str, error: TransportError) {
        self.read_failures.borrow_mut().insert(read, error);
    }

    pub fn clear_read_failures(&self) {
        self.read_failures.borrow_mut().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn state_of(&self, id: u64) -> Option<SimulationState> {
        self.simulations
            .borrow()
            .get(&SimulationId(id))
            .map(|status| status.etat)
    }

    async fn enter(&self, call: String) {
        self.calls.borrow_mut().push(call);
        tokio::task::yield_now().await;
    }

    fn check_read(&self, read: &str) -> Result<(), TransportError> {
        match self.read_failures.borrow().get(read) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn check_rejection(&self) -> Result<(), TransportError> {
        match self.rejection.borrow().as_ref() {
            Some((status, message)) => Err(TransportError::RemoteRejected {
                status: *status,
                message: Some(message.clone()),
            }),
            None => Ok(()),
        }
    }

    fn transition(&self, id: SimulationId, etat: SimulationState) -> Result<(), TransportError> {
        self.check_rejection()?;
        match self.simulations.borrow_mut().get_mut(&id) {
            Some(status) => {
                status.etat = etat;
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }
}

fn not_found(id: SimulationId) -> TransportError {
    TransportError::RemoteRejected {
        status: 404,
        message: Some(format!("Simulation {id} introuvable")),
    }
}

#[async_trait(?Send)]
impl SimulationApi for FakeService {
    async fn health_check(&self) -> Result<(), TransportError> {
        self.enter("health".into()).await;
        let healthy = self
            .health_script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.healthy.get());
        if healthy {
            Ok(())
        } else {
            Err(TransportError::Unreachable("connection refused".into()))
        }
    }

    async fn server_info(&self) -> Result<ServerInfo, TransportError> {
        self.enter("info".into()).await;
        Ok(ServerInfo {
            name: "AutoMed".into(),
            version: "1.0.0".into(),
            kind: "simulation".into(),
        })
    }

    async fn echo(&self, payload: &serde_json::Value) -> Result<EchoResponse, TransportError> {
        self.enter("echo".into()).await;
        Ok(EchoResponse {
            received: payload.clone(),
            timestamp: Some(1_700_000_000_000),
        })
    }

    async fn list_simulations(&self) -> Result<SimulationList, TransportError> {
        self.enter("list".into()).await;
        self.check_read("list")?;
        Ok(SimulationList {
            simulations: self.simulations.borrow().keys().copied().collect(),
        })
    }

    async fn create_simulation(
        &self,
        config: &SimulationConfig,
    ) -> Result<SimulationId, TransportError> {
        self.enter("create".into()).await;
        self.check_rejection()?;
        let id = SimulationId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.simulations.borrow_mut().insert(
            id,
            SimulationStatus::new(config.nom.clone(), SimulationState::Created),
        );
        Ok(id)
    }

    async fn start_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.enter(format!("start:{id}")).await;
        self.transition(id, SimulationState::Running)
    }

    async fn pause_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.enter(format!("pause:{id}")).await;
        self.transition(id, SimulationState::Paused)
    }

    async fn resume_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.enter(format!("resume:{id}")).await;
        self.transition(id, SimulationState::Running)
    }

    async fn stop_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.enter(format!("stop:{id}")).await;
        self.transition(id, SimulationState::Stopped)
    }

    async fn delete_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.enter(format!("delete:{id}")).await;
        self.check_rejection()?;
        match self.simulations.borrow_mut().remove(&id) {
            Some(_) => Ok(()),
            None => Err(not_found(id)),
        }
    }

    async fn simulation_status(&self, id: SimulationId) -> Result<SimulationStatus, TransportError> {
        self.enter(format!("status:{id}")).await;
        self.check_read("status")?;
        self.simulations
            .borrow()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn simulation_stats(&self, id: SimulationId) -> Result<SimulationStats, TransportError> {
        self.enter(format!("stats:{id}")).await;
        self.check_read("stats")?;
        let mut stats = SimulationStats::default();
        stats.0.insert("patientsTraites".into(), serde_json::json!(4));
        Ok(stats)
    }

    async fn simulation_events(&self, id: SimulationId) -> Result<EventLog, TransportError> {
        self.enter(format!("events:{id}")).await;
        self.check_read("events")?;
        Ok(EventLog {
            events: vec![SimulationEvent {
                timestamp: 12.5,
                kind: "ARRIVEE".into(),
                description: "Arrivée patient".into(),
            }],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse,
}

/// Test-side end of an accepted push link.
pub struct Probe {
    written: UnboundedReceiver<String>,
    incoming: UnboundedSender<Result<String, PushError>>,
}

impl Probe {
    /// Frames the client has written so far.
    pub fn written(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(Some(frame)) = self.written.next().now_or_never() {
            frames.push(frame);
        }
        frames
    }

    pub fn deliver(&self, payload: &str) {
        let _ = self.incoming.unbounded_send(Ok(payload.to_string()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .incoming
            .unbounded_send(Err(PushError::Transport(reason.to_string())));
    }

    /// Server-side close.
    pub fn close(&self) {
        self.incoming.close_channel();
    }
}

/// Push connector that follows a script of outcomes, accepting once the
/// script runs out.
pub struct ScriptedConnector {
    script: RefCell<VecDeque<ConnectOutcome>>,
    latency: Cell<Duration>,
    attempts: RefCell<Vec<Instant>>,
    urls: RefCell<Vec<String>>,
    probe: RefCell<Option<Probe>>,
}

impl ScriptedConnector {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            script: RefCell::new(VecDeque::new()),
            latency: Cell::new(Duration::ZERO),
            attempts: RefCell::new(Vec::new()),
            urls: RefCell::new(Vec::new()),
            probe: RefCell::new(None),
        })
    }

    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.script.borrow_mut().push_back(outcome);
    }

    pub fn set_open_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.borrow().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.borrow().clone()
    }

    /// Probe of the most recently accepted link.
    pub fn take_probe(&self) -> Option<Probe> {
        self.probe.borrow_mut().take()
    }
}

#[async_trait(?Send)]
impl PushConnector for ScriptedConnector {
    async fn open(&self, url: &str) -> Result<PushLink, PushError> {
        self.attempts.borrow_mut().push(Instant::now());
        self.urls.borrow_mut().push(url.to_string());

        let latency = self.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let outcome = self
            .script
            .borrow_mut()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);
        if outcome == ConnectOutcome::Refuse {
            return Err(PushError::Connect("connection refused".into()));
        }

        let (outgoing, written) = unbounded();
        let (incoming_tx, incoming) = unbounded();
        *self.probe.borrow_mut() = Some(Probe {
            written,
            incoming: incoming_tx,
        });
        Ok(PushLink {
            outgoing,
            incoming: incoming.boxed_local(),
        })
    }
}
