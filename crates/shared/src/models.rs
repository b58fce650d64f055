//! Shared data models for the AutoMed simulation service API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// --- Identity ---

/// Identifier the remote service assigns to a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationId(pub u64);

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SimulationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// --- Service ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Response of `POST /echo`, used as a round-trip connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EchoResponse {
    pub received: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

// --- Simulation lifecycle ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "FCFS")]
    Fcfs,
    #[serde(rename = "SJF")]
    Sjf,
    #[serde(rename = "PRIORITY", alias = "PRIORITE")]
    Priority,
    #[serde(rename = "RR")]
    RoundRobin,
}

/// Parameters sent to `POST /simulation/create`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub nom: String,
    pub duree_simulation_minutes: u32,
    pub algorithme: Algorithm,
    pub nombre_blocs: u32,
    pub nombre_equipes: u32,
    pub capacite_salle_attente: u32,
    pub capacite_salle_reveil: u32,
    pub taux_arrivee_horaire_urgences: f64,
    pub nombre_patients_electifs: u32,
    /// 0.0 runs the simulation as fast as possible.
    pub facteur_vitesse: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nom: "Simulation".to_string(),
            duree_simulation_minutes: 480,
            algorithme: Algorithm::Fcfs,
            nombre_blocs: 3,
            nombre_equipes: 3,
            capacite_salle_attente: 50,
            capacite_salle_reveil: 20,
            taux_arrivee_horaire_urgences: 2.0,
            nombre_patients_electifs: 10,
            facteur_vitesse: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSimulationResponse {
    pub simulation_id: SimulationId,
}

/// Roster returned by `GET /simulations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SimulationList {
    pub simulations: Vec<SimulationId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationState {
    Created,
    Running,
    Paused,
    Stopped,
    Finished,
}

impl SimulationState {
    /// Whether the engine may still produce events for this simulation.
    pub fn is_live(&self) -> bool {
        matches!(self, SimulationState::Running | SimulationState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SimulationState::Stopped | SimulationState::Finished)
    }
}

/// `GET /simulation/{id}/status`.
///
/// `etat` and `nom` are required; the counters default to zero when the
/// engine has not produced them yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    pub etat: SimulationState,
    pub nom: String,
    #[serde(default)]
    pub algorithme: String,
    #[serde(default)]
    pub progression: f64,
    #[serde(default)]
    pub temps_ecoule_minutes: f64,
    #[serde(default)]
    pub duree_simulation_minutes: f64,
    #[serde(default)]
    pub nombre_patients_en_attente: u32,
    #[serde(default)]
    pub nombre_patients_en_operation: u32,
    #[serde(default)]
    pub nombre_patients_en_reveil: u32,
    #[serde(default)]
    pub nombre_patients_traites: u32,
    #[serde(default)]
    pub nombre_blocs_libres: u32,
    #[serde(default)]
    pub nombre_blocs_occupes: u32,
    #[serde(default)]
    pub nombre_equipes_disponibles: u32,
}

impl SimulationStatus {
    /// A status with every counter zeroed.
    pub fn new(nom: impl Into<String>, etat: SimulationState) -> Self {
        Self {
            etat,
            nom: nom.into(),
            algorithme: String::new(),
            progression: 0.0,
            temps_ecoule_minutes: 0.0,
            duree_simulation_minutes: 0.0,
            nombre_patients_en_attente: 0,
            nombre_patients_en_operation: 0,
            nombre_patients_en_reveil: 0,
            nombre_patients_traites: 0,
            nombre_blocs_libres: 0,
            nombre_blocs_occupes: 0,
            nombre_equipes_disponibles: 0,
        }
    }
}

/// Aggregate statistics, keyed by metric name. The service decides the keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct SimulationStats(pub BTreeMap<String, serde_json::Value>);

impl SimulationStats {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationEvent {
    /// Simulated minutes since the simulation started.
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// `GET /simulation/{id}/events`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventLog {
    #[serde(default)]
    pub events: Vec<SimulationEvent>,
}

impl EventLog {
    /// Events in ascending timestamp order; equal timestamps keep service order.
    pub fn into_ordered(mut self) -> Vec<SimulationEvent> {
        self.events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.events
    }
}
