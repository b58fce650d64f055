//! Synchronization store: the single writer of the roster and per-simulation
//! snapshots.
//!
//! Refreshes race each other (liveness, roster and detail tasks complete in
//! any order), so every write carries the [`FetchSeq`] stamped when its
//! request was *issued*. A write issued earlier than what a snapshot already
//! holds is discarded, whatever order the responses arrive in.

use std::collections::{HashMap, HashSet};

use automed_shared::{SimulationEvent, SimulationId, SimulationStats, SimulationStatus};
use tokio::sync::watch;

/// Monotonic stamp taken when a request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FetchSeq(u64);

impl FetchSeq {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Latest merged state of one simulation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemSnapshot {
    pub status: Option<SimulationStatus>,
    pub stats: Option<SimulationStats>,
    /// Event log, ascending by timestamp.
    pub events: Option<Vec<SimulationEvent>>,
    pub fetch_seq: FetchSeq,
}

/// Partial snapshot produced by one refresh iteration. Absent sections leave
/// the stored ones untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotPatch {
    pub status: Option<SimulationStatus>,
    pub stats: Option<SimulationStats>,
    pub events: Option<Vec<SimulationEvent>>,
}

impl SnapshotPatch {
    pub fn status(status: SimulationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_stats(mut self, stats: SimulationStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_events(mut self, events: Vec<SimulationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.stats.is_none() && self.events.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// A write issued later already landed for this simulation.
    Stale,
    /// The simulation is not (or no longer) in the roster.
    Untracked,
    Empty,
}

pub struct SyncStore {
    roster: Vec<SimulationId>,
    snapshots: HashMap<SimulationId, ItemSnapshot>,
    issued: u64,
    roster_seq: Option<FetchSeq>,
    revision: watch::Sender<u64>,
}

impl SyncStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            roster: Vec::new(),
            snapshots: HashMap::new(),
            issued: 0,
            roster_seq: None,
            revision,
        }
    }

    /// Stamp a request about to be issued.
    pub fn next_fetch_seq(&mut self) -> FetchSeq {
        self.issued += 1;
        FetchSeq(self.issued)
    }

    /// Replace the roster with the service's list, keeping its order and
    /// dropping duplicates. Snapshots of simulations that left the roster are
    /// discarded; the others are kept as they are.
    ///
    /// Returns false if a roster issued later has already been applied.
    pub fn replace_roster(&mut self, ids: Vec<SimulationId>, seq: FetchSeq) -> bool {
        if self.roster_seq.is_some_and(|applied| seq < applied) {
            crate::log_debug!("discarding stale roster (seq {})", seq.value());
            return false;
        }
        self.roster_seq = Some(seq);

        let mut present = HashSet::with_capacity(ids.len());
        let roster: Vec<SimulationId> = ids.into_iter().filter(|id| present.insert(*id)).collect();

        let before = self.snapshots.len();
        self.snapshots.retain(|id, _| present.contains(id));
        let dropped = before - self.snapshots.len();

        if roster != self.roster || dropped > 0 {
            self.roster = roster;
            self.bump();
        }
        true
    }

    /// Shallow-merge `patch` into the snapshot of `id`.
    pub fn merge_snapshot(
        &mut self,
        id: SimulationId,
        patch: SnapshotPatch,
        seq: FetchSeq,
    ) -> MergeOutcome {
        if !self.roster.contains(&id) {
            return MergeOutcome::Untracked;
        }
        if patch.is_empty() {
            return MergeOutcome::Empty;
        }

        let snapshot = self.snapshots.entry(id).or_default();
        if seq < snapshot.fetch_seq {
            crate::log_debug!(
                "discarding stale snapshot for {id} (seq {} < {})",
                seq.value(),
                snapshot.fetch_seq.value()
            );
            return MergeOutcome::Stale;
        }

        snapshot.fetch_seq = seq;
        if let Some(status) = patch.status {
            snapshot.status = Some(status);
        }
        if let Some(stats) = patch.stats {
            snapshot.stats = Some(stats);
        }
        if let Some(events) = patch.events {
            snapshot.events = Some(events);
        }
        self.bump();
        MergeOutcome::Applied
    }

    pub fn snapshot(&self, id: SimulationId) -> Option<&ItemSnapshot> {
        self.snapshots.get(&id)
    }

    pub fn roster(&self) -> &[SimulationId] {
        &self.roster
    }

    pub fn is_tracked(&self, id: SimulationId) -> bool {
        self.roster.contains(&id)
    }

    /// Incremented on every write that changed visible state.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&mut self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new()
    }
}
