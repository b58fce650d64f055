//! Cooperative scheduler for named recurring refresh tasks.
//!
//! A task is described by its runner: how often it repeats
//! ([`TaskRunner::period`]), whether it should currently run
//! ([`TaskRunner::is_active`]) and what one iteration does
//! ([`TaskRunner::run`]). The scheduler only decides *when*.
//!
//! Guarantees, per key:
//! - at most one pending timer (re-arming replaces the previous one);
//! - iterations never overlap: the next timer is armed only after the
//!   in-flight iteration settles, and an arm request that arrives while an
//!   iteration is in flight is deferred until it settles;
//! - the re-arm decision uses the predicate's value *at settle time*, so a
//!   task deactivated mid-iteration finishes its request and stops.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::spawn_local;

use crate::timers::TimerTable;

#[async_trait(?Send)]
pub trait TaskRunner<K> {
    fn is_active(&self, key: &K) -> bool;
    fn period(&self, key: &K) -> Duration;
    /// One iteration. Failures are the runner's business; the scheduler
    /// re-arms regardless of outcome.
    async fn run(&self, key: &K);
}

struct SchedulerState<K> {
    timers: TimerTable<K>,
    /// Keys with an iteration in flight, with the delay of any arm request
    /// received meanwhile.
    in_flight: HashMap<K, Option<Duration>>,
    closed: bool,
}

pub struct PollScheduler<K> {
    state: Rc<RefCell<SchedulerState<K>>>,
}

impl<K> Clone for PollScheduler<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K> PollScheduler<K>
where
    K: Clone + Eq + Hash + Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SchedulerState {
                timers: TimerTable::new(),
                in_flight: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Run `key` after `delay`, replacing its pending timer if any.
    /// Zero delay runs it as soon as the current turn yields.
    pub fn arm<R>(&self, runner: &Rc<R>, key: K, delay: Duration)
    where
        R: TaskRunner<K> + 'static,
    {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return;
        }
        if let Some(deferred) = state.in_flight.get_mut(&key) {
            *deferred = Some(deferred.map_or(delay, |d| d.min(delay)));
            crate::log_debug!("{key:?} busy; re-arm deferred until the iteration settles");
            return;
        }
        let handle = spawn_local(iterate(self.clone(), runner.clone(), key.clone(), delay));
        state.timers.arm(key, handle);
    }

    /// Cancel the pending timer of `key` and drop any deferred re-arm.
    /// An iteration already in flight completes but will not re-arm unless
    /// its task is still active.
    pub fn stop(&self, key: &K) -> bool {
        let mut state = self.state.borrow_mut();
        if let Some(deferred) = state.in_flight.get_mut(key) {
            *deferred = None;
        }
        state.timers.cancel(key)
    }

    pub fn stop_where(&self, mut matches: impl FnMut(&K) -> bool) -> usize {
        let mut state = self.state.borrow_mut();
        for (key, deferred) in state.in_flight.iter_mut() {
            if matches(key) {
                *deferred = None;
            }
        }
        state.timers.cancel_where(matches)
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.state.borrow().timers.is_armed(key)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.state.borrow().in_flight.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Cancel every timer and refuse further arming.
    pub fn shutdown(&self) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.in_flight.clear();
        let cancelled = state.timers.cancel_all();
        crate::log_debug!("scheduler shut down, {cancelled} timer(s) cancelled");
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.borrow().closed
    }
}

impl<K> Default for PollScheduler<K>
where
    K: Clone + Eq + Hash + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn iterate<K, R>(scheduler: PollScheduler<K>, runner: Rc<R>, key: K, delay: Duration)
where
    K: Clone + Eq + Hash + Debug + 'static,
    R: TaskRunner<K> + 'static,
{
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    {
        let mut state = scheduler.state.borrow_mut();
        if state.closed {
            return;
        }
        state.timers.disarm(&key);
        state.in_flight.insert(key.clone(), None);
    }

    if runner.is_active(&key) {
        runner.run(&key).await;
    }

    let deferred = {
        let mut state = scheduler.state.borrow_mut();
        match state.in_flight.remove(&key) {
            Some(deferred) => deferred,
            // Shut down while the iteration was in flight.
            None => return,
        }
    };

    if runner.is_active(&key) {
        let next = deferred.unwrap_or_else(|| runner.period(&key));
        scheduler.arm(&runner, key, next);
    } else {
        crate::log_debug!("{key:?} inactive; not re-armed");
    }
}
