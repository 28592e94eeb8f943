// proctalk/src/process/table.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use indexmap::IndexMap;

use crate::env::EnvironmentVarSet;
use crate::message::Value;

use super::lifecycle::same_listener;
use super::{LaunchSpec, LifecycleError, LifecycleState, ProcessLifecycle, StateChangeListener};

/// Snapshot of one server-launched process, as reported in a `ProcessList`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcessInfo {
    pub id: u64,
    pub program: String,
    pub state: LifecycleState,
}

impl ManagedProcessInfo {
    /// `[id, program, state]`
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.id),
            Value::from(self.program.as_str()),
            Value::from(self.state.name()),
        ])
    }
}

/// Processes launched on behalf of remote clients, keyed by a server-assigned id.
///
/// Every read-modify-write on an entry (kill, restart) runs under the table lock, so two
/// clients can never restart the same id concurrently. At most `history` exited entries
/// are kept; the oldest are dropped on every launch and listing.
pub struct ProcessTable {
    environment: Arc<RwLock<EnvironmentVarSet>>,
    history: usize,
    next_id: AtomicU64,
    processes: Mutex<IndexMap<u64, ProcessLifecycle>>,
    listeners: Mutex<Vec<Arc<dyn StateChangeListener>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the oldest terminal entries until at most `keep` remain.
fn trim_finished(processes: &mut IndexMap<u64, ProcessLifecycle>, keep: usize) -> usize {
    let finished = processes.values().filter(|l| l.state().is_terminal()).count();
    let mut excess = finished.saturating_sub(keep);
    if excess == 0 {
        return 0;
    }
    let before = processes.len();
    processes.retain(|_, lifecycle| {
        if excess > 0 && lifecycle.state().is_terminal() {
            excess -= 1;
            false
        } else {
            true
        }
    });
    before - processes.len()
}

impl ProcessTable {
    pub fn new(environment: Arc<RwLock<EnvironmentVarSet>>, history: usize) -> Self {
        Self {
            environment,
            history,
            next_id: AtomicU64::new(1),
            processes: Mutex::new(IndexMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener on every current and future process of the table.
    ///
    /// Listeners may be notified while the table lock is held and must not call back
    /// into the table.
    pub fn add_listener(&self, listener: Arc<dyn StateChangeListener>) {
        for lifecycle in lock(&self.processes).values() {
            lifecycle.add_listener(Arc::clone(&listener));
        }
        lock(&self.listeners).push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StateChangeListener>) {
        for lifecycle in lock(&self.processes).values() {
            lifecycle.remove_listener(listener);
        }
        lock(&self.listeners).retain(|l| !same_listener(l, listener));
    }

    fn launch(&self, id: u64, spec: LaunchSpec) -> ProcessLifecycle {
        let lifecycle = ProcessLifecycle::new(id, spec, Arc::clone(&self.environment));
        for listener in lock(&self.listeners).iter() {
            lifecycle.add_listener(Arc::clone(listener));
        }
        lifecycle.start();
        lifecycle
    }

    /// Assigns an id and launches `spec`. Must be called from within a Tokio runtime.
    pub fn start(&self, spec: LaunchSpec) -> ProcessLifecycle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Starting managed process {}: {} {:?}", id, spec.program, spec.args);
        let mut processes = lock(&self.processes);
        trim_finished(&mut processes, self.history);
        let lifecycle = self.launch(id, spec);
        processes.insert(id, lifecycle.clone());
        lifecycle
    }

    pub fn get(&self, id: u64) -> Option<ProcessLifecycle> {
        lock(&self.processes).get(&id).cloned()
    }

    /// Destroys the process and returns the state it was left in.
    pub fn kill(&self, id: u64) -> Result<LifecycleState, LifecycleError> {
        let processes = lock(&self.processes);
        let lifecycle = processes.get(&id).ok_or(LifecycleError::UnknownProcess(id))?;
        lifecycle.destroy()?;
        Ok(lifecycle.state())
    }

    /// Destroys the process if it is still alive, then launches the same command line
    /// again under the same id.
    pub fn restart(&self, id: u64) -> Result<ProcessLifecycle, LifecycleError> {
        let mut processes = lock(&self.processes);
        let old = processes.get(&id).ok_or(LifecycleError::UnknownProcess(id))?;
        if !old.state().is_terminal() {
            old.destroy()?;
        }
        let spec = old.spec().clone();
        tracing::info!("Restarting managed process {}: {}", id, spec.program);
        let lifecycle = self.launch(id, spec);
        processes.insert(id, lifecycle.clone());
        Ok(lifecycle)
    }

    /// Drops the oldest exited entries beyond `keep`; returns how many were removed.
    pub fn prune(&self, keep: usize) -> usize {
        trim_finished(&mut lock(&self.processes), keep)
    }

    pub fn list(&self) -> Vec<ManagedProcessInfo> {
        let mut processes = lock(&self.processes);
        trim_finished(&mut processes, self.history);
        processes
            .values()
            .map(|lifecycle| ManagedProcessInfo {
                id: lifecycle.id(),
                program: lifecycle.spec().program.clone(),
                state: lifecycle.state(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.processes).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.processes).is_empty()
    }

    /// Destroys every process that is still alive. Called on server shutdown.
    pub fn shutdown_all(&self) -> usize {
        let processes = lock(&self.processes);
        let mut destroyed = 0;
        for lifecycle in processes.values() {
            if lifecycle.state().is_terminal() {
                continue;
            }
            match lifecycle.destroy() {
                Ok(()) => destroyed += 1,
                Err(e) => tracing::warn!("Could not stop process {}: {}", lifecycle.id(), e),
            }
        }
        if destroyed > 0 {
            tracing::info!("Stopped {} managed process(es)", destroyed);
        }
        destroyed
    }
}
