// proctalk/src/process/lifecycle.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Supervision of one externally launched OS process.
//!
//! ```text
//! NotStarted ──spawn ok──► Running ──exit 0──► Finished
//!      │                      ├──exit ≠ 0──► Terminated
//!      │                      └──destroy()──► Terminated
//!      └──spawn error──► StartFailed
//! ```
//!
//! `start()` hands the blocking "launch + wait" sequence to a single background task.
//! Every state write goes through [`Shared::transition`], a compare-and-set under the
//! lifecycle's mutex, so the background task and `destroy()` can never move a lifecycle
//! out of a terminal state or skip `Running`.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::process::Command;
use tokio::sync::{mpsc, watch, Notify};

use crate::env::EnvironmentVarSet;

use super::LifecycleError;

/// Exit code reported for a process that was ended by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    NotStarted,
    Running,
    StartFailed,
    Terminated,
    Finished,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "NotStarted",
            LifecycleState::Running => "Running",
            LifecycleState::StartFailed => "StartFailed",
            LifecycleState::Terminated => "Terminated",
            LifecycleState::Finished => "Finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::StartFailed | LifecycleState::Terminated | LifecycleState::Finished
        )
    }

    /// The forward edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::NotStarted, LifecycleState::Running)
                | (LifecycleState::NotStarted, LifecycleState::StartFailed)
                | (LifecycleState::Running, LifecycleState::Terminated)
                | (LifecycleState::Running, LifecycleState::Finished)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One observed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub process_id: u64,
    pub old: LifecycleState,
    pub new: LifecycleState,
}

/// Receives lifecycle transitions synchronously, on the thread performing them.
///
/// Implementations must not call `destroy()` on the lifecycle that notified them.
pub trait StateChangeListener: Send + Sync {
    fn state_changed(&self, change: &StateChange);
}

/// Forwards transitions into a channel, for consumers that prefer to await them.
impl StateChangeListener for mpsc::UnboundedSender<StateChange> {
    fn state_changed(&self, change: &StateChange) {
        let _ = self.send(change.clone());
    }
}

pub(crate) fn same_listener(a: &Arc<dyn StateChangeListener>, b: &Arc<dyn StateChangeListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Code(i32),
    LaunchFailed(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    id: u64,
    state: Mutex<LifecycleState>,
    state_tx: watch::Sender<LifecycleState>,
    // Held across a transition and its notification so listeners see transitions in order.
    delivery: Mutex<()>,
    listeners: Mutex<Vec<Arc<dyn StateChangeListener>>>,
    started: AtomicBool,
    pid: AtomicU32,
    kill: Notify,
    exit_tx: watch::Sender<Option<Exit>>,
}

impl Shared {
    fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    /// Moves `from -> to` if the lifecycle is currently in `from`; otherwise returns the
    /// actual state and changes nothing.
    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        debug_assert!(from.can_transition_to(to), "illegal edge {from} -> {to}");
        let _delivery = lock(&self.delivery);
        {
            let mut state = lock(&self.state);
            if *state != from {
                return Err(*state);
            }
            *state = to;
            self.state_tx.send_replace(to);
        }

        let change = StateChange {
            process_id: self.id,
            old: from,
            new: to,
        };
        tracing::debug!("Process {}: {} -> {}", self.id, from, to);
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.state_changed(&change);
        }
        Ok(())
    }
}

/// Handle to one supervised process. Cloning shares the same lifecycle.
#[derive(Clone)]
pub struct ProcessLifecycle {
    spec: LaunchSpec,
    environment: Arc<RwLock<EnvironmentVarSet>>,
    inner: Arc<Shared>,
}

impl fmt::Debug for ProcessLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLifecycle")
            .field("id", &self.inner.id)
            .field("program", &self.spec.program)
            .field("state", &self.state())
            .finish()
    }
}

impl ProcessLifecycle {
    pub fn new(id: u64, spec: LaunchSpec, environment: Arc<RwLock<EnvironmentVarSet>>) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::NotStarted);
        let (exit_tx, _) = watch::channel(None);
        Self {
            spec,
            environment,
            inner: Arc::new(Shared {
                id,
                state: Mutex::new(LifecycleState::NotStarted),
                state_tx,
                delivery: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                pid: AtomicU32::new(0),
                kill: Notify::new(),
                exit_tx,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// OS process id, once the process has been spawned.
    pub fn pid(&self) -> Option<u32> {
        match self.inner.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Exit code, once the process has exited.
    pub fn exit_code(&self) -> Option<i32> {
        match &*self.inner.exit_tx.borrow() {
            Some(Exit::Code(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn StateChangeListener>) {
        lock(&self.inner.listeners).push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StateChangeListener>) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    /// Launches the process on a background task.
    ///
    /// Only the first call has an effect; it returns `true`. Must be called from within
    /// a Tokio runtime.
    pub fn start(&self) -> bool {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            tracing::debug!("Process {} already started", self.inner.id);
            return false;
        }
        let inner = Arc::clone(&self.inner);
        let spec = self.spec.clone();
        let environment = Arc::clone(&self.environment);
        tokio::spawn(supervise(inner, spec, environment));
        true
    }

    /// Forcibly stops the process and marks it `Terminated` right away.
    ///
    /// Destroying a lifecycle that already reached a terminal state is a no-op. If
    /// `start()` was called but the process is not spawned yet, the kill is delivered
    /// as soon as it is.
    pub fn destroy(&self) -> Result<(), LifecycleError> {
        match self.inner.transition(LifecycleState::Running, LifecycleState::Terminated) {
            Ok(()) => {
                self.inner.kill.notify_one();
                Ok(())
            }
            Err(state) if state.is_terminal() => Ok(()),
            Err(_) if self.inner.started.load(Ordering::Acquire) => {
                self.inner.kill.notify_one();
                Ok(())
            }
            Err(_) => Err(LifecycleError::NotStarted(self.inner.id)),
        }
    }

    /// Waits until the process is spawned (or failed to spawn) and returns the state
    /// reached at that point.
    pub async fn wait_until_launched(&self) -> Result<LifecycleState, LifecycleError> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(LifecycleError::NotStarted(self.inner.id));
        }
        let mut rx = self.inner.state_tx.subscribe();
        let state = rx
            .wait_for(|s| *s != LifecycleState::NotStarted)
            .await
            .map_err(|_| LifecycleError::Supervisor(self.inner.id))?;
        Ok(*state)
    }

    /// Waits for the process to exit and returns its exit code.
    ///
    /// Does not change the lifecycle state; that is the background task's job.
    /// Dropping the returned future leaves the lifecycle untouched.
    pub async fn wait_for(&self) -> Result<i32, LifecycleError> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(LifecycleError::NotStarted(self.inner.id));
        }
        let mut rx = self.inner.exit_tx.subscribe();
        let exit = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| LifecycleError::Supervisor(self.inner.id))?;
        match &*exit {
            Some(Exit::Code(code)) => Ok(*code),
            Some(Exit::LaunchFailed(reason)) => Err(LifecycleError::StartFailed {
                id: self.inner.id,
                reason: reason.clone(),
            }),
            None => Err(LifecycleError::Supervisor(self.inner.id)),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALLED_EXIT_CODE)
}

/// The background task: the only place that spawns and reaps the child.
async fn supervise(inner: Arc<Shared>, spec: LaunchSpec, environment: Arc<RwLock<EnvironmentVarSet>>) {
    let mut command = Command::new(&spec.program);
    command.args(&spec.args).stdin(Stdio::null()).kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }
    environment
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .apply_to(&mut command);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("Process {}: failed to launch '{}': {}", inner.id, spec.program, e);
            let _ = inner.transition(LifecycleState::NotStarted, LifecycleState::StartFailed);
            inner.exit_tx.send_replace(Some(Exit::LaunchFailed(e.to_string())));
            return;
        }
    };

    if let Some(pid) = child.id() {
        inner.pid.store(pid, Ordering::Release);
    }
    tracing::info!("Process {}: launched '{}' (pid {:?})", inner.id, spec.program, child.id());
    let _ = inner.transition(LifecycleState::NotStarted, LifecycleState::Running);

    let status = tokio::select! {
        status = child.wait() => status,
        _ = inner.kill.notified() => {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Process {}: kill failed: {}", inner.id, e);
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::error!("Process {}: wait failed: {}", inner.id, e);
            SIGNALLED_EXIT_CODE
        }
    };

    let next = if code == 0 {
        LifecycleState::Finished
    } else {
        LifecycleState::Terminated
    };
    // Already Terminated if destroy() got there first.
    if let Err(state) = inner.transition(LifecycleState::Running, next) {
        tracing::debug!("Process {}: exit with code {} observed in state {}", inner.id, code, state);
    }
    tracing::info!("Process {}: exited with code {}", inner.id, code);
    inner.exit_tx.send_replace(Some(Exit::Code(code)));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::env::{EnvVar, VarType};
    use crate::message::Value;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<StateChange>>,
    }

    impl StateChangeListener for Recorder {
        fn state_changed(&self, change: &StateChange) {
            self.seen.lock().unwrap().push(change.clone());
        }
    }

    impl Recorder {
        fn states(&self) -> Vec<LifecycleState> {
            self.seen.lock().unwrap().iter().map(|c| c.new).collect()
        }
    }

    fn no_env() -> Arc<RwLock<EnvironmentVarSet>> {
        Arc::new(RwLock::new(EnvironmentVarSet::new()))
    }

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh").args(["-c", script])
    }

    #[test]
    fn test_lifecycle_edges() {
        use LifecycleState::*;
        assert!(NotStarted.can_transition_to(Running));
        assert!(NotStarted.can_transition_to(StartFailed));
        assert!(!NotStarted.can_transition_to(Finished));
        assert!(!NotStarted.can_transition_to(Terminated));
        for terminal in [StartFailed, Terminated, Finished] {
            assert!(terminal.is_terminal());
            for next in [NotStarted, Running, StartFailed, Terminated, Finished] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[tokio::test]
    async fn test_clean_exit_goes_through_running_to_finished() {
        let lifecycle = ProcessLifecycle::new(1, sh("exit 0"), no_env());
        let recorder = Arc::new(Recorder::default());
        lifecycle.add_listener(recorder.clone());

        assert_eq!(lifecycle.state(), LifecycleState::NotStarted);
        assert!(lifecycle.start());
        let code = timeout(Duration::from_secs(10), lifecycle.wait_for()).await.unwrap().unwrap();

        assert_eq!(code, 0);
        assert_eq!(lifecycle.state(), LifecycleState::Finished);
        assert_eq!(recorder.states(), vec![LifecycleState::Running, LifecycleState::Finished]);
        assert_eq!(recorder.seen.lock().unwrap()[0].old, LifecycleState::NotStarted);
        assert_eq!(lifecycle.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_terminated() {
        let lifecycle = ProcessLifecycle::new(2, sh("exit 3"), no_env());
        lifecycle.start();
        let code = timeout(Duration::from_secs(10), lifecycle.wait_for()).await.unwrap().unwrap();
        assert_eq!(code, 3);
        assert_eq!(lifecycle.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let lifecycle = ProcessLifecycle::new(3, sh("exit 0"), no_env());
        let recorder = Arc::new(Recorder::default());
        lifecycle.add_listener(recorder.clone());
        assert!(lifecycle.start());
        assert!(!lifecycle.start());
        timeout(Duration::from_secs(10), lifecycle.wait_for()).await.unwrap().unwrap();
        assert_eq!(recorder.states(), vec![LifecycleState::Running, LifecycleState::Finished]);
    }

    #[tokio::test]
    async fn test_missing_program_is_start_failed() {
        let lifecycle = ProcessLifecycle::new(4, LaunchSpec::new("/nonexistent/definitely-not-here"), no_env());
        lifecycle.start();
        let launched = timeout(Duration::from_secs(10), lifecycle.wait_until_launched())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(launched, LifecycleState::StartFailed);
        assert!(matches!(
            lifecycle.wait_for().await,
            Err(LifecycleError::StartFailed { id: 4, .. })
        ));
        // Terminal: destroy does not move it.
        lifecycle.destroy().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::StartFailed);
    }

    #[tokio::test]
    async fn test_destroy_running_is_terminated() {
        let lifecycle = ProcessLifecycle::new(5, LaunchSpec::new("sleep").arg("30"), no_env());
        let recorder = Arc::new(Recorder::default());
        lifecycle.add_listener(recorder.clone());
        lifecycle.start();
        let launched = timeout(Duration::from_secs(10), lifecycle.wait_until_launched())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(launched, LifecycleState::Running);
        assert!(lifecycle.is_running());

        lifecycle.destroy().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Terminated);

        let code = timeout(Duration::from_secs(10), lifecycle.wait_for()).await.unwrap().unwrap();
        assert_eq!(code, SIGNALLED_EXIT_CODE);
        assert_eq!(lifecycle.state(), LifecycleState::Terminated);
        assert_eq!(recorder.states(), vec![LifecycleState::Running, LifecycleState::Terminated]);
    }

    #[tokio::test]
    async fn test_destroy_before_start_is_rejected() {
        let lifecycle = ProcessLifecycle::new(6, sh("exit 0"), no_env());
        assert!(matches!(lifecycle.destroy(), Err(LifecycleError::NotStarted(6))));
        assert!(matches!(lifecycle.wait_for().await, Err(LifecycleError::NotStarted(6))));
        assert_eq!(lifecycle.state(), LifecycleState::NotStarted);
    }

    #[tokio::test]
    async fn test_environment_is_applied() {
        let mut set = EnvironmentVarSet::new();
        set.insert(EnvVar::new("net", "PROCTALK_TEST_PORT", VarType::Integer, true, Some(Value::Integer(9898))))
            .unwrap();
        set.insert(EnvVar::new("net", "PROCTALK_TEST_UNSET", VarType::String, false, None))
            .unwrap();
        let env = Arc::new(RwLock::new(set));

        let lifecycle = ProcessLifecycle::new(
            7,
            sh(r#"[ "$PROCTALK_TEST_PORT" = 9898 ] && [ -z "${PROCTALK_TEST_UNSET+x}" ]"#),
            env,
        );
        lifecycle.start();
        let code = timeout(Duration::from_secs(10), lifecycle.wait_for()).await.unwrap().unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_channel_listener_and_removal() {
        let lifecycle = ProcessLifecycle::new(8, sh("exit 0"), no_env());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn StateChangeListener> = Arc::new(tx);
        let removed: Arc<dyn StateChangeListener> = Arc::new(Recorder::default());
        lifecycle.add_listener(Arc::clone(&listener));
        lifecycle.add_listener(Arc::clone(&removed));
        assert!(lifecycle.remove_listener(&removed));
        assert!(!lifecycle.remove_listener(&removed));

        lifecycle.start();
        let first = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.process_id, 8);
        assert_eq!(first.new, LifecycleState::Running);
    }
}
