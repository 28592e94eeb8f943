// proctalk/src/process/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Launching, supervising and listing OS processes.

use thiserror::Error;

mod lifecycle;
mod os;
mod table;

pub use lifecycle::{
    LaunchSpec, LifecycleState, ProcessLifecycle, StateChange, StateChangeListener, SIGNALLED_EXIT_CODE,
};
pub use os::{list_os_processes, parse_cpu_time, ProcessInfo};
pub use table::{ManagedProcessInfo, ProcessTable};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("process {0} has not been started")]
    NotStarted(u64),

    #[error("process {id} failed to start: {reason}")]
    StartFailed { id: u64, reason: String },

    #[error("unknown process id {0}")]
    UnknownProcess(u64),

    #[error("supervisor of process {0} went away")]
    Supervisor(u64),
}
