// proctalk/src/runtime/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::ServerConfig;
use crate::env::{self, EnvVar, EnvironmentVarSet};
use crate::error::Result as ProctalkResult;
use crate::process::ProcessTable;
use crate::protocol::Protocol;

pub struct RuntimeStatus {
    pub pid: u32,
    pub start_time: OffsetDateTime,
    pub uptime: Duration,
    pub managed_processes: usize,
}

impl RuntimeStatus {
    pub fn start_time_rfc3339(&self) -> String {
        self.start_time
            .format(&Rfc3339)
            .unwrap_or_else(|_| "<invalid-timestamp>".to_string())
    }
}

/// Shared server state: the rule table, the managed processes and the launch environment.
pub struct ProctalkRuntime {
    pub config: Arc<ServerConfig>,
    pub protocol: Arc<Protocol>,
    pub processes: Arc<ProcessTable>,
    pub environment: Arc<RwLock<EnvironmentVarSet>>,
    pid: u32,
    start_instant: Instant,
    start_utc: OffsetDateTime,
}

impl ProctalkRuntime {
    /// Builds the runtime, loading the environment file when one is configured.
    pub async fn new(config: Arc<ServerConfig>) -> ProctalkResult<Self> {
        let environment = match config.environment_file() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                let (set, warnings) = env::load_file(&path).await?;
                tracing::info!(
                    "Loaded {} environment variable(s) from {:?} ({} line(s) skipped)",
                    set.len(),
                    path,
                    warnings.len()
                );
                set
            }
            _ => EnvironmentVarSet::new(),
        };
        Self::with_environment(config, environment)
    }

    pub fn with_environment(config: Arc<ServerConfig>, environment: EnvironmentVarSet) -> ProctalkResult<Self> {
        let protocol = Arc::new(Protocol::process_control()?);
        tracing::debug!("Protocol '{}' loaded with {} rule(s)", protocol.name(), protocol.len());

        let environment = Arc::new(RwLock::new(environment));
        let history = config.process.finished_history;
        Ok(Self {
            config,
            protocol,
            processes: Arc::new(ProcessTable::new(Arc::clone(&environment), history)),
            environment,
            pid: std::process::id(),
            start_instant: Instant::now(),
            start_utc: OffsetDateTime::now_utc(),
        })
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            pid: self.pid,
            start_time: self.start_utc,
            uptime: self.uptime(),
            managed_processes: self.processes.len(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_instant.elapsed()
    }

    /// Number of variables applied to launched processes.
    pub fn environment_len(&self) -> usize {
        self.environment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Adds a variable for every process launched from now on. Names already in use
    /// are rejected.
    pub fn define_variable(&self, var: EnvVar) -> ProctalkResult<()> {
        tracing::debug!("Defining {} in category '{}'", var.name, var.category);
        self.environment
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(var)?;
        Ok(())
    }

    /// Stops every managed process still alive.
    pub fn shutdown(&self) {
        self.processes.shutdown_all();
    }

    #[cfg(test)]
    pub fn new_for_tests() -> Self {
        let mut config = ServerConfig::with_base_dir(std::env::temp_dir().join("proctalk-tests"));
        config.server.bind_address = "127.0.0.1".into();
        config.server.port = 0;
        Self::with_environment(Arc::new(config), EnvironmentVarSet::new())
            .expect("process control protocol builds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvError, VarType};
    use crate::error::ProctalkError;
    use crate::message::Value;
    use tempfile::TempDir;

    #[test]
    fn test_status_reports_this_process() {
        let runtime = ProctalkRuntime::new_for_tests();
        let status = runtime.status();
        assert_eq!(status.pid, std::process::id());
        assert_eq!(status.managed_processes, 0);
        assert!(OffsetDateTime::parse(&status.start_time_rfc3339(), &Rfc3339).is_ok());
        assert!(!runtime.protocol.is_empty());
    }

    #[tokio::test]
    async fn test_new_loads_environment_file() {
        let tmp = TempDir::new().unwrap();
        let mut config = ServerConfig::with_base_dir(tmp.path());
        config.process.environment_file = Some("vars.env".into());

        let mut set = EnvironmentVarSet::new();
        set.insert(EnvVar::new("net", "PORT", VarType::Integer, true, Some(Value::Integer(9898))))
            .unwrap();
        std::fs::create_dir_all(&config.config_dir).unwrap();
        env::write_file(&config.config_dir.join("vars.env"), &set).await.unwrap();

        let runtime = ProctalkRuntime::new(Arc::new(config)).await.unwrap();
        assert_eq!(runtime.environment_len(), 1);
    }

    #[tokio::test]
    async fn test_missing_environment_file_means_empty_set() {
        let tmp = TempDir::new().unwrap();
        let mut config = ServerConfig::with_base_dir(tmp.path());
        config.process.environment_file = Some("absent.env".into());
        let runtime = ProctalkRuntime::new(Arc::new(config)).await.unwrap();
        assert_eq!(runtime.environment_len(), 0);
    }

    #[test]
    fn test_define_variable_rejects_duplicate_names() {
        let runtime = ProctalkRuntime::new_for_tests();
        runtime
            .define_variable(EnvVar::new("net", "PORT", VarType::Integer, true, Some(Value::Integer(1))))
            .unwrap();
        assert_eq!(runtime.environment_len(), 1);

        let err = runtime
            .define_variable(EnvVar::new("other", "PORT", VarType::String, false, None))
            .unwrap_err();
        assert!(matches!(
            err,
            ProctalkError::Environment(EnvError::DuplicateVariable { ref category, .. }) if category == "net"
        ));
        assert_eq!(runtime.environment_len(), 1);
    }
}

