// proctalk/src/log/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Deserializer};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

use crate::config::ServerConfig;
use crate::error::{ProctalkError, Result as ProctalkResult};

const LOG_FILE_NAME: &str = "proctalk.log";

/// Builds the filter directive string: `proctalk=<level>` plus one entry per target.
pub fn filter_directives(config: &TracingConfig) -> String {
    let mut directives = vec![format!("proctalk={}", config.default_level)];
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort_by(|a, b| a.0.cmp(b.0));
    for (target, level) in modules {
        directives.push(format!("{}={}", target, level));
    }
    directives.join(",")
}

/// Initializes the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(config: &ServerConfig) -> ProctalkResult<Option<WorkerGuard>> {
    let tracing_cfg = &config.log;
    let mut file_guard: Option<WorkerGuard> = None;

    let env_filter = EnvFilter::try_new(filter_directives(tracing_cfg))
        .map_err(|e| ProctalkError::Config(format!("invalid log filter: {}", e)))?;

    let mut layers = Vec::new();

    if tracing_cfg.file {
        fs::create_dir_all(&config.log_dir)
            .map_err(|e| ProctalkError::io_with_path(config.log_dir.clone(), e))?;

        let file_appender = tracing_appender::rolling::never(&config.log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = if tracing_cfg.structured {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed()
        };
        layers.push(file_layer);
        file_guard = Some(guard);
    }

    if tracing_cfg.stderr {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .boxed();
        layers.push(console_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| ProctalkError::Internal(format!("failed to init tracing: {}", e)))?;

    Ok(file_guard)
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<LevelFilter>().map_err(serde::de::Error::custom)
}

fn deserialize_module_levels<'de, D>(deserializer: D) -> Result<HashMap<String, LevelFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: HashMap<String, String> = Deserialize::deserialize(deserializer)?;
    let mut result = HashMap::new();
    for (target, level_str) in map {
        let level = level_str
            .parse::<LevelFilter>()
            .map_err(serde::de::Error::custom)?;
        result.insert(target, level);
    }
    Ok(result)
}

/// `[log]` table of the config file.
#[derive(Deserialize, Debug, Clone)]
pub struct TracingConfig {
    #[serde(default = "default_log_level", deserialize_with = "deserialize_level_filter")]
    pub default_level: LevelFilter,

    #[serde(default = "default_structured")]
    pub structured: bool,

    #[serde(default = "default_stderr")]
    pub stderr: bool,

    #[serde(default = "default_file")]
    pub file: bool,

    #[serde(default, deserialize_with = "deserialize_module_levels")]
    pub modules: HashMap<String, LevelFilter>,
}

fn default_log_level() -> LevelFilter { LevelFilter::INFO }
fn default_structured() -> bool { false }
fn default_stderr() -> bool { true }
fn default_file() -> bool { true }

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: default_log_level(),
            structured: default_structured(),
            stderr: default_stderr(),
            file: default_file(),
            modules: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_from_toml() {
        let cfg: TracingConfig = toml::from_str(
            r#"
            default_level = "debug"
            structured = true

            [modules]
            "proctalk::remote" = "trace"
            "tokio" = "warn"
            "#,
        )
        .unwrap();
        assert!(cfg.structured);
        assert!(cfg.file);
        assert_eq!(
            filter_directives(&cfg),
            "proctalk=debug,proctalk::remote=trace,tokio=warn"
        );
        assert!(EnvFilter::try_new(filter_directives(&cfg)).is_ok());
    }

    #[test]
    fn test_bad_level_is_rejected() {
        let parsed: Result<TracingConfig, _> = toml::from_str("default_level = \"loud\"");
        assert!(parsed.is_err());
    }
}
