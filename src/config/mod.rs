// proctalk/src/config/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Server configuration.
//!
//! Everything lives under a base directory (`$PROCTALK_HOME`, else `~/.proctalk`):
//!
//! ```text
//! <base>/config/proctalk.toml   created from the embedded default when missing
//! <base>/log/proctalk.log
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{ProctalkError, Result as ProctalkResult};
use crate::log::TracingConfig;

const DEFAULT_CONFIG_CONTENT: &str = include_str!("default_config.toml");
const CONFIG_FILE_NAME: &str = "proctalk.toml";

/// Environment variable that overrides the base directory.
pub const HOME_ENV_VAR: &str = "PROCTALK_HOME";

pub const DEFAULT_PORT: u16 = 9898;
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 64 * 1024;
pub const DEFAULT_FINISHED_HISTORY: usize = 16;

/// Non-fatal findings while loading the configuration, reported once logging is up.
#[derive(Debug, Clone)]
pub enum ConfigLoadWarning {
    Internal(String),

    /// The config file did not exist and was written from the built-in default.
    CreatedDefault { path: PathBuf },

    /// A configured path does not exist.
    MissingPath { key: String, path: PathBuf },
}

impl std::fmt::Display for ConfigLoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadWarning::Internal(msg) => write!(f, "{}", msg),
            ConfigLoadWarning::CreatedDefault { path } => {
                write!(f, "Created default config at {:?}", path)
            }
            ConfigLoadWarning::MissingPath { key, path } => {
                write!(f, "Path for '{}' does not exist: {:?}", key, path)
            }
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_address: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub max_message_length: usize,
    pub welcome: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            read_timeout_secs: 0,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            welcome: None,
        }
    }
}

/// `[process]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    pub environment_file: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    /// Exited processes kept in the managed table; older ones are dropped.
    pub finished_history: usize,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            environment_file: None,
            working_dir: None,
            finished_history: DEFAULT_FINISHED_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
    process: ProcessSection,
    log: TracingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_dir: PathBuf,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub server: ServerSection,
    pub process: ProcessSection,
    pub log: TracingConfig,
}

impl ServerConfig {
    /// Built-in defaults rooted at `base_dir`, without touching the filesystem.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            config_dir: base_dir.join("config"),
            log_dir: base_dir.join("log"),
            base_dir,
            server: ServerSection::default(),
            process: ProcessSection::default(),
            log: TracingConfig::default(),
        }
    }

    /// Parses a config document on top of the built-in defaults.
    pub fn from_toml_str(base_dir: impl Into<PathBuf>, content: &str) -> ProctalkResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| ProctalkError::Config(format!("{}: {}", CONFIG_FILE_NAME, e)))?;
        let mut config = Self::with_base_dir(base_dir);
        config.server = file.server;
        config.process = file.process;
        config.log = file.log;
        Ok(config)
    }

    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// `None` means reads never time out.
    pub fn read_timeout(&self) -> Option<Duration> {
        match self.server.read_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn environment_file(&self) -> Option<PathBuf> {
        self.process
            .environment_file
            .as_ref()
            .map(|path| self.config_dir.join(path))
    }
}

/// `$PROCTALK_HOME`, or `~/.proctalk`.
pub fn find_base_dir() -> ProctalkResult<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|d| d.join(".proctalk"))
        .ok_or_else(|| ProctalkError::Config("Cannot determine home directory".into()))
}

async fn ensure_config_file(config_dir: &Path, warnings: &mut Vec<ConfigLoadWarning>) -> ProctalkResult<PathBuf> {
    let path = config_dir.join(CONFIG_FILE_NAME);

    fs::create_dir_all(config_dir)
        .await
        .map_err(|e| ProctalkError::io_with_path(config_dir.to_path_buf(), e))?;

    if !fs::try_exists(&path).await.unwrap_or(false) {
        fs::write(&path, DEFAULT_CONFIG_CONTENT)
            .await
            .map_err(|e| ProctalkError::io_with_path(path.clone(), e))?;
        warnings.push(ConfigLoadWarning::CreatedDefault { path: path.clone() });
    }

    Ok(path)
}

/// Loads the configuration from the default base directory.
pub async fn load() -> ProctalkResult<(ServerConfig, Vec<ConfigLoadWarning>)> {
    load_from(find_base_dir()?).await
}

/// Loads `<base_dir>/config/proctalk.toml`, creating it first if needed.
pub async fn load_from(base_dir: impl Into<PathBuf>) -> ProctalkResult<(ServerConfig, Vec<ConfigLoadWarning>)> {
    let base_dir = base_dir.into();
    let mut warnings = Vec::new();

    let config_path = ensure_config_file(&base_dir.join("config"), &mut warnings).await?;
    let content = fs::read_to_string(&config_path)
        .await
        .map_err(|e| ProctalkError::io_with_path(config_path.clone(), e))?;
    let config = ServerConfig::from_toml_str(base_dir, &content)?;

    if let Some(env_file) = config.environment_file() {
        if !fs::try_exists(&env_file).await.unwrap_or(false) {
            warnings.push(ConfigLoadWarning::MissingPath {
                key: "process.environment_file".into(),
                path: env_file,
            });
        }
    }
    if let Some(dir) = &config.process.working_dir {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            warnings.push(ConfigLoadWarning::MissingPath {
                key: "process.working_dir".into(),
                path: dir.clone(),
            });
        }
    }

    Ok((config, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_embedded_default_matches_builtin_defaults() {
        let config = ServerConfig::from_toml_str("/base", DEFAULT_CONFIG_CONTENT).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.environment_file(), None);
        assert_eq!(config.log.default_level, LevelFilter::INFO);
        assert_eq!(config.log_dir, PathBuf::from("/base/log"));
        assert_eq!(config.listen_address(), "0.0.0.0:9898");
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            "/base",
            r#"
            [server]
            port = 7000
            read_timeout_secs = 30

            [process]
            environment_file = "env/vars.env"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.environment_file(),
            Some(PathBuf::from("/base/config/env/vars.env"))
        );
        assert!(config.log.stderr);
    }

    #[test]
    fn test_bad_document_is_config_error() {
        let err = ServerConfig::from_toml_str("/base", "[server]\nport = \"high\"").unwrap_err();
        assert!(matches!(err, ProctalkError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_from_creates_default_file_once() {
        let tmp = TempDir::new().unwrap();

        let (config, warnings) = load_from(tmp.path()).await.unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(tmp.path().join("config").join(CONFIG_FILE_NAME).exists());
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigLoadWarning::CreatedDefault { .. })));

        let (_, warnings) = load_from(tmp.path()).await.unwrap();
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_environment_file_is_a_warning() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE_NAME),
            "[process]\nenvironment_file = \"missing.env\"\n",
        )
        .unwrap();

        let (_, warnings) = load_from(tmp.path()).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().contains("process.environment_file"));
    }
}
