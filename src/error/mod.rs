// proctalk/src/error/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Centralized error handling for proctalk.
//!
//! Uses `thiserror` to define structured errors and `anyhow` for convenient propagation.
//! Library modules return `Result<T, ProctalkError>` (or their own module error that
//! converts into it), and the binaries use `anyhow::Result<T>` at the top level.

use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

use crate::env::EnvError;
use crate::process::LifecycleError;
use crate::protocol::ProtocolError;

/// The root error type for all proctalk failures.
#[derive(Error, Debug)]
pub enum ProctalkError {
    /// General-purpose error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error with associated path for better diagnostics
    #[error("I/O error at {path:?}: {source}")]
    IoWithPath {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration loading or parsing error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Task join error.
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),

    /// The remote peer could not be reached or the address was unusable.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Process error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvError),
}

impl ProctalkError {
    /// Creates an `IoWithPath` error from a path and an I/O error.
    pub fn io_with_path<E: Into<std::io::Error>>(path: PathBuf, source: E) -> Self {
        Self::IoWithPath {
            source: source.into(),
            path,
        }
    }
}

/// Convenient alias for `Result<T, ProctalkError>`.
pub type Result<T> = std::result::Result<T, ProctalkError>;

// Binaries use `anyhow` at the top level.
pub use anyhow::Result as AnyResult;
