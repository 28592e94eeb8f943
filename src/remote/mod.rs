// proctalk/src/remote/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! TCP endpoints of the process-control protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result as ProctalkResult;
use crate::runtime::ProctalkRuntime;

mod client;
mod commands;
mod server;

pub use client::RemoteClient;
pub use commands::{dispatch_message, Outcome};
pub use server::spawn_server;

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<broadcast::Sender<()>>,
    join_handle: Option<JoinHandle<ProctalkResult<()>>>,
}

impl ServerHandle {
    /// The address the listener is bound to; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits until the accept loop exits, e.g. after a client sent `StopServer`.
    ///
    /// Cancel-safe: dropping the future keeps the handle usable.
    pub async fn join(&mut self) -> ProctalkResult<()> {
        if let Some(handle) = self.join_handle.as_mut() {
            let result = handle.await;
            self.join_handle = None;
            result??;
        }
        Ok(())
    }

    /// Gracefully shuts down the server and waits for it to finish.
    pub async fn shutdown(mut self) -> ProctalkResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("Sending shutdown signal to server");
        }
        self.join().await
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::debug!("Sending shutdown signal to server on drop");
        }
    }
}

/// Starts the server on the configured address, sharing `runtime` with every worker.
pub async fn start(runtime: Arc<ProctalkRuntime>) -> ProctalkResult<ServerHandle> {
    let address = runtime.config.listen_address();
    spawn_server(&address, runtime).await
}
