// proctalk/src/main.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use clap::Parser;
use std::sync::Arc;

use proctalk::error::AnyResult;
use proctalk::{config, log, remote, runtime};

/// proctalk: remote process control server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TCP port to listen on (overrides `server.port` from the config file)
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let (mut config, warnings) = config::load().await?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    // 2. Initialize logging, then report what happened before it existed
    let log_guard = log::init(&config)?;
    tracing::info!("Starting up (v{})", env!("CARGO_PKG_VERSION"));
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    // 3. Shared runtime and the server
    let runtime = Arc::new(runtime::ProctalkRuntime::new(config.clone()).await?);
    tracing::debug!("Initialize core runtime");

    let mut server = remote::start(runtime.clone()).await?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        result = server.join() => {
            result?;
            tracing::info!("Server stopped by a client, shutting down...");
        }
    }

    runtime.shutdown();
    server.shutdown().await?;

    tracing::info!("Shutting down");
    drop(log_guard);

    Ok(())
}
