// proctalk/src/remote/server.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The process-control TCP server.
//!
//! The server:
//! - Accepts connections in an unbounded loop, one worker task per connection
//! - Greets every client with two `ChitChat` messages
//! - Reads newline-delimited JSON messages and answers each with exactly one message
//! - Drives a per-connection server [`Actor`] through the protocol's rule table
//! - Stops entirely when any client sends `StopServer`: the listener closes and every
//!   other live session is ended at its next read, without a reply
//!
//! Any I/O error ends only the affected worker; it is logged and never reaches the
//! accept loop or other workers.

use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::error::{ProctalkError, Result as ProctalkResult};
use crate::message::wire::{self, Frame};
use crate::message::Message;
use crate::protocol::{server_receipt_state, server_reply_state, Actor, Protocol, ProtocolState};
use crate::runtime::ProctalkRuntime;

use super::commands::{dispatch_message, Outcome};

/// Binds `address` and spawns the accept loop as a background task.
///
/// # Errors
///
/// Returns an error if the address cannot be bound; the server fails fast.
pub async fn spawn_server(address: &str, runtime: Arc<ProctalkRuntime>) -> ProctalkResult<super::ServerHandle> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| ProctalkError::Connection(format!("cannot bind {}: {}", address, e)))?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Listening on {}", local_addr);

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let loop_tx = shutdown_tx.clone();
    let join_handle = tokio::spawn(async move { run_server_loop(listener, runtime, loop_tx, shutdown_rx).await });

    Ok(super::ServerHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        join_handle: Some(join_handle),
    })
}

/// Accepts connections until a shutdown signal arrives, from the handle or from a
/// worker that received `StopServer`. The listener is closed on return.
async fn run_server_loop(
    listener: TcpListener,
    runtime: Arc<ProctalkRuntime>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ProctalkResult<()> {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        tracing::info!("New connection from {}", peer);
                        let rt = runtime.clone();
                        let tx = shutdown_tx.clone();
                        let rx = shutdown_rx.resubscribe();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, rt, tx, rx).await {
                                tracing::error!("Connection {} failed: {}", peer, e);
                            }
                            tracing::debug!("Connection {} closed", peer);
                        });
                    }
                    Err(e) => {
                        tracing::error!("Listener accept error: {:?}", e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("Listener received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Per-connection protocol position of the server.
struct Session {
    protocol: Arc<Protocol>,
    actor: Actor,
}

impl Session {
    fn new(protocol: Arc<Protocol>) -> Self {
        Self {
            protocol,
            actor: Actor::server(ProtocolState::INITIAL),
        }
    }

    /// Resolves `message` through the receipt rule, runs it, then resolves the reply
    /// through the reply rule. A message with no receipt rule is answered `Invalid`
    /// and leaves the session where it was.
    async fn handle(&mut self, message: &Message, runtime: &ProctalkRuntime) -> Outcome {
        let message_type = message.message_type();
        let receipt = server_receipt_state(message_type);
        let working = match self.protocol.authorize(&self.actor, message_type, &receipt) {
            Ok(rule) => rule.advance(&self.actor),
            Err(e) => {
                tracing::warn!("{}", e);
                return Outcome {
                    reply: Message::invalid(format!(
                        "{} not allowed in state {}",
                        message_type,
                        self.actor.state()
                    )),
                    closes_session: false,
                    stop_server: false,
                };
            }
        };
        tracing::trace!("{} --{}--> {}", self.actor, message_type, working.state());

        let outcome = dispatch_message(message, runtime).await;

        let reply_type = outcome.reply.message_type();
        let settled = server_reply_state(working.state(), reply_type, outcome.closes_session);
        self.actor = match self.protocol.authorize(&working, reply_type, &settled) {
            Ok(rule) => rule.advance(&working),
            Err(e) => {
                tracing::warn!("{}", e);
                working.with_state(ProtocolState::READY)
            }
        };
        tracing::trace!("{} --{}--> {}", working, reply_type, self.actor.state());
        outcome
    }
}

fn welcome_messages(runtime: &ProctalkRuntime) -> [Message; 2] {
    let status = runtime.status();
    let greeting = runtime
        .config
        .server
        .welcome
        .clone()
        .unwrap_or_else(|| format!("proctalk {} ready", env!("CARGO_PKG_VERSION")));
    [
        Message::chit_chat(greeting),
        Message::chit_chat(format!(
            "pid {} running since {}",
            status.pid,
            status.start_time_rfc3339()
        )),
    ]
}

async fn send(writer: &mut OwnedWriteHalf, message: &Message) -> ProctalkResult<()> {
    tracing::trace!("Send {}", message);
    wire::write_message(writer, message).await.map_err(|e| {
        tracing::error!("Failed to send message: {}", e);
        ProctalkError::Io(e)
    })
}

/// Serves one client until EOF, an I/O error, a read timeout, a session-ending
/// request or a server-wide shutdown.
async fn handle_connection(
    stream: TcpStream,
    runtime: Arc<ProctalkRuntime>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ProctalkResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    let mut session = Session::new(Arc::clone(&runtime.protocol));
    let max_len = runtime.config.server.max_message_length;
    let read_timeout = runtime.config.read_timeout();

    for welcome in welcome_messages(&runtime) {
        send(&mut writer, &welcome).await?;
    }

    loop {
        let read = async {
            let next = wire::read_frame(&mut reader, &mut buffer, Some(max_len));
            match read_timeout {
                Some(limit) => timeout(limit, next).await.ok(),
                None => Some(next.await),
            }
        };

        let frame = tokio::select! {
            frame = read => frame,
            _ = shutdown_rx.recv() => {
                tracing::debug!("Connection handler received shutdown signal");
                break;
            }
        };

        let message = match frame {
            None => {
                tracing::warn!("Read timeout");
                break;
            }
            Some(Err(e)) => return Err(ProctalkError::Io(e)),
            Some(Ok(Frame::Eof)) => {
                tracing::trace!("Got EOF from client");
                break;
            }
            Some(Ok(Frame::Blank)) => continue,
            Some(Ok(Frame::Oversized(n))) => {
                tracing::warn!("Message of {} bytes exceeds the {} byte limit", n, max_len);
                send(&mut writer, &Message::invalid(format!("Message too large: {} bytes", n))).await?;
                continue;
            }
            Some(Ok(Frame::Message(message))) => message,
        };
        tracing::trace!("Received {}", message);

        let outcome = session.handle(&message, &runtime).await;
        send(&mut writer, &outcome.reply).await?;

        if outcome.stop_server {
            let _ = shutdown_tx.send(());
        }
        if outcome.closes_session {
            tracing::debug!("Session ended by {}", message.message_type());
            break;
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}
