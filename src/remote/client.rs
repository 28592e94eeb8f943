// proctalk/src/remote/client.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Client endpoint of the process-control protocol.
//!
//! Once connected, every exchange is one request and one reply. Failures to reach the
//! server are errors; everything that goes wrong after that (decode failures, the
//! server hanging up) comes back as an `Invalid` message so the caller's normal
//! message handling still runs.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProctalkError, Result as ProctalkResult};
use crate::message::wire::{self, Frame};
use crate::message::{Message, MessageType};
use crate::protocol::{client_reply_state, client_send_state, Actor, Protocol, ProtocolState};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buffer: Vec<u8>,
}

pub struct RemoteClient {
    protocol: Arc<Protocol>,
    actor: Actor,
    target: Option<(String, u16)>,
    connection: Option<Connection>,
    read_timeout: Option<Duration>,
}

fn local_host_name(ip: IpAddr) -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| ip.to_string())
}

impl RemoteClient {
    pub fn new(protocol: Arc<Protocol>) -> Self {
        Self {
            protocol,
            actor: Actor::client(ProtocolState::INITIAL),
            target: None,
            connection: None,
            read_timeout: None,
        }
    }

    /// Bounds how long a single reply may take; replies that miss it come back as
    /// `Invalid` and the connection is dropped.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Opens the connection, identifies itself and reads the server's greeting up to
    /// and including the reply to `Identify`.
    ///
    /// Returns every message received during the handshake, in order.
    ///
    /// # Errors
    ///
    /// [`ProctalkError::Connection`] if `address` is empty or the socket cannot be
    /// opened.
    pub async fn connect(&mut self, address: &str, port: u16) -> ProctalkResult<Vec<Message>> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ProctalkError::Connection("empty server address".into()));
        }
        self.close().await;

        let stream = TcpStream::connect((address, port))
            .await
            .map_err(|e| ProctalkError::Connection(format!("cannot connect to {}:{}: {}", address, port, e)))?;
        let local = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        self.connection = Some(Connection {
            reader: BufReader::new(reader),
            writer,
            buffer: Vec::new(),
        });
        self.target = Some((address.to_string(), port));
        self.actor = Actor::client(ProtocolState::INITIAL);
        tracing::debug!("Connected to {}:{} from {}", address, port, local);

        let identify = Message::identify(local_host_name(local.ip()), local.port());
        let mut current = self.resolve_send(&identify)?;
        let mut pending = self.transmit(&identify).await;
        let mut received = Vec::new();
        loop {
            let reply = match pending.take() {
                Some(failure) => failure,
                None => self.receive().await,
            };
            current = self.resolve_reply(&current, &reply, false);
            let greeting = reply.message_type() == MessageType::ChitChat;
            received.push(reply);
            if !greeting || !self.is_connected() {
                break;
            }
        }
        self.actor = current;
        Ok(received)
    }

    /// Sends one message and returns the server's reply, connecting first to the last
    /// used address if the connection was closed.
    ///
    /// # Errors
    ///
    /// [`ProctalkError::Connection`] if no connection can be made, and
    /// [`ProctalkError::Protocol`] if the protocol does not allow sending `message`
    /// in the current state. Nothing is sent in either case.
    pub async fn send_message(&mut self, message: &Message) -> ProctalkResult<Message> {
        if !self.is_connected() {
            let (address, port) = self
                .target
                .clone()
                .ok_or_else(|| ProctalkError::Connection("not connected and no server address known".into()))?;
            self.connect(&address, port).await?;
        }

        let working = self.resolve_send(message)?;
        let reply = match self.transmit(message).await {
            Some(failure) => failure,
            None => self.receive().await,
        };
        self.actor = self.resolve_reply(&working, &reply, message.ends_session());
        if self.actor.state() == &ProtocolState::CLOSED {
            self.close().await;
        }
        Ok(reply)
    }

    /// Closes the connection, if any. The next `send_message` reconnects.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.writer.shutdown().await;
        }
    }

    fn resolve_send(&self, message: &Message) -> ProctalkResult<Actor> {
        let to_state = client_send_state(message.message_type());
        let rule = self.protocol.authorize(&self.actor, message.message_type(), &to_state)?;
        Ok(rule.advance(&self.actor))
    }

    fn resolve_reply(&self, working: &Actor, reply: &Message, closes_session: bool) -> Actor {
        let to_state = client_reply_state(working.state(), reply.message_type(), closes_session);
        match self.protocol.find_rule(working, reply.message_type(), &to_state) {
            Some(rule) => rule.advance(working),
            None => {
                tracing::warn!("No rule for {} receiving {}", working, reply.message_type());
                working.with_state(ProtocolState::ERROR)
            }
        }
    }

    /// Writes `message`; on failure drops the connection and returns the failure as an
    /// `Invalid` message.
    async fn transmit(&mut self, message: &Message) -> Option<Message> {
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return Some(Message::invalid("not connected")),
        };
        tracing::trace!("Send {}", message);
        match wire::write_message(&mut connection.writer, message).await {
            Ok(()) => None,
            Err(e) => {
                self.connection = None;
                Some(Message::invalid(format!("Send failed: {}", e)))
            }
        }
    }

    /// Reads the next reply, skipping blank lines. EOF, I/O errors and timeouts drop
    /// the connection and come back as `Invalid`.
    async fn receive(&mut self) -> Message {
        let read_timeout = self.read_timeout;
        let Some(connection) = self.connection.as_mut() else {
            return Message::invalid("not connected");
        };

        let failure = loop {
            let next = wire::read_frame(&mut connection.reader, &mut connection.buffer, None);
            let frame = match read_timeout {
                Some(limit) => match timeout(limit, next).await {
                    Ok(frame) => frame,
                    Err(_) => break format!("No reply within {:?}", limit),
                },
                None => next.await,
            };
            match frame {
                Ok(Frame::Message(message)) => {
                    tracing::trace!("Received {}", message);
                    return message;
                }
                Ok(Frame::Blank) => continue,
                Ok(Frame::Oversized(n)) => break format!("Reply too large: {} bytes", n),
                Ok(Frame::Eof) => break "Connection closed by server".to_string(),
                Err(e) => break format!("Receive failed: {}", e),
            }
        };

        tracing::debug!("{}", failure);
        self.connection = None;
        Message::invalid(failure)
    }
}
