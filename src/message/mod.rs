// proctalk/src/message/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Protocol vocabulary and the message envelope.
//!
//! A [`Message`] is a [`MessageType`] plus an ordered payload of [`Value`]s. Messages are
//! immutable once built; the constructors below cover the payload conventions used by
//! the process-control protocol.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

mod value;
pub mod wire;

pub use value::Value;

/// The closed set of message kinds, plus the `Invalid` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Bootstrap,
    Ack,
    ChitChat,
    Identify,
    StartProcess,
    ListProcesses,
    ProcessList,
    KillProcess,
    RestartProcess,
    StopServer,
    #[default]
    Invalid,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Bootstrap,
        MessageType::Ack,
        MessageType::ChitChat,
        MessageType::Identify,
        MessageType::StartProcess,
        MessageType::ListProcesses,
        MessageType::ProcessList,
        MessageType::KillProcess,
        MessageType::RestartProcess,
        MessageType::StopServer,
        MessageType::Invalid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Bootstrap => "Bootstrap",
            MessageType::Ack => "Ack",
            MessageType::ChitChat => "ChitChat",
            MessageType::Identify => "Identify",
            MessageType::StartProcess => "StartProcess",
            MessageType::ListProcesses => "ListProcesses",
            MessageType::ProcessList => "ProcessList",
            MessageType::KillProcess => "KillProcess",
            MessageType::RestartProcess => "RestartProcess",
            MessageType::StopServer => "StopServer",
            MessageType::Invalid => "Invalid",
        }
    }

    /// True for actionable commands, false for handshake and bookkeeping types.
    pub fn is_instruction(&self) -> bool {
        matches!(
            self,
            MessageType::Ack
                | MessageType::ChitChat
                | MessageType::StopServer
                | MessageType::StartProcess
                | MessageType::ListProcesses
                | MessageType::KillProcess
                | MessageType::RestartProcess
        )
    }

    /// Case-insensitive lookup by tag name, ignoring surrounding whitespace.
    /// Unknown or empty text yields `Invalid`.
    pub fn parse(text: &str) -> MessageType {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(text))
            .unwrap_or(MessageType::Invalid)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MessageType::parse(s))
    }
}

impl From<Option<&str>> for MessageType {
    fn from(text: Option<&str>) -> Self {
        text.map(MessageType::parse).unwrap_or(MessageType::Invalid)
    }
}

impl From<String> for MessageType {
    fn from(text: String) -> Self {
        MessageType::parse(&text)
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        t.name().to_string()
    }
}

/// One wire unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    message_type: MessageType,
    #[serde(default)]
    payload: Vec<Value>,
}

impl Message {
    pub fn new(message_type: MessageType, payload: Vec<Value>) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// A message without payload, e.g. `StopServer`.
    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Vec::new())
    }

    pub fn identify(host: impl Into<String>, port: u16) -> Self {
        Self::new(MessageType::Identify, vec![Value::String(host.into()), Value::from(port)])
    }

    pub fn ack(payload: Vec<Value>) -> Self {
        Self::new(MessageType::Ack, payload)
    }

    pub fn chit_chat(text: impl Into<String>) -> Self {
        Self::new(MessageType::ChitChat, vec![Value::String(text.into())])
    }

    pub fn list_processes() -> Self {
        Self::empty(MessageType::ListProcesses)
    }

    pub fn list_managed_processes() -> Self {
        Self::new(MessageType::ListProcesses, vec![Value::from(MANAGED_SELECTOR)])
    }

    pub fn process_list(entries: Vec<Value>) -> Self {
        Self::new(MessageType::ProcessList, entries)
    }

    pub fn start_process(
        program: impl Into<String>,
        args: Vec<String>,
        working_dir: Option<String>,
        end_session: bool,
    ) -> Self {
        Self::new(
            MessageType::StartProcess,
            vec![
                Value::String(program.into()),
                Value::from(args),
                Value::from(working_dir),
                Value::Boolean(end_session),
            ],
        )
    }

    pub fn kill_process(id: u64) -> Self {
        Self::new(MessageType::KillProcess, vec![Value::from(id)])
    }

    pub fn restart_process(id: u64) -> Self {
        Self::new(MessageType::RestartProcess, vec![Value::from(id)])
    }

    pub fn stop_server() -> Self {
        Self::empty(MessageType::StopServer)
    }

    /// An `Invalid` message carrying the reason as its only payload item.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(MessageType::Invalid, vec![Value::String(reason.into())])
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<Value> {
        self.payload
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.payload.get(index)
    }

    /// String payload item at `index`, if it is a string.
    pub fn text(&self, index: usize) -> Option<&str> {
        self.arg(index).and_then(Value::as_str)
    }

    pub fn is_invalid(&self) -> bool {
        self.message_type == MessageType::Invalid
    }

    /// `StopServer`, or a `StartProcess` whose fourth payload item is `true`.
    pub fn ends_session(&self) -> bool {
        match self.message_type {
            MessageType::StopServer => true,
            MessageType::StartProcess => matches!(self.arg(3), Some(Value::Boolean(true))),
            _ => false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_type)?;
        if !self.payload.is_empty() {
            write!(f, " {}", Value::Array(self.payload.clone()))?;
        }
        Ok(())
    }
}

/// `ListProcesses` payload selecting the processes launched by the server.
pub const MANAGED_SELECTOR: &str = "managed";
