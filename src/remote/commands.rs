// proctalk/src/remote/commands.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Side effects of the messages a server worker accepts.
//!
//! [`dispatch_message`] is called only after the receipt rule sanctioned the message;
//! it performs the work and builds the reply. It never fails: problems become an
//! `Invalid` reply carrying the reason.

use std::path::PathBuf;

use crate::message::{Message, MessageType, Value, MANAGED_SELECTOR};
use crate::process::{list_os_processes, LaunchSpec, LifecycleState};
use crate::runtime::ProctalkRuntime;

/// The reply to one request and what it does to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reply: Message,
    /// The worker closes the connection after sending the reply.
    pub closes_session: bool,
    /// The whole server stops accepting connections.
    pub stop_server: bool,
}

impl Outcome {
    fn reply(reply: Message) -> Self {
        Self {
            reply,
            closes_session: false,
            stop_server: false,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::debug!("Replying Invalid: {}", reason);
        Self::reply(Message::invalid(reason))
    }
}

/// Routes a received message to its handler.
pub async fn dispatch_message(message: &Message, runtime: &ProctalkRuntime) -> Outcome {
    match message.message_type() {
        MessageType::Identify => handle_identify(message),
        MessageType::Ack => Outcome::reply(Message::ack(Vec::new())),
        MessageType::ChitChat => handle_chit_chat(message),
        MessageType::ListProcesses => handle_list(message, runtime).await,
        MessageType::StartProcess => handle_start(message, runtime).await,
        MessageType::KillProcess => handle_kill(message, runtime),
        MessageType::RestartProcess => handle_restart(message, runtime).await,
        MessageType::StopServer => handle_stop(),
        MessageType::Invalid => Outcome::invalid(format!(
            "Received invalid message: {}",
            message.text(0).unwrap_or("no reason given")
        )),
        other => Outcome::invalid(format!("Unexpected message: {}", other)),
    }
}

fn handle_identify(message: &Message) -> Outcome {
    let Some(host) = message.text(0).filter(|h| !h.trim().is_empty()) else {
        return Outcome::invalid("Identify requires [host, port]");
    };
    let port = message.arg(1).and_then(Value::as_i64).unwrap_or_default();
    tracing::info!("Client identified as {}:{}", host, port);
    Outcome::reply(Message::ack(vec![Value::from("identified"), Value::from(host)]))
}

fn handle_chit_chat(message: &Message) -> Outcome {
    tracing::debug!("ChitChat: {}", message.text(0).unwrap_or_default());
    Outcome::reply(Message::new(MessageType::ChitChat, message.payload().to_vec()))
}

async fn handle_list(message: &Message, runtime: &ProctalkRuntime) -> Outcome {
    if message.text(0) == Some(MANAGED_SELECTOR) {
        let entries = runtime.processes.list().iter().map(|p| p.to_value()).collect();
        return Outcome::reply(Message::process_list(entries));
    }
    match list_os_processes().await {
        Ok(processes) => Outcome::reply(Message::process_list(
            processes.iter().map(|p| p.to_value()).collect(),
        )),
        Err(e) => {
            tracing::error!("Failed to list OS processes: {}", e);
            Outcome::invalid(format!("Cannot list processes: {}", e))
        }
    }
}

fn process_id(message: &Message) -> Result<u64, Outcome> {
    message
        .arg(0)
        .and_then(Value::as_i64)
        .and_then(|id| u64::try_from(id).ok())
        .ok_or_else(|| Outcome::invalid(format!("{} requires [process id]", message.message_type())))
}

fn state_ack(id: u64, state: LifecycleState) -> Message {
    Message::ack(vec![Value::from(id), Value::from(state.name())])
}

async fn handle_start(message: &Message, runtime: &ProctalkRuntime) -> Outcome {
    let Some(program) = message.text(0).filter(|p| !p.trim().is_empty()) else {
        return Outcome::invalid("StartProcess requires [program, args, working_dir, end_session]");
    };

    let mut args = Vec::new();
    match message.arg(1) {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                match item.as_str() {
                    Some(arg) => args.push(arg.to_string()),
                    None => return Outcome::invalid(format!("Process argument is not a string: {}", item)),
                }
            }
        }
        Some(other) => return Outcome::invalid(format!("Process arguments must be an array, got {}", other)),
    }

    let working_dir = message
        .text(2)
        .map(PathBuf::from)
        .or_else(|| runtime.config.process.working_dir.clone());

    let mut spec = LaunchSpec::new(program).args(args);
    spec.working_dir = working_dir;

    let lifecycle = runtime.processes.start(spec);
    let state = match lifecycle.wait_until_launched().await {
        Ok(state) => state,
        Err(e) => return Outcome::invalid(e.to_string()),
    };
    if state == LifecycleState::StartFailed {
        let reason = match lifecycle.wait_for().await {
            Err(e) => e.to_string(),
            Ok(code) => format!("process {} exited with {}", lifecycle.id(), code),
        };
        return Outcome::invalid(reason);
    }

    Outcome {
        reply: state_ack(lifecycle.id(), state),
        closes_session: message.ends_session(),
        stop_server: false,
    }
}

fn handle_kill(message: &Message, runtime: &ProctalkRuntime) -> Outcome {
    let id = match process_id(message) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    match runtime.processes.kill(id) {
        Ok(state) => {
            tracing::info!("Killed managed process {}", id);
            Outcome::reply(state_ack(id, state))
        }
        Err(e) => Outcome::invalid(e.to_string()),
    }
}

async fn handle_restart(message: &Message, runtime: &ProctalkRuntime) -> Outcome {
    let id = match process_id(message) {
        Ok(id) => id,
        Err(outcome) => return outcome,
    };
    let lifecycle = match runtime.processes.restart(id) {
        Ok(lifecycle) => lifecycle,
        Err(e) => return Outcome::invalid(e.to_string()),
    };
    match lifecycle.wait_until_launched().await {
        Ok(LifecycleState::StartFailed) => Outcome::invalid(format!("process {} failed to restart", id)),
        Ok(state) => Outcome::reply(state_ack(id, state)),
        Err(e) => Outcome::invalid(e.to_string()),
    }
}

fn handle_stop() -> Outcome {
    tracing::info!("StopServer requested by a client");
    Outcome {
        reply: Message::ack(vec![Value::from("stopping")]),
        closes_session: true,
        stop_server: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identify_is_acked() {
        let runtime = ProctalkRuntime::new_for_tests();
        let outcome = dispatch_message(&Message::identify("host1", 9898), &runtime).await;
        assert_eq!(outcome.reply.message_type(), MessageType::Ack);
        assert_eq!(outcome.reply.text(1), Some("host1"));
        assert!(!outcome.closes_session);

        let outcome = dispatch_message(&Message::new(MessageType::Identify, vec![]), &runtime).await;
        assert!(outcome.reply.is_invalid());
    }

    #[tokio::test]
    async fn test_chit_chat_is_echoed() {
        let runtime = ProctalkRuntime::new_for_tests();
        let outcome = dispatch_message(&Message::chit_chat("hello"), &runtime).await;
        assert_eq!(outcome.reply, Message::chit_chat("hello"));
    }

    #[tokio::test]
    async fn test_list_os_processes() {
        let runtime = ProctalkRuntime::new_for_tests();
        let outcome = dispatch_message(&Message::list_processes(), &runtime).await;
        assert_eq!(outcome.reply.message_type(), MessageType::ProcessList);
        assert!(!outcome.reply.payload().is_empty());
    }

    #[tokio::test]
    async fn test_stop_server_closes_and_stops() {
        let runtime = ProctalkRuntime::new_for_tests();
        let outcome = dispatch_message(&Message::stop_server(), &runtime).await;
        assert_eq!(outcome.reply.message_type(), MessageType::Ack);
        assert!(outcome.closes_session);
        assert!(outcome.stop_server);
    }

    #[tokio::test]
    async fn test_bad_payloads_are_invalid() {
        let runtime = ProctalkRuntime::new_for_tests();
        for message in [
            Message::new(MessageType::StartProcess, vec![]),
            Message::new(MessageType::StartProcess, vec![Value::from("ls"), Value::from(3u16)]),
            Message::new(MessageType::KillProcess, vec![Value::from("one")]),
            Message::kill_process(42),
            Message::restart_process(42),
            Message::empty(MessageType::Bootstrap),
            Message::invalid("garbage"),
        ] {
            let outcome = dispatch_message(&message, &runtime).await;
            assert!(outcome.reply.is_invalid(), "{} should be rejected", message);
            assert!(!outcome.stop_server);
        }
    }

    #[tokio::test]
    async fn test_start_failure_is_invalid() {
        let runtime = ProctalkRuntime::new_for_tests();
        let message = Message::start_process("/nonexistent/definitely-not-here", vec![], None, true);
        let outcome = dispatch_message(&message, &runtime).await;
        assert!(outcome.reply.is_invalid());
        assert!(!outcome.closes_session);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_list_restart_kill_managed() {
        let runtime = ProctalkRuntime::new_for_tests();

        let start = Message::start_process("sleep", vec!["30".into()], None, false);
        let outcome = dispatch_message(&start, &runtime).await;
        assert_eq!(outcome.reply, state_ack(1, LifecycleState::Running));

        let listed = dispatch_message(&Message::list_managed_processes(), &runtime).await;
        assert_eq!(
            listed.reply.payload(),
            &[Value::Array(vec![Value::Integer(1), Value::from("sleep"), Value::from("Running")])]
        );

        let restarted = dispatch_message(&Message::restart_process(1), &runtime).await;
        assert_eq!(restarted.reply, state_ack(1, LifecycleState::Running));

        let killed = dispatch_message(&Message::kill_process(1), &runtime).await;
        assert_eq!(killed.reply, state_ack(1, LifecycleState::Terminated));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_managed_list_forgets_old_exits() {
        let runtime = ProctalkRuntime::new_for_tests();
        let history = runtime.config.process.finished_history;
        let launches = history + 20;

        for _ in 0..launches {
            let start = Message::start_process("sh", vec!["-c".into(), "exit 0".into()], None, false);
            let outcome = dispatch_message(&start, &runtime).await;
            assert_eq!(outcome.reply.message_type(), MessageType::Ack);
        }
        for info in runtime.processes.list() {
            if let Some(lifecycle) = runtime.processes.get(info.id) {
                tokio::time::timeout(std::time::Duration::from_secs(10), lifecycle.wait_for())
                    .await
                    .unwrap()
                    .unwrap();
            }
        }

        let listed = dispatch_message(&Message::list_managed_processes(), &runtime).await;
        assert_eq!(listed.reply.message_type(), MessageType::ProcessList);
        assert_eq!(listed.reply.payload().len(), history);
        assert_eq!(runtime.processes.len(), history);
    }
}

