// proctalk/src/protocol/process_control.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The rule table spoken between `RemoteClient` and `RemoteServer`.
//!
//! ```text
//! Server:  Initial --Identify--> SendingAck --Ack--> Ready
//!          Ready --ChitChat--> SendingHeartbeat --ChitChat--> Ready
//!          Ready --instruction--> Executing --Ack|ProcessList|Invalid--> Ready
//!                                 Executing --Ack--> Closed        (StopServer, end of session)
//!          Ready --Invalid--> Error --Invalid--> Ready
//!
//! Client:  Initial --Identify--> SendingAck --ChitChat*--> SendingAck --Ack--> Ready
//!          Ready|Error --instruction--> Executing --Ack|ProcessList--> Ready
//!          Executing --Ack--> Closed
//!          any waiting state --Invalid--> Error
//! ```
//!
//! Each side resolves a message in two steps: the receipt (or send) rule takes the actor
//! into a working state, the reply rule brings it back to a resting state.

use crate::message::MessageType;

use super::{Actor, ActorName, Protocol, ProtocolError, ProtocolState, Target};

/// Instructions that make the server do real work.
const EXECUTING_INSTRUCTIONS: [MessageType; 5] = [
    MessageType::StartProcess,
    MessageType::ListProcesses,
    MessageType::KillProcess,
    MessageType::RestartProcess,
    MessageType::StopServer,
];

impl Protocol {
    /// Builds the process-control protocol shared by server and client.
    pub fn process_control() -> Result<Protocol, ProtocolError> {
        let mut p = Protocol::new("process-control");

        let server = |state: ProtocolState| Actor::server(state);
        let client = |state: ProtocolState| Actor::client(state);
        let to_server = |state: ProtocolState| Target::Actor(Actor::server(state));
        let to_client = |state: ProtocolState| Target::Actor(Actor::client(state));

        // Server: handshake
        p.add_rule(server(ProtocolState::INITIAL), MessageType::Identify, ProtocolState::SENDING_ACK, to_server(ProtocolState::SENDING_ACK))?;
        p.add_rule(server(ProtocolState::SENDING_ACK), MessageType::Ack, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(server(ProtocolState::SENDING_ACK), MessageType::Invalid, ProtocolState::INITIAL, to_client(ProtocolState::INITIAL))?;

        // Server: bookkeeping traffic
        p.add_rule(server(ProtocolState::READY), MessageType::Ack, ProtocolState::SENDING_ACK, to_server(ProtocolState::SENDING_ACK))?;
        p.add_rule(server(ProtocolState::READY), MessageType::ChitChat, ProtocolState::SENDING_HEARTBEAT, to_server(ProtocolState::SENDING_HEARTBEAT))?;
        p.add_rule(server(ProtocolState::SENDING_HEARTBEAT), MessageType::ChitChat, ProtocolState::READY, to_client(ProtocolState::READY))?;

        // Server: instructions
        for instruction in EXECUTING_INSTRUCTIONS {
            p.add_rule(server(ProtocolState::READY), instruction, ProtocolState::EXECUTING, to_server(ProtocolState::EXECUTING))?;
        }
        p.add_rule(server(ProtocolState::EXECUTING), MessageType::Ack, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(server(ProtocolState::EXECUTING), MessageType::ProcessList, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(server(ProtocolState::EXECUTING), MessageType::Invalid, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(server(ProtocolState::EXECUTING), MessageType::Ack, ProtocolState::CLOSED, Target::Any)?;
        p.add_rule(server(ProtocolState::ERROR), MessageType::Invalid, ProtocolState::READY, to_client(ProtocolState::READY))?;

        // Client: handshake
        p.add_rule(client(ProtocolState::INITIAL), MessageType::Identify, ProtocolState::SENDING_ACK, to_server(ProtocolState::INITIAL))?;
        p.add_rule(client(ProtocolState::SENDING_ACK), MessageType::ChitChat, ProtocolState::SENDING_ACK, to_server(ProtocolState::INITIAL))?;
        p.add_rule(client(ProtocolState::SENDING_ACK), MessageType::Ack, ProtocolState::READY, to_client(ProtocolState::READY))?;

        // Client: requests from a resting state
        for resting in [ProtocolState::READY, ProtocolState::ERROR] {
            p.add_rule(client(resting.clone()), MessageType::Ack, ProtocolState::SENDING_ACK, to_server(ProtocolState::READY))?;
            p.add_rule(client(resting.clone()), MessageType::ChitChat, ProtocolState::SENDING_HEARTBEAT, to_server(ProtocolState::READY))?;
            for instruction in EXECUTING_INSTRUCTIONS {
                p.add_rule(client(resting.clone()), instruction, ProtocolState::EXECUTING, to_server(ProtocolState::READY))?;
            }
        }
        p.add_rule(client(ProtocolState::SENDING_HEARTBEAT), MessageType::ChitChat, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(client(ProtocolState::EXECUTING), MessageType::Ack, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(client(ProtocolState::EXECUTING), MessageType::ProcessList, ProtocolState::READY, to_client(ProtocolState::READY))?;
        p.add_rule(client(ProtocolState::EXECUTING), MessageType::Ack, ProtocolState::CLOSED, Target::Any)?;

        // Either side: an Invalid message while talking drops the actor into Error.
        for state in [
            ProtocolState::READY,
            ProtocolState::SENDING_ACK,
            ProtocolState::SENDING_HEARTBEAT,
            ProtocolState::EXECUTING,
            ProtocolState::ERROR,
        ] {
            p.add_rule(Actor::new(ActorName::Any, state), MessageType::Invalid, ProtocolState::ERROR, Target::Any)?;
        }

        Ok(p)
    }
}

/// The state a server moves into on receiving `message_type`.
pub fn server_receipt_state(message_type: MessageType) -> ProtocolState {
    match message_type {
        MessageType::Identify | MessageType::Ack => ProtocolState::SENDING_ACK,
        MessageType::ChitChat => ProtocolState::SENDING_HEARTBEAT,
        t if t.is_instruction() => ProtocolState::EXECUTING,
        _ => ProtocolState::ERROR,
    }
}

/// The state a server settles into after sending `reply` from `current`.
pub fn server_reply_state(current: &ProtocolState, reply: MessageType, closes_session: bool) -> ProtocolState {
    if closes_session && reply == MessageType::Ack {
        ProtocolState::CLOSED
    } else if *current == ProtocolState::SENDING_ACK && reply == MessageType::Invalid {
        // A rejected handshake leaves the session unidentified.
        ProtocolState::INITIAL
    } else {
        ProtocolState::READY
    }
}

/// The state a client moves into on sending `message_type`.
pub fn client_send_state(message_type: MessageType) -> ProtocolState {
    server_receipt_state(message_type)
}

/// The state a client settles into after receiving `reply` while in `current`.
pub fn client_reply_state(current: &ProtocolState, reply: MessageType, closes_session: bool) -> ProtocolState {
    match reply {
        MessageType::Invalid => ProtocolState::ERROR,
        MessageType::ChitChat if *current == ProtocolState::SENDING_ACK => ProtocolState::SENDING_ACK,
        MessageType::Ack if closes_session => ProtocolState::CLOSED,
        _ => ProtocolState::READY,
    }
}
