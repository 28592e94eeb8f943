// proctalk/src/protocol/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Rule-governed protocol engine.
//!
//! A [`Protocol`] is a flat, ordered list of [`Rule`]s. Lookup is a linear scan with
//! first-match-wins semantics: rule sets are small (tens of entries) and rules may leave
//! one axis unspecified through the [`ActorName::Any`] / [`Target::Any`] wildcards.
//!
//! A protocol is built once at startup and then shared read-only (`Arc<Protocol>`)
//! between the server workers and clients.

use thiserror::Error;

use crate::message::MessageType;

mod process_control;
mod rule;
mod state;

pub use process_control::{client_reply_state, client_send_state, server_receipt_state, server_reply_state};
pub use rule::{Rule, Target};
pub use state::{Actor, ActorName, ProtocolState};

/// Errors raised by protocol construction and transition checks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("protocol state name must not be empty")]
    EmptyStateName,

    /// A rule with the same `(from, message_type, to_state)` key is already registered.
    #[error("duplicate rule in protocol '{protocol}': {from} --{message_type}--> {to_state}")]
    DuplicateRule {
        protocol: String,
        from: Actor,
        message_type: MessageType,
        to_state: ProtocolState,
    },

    /// No rule sanctions the requested transition.
    #[error("no rule in protocol '{protocol}' allows {from} --{message_type}--> {to_state}")]
    NoMatchingRule {
        protocol: String,
        from: Actor,
        message_type: MessageType,
        to_state: ProtocolState,
    },
}

/// The closed set of legal transitions for one kind of conversation.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    name: String,
    rules: Vec<Rule>,
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a transition.
    ///
    /// Fails with [`ProtocolError::DuplicateRule`] if the exact `(from, message_type, to_state)`
    /// key is already present; the table is left unchanged in that case.
    pub fn add_rule(
        &mut self,
        from: Actor,
        message_type: MessageType,
        to_state: ProtocolState,
        next: Target,
    ) -> Result<(), ProtocolError> {
        if self.rules.iter().any(|r| r.has_key(&from, message_type, &to_state)) {
            return Err(ProtocolError::DuplicateRule {
                protocol: self.name.clone(),
                from,
                message_type,
                to_state,
            });
        }
        self.rules.push(Rule::new(from, message_type, to_state, next));
        Ok(())
    }

    /// Returns the first rule, in insertion order, that sanctions `actor` resolving
    /// `message_type` into `to_state`.
    pub fn find_rule(&self, actor: &Actor, message_type: MessageType, to_state: &ProtocolState) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|r| r.applies_to(actor, message_type, to_state))
    }

    /// Like [`Protocol::find_rule`], but reports an illegal transition as
    /// [`ProtocolError::NoMatchingRule`].
    pub fn authorize(
        &self,
        actor: &Actor,
        message_type: MessageType,
        to_state: &ProtocolState,
    ) -> Result<&Rule, ProtocolError> {
        self.find_rule(actor, message_type, to_state)
            .ok_or_else(|| ProtocolError::NoMatchingRule {
                protocol: self.name.clone(),
                from: actor.clone(),
                message_type,
                to_state: to_state.clone(),
            })
    }

    /// Introspection: the first rule matching all four axes, including the next actor.
    pub fn get_rule(
        &self,
        actor: &Actor,
        next: &Actor,
        to_state: &ProtocolState,
        message_type: MessageType,
    ) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|r| r.applies_to(actor, message_type, to_state) && r.next().matches(next))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(state: ProtocolState) -> Actor {
        Actor::server(state)
    }

    #[test]
    fn test_find_rule_returns_added_rule() {
        let mut protocol = Protocol::new("test");
        protocol
            .add_rule(
                server(ProtocolState::READY),
                MessageType::ListProcesses,
                ProtocolState::EXECUTING,
                Target::Any,
            )
            .unwrap();

        let rule = protocol
            .find_rule(&server(ProtocolState::READY), MessageType::ListProcesses, &ProtocolState::EXECUTING)
            .expect("rule should match");
        assert_eq!(rule.message_type(), MessageType::ListProcesses);
        assert_eq!(rule.to_state(), &ProtocolState::EXECUTING);
    }

    #[test]
    fn test_duplicate_rule_rejected_and_table_unchanged() {
        let mut protocol = Protocol::new("test");
        let from = server(ProtocolState::READY);
        protocol
            .add_rule(from.clone(), MessageType::Ack, ProtocolState::READY, Target::Any)
            .unwrap();

        let err = protocol
            .add_rule(
                from,
                MessageType::Ack,
                ProtocolState::READY,
                Target::Actor(Actor::client(ProtocolState::READY)),
            )
            .unwrap_err();

        assert!(matches!(err, ProtocolError::DuplicateRule { .. }));
        assert_eq!(protocol.len(), 1);
        assert_eq!(protocol.rules()[0].next(), &Target::Any);
    }

    #[test]
    fn test_first_match_wins_over_later_rules() {
        let mut protocol = Protocol::new("test");
        // The wildcard rule is registered first and shadows the named one.
        protocol
            .add_rule(
                Actor::any(ProtocolState::READY),
                MessageType::Invalid,
                ProtocolState::ERROR,
                Target::Any,
            )
            .unwrap();
        protocol
            .add_rule(
                server(ProtocolState::READY),
                MessageType::Invalid,
                ProtocolState::ERROR,
                Target::Actor(Actor::client(ProtocolState::READY)),
            )
            .unwrap();

        let rule = protocol
            .find_rule(&server(ProtocolState::READY), MessageType::Invalid, &ProtocolState::ERROR)
            .unwrap();
        assert_eq!(rule.from_actor().name(), &ActorName::Any);
        assert_eq!(rule.next(), &Target::Any);
    }

    #[test]
    fn test_state_must_match_exactly() {
        let mut protocol = Protocol::new("test");
        protocol
            .add_rule(
                Actor::any(ProtocolState::READY),
                MessageType::ChitChat,
                ProtocolState::SENDING_HEARTBEAT,
                Target::Any,
            )
            .unwrap();

        assert!(protocol
            .find_rule(&server(ProtocolState::INITIAL), MessageType::ChitChat, &ProtocolState::SENDING_HEARTBEAT)
            .is_none());
        assert!(protocol
            .find_rule(&server(ProtocolState::READY), MessageType::ChitChat, &ProtocolState::READY)
            .is_none());
    }

    #[test]
    fn test_authorize_reports_no_matching_rule() {
        let protocol = Protocol::new("empty");
        let err = protocol
            .authorize(&server(ProtocolState::INITIAL), MessageType::StopServer, &ProtocolState::CLOSED)
            .unwrap_err();
        match err {
            ProtocolError::NoMatchingRule { protocol, message_type, .. } => {
                assert_eq!(protocol, "empty");
                assert_eq!(message_type, MessageType::StopServer);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_get_rule_checks_next_actor() {
        let mut protocol = Protocol::new("test");
        let next = Actor::client(ProtocolState::READY);
        protocol
            .add_rule(
                server(ProtocolState::EXECUTING),
                MessageType::ProcessList,
                ProtocolState::READY,
                Target::Actor(next.clone()),
            )
            .unwrap();

        let from = server(ProtocolState::EXECUTING);
        assert!(protocol
            .get_rule(&from, &next, &ProtocolState::READY, MessageType::ProcessList)
            .is_some());
        assert!(protocol
            .get_rule(&from, &Actor::client(ProtocolState::ERROR), &ProtocolState::READY, MessageType::ProcessList)
            .is_none());
    }
}
