// proctalk/src/protocol/rule.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

use crate::message::MessageType;

use super::{Actor, ProtocolState};

/// The actor that holds the conversation after a transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The transition does not care who ends up holding the token.
    Any,
    Actor(Actor),
}

impl Target {
    pub fn matches(&self, actor: &Actor) -> bool {
        match self {
            Target::Any => true,
            Target::Actor(expected) => {
                expected.name().matches(actor.name()) && expected.state() == actor.state()
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Any => f.write_str("ANY_ACTOR"),
            Target::Actor(actor) => actor.fmt(f),
        }
    }
}

/// One legal transition: `(from, message_type, to_state) -> next`.
///
/// The required current state is carried by `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    from: Actor,
    message_type: MessageType,
    to_state: ProtocolState,
    next: Target,
}

impl Rule {
    pub fn new(from: Actor, message_type: MessageType, to_state: ProtocolState, next: Target) -> Self {
        Self {
            from,
            message_type,
            to_state,
            next,
        }
    }

    pub fn from_actor(&self) -> &Actor {
        &self.from
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn to_state(&self) -> &ProtocolState {
        &self.to_state
    }

    pub fn next(&self) -> &Target {
        &self.next
    }

    /// Exact key equality, used to reject duplicate registrations.
    pub(crate) fn has_key(&self, from: &Actor, message_type: MessageType, to_state: &ProtocolState) -> bool {
        &self.from == from && self.message_type == message_type && &self.to_state == to_state
    }

    /// Wildcard-aware match used by lookup.
    pub(crate) fn applies_to(&self, actor: &Actor, message_type: MessageType, to_state: &ProtocolState) -> bool {
        self.from.name().matches(actor.name())
            && self.from.state() == actor.state()
            && self.message_type == message_type
            && &self.to_state == to_state
    }

    /// The actor `current` becomes once this rule fires.
    pub fn advance(&self, current: &Actor) -> Actor {
        current.with_state(self.to_state.clone())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} --{}--> {} (next: {})",
            self.from, self.message_type, self.to_state, self.next
        )
    }
}
