// proctalk/src/protocol/state.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Named protocol states and the actors that hold them.

use std::borrow::Cow;
use std::fmt;

use super::ProtocolError;

/// A named phase of a conversation.
///
/// Two states are equal iff their names match. Well-known states are provided as
/// associated constants; custom protocols can mint their own with [`ProtocolState::new`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolState(Cow<'static, str>);

impl ProtocolState {
    pub const INITIAL: ProtocolState = ProtocolState(Cow::Borrowed("Initial"));
    pub const READY: ProtocolState = ProtocolState(Cow::Borrowed("Ready"));
    pub const SENDING_ACK: ProtocolState = ProtocolState(Cow::Borrowed("SendingAck"));
    pub const SENDING_HEARTBEAT: ProtocolState = ProtocolState(Cow::Borrowed("SendingHeartbeat"));
    pub const EXECUTING: ProtocolState = ProtocolState(Cow::Borrowed("Executing"));
    pub const ERROR: ProtocolState = ProtocolState(Cow::Borrowed("Error"));
    pub const CLOSED: ProtocolState = ProtocolState(Cow::Borrowed("Closed"));

    /// Creates a custom state. Surrounding whitespace is ignored; an empty name is rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::EmptyStateName);
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity half of an [`Actor`].
///
/// `Any` is the wildcard used in rule tables: it matches every actor name during lookup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActorName {
    Any,
    Named(Cow<'static, str>),
}

impl ActorName {
    pub const SERVER: ActorName = ActorName::Named(Cow::Borrowed("Server"));
    pub const CLIENT: ActorName = ActorName::Named(Cow::Borrowed("Client"));

    pub fn named(name: impl Into<String>) -> Self {
        ActorName::Named(Cow::Owned(name.into()))
    }

    /// Wildcard-aware comparison used by rule lookup.
    pub fn matches(&self, other: &ActorName) -> bool {
        match (self, other) {
            (ActorName::Any, _) | (_, ActorName::Any) => true,
            (ActorName::Named(a), ActorName::Named(b)) => a == b,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ActorName::Any)
    }
}

impl fmt::Display for ActorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorName::Any => f.write_str("ANY"),
            ActorName::Named(name) => f.write_str(name),
        }
    }
}

/// "Who" is in "what state". Immutable: advancing an actor produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Actor {
    name: ActorName,
    state: ProtocolState,
}

impl Actor {
    pub fn new(name: ActorName, state: ProtocolState) -> Self {
        Self { name, state }
    }

    pub fn server(state: ProtocolState) -> Self {
        Self::new(ActorName::SERVER, state)
    }

    pub fn client(state: ProtocolState) -> Self {
        Self::new(ActorName::CLIENT, state)
    }

    /// Wildcard actor in the given state.
    pub fn any(state: ProtocolState) -> Self {
        Self::new(ActorName::Any, state)
    }

    pub fn name(&self) -> &ActorName {
        &self.name
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// Same identity, new state.
    pub fn with_state(&self, state: ProtocolState) -> Self {
        Self::new(self.name.clone(), state)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_equality_is_by_name() {
        let custom = ProtocolState::new(" Ready ").unwrap();
        assert_eq!(custom, ProtocolState::READY);
        assert_ne!(custom, ProtocolState::INITIAL);
    }

    #[test]
    fn test_empty_state_name_rejected() {
        assert!(matches!(ProtocolState::new("   "), Err(ProtocolError::EmptyStateName)));
    }

    #[test]
    fn test_actor_ordering_is_name_then_state() {
        let a = Actor::client(ProtocolState::READY);
        let b = Actor::server(ProtocolState::INITIAL);
        let c = Actor::server(ProtocolState::READY);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_wildcard_name_matches_everything() {
        assert!(ActorName::Any.matches(&ActorName::SERVER));
        assert!(ActorName::CLIENT.matches(&ActorName::Any));
        assert!(!ActorName::CLIENT.matches(&ActorName::SERVER));
        assert_eq!(Actor::any(ProtocolState::ERROR).to_string(), "ANY@Error");
    }
}
