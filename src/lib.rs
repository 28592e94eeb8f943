// proctalk/src/lib.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! # proctalk
//!
//! A small control plane for starting, listing and stopping OS processes on a remote
//! host. A client and a server exchange typed [`message::Message`]s over TCP, and
//! each side checks every step of the conversation against a shared rule table
//! ([`protocol::Protocol`]). Processes launched on request are supervised by
//! [`process::ProcessLifecycle`].

pub mod config;
pub mod env;
pub mod error;
pub mod log;
pub mod message;
pub mod process;
pub mod protocol;
pub mod remote;
pub mod runtime;

pub use error::{ProctalkError, Result};
pub use message::{Message, MessageType, Value};
pub use protocol::Protocol;
pub use remote::{RemoteClient, ServerHandle};
