// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pass store host.
//!
//! The worker owns the authoritative [`pass_store::State`]. Replicas send
//! it intents over the broker; it reduces them, broadcasts every action in
//! dispatch order, runs the effects against the API and dispatches their
//! outcomes. Boot, lock, sign-out and the server event channels live here
//! too.

pub mod broker;
pub mod cache;
pub mod channel;
pub mod memory;
pub mod saga;
pub mod server;
pub mod store;
pub mod worker;

pub use broker::{Broker, BrokerError, MessageBuffer, MessageRegistry, Ports};
pub use channel::{CancelToken, ChannelRegistry, EventScope};
pub use saga::EffectError;
pub use store::Store;
pub use worker::{Collaborators, WorkerContext, WorkerError};
