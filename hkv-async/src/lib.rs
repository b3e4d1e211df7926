//! # HybridKV Async Client
//!
//! Purpose: Provide a pipelined, asynchronous Redis-compatible client that
//! survives connection loss without mixing up replies.
//!
//! ## Design Principles
//! 1. **Actor Pattern**: One task owns the connection, queue and timers;
//!    handles talk to it over channels.
//! 2. **FIFO Correlation**: Replies are matched to commands purely by order,
//!    with at most one request on the wire.
//! 3. **Self-Healing**: Fatal replies, stuck requests and dropped sockets all
//!    end in a reconnect that re-applies AUTH and SELECT first.
//! 4. **Awaitable API**: Every command resolves exactly once, with a value or
//!    an error.

mod client;
mod command;
mod commands;
mod config;
mod error;
mod pubsub;
mod queue;
mod session;
mod timer;
mod transport;
mod value;

pub use client::{Client, WeakClient};
pub use command::{IntoArg, Transform};
pub use commands::{ClientTtl, SetCondition, SetOptions, SortOptions};
pub use config::{
    ClientConfig, Credential, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_WAIT_TIMEOUT_SECS,
};
pub use error::{ClientError, ClientResult};
pub use pubsub::{Message, SubscriptionKind};
pub use session::{ConnectCallback, SessionStatus};
pub use transport::{Connector, EventSender, Transport, TransportEvent};
pub use value::Value;
