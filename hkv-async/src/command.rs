//! # Queued Commands
//!
//! Purpose: One pending request: its argument frame, when it was queued,
//! who gets the reply, and how the reply is reshaped first.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::ClientResult;
use crate::value::Value;

/// Reshapes a successful reply before delivery.
pub type Transform = Box<dyn FnOnce(Value) -> Value + Send>;

/// Receives every reply routed to a streaming command.
pub(crate) type StreamHandler = Box<dyn FnMut(ClientResult<Value>) + Send>;

/// Cursor iteration is not supported; these fail fast.
pub(crate) const CURSOR_COMMANDS: [&str; 4] = ["SCAN", "HSCAN", "SSCAN", "ZSCAN"];

const SUBSCRIBE_COMMANDS: [&[u8]; 2] = [b"SUBSCRIBE", b"PSUBSCRIBE"];
const BLOCKING_POP_COMMANDS: [&[u8]; 2] = [b"BLPOP", b"BRPOP"];

/// Where a command's reply goes.
pub(crate) enum Responder {
    /// One reply, then done.
    Reply(oneshot::Sender<ClientResult<Value>>),
    /// Every reply for as long as the command heads a subscribed queue.
    Stream(StreamHandler),
}

/// A command waiting in the session queue.
pub(crate) struct Command {
    args: Vec<Bytes>,
    enqueued_at: Instant,
    responder: Option<Responder>,
    transform: Option<Transform>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name_lossy())
            .field("argc", &self.args.len())
            .field("enqueued_at", &self.enqueued_at)
            .field("has_responder", &self.responder.is_some())
            .finish()
    }
}

impl Command {
    /// Builds a command from its full argument frame (name first).
    pub fn new(args: Vec<Bytes>) -> Self {
        Command {
            args,
            enqueued_at: Instant::now(),
            responder: None,
            transform: None,
        }
    }

    /// Builds a command from a name and its parameters.
    pub fn from_parts<I>(name: &str, params: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut args = vec![normalize_name(name)];
        args.extend(params);
        Command::new(args)
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Overrides the enqueue timestamp.
    #[cfg(test)]
    pub fn queued_at(mut self, at: Instant) -> Self {
        self.enqueued_at = at;
        self
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn name(&self) -> &[u8] {
        self.args.first().map(|name| name.as_ref()).unwrap_or(b"")
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name()).into_owned()
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    pub fn has_responder(&self) -> bool {
        self.responder.is_some()
    }

    /// SUBSCRIBE and PSUBSCRIBE switch the connection into streaming mode.
    pub fn is_subscribe(&self) -> bool {
        SUBSCRIBE_COMMANDS.contains(&self.name())
    }

    /// BLPOP and BRPOP may legitimately wait as long as the server blocks.
    pub fn is_blocking_pop(&self) -> bool {
        BLOCKING_POP_COMMANDS.contains(&self.name())
    }

    /// Delivers the final result and consumes the command.
    pub(crate) fn complete(mut self, result: ClientResult<Value>) {
        let result = match (result, self.transform.take()) {
            (Ok(value), Some(transform)) => Ok(transform(value)),
            (result, _) => result,
        };
        let name = self.name_lossy();
        if let Some(responder) = self.responder.take() {
            respond(&name, responder, result);
        }
    }

    /// Delivers one result to a command that stays queued.
    ///
    /// Streaming responders are reused; a one-shot responder is consumed.
    pub(crate) fn deliver(&mut self, result: ClientResult<Value>) {
        let name = self.name_lossy();
        if let Some(Responder::Stream(handler)) = self.responder.as_mut() {
            guarded(&name, || handler(result));
            return;
        }
        if let Some(responder) = self.responder.take() {
            respond(&name, responder, result);
        }
    }
}

fn respond(name: &str, responder: Responder, result: ClientResult<Value>) {
    match responder {
        Responder::Reply(tx) => {
            if tx.send(result).is_err() {
                debug!(command = name, "caller dropped before reply arrived");
            }
        }
        Responder::Stream(mut handler) => guarded(name, move || handler(result)),
    }
}

// A panicking handler must not take the dispatch loop down with it.
pub(crate) fn guarded<F: FnOnce()>(name: &str, f: F) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(command = name, "reply handler panicked; pipeline continues");
    }
}

/// Upper-cases a command name into its wire form.
pub(crate) fn normalize_name(name: &str) -> Bytes {
    Bytes::from(name.to_ascii_uppercase())
}

/// Conversion into a single command argument.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &Bytes {
    fn into_arg(self) -> Bytes {
        self.clone()
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! numeric_arg {
    ($($ty:ty),*) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

numeric_arg!(i32, i64, u32, u64, usize, f64);
