//! # Pub/Sub Adapter
//!
//! Purpose: Turn the stream of replies a subscribed connection produces into
//! calls of the subscriber's callback.
//!
//! Once a SUBSCRIBE or PSUBSCRIBE is on the wire, every reply on that
//! connection is routed to the subscribing command, which stays at the queue
//! head. The adapter built here sorts those replies:
//! - `subscribe` / `psubscribe` acknowledgements are swallowed (the first
//!   one resolves the pending `subscribe` call);
//! - `message` / `pmessage` events reach the user callback;
//! - anything else is logged as unrecognised.

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::{Client, WeakClient};
use crate::command::StreamHandler;
use crate::error::ClientResult;
use crate::value::Value;

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published to.
    pub channel: Bytes,
    /// Matching pattern, for pattern subscriptions.
    pub pattern: Option<Bytes>,
    pub payload: Bytes,
}

/// Channel or pattern subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

impl SubscriptionKind {
    pub fn command_name(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "SUBSCRIBE",
            SubscriptionKind::Pattern => "PSUBSCRIBE",
        }
    }

    fn ack(self) -> &'static [u8] {
        match self {
            SubscriptionKind::Channel => b"subscribe",
            SubscriptionKind::Pattern => b"psubscribe",
        }
    }

    fn event(self) -> &'static [u8] {
        match self {
            SubscriptionKind::Channel => b"message",
            SubscriptionKind::Pattern => b"pmessage",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Ack,
    Message(Message),
    Unrecognized(Value),
}

fn classify(kind: SubscriptionKind, value: Value) -> Event {
    let items = match value {
        Value::Array(items) => items,
        other => return Event::Unrecognized(other),
    };
    let tag = items.first().and_then(Value::as_bytes);
    if tag == Some(kind.ack()) {
        return Event::Ack;
    }
    if tag != Some(kind.event()) {
        return Event::Unrecognized(Value::Array(items));
    }

    let mut parts = items.iter().skip(1).map(|item| item.as_bytes().map(Bytes::copy_from_slice));
    let message = match kind {
        SubscriptionKind::Channel if items.len() == 3 => {
            match (parts.next().flatten(), parts.next().flatten()) {
                (Some(channel), Some(payload)) => Some(Message {
                    channel,
                    pattern: None,
                    payload,
                }),
                _ => None,
            }
        }
        SubscriptionKind::Pattern if items.len() == 4 => {
            match (
                parts.next().flatten(),
                parts.next().flatten(),
                parts.next().flatten(),
            ) {
                (Some(pattern), Some(channel), Some(payload)) => Some(Message {
                    channel,
                    pattern: Some(pattern),
                    payload,
                }),
                _ => None,
            }
        }
        _ => None,
    };
    match message {
        Some(message) => Event::Message(message),
        None => Event::Unrecognized(Value::Array(items)),
    }
}

/// Builds the streaming responder for a subscription command.
pub(crate) fn subscription_handler<F>(
    kind: SubscriptionKind,
    client: WeakClient,
    mut callback: F,
    ack: oneshot::Sender<ClientResult<()>>,
) -> StreamHandler
where
    F: FnMut(Message, &Client) + Send + 'static,
{
    let mut ack = Some(ack);
    Box::new(move |result| {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                match ack.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(err));
                    }
                    None => warn!(error = %err, "subscription failure"),
                }
                return;
            }
        };

        match classify(kind, value) {
            Event::Ack => {
                if let Some(tx) = ack.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Event::Message(message) => match client.upgrade() {
                Some(client) => callback(message, &client),
                None => debug!("client dropped; discarding published message"),
            },
            Event::Unrecognized(value) => {
                warn!(kind = kind.command_name(), reply = ?value, "unrecognized response while subscribed");
            }
        }
    })
}
