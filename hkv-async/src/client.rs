//! # Async Client API
//!
//! Purpose: Expose an awaitable command API on top of the session task.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides the session task, queue and timers.
//! 2. **Message Passing**: Handles only send requests to the task that owns
//!    the session; each command carries a oneshot sender for its reply.
//! 3. **Cheap Clones**: Every clone shares the same connection and pipeline.
//! 4. **Fail Fast**: Unsupported command families error before queueing.

use std::future;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::debug;

use crate::command::{Command, IntoArg, Responder, Transform, CURSOR_COMMANDS};
use crate::config::{ClientConfig, Credential};
use crate::error::{ClientError, ClientResult};
use crate::pubsub::{subscription_handler, Message, SubscriptionKind};
use crate::session::{ConnectCallback, Session, SessionStatus};
use crate::transport::{Connector, EventReceiver, TcpConnector};
use crate::value::Value;

/// Work handed to the session task.
pub(crate) enum Request {
    Command(Command),
    Connect,
    Close(oneshot::Sender<()>),
    Shutdown,
    SetDb(u32),
    SetAuth(Option<Credential>),
    ClearLastError,
    Status(oneshot::Sender<SessionStatus>),
}

/// Handle to one pipelined connection.
///
/// Cloning is cheap; all clones feed the same queue. The session task stops
/// when the last handle is dropped or `shutdown` is called.
#[derive(Clone)]
pub struct Client {
    requests: mpsc::UnboundedSender<Request>,
}

/// Non-owning handle that does not keep the session alive.
#[derive(Clone)]
pub struct WeakClient {
    requests: mpsc::WeakUnboundedSender<Request>,
}

impl WeakClient {
    pub fn upgrade(&self) -> Option<Client> {
        self.requests.upgrade().map(|requests| Client { requests })
    }
}

impl Client {
    /// Spawns a session for `config` and starts connecting.
    ///
    /// Must be called from within a tokio runtime. Commands issued before the
    /// connection is established wait in the queue.
    pub fn new(config: ClientConfig) -> Self {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, connector, None)
    }

    /// Like `new`, reporting connection attempts to `callback` until the
    /// first one succeeds.
    pub fn with_callback<F>(config: ClientConfig, callback: F) -> Self
    where
        F: FnMut(ClientResult<()>) + Send + 'static,
    {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, connector, Some(Box::new(callback)))
    }

    /// Spawns a session over a custom transport.
    pub fn with_connector<C>(
        config: ClientConfig,
        connector: C,
        on_connect: Option<ConnectCallback>,
    ) -> Self
    where
        C: Connector + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Session::new(config, connector, events_tx, on_connect, Instant::now());
        tokio::spawn(run_session(session, requests_rx, events_rx));
        Client {
            requests: requests_tx,
        }
    }

    /// Spawns a session and waits for the outcome of the first connection
    /// attempt.
    ///
    /// On failure the session is dropped together with the returned error.
    pub async fn connect(config: ClientConfig) -> ClientResult<Client> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let client = Client::with_callback(config, move |result| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(result);
            }
        });
        rx.await.map_err(|_| ClientError::Closed)??;
        Ok(client)
    }

    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            requests: self.requests.downgrade(),
        }
    }

    /// Sends one command and waits for its reply.
    ///
    /// The name is case-insensitive. Cursor iteration commands fail with
    /// `NotImplemented` without touching the connection.
    pub async fn invoke<I, A>(&self, name: &str, args: I) -> ClientResult<Value>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let params = args.into_iter().map(IntoArg::into_arg).collect();
        self.execute(name, params, None).await
    }

    /// Sends one command whose successful reply is reshaped by `transform`.
    pub async fn invoke_with(
        &self,
        name: &str,
        params: Vec<Bytes>,
        transform: Transform,
    ) -> ClientResult<Value> {
        self.execute(name, params, Some(transform)).await
    }

    pub(crate) async fn execute(
        &self,
        name: &str,
        params: Vec<Bytes>,
        transform: Option<Transform>,
    ) -> ClientResult<Value> {
        reject_unsupported(name)?;
        let (tx, rx) = oneshot::channel();
        let mut command = Command::from_parts(name, params).with_responder(Responder::Reply(tx));
        if let Some(transform) = transform {
            command = command.with_transform(transform);
        }
        self.send(Request::Command(command))?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Subscribes to channels; `callback` runs for every published message.
    ///
    /// Resolves once the server acknowledges the subscription. From then on
    /// the connection is in streaming mode: regular commands stay queued
    /// until the connection closes.
    pub async fn subscribe<I, A, F>(&self, channels: I, callback: F) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
        F: FnMut(Message, &Client) + Send + 'static,
    {
        self.start_subscription(SubscriptionKind::Channel, channels, callback)
            .await
    }

    /// Pattern variant of `subscribe`; messages carry the matching pattern.
    pub async fn psubscribe<I, A, F>(&self, patterns: I, callback: F) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
        F: FnMut(Message, &Client) + Send + 'static,
    {
        self.start_subscription(SubscriptionKind::Pattern, patterns, callback)
            .await
    }

    async fn start_subscription<I, A, F>(
        &self,
        kind: SubscriptionKind,
        targets: I,
        callback: F,
    ) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
        F: FnMut(Message, &Client) + Send + 'static,
    {
        let (ack_tx, ack_rx) = oneshot::channel();
        let handler = subscription_handler(kind, self.downgrade(), callback, ack_tx);
        let command = Command::from_parts(
            kind.command_name(),
            targets.into_iter().map(IntoArg::into_arg),
        )
        .with_responder(Responder::Stream(handler));
        self.send(Request::Command(command))?;
        ack_rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Opens a connection if the session has none (e.g. after `close`).
    pub fn reconnect(&self) -> ClientResult<()> {
        self.send(Request::Connect)
    }

    /// Closes the connection and discards queued commands.
    ///
    /// Safe to call repeatedly; the session stays alive and `reconnect`
    /// opens a new connection.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Request::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops the session task; pending commands fail with `Closed`.
    pub fn shutdown(&self) {
        let _ = self.send(Request::Shutdown);
    }

    /// Text of the last recorded failure, if any.
    pub async fn last_error(&self) -> ClientResult<Option<String>> {
        Ok(self.status().await?.last_error)
    }

    pub fn clear_last_error(&self) -> ClientResult<()> {
        self.send(Request::ClearLastError)
    }

    pub async fn is_connected(&self) -> ClientResult<bool> {
        Ok(self.status().await?.connected)
    }

    /// Database selected after every (re)connection.
    pub async fn db(&self) -> ClientResult<u32> {
        Ok(self.status().await?.db)
    }

    pub async fn status(&self) -> ClientResult<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Status(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    pub(crate) fn remember_db(&self, db: u32) -> ClientResult<()> {
        self.send(Request::SetDb(db))
    }

    pub(crate) fn remember_auth(&self, credential: Credential) -> ClientResult<()> {
        self.send(Request::SetAuth(Some(credential)))
    }

    fn send(&self, request: Request) -> ClientResult<()> {
        self.requests.send(request).map_err(|_| ClientError::Closed)
    }
}

fn reject_unsupported(name: &str) -> ClientResult<()> {
    match CURSOR_COMMANDS
        .iter()
        .find(|cursor| cursor.eq_ignore_ascii_case(name))
    {
        Some(cursor) => Err(ClientError::NotImplemented(*cursor)),
        None => Ok(()),
    }
}

async fn run_session<C: Connector>(
    mut session: Session<C>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut events: EventReceiver,
) {
    session.connect(Instant::now());
    loop {
        let deadline = session.next_deadline();
        let sleep = async move {
            match deadline {
                Some(at) => time::sleep_until(time::Instant::from_std(at)).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Shutdown) | None => break,
                Some(request) => apply(&mut session, request),
            },
            Some((generation, event)) = events.recv() => {
                session.handle_event(generation, event, Instant::now());
            }
            _ = sleep => session.fire_timers(Instant::now()),
        }
    }
    debug!("session task stopping");
    session.shutdown();
}

fn apply<C: Connector>(session: &mut Session<C>, request: Request) {
    match request {
        Request::Command(command) => session.enqueue(command),
        Request::Connect => session.connect(Instant::now()),
        Request::Close(ack) => {
            session.close();
            let _ = ack.send(());
        }
        Request::SetDb(db) => session.set_db(db),
        Request::SetAuth(credential) => session.set_auth(credential),
        Request::ClearLastError => session.clear_last_error(),
        Request::Status(reply) => {
            let _ = reply.send(session.status());
        }
        Request::Shutdown => {}
    }
}
