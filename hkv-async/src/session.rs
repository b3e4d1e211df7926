//! # Session State Machine
//!
//! Purpose: Own one connection, its command queue and its timers, and keep
//! every reply matched to the command that asked for it.
//!
//! ## Design Principles
//! 1. **Single Owner**: Only the session task calls into `Session`, so the
//!    queue and flags need no locks.
//! 2. **One In Flight**: A request is written only when the previous reply
//!    has been consumed; replies therefore arrive in queue order.
//! 3. **Reconnect Realigns**: Whenever the queue and the wire could disagree
//!    (fatal reply, evicted in-flight command), the connection is replaced.
//! 4. **Explicit Time**: Every entry point takes `now`, so the state machine
//!    is driven deterministically in tests.
//!
//! ## Lifecycle
//!
//! ```text
//! connect() --Connected--> established --Closed--> (retry now | retry in 5s)
//!     |                         |
//!     +--watchdog expires-------+--fatal reply / wait timeout--> reconnect
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use hkv_resp::Reply;
use tracing::{debug, error, info, warn};

use crate::command::{guarded, Command};
use crate::config::{ClientConfig, Credential};
use crate::error::{ClientError, ClientResult};
use crate::queue::CommandQueue;
use crate::timer::{TimerKind, Timers};
use crate::transport::{Connector, EventSender, Transport, TransportEvent};
use crate::value::Value;

/// Period of the wait-timeout sweep.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Connections that lived at least this long are retried immediately;
/// shorter-lived ones wait this long before the next attempt.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Receives the outcome of connection attempts until the first success.
pub type ConnectCallback = Box<dyn FnMut(ClientResult<()>) + Send>;

/// Point-in-time view of the session flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// A connection exists and has reached the established state.
    pub connected: bool,
    /// A request is on the wire and unanswered.
    pub waiting: bool,
    /// The connection is in pub/sub streaming mode.
    pub subscribed: bool,
    /// Commands queued, including the one in flight.
    pub queued: usize,
    /// Database re-selected after each connection.
    pub db: u32,
    /// Text of the last recorded failure.
    pub last_error: Option<String>,
}

/// Command pipeline and connection lifecycle for one server.
pub(crate) struct Session<C: Connector> {
    config: ClientConfig,
    connector: C,
    events: EventSender,
    connection: Option<Box<dyn Transport>>,
    established: bool,
    generation: u64,
    attempt_started: Instant,
    queue: CommandQueue,
    timers: Timers,
    waiting: bool,
    subscribed: bool,
    db: u32,
    auth: Option<Credential>,
    last_error: Option<String>,
    first_connect: bool,
    on_connect: Option<ConnectCallback>,
}

impl<C: Connector> Session<C> {
    /// Creates an idle session and arms the wait-timeout sweep.
    ///
    /// No connection is attempted until `connect` is called.
    pub fn new(
        config: ClientConfig,
        connector: C,
        events: EventSender,
        on_connect: Option<ConnectCallback>,
        now: Instant,
    ) -> Self {
        let mut timers = Timers::new();
        timers.schedule_every(TimerKind::WaitSweep, now, SWEEP_INTERVAL);
        Session {
            db: config.db,
            auth: config.auth.clone(),
            config,
            connector,
            events,
            connection: None,
            established: false,
            generation: 0,
            attempt_started: now,
            queue: CommandQueue::new(),
            timers,
            waiting: true,
            subscribed: false,
            last_error: None,
            first_connect: true,
            on_connect,
        }
    }

    /// Appends a command and tries to transmit.
    pub fn enqueue(&mut self, command: Command) {
        debug!(command = %command.name_lossy(), queued = self.queue.len(), "enqueue");
        self.queue.enqueue(command);
        self.process();
    }

    /// Transmits the queue head when the pipeline is idle.
    pub fn process(&mut self) {
        if self.waiting || self.subscribed || !self.established {
            return;
        }
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return,
        };
        let head = match self.queue.peek_front() {
            Some(head) => head,
            None => return,
        };

        if head.is_subscribe() {
            // Last request/response send on this connection.
            self.subscribed = true;
        }
        self.waiting = true;
        self.last_error = None;
        debug!(generation = self.generation, command = %head.name_lossy(), "send");
        connection.send(head.args());
    }

    /// Opens a connection unless one already exists.
    pub fn connect(&mut self, now: Instant) {
        if self.connection.is_some() {
            return;
        }
        self.generation += 1;
        self.attempt_started = now;
        self.established = false;
        self.waiting = true;
        info!(addr = %self.config.addr, generation = self.generation, "connecting");

        let transport = self.connector.connect(self.generation, self.events.clone());
        self.connection = Some(transport);
        self.timers.schedule(
            TimerKind::ConnectTimeout,
            now,
            self.config.connect_timeout(),
        );
    }

    /// Feeds one transport notification into the state machine.
    pub fn handle_event(&mut self, generation: u64, event: TransportEvent, now: Instant) {
        if generation != self.generation || self.connection.is_none() {
            debug!(generation, current = self.generation, "ignoring stale transport event");
            return;
        }
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Error(message) => self.on_error(&message, now),
            TransportEvent::Closed => self.on_closed(now),
            TransportEvent::Message(reply) => self.on_reply(reply, now),
        }
    }

    /// Runs every timer whose deadline has passed.
    pub fn fire_timers(&mut self, now: Instant) {
        for kind in self.timers.take_due(now) {
            match kind {
                TimerKind::ConnectTimeout => self.on_connect_timeout(now),
                TimerKind::ReconnectDelay => self.connect(now),
                TimerKind::WaitSweep => self.sweep(now),
            }
        }
    }

    /// Earliest armed timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Tears down the current connection without scheduling a retry.
    pub fn close_connection(&mut self) {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => return,
        };
        self.subscribed = false;
        self.established = false;
        // Nothing may be written until the next connection reports Connected.
        self.waiting = true;
        connection.close();
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::ReconnectDelay);
        debug!(generation = self.generation, "connection closed");
    }

    /// Closes the connection and discards every queued command.
    ///
    /// Discarded callers observe `ClientError::Closed`. Calling it again is a
    /// no-op.
    pub fn close(&mut self) {
        self.close_connection();
        self.timers.cancel(TimerKind::ReconnectDelay);
        let dropped = self.queue.clear();
        if dropped > 0 {
            info!(dropped, "closed with pending commands");
        }
    }

    /// Final teardown when the session task exits.
    pub fn shutdown(&mut self) {
        self.close();
        self.timers.cancel_all();
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.established
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Database re-selected after every future connection.
    pub fn set_db(&mut self, db: u32) {
        self.db = db;
    }

    /// Credential re-sent after every future connection.
    pub fn set_auth(&mut self, credential: Option<Credential>) {
        self.auth = credential;
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connected: self.is_connected(),
            waiting: self.waiting,
            subscribed: self.subscribed,
            queued: self.queue.len(),
            db: self.db,
            last_error: self.last_error.clone(),
        }
    }

    fn on_connected(&mut self) {
        self.established = true;
        self.waiting = false;
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::ReconnectDelay);

        // Prepended in reverse so the queue starts AUTH, SELECT, ...
        if self.db != 0 {
            self.queue.enqueue_front(Command::new(vec![
                Bytes::from_static(b"SELECT"),
                Bytes::from(self.db.to_string()),
            ]));
        }
        if let Some(credential) = &self.auth {
            let mut args = vec![Bytes::from_static(b"AUTH")];
            args.extend(credential.to_args());
            self.queue.enqueue_front(Command::new(args));
        }

        info!(
            addr = %self.config.addr,
            generation = self.generation,
            queued = self.queue.len(),
            "connected"
        );
        self.process();

        if self.first_connect {
            self.first_connect = false;
            self.notify_connect(Ok(()));
        }
    }

    fn on_error(&mut self, message: &str, now: Instant) {
        if self.established {
            warn!(generation = self.generation, error = message, "connection error");
            return;
        }
        let elapsed = now.saturating_duration_since(self.attempt_started);
        let text = format!(
            "connection failed ({:.3} seconds): {}",
            elapsed.as_secs_f64(),
            message
        );
        self.last_error = Some(text.clone());
        if self.first_connect {
            self.notify_connect(Err(ClientError::ConnectFailure(text)));
        } else {
            warn!(addr = %self.config.addr, error = %text, "reconnect attempt failed");
        }
    }

    fn on_closed(&mut self, now: Instant) {
        self.subscribed = false;
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::ReconnectDelay);
        self.close_connection();

        let lived = now.saturating_duration_since(self.attempt_started);
        if lived > RECONNECT_DELAY {
            info!(addr = %self.config.addr, "connection dropped; reconnecting");
            self.connect(now);
        } else {
            warn!(
                addr = %self.config.addr,
                delay_secs = RECONNECT_DELAY.as_secs(),
                "connection closed early; delaying reconnect"
            );
            self.timers
                .schedule(TimerKind::ReconnectDelay, now, RECONNECT_DELAY);
        }
    }

    fn on_connect_timeout(&mut self, now: Instant) {
        if self.is_connected() {
            return;
        }
        self.close_connection();
        let text = format!(
            "connection to {} timeout ({} seconds)",
            self.config.addr, self.config.connect_timeout
        );
        self.last_error = Some(text.clone());
        if self.first_connect {
            self.notify_connect(Err(ClientError::ConnectTimeout(text)));
        } else {
            warn!(error = %text, "connect timeout");
        }
        self.timers
            .schedule(TimerKind::ReconnectDelay, now, RECONNECT_DELAY);
    }

    fn on_reply(&mut self, reply: Reply, now: Instant) {
        self.last_error = None;
        self.waiting = false;

        if self.queue.is_empty() {
            warn!(generation = self.generation, reply = ?reply, "reply with no pending command");
            if reply.is_fatal() {
                self.force_reconnect(now);
            }
            return;
        }

        let fatal = reply.is_fatal();
        let result = if reply.is_failure() {
            let text = reply.error_text().unwrap_or_default();
            self.last_error = Some(text.clone());
            if fatal {
                Err(ClientError::FatalProtocol(text))
            } else {
                Err(ClientError::Protocol(text))
            }
        } else if reply.is_ok_status() {
            Ok(Value::Bool(true))
        } else {
            Ok(Value::from_reply(reply))
        };

        if self.subscribed {
            if let Some(head) = self.queue.front_mut() {
                head.deliver(result);
            }
        } else if let Some(command) = self.queue.pop_front() {
            debug!(command = %command.name_lossy(), ok = result.is_ok(), "reply");
            if !command.has_responder() {
                if let Err(err) = &result {
                    error!(command = %command.name_lossy(), error = %err, "command failed");
                }
            }
            command.complete(result);
        }

        if fatal {
            self.force_reconnect(now);
        } else {
            self.process();
        }
    }

    fn sweep(&mut self, now: Instant) {
        if self.queue.is_empty() {
            return;
        }
        if self.subscribed {
            // Subscriptions never have a reply deadline.
            self.timers.cancel(TimerKind::WaitSweep);
            return;
        }

        let protect_head = self
            .queue
            .peek_front()
            .map_or(false, |head| head.is_blocking_pop());
        let evicted = self
            .queue
            .evict_expired(now, self.config.wait_timeout(), protect_head);
        if evicted.is_empty() {
            return;
        }

        let seconds = self.config.wait_timeout;
        for command in evicted {
            warn!(command = %command.name_lossy(), timeout_secs = seconds, "wait timeout");
            if command.has_responder() {
                self.last_error = Some(format!("wait timeout ({seconds} seconds)"));
            }
            command.complete(Err(ClientError::WaitTimeout(seconds)));
        }
        if !protect_head {
            self.force_reconnect(now);
        }
    }

    fn force_reconnect(&mut self, now: Instant) {
        self.close_connection();
        self.connect(now);
    }

    fn notify_connect(&mut self, result: ClientResult<()>) {
        if let Err(err) = &result {
            warn!(error = %err, "initial connection failed");
        }
        if let Some(callback) = self.on_connect.as_mut() {
            guarded("connect", || callback(result));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Responder;
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, oneshot};

    #[derive(Debug, Default)]
    struct Wire {
        // (generation, frame) for every send.
        sent: Vec<(u64, Vec<String>)>,
        connects: u64,
        closes: u64,
    }

    #[derive(Clone, Default)]
    struct RecordingConnector {
        wire: Arc<Mutex<Wire>>,
    }

    struct RecordingTransport {
        generation: u64,
        wire: Arc<Mutex<Wire>>,
    }

    impl Transport for RecordingTransport {
        fn send(&mut self, args: &[Bytes]) {
            let frame = args
                .iter()
                .map(|arg| String::from_utf8_lossy(arg).into_owned())
                .collect();
            self.wire.lock().unwrap().sent.push((self.generation, frame));
        }

        fn close(&mut self) {
            self.wire.lock().unwrap().closes += 1;
        }
    }

    impl Connector for RecordingConnector {
        fn connect(&mut self, generation: u64, _events: EventSender) -> Box<dyn Transport> {
            self.wire.lock().unwrap().connects += 1;
            Box::new(RecordingTransport {
                generation,
                wire: self.wire.clone(),
            })
        }
    }

    struct Harness {
        session: Session<RecordingConnector>,
        wire: Arc<Mutex<Wire>>,
        start: Instant,
        _events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    }

    impl Harness {
        fn new(config: ClientConfig) -> Self {
            Self::with_callback(config, None)
        }

        fn with_callback(config: ClientConfig, callback: Option<ConnectCallback>) -> Self {
            let connector = RecordingConnector::default();
            let wire = connector.wire.clone();
            let (tx, rx) = mpsc::unbounded_channel();
            let start = Instant::now();
            let session = Session::new(config, connector, tx, callback, start);
            Harness {
                session,
                wire,
                start,
                _events: rx,
            }
        }

        fn at(&self, secs: u64) -> Instant {
            self.start + Duration::from_secs(secs)
        }

        fn connect(&mut self, secs: u64) {
            let now = self.at(secs);
            self.session.connect(now);
            let generation = self.session.generation();
            self.session
                .handle_event(generation, TransportEvent::Connected, now);
        }

        fn event(&mut self, event: TransportEvent, secs: u64) {
            let generation = self.session.generation();
            self.session.handle_event(generation, event, self.at(secs));
        }

        fn reply(&mut self, reply: Reply) {
            self.event(TransportEvent::Message(reply), 0);
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.wire
                .lock()
                .unwrap()
                .sent
                .iter()
                .map(|(_, frame)| frame.clone())
                .collect()
        }

        fn connects(&self) -> u64 {
            self.wire.lock().unwrap().connects
        }

        fn call(&mut self, name: &str, args: &[&str]) -> oneshot::Receiver<ClientResult<Value>> {
            self.call_at(name, args, self.start)
        }

        fn call_at(
            &mut self,
            name: &str,
            args: &[&str],
            at: Instant,
        ) -> oneshot::Receiver<ClientResult<Value>> {
            let (tx, rx) = oneshot::channel();
            let params: Vec<Bytes> = args
                .iter()
                .map(|arg| Bytes::copy_from_slice(arg.as_bytes()))
                .collect();
            let command = Command::from_parts(name, params)
                .with_responder(Responder::Reply(tx))
                .queued_at(at);
            self.session.enqueue(command);
            rx
        }
    }

    fn bulk(data: &'static str) -> Reply {
        Reply::Bulk(Some(Bytes::from_static(data.as_bytes())))
    }

    fn frame(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn replies_resolve_in_submission_order() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let mut a = h.call("get", &["a"]);
        let mut b = h.call("get", &["b"]);
        let mut c = h.call("get", &["c"]);

        h.reply(bulk("1"));
        h.reply(bulk("2"));
        h.reply(bulk("3"));

        assert_eq!(a.try_recv().unwrap().unwrap(), Value::Data(Bytes::from_static(b"1")));
        assert_eq!(b.try_recv().unwrap().unwrap(), Value::Data(Bytes::from_static(b"2")));
        assert_eq!(c.try_recv().unwrap().unwrap(), Value::Data(Bytes::from_static(b"3")));
        assert_eq!(
            h.sent(),
            vec![frame(&["GET", "a"]), frame(&["GET", "b"]), frame(&["GET", "c"])]
        );
    }

    #[test]
    fn second_command_waits_for_first_reply() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let _a = h.call("SET", &["k", "v"]);
        let _b = h.call("GET", &["k"]);

        assert_eq!(h.sent(), vec![frame(&["SET", "k", "v"])]);
        assert!(h.session.status().waiting);
        assert_eq!(h.session.status().queued, 2);

        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        assert_eq!(h.sent().len(), 2);
        assert_eq!(h.sent()[1], frame(&["GET", "k"]));
    }

    #[test]
    fn commands_queue_until_connected() {
        let mut h = Harness::new(ClientConfig::default());
        let _a = h.call("PING", &[]);
        assert!(h.sent().is_empty());

        h.connect(0);
        assert_eq!(h.sent(), vec![frame(&["PING"])]);
    }

    #[test]
    fn affirmative_status_becomes_true() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let mut ok = h.call("SET", &["k", "v"]);
        let mut pong = h.call("PING", &[]);
        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        h.reply(Reply::Status(Bytes::from_static(b"PONG")));

        assert_eq!(ok.try_recv().unwrap().unwrap(), Value::Bool(true));
        assert_eq!(pong.try_recv().unwrap().unwrap(), Value::Status("PONG".into()));
    }

    #[test]
    fn error_reply_fails_caller_and_records_text() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let mut rx = h.call("INCR", &["k"]);
        let _next = h.call("GET", &["k"]);
        h.reply(Reply::Error(Bytes::from_static(b"ERR not an integer")));

        match rx.try_recv().unwrap() {
            Err(ClientError::Protocol(text)) => assert_eq!(text, "ERR not an integer"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.session.last_error(), Some("ERR not an integer"));
        // Pipeline keeps going.
        assert_eq!(h.sent().len(), 2);
    }

    #[test]
    fn fatal_reply_forces_reconnect() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let mut rx = h.call("GET", &["k"]);
        let _queued = h.call("GET", &["other"]);
        h.reply(Reply::fatal("protocol error: unknown reply type"));

        assert!(matches!(rx.try_recv().unwrap(), Err(ClientError::FatalProtocol(_))));
        assert_eq!(h.connects(), 2);
        assert_eq!(h.session.generation(), 2);
        assert!(!h.session.is_connected());
        // Nothing is sent until the new connection is established.
        assert_eq!(h.sent().len(), 1);

        let generation = h.session.generation();
        h.session
            .handle_event(generation, TransportEvent::Connected, h.at(0));
        assert_eq!(h.sent()[1], frame(&["GET", "other"]));
    }

    #[test]
    fn dropped_caller_does_not_stall_pipeline() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        drop(h.call("GET", &["a"]));
        let mut b = h.call("GET", &["b"]);
        h.reply(bulk("1"));
        h.reply(bulk("2"));
        assert_eq!(b.try_recv().unwrap().unwrap(), Value::Data(Bytes::from_static(b"2")));
    }

    #[test]
    fn panicking_handler_does_not_stall_pipeline() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let command = Command::from_parts("GET", vec![Bytes::from_static(b"a")])
            .with_responder(Responder::Stream(Box::new(|_| panic!("handler bug"))));
        h.session.enqueue(command);
        let mut b = h.call("GET", &["b"]);

        h.reply(bulk("1"));
        assert_eq!(h.sent().len(), 2);
        h.reply(bulk("2"));
        assert!(b.try_recv().unwrap().is_ok());
    }

    #[test]
    fn reinjects_auth_then_select_on_every_connection() {
        let config = ClientConfig::default()
            .with_db(3)
            .with_auth(Credential::Password("secret".into()));
        let mut h = Harness::new(config);
        let _user = h.call("GET", &["k"]);
        h.connect(0);

        assert_eq!(h.sent(), vec![frame(&["AUTH", "secret"])]);
        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        assert_eq!(
            h.sent(),
            vec![
                frame(&["AUTH", "secret"]),
                frame(&["SELECT", "3"]),
                frame(&["GET", "k"]),
            ]
        );

        // Drop mid-flight: the unanswered GET is retried behind AUTH/SELECT.
        h.event(TransportEvent::Closed, 10);
        assert_eq!(h.connects(), 2);
        let generation = h.session.generation();
        h.session
            .handle_event(generation, TransportEvent::Connected, h.at(10));
        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        let sent = h.sent();
        assert_eq!(
            &sent[3..],
            &[
                frame(&["AUTH", "secret"]),
                frame(&["SELECT", "3"]),
                frame(&["GET", "k"]),
            ]
        );
    }

    #[test]
    fn subscription_replies_never_pop_the_queue() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let events = Arc::new(Mutex::new(0usize));
        let seen = events.clone();
        let subscribe = Command::from_parts("SUBSCRIBE", vec![Bytes::from_static(b"news")])
            .with_responder(Responder::Stream(Box::new(move |_| {
                *seen.lock().unwrap() += 1;
            })));
        h.session.enqueue(subscribe);
        let _regular = h.call("GET", &["k"]);

        let message = || {
            Reply::Array(Some(vec![bulk("message"), bulk("news"), bulk("hello")]))
        };
        h.reply(Reply::Array(Some(vec![bulk("subscribe"), bulk("news"), Reply::Integer(1)])));
        for _ in 0..3 {
            h.reply(message());
        }

        let status = h.session.status();
        assert!(status.subscribed);
        assert_eq!(status.queued, 2);
        assert_eq!(*events.lock().unwrap(), 4);
        assert_eq!(h.sent(), vec![frame(&["SUBSCRIBE", "news"])]);
    }

    #[test]
    fn close_resets_streaming_mode() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let subscribe = Command::from_parts("SUBSCRIBE", vec![Bytes::from_static(b"news")])
            .with_responder(Responder::Stream(Box::new(|_| {})));
        h.session.enqueue(subscribe);
        assert!(h.session.status().subscribed);

        h.event(TransportEvent::Closed, 1);
        assert!(!h.session.status().subscribed);
    }

    #[test]
    fn wait_timeout_evicts_and_reconnects() {
        let mut h = Harness::new(ClientConfig::default().with_wait_timeout(1));
        h.connect(0);
        let start = h.at(0);
        let mut stale = h.call_at("GET", &["k"], start);

        h.session.fire_timers(h.at(1));
        assert!(stale.try_recv().is_err());

        h.session.fire_timers(h.at(2));
        assert!(matches!(
            stale.try_recv().unwrap(),
            Err(ClientError::WaitTimeout(1))
        ));
        assert_eq!(h.session.status().queued, 0);
        assert_eq!(h.connects(), 2);
        assert_eq!(h.session.last_error(), Some("wait timeout (1 seconds)"));
    }

    #[test]
    fn blocking_pop_head_is_exempt_from_wait_timeout() {
        let mut h = Harness::new(ClientConfig::default().with_wait_timeout(1));
        h.connect(0);
        let start = h.at(0);
        let mut blpop = h.call_at("BLPOP", &["jobs", "0"], start);
        let mut behind = h.call_at("GET", &["k"], start);

        h.session.fire_timers(h.at(2));
        assert!(blpop.try_recv().is_err());
        assert!(matches!(
            behind.try_recv().unwrap(),
            Err(ClientError::WaitTimeout(1))
        ));
        assert_eq!(h.session.status().queued, 1);
        // The protected head stays on the same connection.
        assert_eq!(h.connects(), 1);
    }

    #[test]
    fn sweep_stops_once_subscribed() {
        let mut h = Harness::new(ClientConfig::default().with_wait_timeout(1));
        h.connect(0);
        let subscribe = Command::from_parts("SUBSCRIBE", vec![Bytes::from_static(b"news")])
            .with_responder(Responder::Stream(Box::new(|_| {})))
            .queued_at(h.at(0));
        h.session.enqueue(subscribe);

        h.session.fire_timers(h.at(5));
        assert_eq!(h.session.status().queued, 1);
        assert!(!h.session.timers.is_armed(TimerKind::WaitSweep));
        assert_eq!(h.session.next_deadline(), None);
    }

    #[test]
    fn short_lived_connection_waits_before_retry() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        h.event(TransportEvent::Closed, 2);

        assert_eq!(h.connects(), 1);
        assert!(h.session.timers.is_armed(TimerKind::ReconnectDelay));
        h.session.fire_timers(h.at(6));
        assert_eq!(h.connects(), 1);
        h.session.fire_timers(h.at(7));
        assert_eq!(h.connects(), 2);
    }

    #[test]
    fn long_lived_connection_retries_immediately() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        h.event(TransportEvent::Closed, 60);
        assert_eq!(h.connects(), 2);
        assert!(!h.session.timers.is_armed(TimerKind::ReconnectDelay));
    }

    #[test]
    fn commands_issued_while_reconnecting_are_sent_once() {
        let config = ClientConfig::default().with_auth(Credential::Password("pw".into()));
        let mut h = Harness::new(config);
        h.connect(0);
        assert_eq!(h.sent(), vec![frame(&["AUTH", "pw"])]);
        h.reply(Reply::Status(Bytes::from_static(b"OK")));

        h.event(TransportEvent::Closed, 60);
        assert_eq!(h.connects(), 2);
        let mut incr = h.call("INCR", &["counter"]);
        let mut get = h.call("GET", &["other"]);
        assert_eq!(h.sent().len(), 1, "nothing goes out before Connected");

        h.event(TransportEvent::Connected, 60);
        let after: Vec<_> = h.sent().into_iter().skip(1).collect();
        assert_eq!(after, vec![frame(&["AUTH", "pw"])]);

        h.reply(Reply::Status(Bytes::from_static(b"OK")));
        h.reply(Reply::Integer(1));
        h.reply(bulk("v"));
        let after: Vec<_> = h.sent().into_iter().skip(1).collect();
        assert_eq!(
            after,
            vec![
                frame(&["AUTH", "pw"]),
                frame(&["INCR", "counter"]),
                frame(&["GET", "other"]),
            ]
        );
        assert_eq!(incr.try_recv().unwrap().unwrap(), Value::Int(1));
        assert_eq!(
            get.try_recv().unwrap().unwrap(),
            Value::Data(Bytes::from_static(b"v"))
        );
        assert_eq!(h.session.status().queued, 0);
    }

    #[test]
    fn close_then_reconnect_waits_for_connected() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        h.session.close();
        h.session.connect(h.at(1));
        let mut ping = h.call("PING", &[]);
        assert!(h.sent().is_empty());

        h.event(TransportEvent::Connected, 1);
        assert_eq!(h.sent(), vec![frame(&["PING"])]);
        h.reply(Reply::Status(Bytes::from_static(b"PONG")));
        assert_eq!(ping.try_recv().unwrap().unwrap(), Value::Status("PONG".into()));
        assert_eq!(h.sent().len(), 1);
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let mut rx = h.call("GET", &["k"]);
        h.event(TransportEvent::Closed, 60);
        let old = h.session.generation() - 1;

        h.session.handle_event(
            old,
            TransportEvent::Message(bulk("late")),
            h.at(60),
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(h.session.status().queued, 1);
    }

    #[test]
    fn first_connection_failure_reaches_callback_once() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let callback: ConnectCallback = Box::new(move |result| {
            sink.lock().unwrap().push(result.is_ok());
        });
        let mut h = Harness::with_callback(ClientConfig::default(), Some(callback));

        h.session.connect(h.at(0));
        h.event(TransportEvent::Error("connection refused".into()), 0);
        h.event(TransportEvent::Closed, 0);
        assert_eq!(*outcomes.lock().unwrap(), vec![false]);
        assert!(h.session.last_error().unwrap().starts_with("connection failed"));

        h.session.fire_timers(h.at(5));
        let generation = h.session.generation();
        h.session
            .handle_event(generation, TransportEvent::Connected, h.at(5));
        assert_eq!(*outcomes.lock().unwrap(), vec![false, true]);

        // Later failures are only logged.
        h.event(TransportEvent::Closed, 6);
        h.session.fire_timers(h.at(11));
        h.event(TransportEvent::Error("connection refused".into()), 11);
        assert_eq!(*outcomes.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn connect_watchdog_times_out_and_retries() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let callback: ConnectCallback = Box::new(move |result| {
            sink.lock().unwrap().push(result.map_err(|err| err.to_string()));
        });
        let config = ClientConfig::new("10.255.255.1:6379").with_connect_timeout(2);
        let mut h = Harness::with_callback(config, Some(callback));

        h.session.connect(h.at(0));
        h.session.fire_timers(h.at(2));

        let outcomes = outcomes.lock().unwrap().clone();
        assert_eq!(
            outcomes,
            vec![Err("connection to 10.255.255.1:6379 timeout (2 seconds)".to_string())]
        );
        assert!(h.session.connection.is_none());
        assert!(h.session.timers.is_armed(TimerKind::ReconnectDelay));

        h.session.fire_timers(h.at(7));
        assert_eq!(h.connects(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let mut h = Harness::new(ClientConfig::default());
        h.connect(0);
        let mut rx = h.call("GET", &["k"]);
        let _other = h.call("GET", &["j"]);

        h.session.close();
        assert_eq!(h.session.status().queued, 0);
        assert!(h.session.connection.is_none());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));

        h.session.close();
        assert_eq!(h.session.status().queued, 0);
        assert!(h.session.connection.is_none());
        assert_eq!(h.wire.lock().unwrap().closes, 1);
    }
}
