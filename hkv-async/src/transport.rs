//! # Transport Adapter
//!
//! Purpose: A thin facade over a non-blocking connection. The session asks
//! a `Connector` for a `Transport`, writes argument frames into it, and
//! learns what happened through `TransportEvent`s tagged with the
//! connection generation they belong to.
//!
//! ## Design Principles
//! 1. **Events, Not Callbacks**: Notifications flow through a channel into
//!    the session task, which is the only owner of session state.
//! 2. **Generation Tags**: Events from a connection the session already tore
//!    down are recognisable and ignored.
//! 3. **Close Is Silent**: `close()` aborts the connection task; no further
//!    events are emitted for it.

use bytes::{Bytes, BytesMut};
use hkv_resp::{encode_command, Reply, RespParser};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ClientConfig;

/// Notification raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Connected,
    /// The connection failed before (or while) being established.
    Error(String),
    /// The connection is gone; always the last event of a generation.
    Closed,
    /// One decoded reply.
    Message(Reply),
}

/// Sender half used by transports to report events.
pub type EventSender = mpsc::UnboundedSender<(u64, TransportEvent)>;

/// Receiver half drained by the session task.
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

/// One live (or connecting) connection.
pub trait Transport: Send {
    /// Queues one argument frame for transmission.
    fn send(&mut self, args: &[Bytes]);

    /// Tears the connection down without emitting further events.
    fn close(&mut self);
}

/// Opens transports for a session.
pub trait Connector: Send {
    fn connect(&mut self, generation: u64, events: EventSender) -> Box<dyn Transport>;
}

/// Connector backed by tokio TCP sockets.
#[derive(Debug, Clone)]
pub(crate) struct TcpConnector {
    addr: String,
    nodelay: bool,
    read_buffer: usize,
}

impl TcpConnector {
    pub fn from_config(config: &ClientConfig) -> Self {
        TcpConnector {
            addr: config.addr.clone(),
            nodelay: config.nodelay,
            read_buffer: config.read_buffer.max(512),
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, generation: u64, events: EventSender) -> Box<dyn Transport> {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            self.clone(),
            generation,
            events,
            frames_rx,
        ));
        Box::new(TcpTransport {
            frames: frames_tx,
            task,
            encode_buf: BytesMut::with_capacity(256),
        })
    }
}

/// Handle to a connection task.
pub(crate) struct TcpTransport {
    frames: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
    encode_buf: BytesMut,
}

impl Transport for TcpTransport {
    fn send(&mut self, args: &[Bytes]) {
        encode_command(args, &mut self.encode_buf);
        let frame = self.encode_buf.split().freeze();
        if self.frames.send(frame).is_err() {
            // The task already ended; its Closed event is on the way.
            debug!("dropping frame for finished connection task");
        }
    }

    fn close(&mut self) {
        self.task.abort();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    connector: TcpConnector,
    generation: u64,
    events: EventSender,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
) {
    let stream = match TcpStream::connect(&connector.addr).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = events.send((generation, TransportEvent::Error(err.to_string())));
            let _ = events.send((generation, TransportEvent::Closed));
            return;
        }
    };
    if connector.nodelay {
        // Disable Nagle to keep request latency low for small payloads.
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "set_nodelay failed");
        }
    }
    let _ = events.send((generation, TransportEvent::Connected));

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = BytesMut::with_capacity(connector.read_buffer);
    let mut parser = RespParser::new();

    'conn: loop {
        tokio::select! {
            frame = frames.recv() => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => break 'conn,
                };
                if let Err(err) = writer.write_all(&frame).await {
                    warn!(generation, error = %err, "write failed");
                    break 'conn;
                }
            }
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break 'conn,
                    Ok(_) => loop {
                        match parser.parse(&mut buffer) {
                            Ok(Some(reply)) => {
                                let _ = events.send((generation, TransportEvent::Message(reply)));
                            }
                            Ok(None) => break,
                            Err(err) => {
                                warn!(generation, error = %err, "reply stream corrupted");
                                let _ = events.send((
                                    generation,
                                    TransportEvent::Message(Reply::fatal(err.to_string())),
                                ));
                                break 'conn;
                            }
                        }
                    },
                    Err(err) => {
                        warn!(generation, error = %err, "read failed");
                        break 'conn;
                    }
                }
            }
        }
    }

    let _ = events.send((generation, TransportEvent::Closed));
}
