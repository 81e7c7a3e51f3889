//! Physical V8DP connection.
//!
//! One socket per debug port. A reader task decodes frames, tracks the
//! debuggee's `running` state and fans every response and event out to all
//! subscribers. Once the socket closes the connection is permanently
//! disconnected and keeps the reason.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::error::V8Error;
use crate::protocol::{classify, running_hint, Event, Message, Request, Response};
use crate::transport::{encode_frame, FrameDecoder};

const READ_CHUNK: usize = 16 * 1024;

/// Reason reported after [`Connection::close`].
pub const CLOSED_BY_CLIENT: &str = "connection closed";

/// Lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The socket is open.
    Connected,
    /// The socket is gone; carries the reason.
    Disconnected(String),
}

/// What a subscriber receives from the reader task.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A response to some request sent over this connection.
    Response(Response),
    /// A debuggee event.
    Event(Event),
    /// A response to `request_seq` that could not be decoded.
    Unreadable {
        /// Sequence number of the request it answers.
        request_seq: i64,
        /// Decode error.
        reason: String,
    },
    /// The connection closed; always the last item.
    Closed(String),
}

struct Inner {
    addr: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    next_seq: AtomicI64,
    running: AtomicBool,
    state: watch::Sender<ConnectionState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Inbound>>>,
}

/// A shared handle to one debuggee socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl Connection {
    /// Open a socket to `host:port` and start the reader task.
    ///
    /// # Errors
    ///
    /// Returns `V8Error::Disconnected` when the socket cannot be opened.
    pub async fn connect(host: &str, port: u16) -> Result<Self, V8Error> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| V8Error::Disconnected(format!("cannot connect to {addr}: {e}")))?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let (state, _) = watch::channel(ConnectionState::Connected);
        let inner = Arc::new(Inner {
            addr,
            writer: tokio::sync::Mutex::new(writer),
            next_seq: AtomicI64::new(1),
            running: AtomicBool::new(true),
            state,
            subscribers: Mutex::new(Vec::new()),
        });

        tracing::info!(addr = %inner.addr, "connected to debuggee");
        tokio::spawn(read_loop(reader, inner.clone()));
        Ok(Self { inner })
    }

    /// `host:port` this connection was opened to.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Receive every response and event from now on.
    ///
    /// A subscriber added after the connection closed receives a single
    /// [`Inbound::Closed`].
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = match self.inner.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.state() {
            ConnectionState::Connected => subscribers.push(tx),
            ConnectionState::Disconnected(reason) => {
                let _ = tx.send(Inbound::Closed(reason));
            }
        }
        rx
    }

    /// Allocate the next sequence number.
    pub fn next_seq(&self) -> i64 {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Write one request frame.
    ///
    /// # Errors
    ///
    /// Returns `V8Error::Disconnected` with the cached reason when the
    /// connection is closed or the write fails.
    pub async fn write(&self, request: &Request<'_>) -> Result<(), V8Error> {
        if let Some(reason) = self.disconnect_reason() {
            return Err(V8Error::Disconnected(reason));
        }
        let frame = encode_frame(&request.to_value());
        tracing::trace!(seq = request.seq, command = request.command, "v8dp >>");
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.write_all(&frame).await {
            let reason = format!("write to {} failed: {e}", self.inner.addr);
            self.inner.state.send_if_modified(|state| mark_disconnected(state, &reason));
            return Err(V8Error::Disconnected(reason));
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Whether the socket is still open.
    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.state.borrow(), ConnectionState::Connected)
    }

    /// The cached reason once disconnected.
    pub fn disconnect_reason(&self) -> Option<String> {
        match &*self.inner.state.borrow() {
            ConnectionState::Connected => None,
            ConnectionState::Disconnected(reason) => Some(reason.clone()),
        }
    }

    /// Whether the debuggee last reported itself as running.
    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Wait until the connection is disconnected and return the reason.
    pub async fn closed(&self) -> String {
        let mut rx = self.inner.state.subscribe();
        loop {
            if let ConnectionState::Disconnected(reason) = &*rx.borrow_and_update() {
                return reason.clone();
            }
            if rx.changed().await.is_err() {
                return CLOSED_BY_CLIENT.to_string();
            }
        }
    }

    /// Close the socket. Subscribers receive [`Inbound::Closed`].
    pub fn close(&self) {
        let changed = self
            .inner
            .state
            .send_if_modified(|state| mark_disconnected(state, CLOSED_BY_CLIENT));
        if changed {
            tracing::info!(addr = %self.inner.addr, "closing debuggee connection");
        }
    }
}

fn mark_disconnected(state: &mut ConnectionState, reason: &str) -> bool {
    match state {
        ConnectionState::Connected => {
            *state = ConnectionState::Disconnected(reason.to_string());
            true
        }
        ConnectionState::Disconnected(_) => false,
    }
}

async fn read_loop(mut reader: OwnedReadHalf, inner: Arc<Inner>) {
    let mut state_rx = inner.state.subscribe();
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        tokio::select! {
            changed = state_rx.changed() => {
                let state = state_rx.borrow_and_update().clone();
                match (changed, state) {
                    (_, ConnectionState::Disconnected(reason)) => break reason,
                    (Err(_), _) => break CLOSED_BY_CLIENT.to_string(),
                    (Ok(()), ConnectionState::Connected) => continue,
                }
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break "debuggee closed the connection".to_string(),
                Ok(n) => {
                    decoder.push(&chunk[..n]);
                    while let Some(frame) = decoder.next_frame() {
                        match frame {
                            Ok(value) => handle_frame(&inner, value),
                            Err(e) => tracing::warn!(addr = %inner.addr, "dropping frame: {e}"),
                        }
                    }
                }
                Err(e) => break format!("read from {} failed: {e}", inner.addr),
            },
        }
    };

    inner.state.send_if_modified(|state| mark_disconnected(state, &reason));
    inner.running.store(false, Ordering::Release);
    tracing::info!(addr = %inner.addr, %reason, "debuggee connection closed");

    {
        let mut writer = inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    let subscribers = match inner.subscribers.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    for tx in subscribers {
        let _ = tx.send(Inbound::Closed(reason.clone()));
    }
}

fn handle_frame(inner: &Inner, value: Value) {
    tracing::trace!(addr = %inner.addr, "v8dp << {value}");
    if let Some(running) = running_hint(&value) {
        inner.running.store(running, Ordering::Release);
    }
    let inbound = match classify(value) {
        Ok(Some(Message::Response(response))) => Inbound::Response(response),
        Ok(Some(Message::Event(event))) => Inbound::Event(event),
        Ok(Some(Message::Unreadable {
            request_seq,
            reason,
        })) => {
            tracing::warn!(addr = %inner.addr, request_seq, "{reason}");
            Inbound::Unreadable {
                request_seq,
                reason,
            }
        }
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(addr = %inner.addr, "dropping frame: {e}");
            return;
        }
    };
    let mut subscribers = match inner.subscribers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    subscribers.retain(|tx| tx.send(inbound.clone()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn connect_refused_reports_disconnected() {
        let (listener, port) = listener().await;
        drop(listener);
        let err = Connection::connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, V8Error::Disconnected(_)));
    }

    #[tokio::test]
    async fn frames_fan_out_and_update_running() {
        let (listener, port) = listener().await;
        let conn = Connection::connect("127.0.0.1", port).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let mut a = conn.subscribe();
        let mut b = conn.subscribe();
        assert!(conn.running());

        peer.write_all(b"Type: connect\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        peer.write_all(&encode_frame(&json!({
            "seq": 1, "type": "event", "event": "break", "body": {}
        })))
        .await
        .unwrap();

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                Inbound::Event(event) => assert_eq!(event.event, "break"),
                other => panic!("expected event, got {other:?}"),
            }
        }
        assert!(!conn.running());

        peer.write_all(&encode_frame(&json!({
            "seq": 2, "type": "response", "request_seq": 1, "success": true, "running": true
        })))
        .await
        .unwrap();
        assert!(matches!(a.recv().await.unwrap(), Inbound::Response(_)));
        assert!(conn.running());
    }

    #[tokio::test]
    async fn peer_close_is_terminal() {
        let (listener, port) = listener().await;
        let conn = Connection::connect("127.0.0.1", port).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let mut rx = conn.subscribe();

        drop(peer);
        match rx.recv().await.unwrap() {
            Inbound::Closed(reason) => assert!(reason.contains("closed")),
            other => panic!("expected close, got {other:?}"),
        }
        assert!(!conn.is_connected());

        let err = conn
            .write(&Request::new(conn.next_seq(), "version", None))
            .await
            .unwrap_err();
        assert!(matches!(err, V8Error::Disconnected(_)));

        let mut late = conn.subscribe();
        assert!(matches!(late.recv().await.unwrap(), Inbound::Closed(_)));
    }

    #[tokio::test]
    async fn close_notifies_subscribers_and_peer() {
        let (listener, port) = listener().await;
        let conn = Connection::connect("127.0.0.1", port).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        let mut rx = conn.subscribe();

        conn.close();
        assert_eq!(conn.closed().await, CLOSED_BY_CLIENT);
        assert!(matches!(rx.recv().await.unwrap(), Inbound::Closed(ref r) if r == CLOSED_BY_CLIENT));

        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requests_are_framed_with_increasing_seq() {
        let (listener, port) = listener().await;
        let conn = Connection::connect("127.0.0.1", port).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let first = conn.next_seq();
        let second = conn.next_seq();
        assert!(second > first);
        conn.write(&Request::new(first, "version", None)).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 256];
        let frame = loop {
            let n = peer.read(&mut buf).await.unwrap();
            decoder.push(&buf[..n]);
            if let Some(frame) = decoder.next_frame() {
                break frame.unwrap();
            }
        };
        assert_eq!(frame["seq"], first);
        assert_eq!(frame["command"], "version");
    }
}
