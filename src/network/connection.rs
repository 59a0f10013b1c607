//! Duplex Connection
//!
//! One long-lived WebSocket to the game server. A reader task hands every
//! inbound text frame to the registered listeners and then to the oldest
//! queued waiter; a writer task owns the sink and transmits outbound text and
//! the close frame.
//!
//! The server keeps exactly one session per connection, so nothing here
//! reconnects: once the connection reaches `Closed` or `Errored` it stays there.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use super::close::{close_frame, CloseInfo, CloseReason};

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// `connect()` has not been called.
    Unconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Ready to send and receive.
    Open,
    /// We sent a close frame and wait for the peer.
    Closing,
    /// Close handshake finished (either side initiated it).
    Closed,
    /// Transport failed or vanished without a close handshake.
    Errored,
}

impl ConnectionState {
    /// `Closed` and `Errored` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Errored)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Unconnected, Connecting)
                | (Connecting, Open)
                | (Connecting, Errored)
                | (Open, Closing)
                | (Open, Closed)
                | (Open, Errored)
                | (Closing, Closed)
                | (Closing, Errored)
        )
    }

    /// Upper-case name, as shown in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "UNCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Errored => "ERRORED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// Operation needs an open connection.
    #[error("connection is not open (state = {0})")]
    NotConnected(ConnectionState),

    /// `connect()` was already called on this connection.
    #[error("connection already started (state = {0})")]
    AlreadyStarted(ConnectionState),

    /// Transport failed before the connection opened.
    #[error("couldn't open connection: {0}")]
    ConnectFailed(String),

    /// Connection closed while (or before) waiting for a message.
    #[error("connection closed ({0})")]
    Closed(CloseInfo),

    /// Connection was torn down without resolving the waiter.
    #[error("connection dropped")]
    Dropped,
}

/// Observer for every inbound message.
pub type MessageListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer for the end of the connection.
pub type CloseListener = Arc<dyn Fn(&CloseInfo) + Send + Sync>;

type Waiter = oneshot::Sender<Result<String, ConnectionError>>;

/// How the reader (or writer) saw the transport end.
enum Ending {
    /// Peer sent a close frame.
    Frame(CloseInfo),
    /// Stream ended after the close handshake, or without any frame.
    Eof,
    /// Transport error.
    Error(String),
}

struct Inner {
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    waiters: VecDeque<Waiter>,
    listeners: Vec<MessageListener>,
    close_listeners: Vec<CloseListener>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    close_info: Option<CloseInfo>,
}

impl Inner {
    fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        debug!(from = %self.state, to = %next, "connection state changed");
        self.state = next;
        self.state_tx.send_replace(next);
        true
    }

    /// Oldest waiter whose future is still alive. Dropped `Recv` futures give
    /// up their slot.
    fn next_waiter(&mut self) -> Option<Waiter> {
        while let Some(waiter) = self.waiters.pop_front() {
            if !waiter.is_closed() {
                return Some(waiter);
            }
        }
        None
    }
}

struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, text: String) {
        // The waiter is picked before listeners run, so a listener that calls
        // `recv()` gets the next message rather than this one.
        let (listeners, waiter) = {
            let mut inner = self.lock();
            (inner.listeners.clone(), inner.next_waiter())
        };
        debug!("Received: {}", text);

        for listener in &listeners {
            listener(&text);
        }
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(text));
        }
    }

    fn finish(&self, ending: Ending) {
        let (info, waiters, close_listeners) = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            let closing = inner.state == ConnectionState::Closing;
            let (info, next) = match (ending, inner.close_info.clone()) {
                // Peer acknowledged the close frame we sent.
                (Ending::Frame(_), Some(local)) if closing => (local, ConnectionState::Closed),
                (Ending::Frame(peer), _) => (peer, ConnectionState::Closed),
                (Ending::Eof, Some(local)) if closing => (local, ConnectionState::Closed),
                (Ending::Eof, _) => (
                    CloseInfo::abnormal("stream ended without close frame"),
                    ConnectionState::Errored,
                ),
                (Ending::Error(detail), _) => (CloseInfo::abnormal(detail), ConnectionState::Errored),
            };

            inner.close_info = Some(info.clone());
            inner.outgoing = None;
            inner.advance(next);
            (
                info,
                std::mem::take(&mut inner.waiters),
                inner.close_listeners.clone(),
            )
        };

        if info.clean {
            info!(%info, "Connection closed");
        } else {
            warn!(%info, "Connection lost");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(ConnectionError::Closed(info.clone())));
        }
        for listener in &close_listeners {
            listener(&info);
        }
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// A single duplex connection to the game server.
pub struct Connection {
    url: String,
    shared: Arc<Shared>,
}

impl Connection {
    /// Create an unconnected connection to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Unconnected);
        Self {
            url: url.into(),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::Unconnected,
                    state_tx,
                    waiters: VecDeque::new(),
                    listeners: Vec::new(),
                    close_listeners: Vec::new(),
                    outgoing: None,
                    close_info: None,
                }),
            }),
        }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// How the connection ended, once it has.
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.shared.lock().close_info.clone()
    }

    /// Open the transport. Resolves once the WebSocket handshake completes.
    ///
    /// A failure before the connection opened is reported as
    /// [`ConnectionError::ConnectFailed`] and leaves the connection `Errored`.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn connect(&self) -> Result<&Self, ConnectionError> {
        {
            let mut inner = self.shared.lock();
            if !inner.advance(ConnectionState::Connecting) {
                return Err(ConnectionError::AlreadyStarted(inner.state));
            }
        }

        info!("Connecting...");
        match connect_async(self.url.as_str()).await {
            Ok((ws_stream, _response)) => {
                self.attach(ws_stream);
                info!("WebSocket connected");
                Ok(self)
            }
            Err(e) => {
                error!("Failed to connect to server: {}", e);
                let detail = e.to_string();
                let mut inner = self.shared.lock();
                inner.close_info = Some(CloseInfo::abnormal(detail.clone()));
                inner.advance(ConnectionState::Errored);
                Err(ConnectionError::ConnectFailed(detail))
            }
        }
    }

    /// Spawn the reader and writer tasks for an established stream.
    fn attach<S>(&self, ws_stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, mut read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        {
            let mut inner = self.shared.lock();
            inner.outgoing = Some(outgoing_tx);
            inner.advance(ConnectionState::Open);
        }

        let reader = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => reader.deliver(text),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => reader.deliver(text),
                        Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        reader.finish(Ending::Frame(CloseInfo::from_frame(frame.as_ref())));
                        return;
                    }
                    Ok(_) => {}
                    Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => break,
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        reader.finish(Ending::Error(e.to_string()));
                        return;
                    }
                }
            }
            reader.finish(Ending::Eof);
        });

        let writer = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("Failed to send message: {}", e);
                    writer.finish(Ending::Error(e.to_string()));
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Writer loop ended");
        });
    }

    /// Transmit `payload` verbatim as a text frame.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), ConnectionError> {
        let payload = payload.into();
        let inner = self.shared.lock();
        if inner.state != ConnectionState::Open {
            return Err(ConnectionError::NotConnected(inner.state));
        }
        let outgoing = inner
            .outgoing
            .as_ref()
            .ok_or(ConnectionError::NotConnected(inner.state))?;

        debug!("Sending: {}", payload);
        outgoing
            .send(Message::Text(payload))
            .map_err(|_| ConnectionError::NotConnected(inner.state))
    }

    /// Wait for the next inbound message.
    ///
    /// The waiter is queued when `recv` is called, not when the future is first
    /// polled: the K-th call receives the K-th message that arrives after it.
    /// Messages that arrive while no waiter is queued are only seen by
    /// listeners. Code that mixes several `recv` consumers must issue the
    /// calls in the same order as the messages it expects.
    pub fn recv(&self) -> Recv {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.shared.lock();
        match inner.state {
            ConnectionState::Open => inner.waiters.push_back(tx),
            state => {
                let err = match &inner.close_info {
                    Some(info) if state.is_terminal() => ConnectionError::Closed(info.clone()),
                    _ => ConnectionError::NotConnected(state),
                };
                let _ = tx.send(Err(err));
            }
        }
        Recv { rx }
    }

    /// Register an observer for every inbound message, in arrival order.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.lock().listeners.push(Arc::new(listener));
    }

    /// Register an observer for the end of the connection. Called immediately
    /// if the connection has already ended.
    pub fn add_close_listener<F>(&self, listener: F)
    where
        F: Fn(&CloseInfo) + Send + Sync + 'static,
    {
        let info = {
            let mut inner = self.shared.lock();
            if !inner.state.is_terminal() {
                inner.close_listeners.push(Arc::new(listener));
                return;
            }
            inner
                .close_info
                .clone()
                .unwrap_or_else(|| CloseInfo::abnormal("connection dropped"))
        };
        listener(&info);
    }

    /// Start the closing handshake with `reason`. `detail` replaces the
    /// reason's default text.
    ///
    /// Does nothing if the connection is already closing or closed.
    pub fn close(&self, reason: CloseReason, detail: Option<&str>) -> Result<(), ConnectionError> {
        let mut inner = self.shared.lock();
        match inner.state {
            ConnectionState::Open => {}
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Errored => {
                return Ok(());
            }
            state => return Err(ConnectionError::NotConnected(state)),
        }

        let frame = close_frame(reason, detail);
        info!(code = reason.code(), detail = %frame.reason, "Closing connection");
        inner.close_info = Some(CloseInfo::local(reason, detail));
        inner.advance(ConnectionState::Closing);
        if let Some(outgoing) = &inner.outgoing {
            let _ = outgoing.send(Message::Close(Some(frame)));
        }
        Ok(())
    }

    /// Wait until the connection reaches `Closed` or `Errored`.
    pub async fn closed(&self) -> CloseInfo {
        let mut state_rx = self.shared.lock().state_tx.subscribe();
        let _ = state_rx.wait_for(|state| state.is_terminal()).await;
        self.close_info()
            .unwrap_or_else(|| CloseInfo::abnormal("connection dropped"))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Tasks hold the shared state, so an open socket would otherwise outlive us.
        if self.state() == ConnectionState::Open {
            let _ = self.close(CloseReason::Leaving, None);
        }
    }
}

/// Future returned by [`Connection::recv`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Recv {
    rx: oneshot::Receiver<Result<String, ConnectionError>>,
}

impl Future for Recv {
    type Output = Result<String, ConnectionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ConnectionError::Dropped)))
    }
}
