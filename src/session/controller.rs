//! Protocol Controller
//!
//! Owns the connection, performs the `init` handshake and runs the dispatch
//! loop that turns server messages into store updates and replies.
//!
//! The loop is the only consumer of inbound traffic: a listener registered
//! before connecting feeds an ordered inbox, so nothing sent between the
//! handshake and the first dispatch can be missed. Exactly one message is
//! handled at a time. While a request waits for the user, the loop races the
//! answer against the next inbound message; any message other than an
//! unknown kind cancels the request before its own effects apply.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::store::{Cancelled, PendingResponse, Store};
use crate::config::ClientConfig;
use crate::debug::{DebugSink, DebugWhen, TracingSink};
use crate::network::{CloseInfo, CloseReason, Connection, ConnectionError};
use crate::protocol::codec::{decode, encode_reply, CodecError};
use crate::protocol::message::{InitInfo, Reply, RequestKind, ServerMessage, ThreadId};

/// Session-level errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Connection failed or was misused.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Server speaks another protocol version.
    #[error("server speaks API version {got}, client expects {expected}")]
    HandshakeVersionMismatch {
        /// Version this client supports.
        expected: u32,
        /// Version the server reported.
        got: u32,
    },

    /// Server sent text that is not a valid message.
    #[error(transparent)]
    Malformed(#[from] CodecError),

    /// Message kind not allowed at this point.
    #[error("expected `{expected}` message, got `{got}`")]
    UnexpectedMessageKind {
        /// What was allowed.
        expected: String,
        /// What arrived.
        got: String,
    },

    /// Connection ended before the server shut down.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseInfo),

    /// `init()` was never called.
    #[error("session not started")]
    NotStarted,

    /// Session task panicked or was aborted.
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Server sent `shutdown`.
    Shutdown,
    /// The user left.
    Left,
}

/// Outcome of a session.
pub type SessionResult = Result<SessionEnd, ProtocolError>;

enum InboxEvent {
    Message(String),
    Closed(CloseInfo),
}

type HandshakeSlot = watch::Sender<Option<Result<InitInfo, ProtocolError>>>;
type OutcomeSlot = watch::Sender<Option<SessionResult>>;

/// Client session driver.
///
/// The handshake and the dispatch loop run on a spawned task. Callers only
/// wait for results it publishes, so dropping an `init()` or `finished()`
/// future (a timeout, a `select!`) never abandons the session or loses its
/// outcome.
pub struct Controller {
    config: ClientConfig,
    connection: Arc<Connection>,
    store: Arc<Store>,
    sinks: Vec<Arc<dyn DebugSink>>,
    started: AtomicBool,
    handshake: Arc<HandshakeSlot>,
    outcome: Arc<OutcomeSlot>,
}

impl Controller {
    /// Controller for `config`. Nothing happens until [`Controller::init`].
    pub fn new(config: ClientConfig) -> Self {
        let mut sinks: Vec<Arc<dyn DebugSink>> = Vec::new();
        if config.debug_console != DebugWhen::Never {
            sinks.push(Arc::new(TracingSink::new(config.debug_console)));
        }
        let (handshake, _) = watch::channel(None);
        let (outcome, _) = watch::channel(None);
        Self {
            connection: Arc::new(Connection::new(config.server_url.clone())),
            store: Arc::new(Store::new()),
            config,
            sinks,
            started: AtomicBool::new(false),
            handshake: Arc::new(handshake),
            outcome: Arc::new(outcome),
        }
    }

    /// Add a traffic observer. Must be called before `init()`.
    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Shared state and request store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Connect, check the server's `init` and start dispatching.
    ///
    /// Idempotent: concurrent and repeated calls share one handshake and
    /// observe the same outcome.
    pub async fn init(&self) -> Result<InitInfo, ProtocolError> {
        self.start();
        let mut rx = self.handshake.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(result) => Option::clone(&result),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Err(ProtocolError::TaskFailed("handshake task dropped".into())))
    }

    /// Spawn the session task on the first call.
    fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let session = Session {
            api_version: self.config.api_version,
            url: self.config.server_url.clone(),
            connection: Arc::clone(&self.connection),
            store: Arc::clone(&self.store),
            sinks: self.sinks.clone(),
        };
        let handshake = Arc::clone(&self.handshake);
        let outcome = Arc::clone(&self.outcome);

        tokio::spawn(async move {
            let worker = tokio::spawn(session.run(Arc::clone(&handshake)));
            let result = worker
                .await
                .unwrap_or_else(|e| Err(ProtocolError::TaskFailed(e.to_string())));
            if let Err(e) = &result {
                // Task died before the handshake finished.
                handshake.send_if_modified(|slot| {
                    if slot.is_some() {
                        return false;
                    }
                    *slot = Some(Err(e.clone()));
                    true
                });
            }
            outcome.send_replace(Some(result));
        });
    }

    /// Wait for the session to end.
    ///
    /// Returns [`ProtocolError::NotStarted`] if `init()` was never called,
    /// and the handshake error if it failed.
    pub async fn finished(&self) -> SessionResult {
        if !self.started.load(Ordering::Acquire) {
            return Err(ProtocolError::NotStarted);
        }
        let mut rx = self.outcome.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(result) => Option::clone(&result),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Err(ProtocolError::TaskFailed("session task dropped".into())))
    }

    /// `init()` followed by `finished()`.
    pub async fn run(&self) -> SessionResult {
        self.init().await?;
        self.finished().await
    }

    /// Close the connection because the user quits.
    pub fn leave(&self) -> Result<(), ProtocolError> {
        info!("Leaving session");
        self.connection.close(CloseReason::Leaving, None)?;
        Ok(())
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("store", &self.store)
            .finish()
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Everything the session task owns.
struct Session {
    api_version: u32,
    url: String,
    connection: Arc<Connection>,
    store: Arc<Store>,
    sinks: Vec<Arc<dyn DebugSink>>,
}

impl Session {
    async fn run(self, handshake: Arc<HandshakeSlot>) -> SessionResult {
        match self.handshake().await {
            Ok((info, dispatcher)) => {
                handshake.send_replace(Some(Ok(info)));
                dispatcher.run().await
            }
            Err(e) => {
                handshake.send_replace(Some(Err(e.clone())));
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn handshake(self) -> Result<(InitInfo, Dispatcher), ProtocolError> {
        let (inbox_tx, mut inbox) = mpsc::unbounded_channel();

        let message_tx = inbox_tx.clone();
        let sinks = self.sinks.clone();
        self.connection.add_listener(move |text| {
            for sink in &sinks {
                sink.on_recv(text);
            }
            let _ = message_tx.send(InboxEvent::Message(text.to_string()));
        });
        self.connection.add_close_listener(move |info| {
            let _ = inbox_tx.send(InboxEvent::Closed(info.clone()));
        });

        if let Err(e) = self.connection.connect().await {
            let e = ProtocolError::from(e);
            abort(&self.connection, &self.store, &e);
            return Err(e);
        }

        let info = match self.expect_init(&mut inbox).await {
            Ok(info) => info,
            Err(e) => {
                abort(&self.connection, &self.store, &e);
                return Err(e);
            }
        };
        info!(
            server_version = %info.server_version,
            api_version = info.api_version,
            "Handshake complete"
        );
        self.store.set_server(info.clone());

        let dispatcher = Dispatcher {
            connection: self.connection,
            store: self.store,
            sinks: self.sinks,
            inbox,
        };
        Ok((info, dispatcher))
    }

    async fn expect_init(
        &self,
        inbox: &mut mpsc::UnboundedReceiver<InboxEvent>,
    ) -> Result<InitInfo, ProtocolError> {
        let text = match inbox.recv().await {
            Some(InboxEvent::Message(text)) => text,
            Some(InboxEvent::Closed(info)) => return Err(ProtocolError::ConnectionClosed(info)),
            None => {
                return Err(ProtocolError::ConnectionClosed(CloseInfo::abnormal(
                    "connection dropped",
                )))
            }
        };

        match decode(&text)? {
            ServerMessage::Init(info) if info.api_version == self.api_version => Ok(info),
            ServerMessage::Init(info) => Err(ProtocolError::HandshakeVersionMismatch {
                expected: self.api_version,
                got: info.api_version,
            }),
            other => Err(ProtocolError::UnexpectedMessageKind {
                expected: "init".to_string(),
                got: other.kind().to_string(),
            }),
        }
    }
}

/// Tear down after a fatal error. Protocol violations are reported to the
/// server with `ClientError`.
fn abort(connection: &Connection, store: &Store, error: &ProtocolError) {
    error!("Session failed: {}", error);
    store.cancel_current();
    store.finish();
    if !matches!(
        error,
        ProtocolError::Connection(_) | ProtocolError::ConnectionClosed(_)
    ) {
        let _ = connection.close(CloseReason::ClientError, Some(&error.to_string()));
    }
}

// =============================================================================
// DISPATCH LOOP
// =============================================================================

/// Request waiting for the user.
struct Awaiting {
    thread: ThreadId,
    kind: RequestKind,
    response: PendingResponse,
}

enum Step {
    Answered(Result<Value, Cancelled>),
    Event(Option<InboxEvent>),
}

enum Flow {
    Continue,
    End(SessionEnd),
}

struct Dispatcher {
    connection: Arc<Connection>,
    store: Arc<Store>,
    sinks: Vec<Arc<dyn DebugSink>>,
    inbox: mpsc::UnboundedReceiver<InboxEvent>,
}

impl Dispatcher {
    async fn run(mut self) -> SessionResult {
        let outcome = self.dispatch_loop().await;
        match &outcome {
            Ok(end) => {
                info!(?end, "Session ended");
                self.store.cancel_current();
                self.store.finish();
            }
            Err(e) => abort(&self.connection, &self.store, e),
        }
        outcome
    }

    async fn dispatch_loop(&mut self) -> SessionResult {
        let mut awaiting: Option<Awaiting> = None;

        loop {
            let step = match awaiting.as_mut() {
                Some(pending) => tokio::select! {
                    biased;
                    answer = &mut pending.response => Step::Answered(answer),
                    event = self.inbox.recv() => Step::Event(event),
                },
                None => Step::Event(self.inbox.recv().await),
            };

            match step {
                Step::Answered(answer) => {
                    if let Some(done) = awaiting.take() {
                        match answer {
                            Ok(value) => self.reply(done.thread, done.kind, value),
                            Err(Cancelled) => debug!(thread = done.thread, "Request cancelled"),
                        }
                    }
                }
                Step::Event(Some(InboxEvent::Message(text))) => {
                    if let Flow::End(end) = self.handle(&text, &mut awaiting).await? {
                        return Ok(end);
                    }
                }
                Step::Event(Some(InboxEvent::Closed(info))) => {
                    self.supersede(&mut awaiting).await;
                    if info.reason == Some(CloseReason::Leaving) {
                        return Ok(SessionEnd::Left);
                    }
                    return Err(ProtocolError::ConnectionClosed(info));
                }
                Step::Event(None) => {
                    return Err(ProtocolError::ConnectionClosed(CloseInfo::abnormal(
                        "connection dropped",
                    )))
                }
            }
        }
    }

    async fn handle(
        &mut self,
        text: &str,
        awaiting: &mut Option<Awaiting>,
    ) -> Result<Flow, ProtocolError> {
        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.supersede(awaiting).await;
                return Err(e.into());
            }
        };

        if !matches!(message, ServerMessage::Unknown(_)) {
            self.supersede(awaiting).await;
        }

        match message {
            ServerMessage::Init(_) => {
                return Err(ProtocolError::UnexpectedMessageKind {
                    expected: "state, result, shutdown or request".to_string(),
                    got: "init".to_string(),
                })
            }
            ServerMessage::Shutdown => {
                info!("Server shut down");
                self.store.finish();
                if let Err(e) = self.connection.close(CloseReason::Normal, None) {
                    warn!("Couldn't close after shutdown: {}", e);
                }
                return Ok(Flow::End(SessionEnd::Shutdown));
            }
            ServerMessage::State(sync) => {
                debug!(turn = sync.state.turn_num, "State update");
                self.store.set_state(sync.state);
            }
            ServerMessage::Result(result) => {
                info!(winners = ?result.winners, "Game over");
                self.store.set_result(result);
            }
            ServerMessage::Request(request) => {
                debug!(thread = request.thread, kind = %request.kind, "Request received");
                if !request.kind.is_known() {
                    warn!(kind = %request.kind, "Request of unknown kind");
                }
                let response = self.store.create_request(&request);
                *awaiting = Some(Awaiting {
                    thread: request.thread,
                    kind: request.kind,
                    response,
                });
            }
            ServerMessage::Unknown(unknown) => {
                warn!(kind = %unknown.kind, "Ignoring unknown message");
            }
        }
        Ok(Flow::Continue)
    }

    /// Cancel the waiting request, if any, and wait for the cancellation to
    /// land. An answer that raced in is dropped.
    async fn supersede(&self, awaiting: &mut Option<Awaiting>) {
        let Some(stale) = awaiting.take() else {
            return;
        };
        self.store.cancel_current();
        match stale.response.await {
            Ok(_) => debug!(thread = stale.thread, "Dropping answer to superseded request"),
            Err(Cancelled) => debug!(thread = stale.thread, "Request superseded"),
        }
    }

    fn reply(&self, thread: ThreadId, kind: RequestKind, value: Value) {
        let text = encode_reply(&Reply {
            thread,
            kind,
            value,
        });
        for sink in &self.sinks {
            sink.on_send(&text);
        }
        match self.connection.send(text) {
            Ok(()) => debug!(thread, "Reply sent"),
            Err(e) => warn!(thread, "Couldn't send reply: {}", e),
        }
    }
}
