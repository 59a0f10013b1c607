//! Request Correlation Store
//!
//! Holds the single outstanding interactive request and publishes the shared
//! [`Snapshot`] that UI code reads. The controller is the only writer; any
//! number of readers subscribe through a `watch` channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde_json::{Map, Value};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::game::cost::{counter_total, CardCost};
use crate::game::state::{GameState, Resource, ResourceCounter};
use crate::protocol::message::{GameResult, InitInfo, Request, RequestKind, ThreadId};

/// The pending request was superseded or abandoned. Not a failure: the
/// awaiting side drops it silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;

/// Errors returned to UI code answering a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Nothing is waiting for an answer.
    #[error("no request is pending")]
    NoCurrentRequest,

    /// The answer targets a request that is no longer current.
    #[error("request {got} is not current (pending: {expected})")]
    ThreadMismatch {
        /// Thread of the pending request.
        expected: ThreadId,
        /// Thread the caller named.
        got: ThreadId,
    },
}

// =============================================================================
// SCRATCH STATE
// =============================================================================

/// UI-local accumulator attached to the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scratch {
    /// Kind needs no scratch.
    None,
    /// Resources tentatively allocated by the user.
    Resources(ResourceCounter),
}

impl Scratch {
    /// Fresh scratch for a request kind.
    pub fn for_kind(kind: &RequestKind) -> Self {
        match kind {
            RequestKind::CardPayment | RequestKind::SpendResources => {
                Scratch::Resources(ResourceCounter::new())
            }
            _ => Scratch::None,
        }
    }

    /// Allocated resources, if this scratch tracks any.
    pub fn resources(&self) -> Option<&ResourceCounter> {
        match self {
            Scratch::Resources(counter) => Some(counter),
            Scratch::None => None,
        }
    }

    /// Allocate `amount` more of `resource`. Returns false if this scratch
    /// does not track resources.
    pub fn add_resource(&mut self, resource: Resource, amount: u32) -> bool {
        match self {
            Scratch::Resources(counter) => {
                let count = counter.entry(resource).or_insert(0);
                *count = count.saturating_add(amount);
                true
            }
            Scratch::None => false,
        }
    }

    /// Release up to `amount` of `resource`.
    pub fn remove_resource(&mut self, resource: Resource, amount: u32) -> bool {
        match self {
            Scratch::Resources(counter) => {
                if let Some(count) = counter.get_mut(&resource) {
                    *count = count.saturating_sub(amount);
                    if *count == 0 {
                        counter.remove(&resource);
                    }
                }
                true
            }
            Scratch::None => false,
        }
    }

    /// Total allocated.
    pub fn total(&self) -> u32 {
        self.resources().map(counter_total).unwrap_or(0)
    }
}

// =============================================================================
// SHARED SNAPSHOT
// =============================================================================

/// Session phase as seen by readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// Handshake not done yet.
    #[default]
    Connecting,
    /// Game in progress.
    Running,
    /// Result received or server shut down.
    Finished,
}

/// Published view of the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestView {
    /// Thread id to answer with.
    pub thread: ThreadId,
    /// Request kind.
    pub kind: RequestKind,
    /// Kind-specific fields.
    pub fields: Map<String, Value>,
    /// UI scratch state.
    pub scratch: Scratch,
}

impl RequestView {
    /// Player being asked, when named.
    pub fn player(&self) -> Option<usize> {
        self.fields
            .get("player")
            .and_then(Value::as_u64)
            .and_then(|p| usize::try_from(p).ok())
    }

    /// Cost carried by a payment request.
    pub fn cost(&self) -> Option<CardCost> {
        self.fields
            .get("cost")
            .and_then(|cost| serde_json::from_value(cost.clone()).ok())
    }

    /// Whether the allocated resources pay the requested cost exactly.
    pub fn payment_matches(&self) -> bool {
        match (self.cost(), self.scratch.resources()) {
            (Some(cost), Some(provided)) => cost.matches_exact(provided),
            _ => false,
        }
    }
}

/// Shared state object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Handshake information, once received.
    pub server: Option<InitInfo>,
    /// Latest authoritative state.
    pub state: Option<Arc<GameState>>,
    /// Request waiting for the user, if any.
    pub request: Option<RequestView>,
    /// Winners, once the game ended.
    pub winners: Option<Vec<usize>>,
    /// Session phase.
    pub phase: SessionPhase,
}

// =============================================================================
// STORE
// =============================================================================

struct Current {
    thread: ThreadId,
    responder: oneshot::Sender<Result<Value, Cancelled>>,
}

/// Correlation store.
pub struct Store {
    current: Mutex<Option<Current>>,
    snapshot: watch::Sender<Snapshot>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Empty store.
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());
        Self {
            current: Mutex::new(None),
            snapshot,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Current>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver of snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Thread id of the pending request.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.lock().as_ref().map(|current| current.thread)
    }

    /// Answer the pending request.
    pub fn respond(&self, thread: ThreadId, value: Value) -> Result<(), RequestError> {
        let mut current = self.lock();
        let expected = current
            .as_ref()
            .map(|c| c.thread)
            .ok_or(RequestError::NoCurrentRequest)?;
        if expected != thread {
            return Err(RequestError::ThreadMismatch {
                expected,
                got: thread,
            });
        }
        if let Some(current) = current.take() {
            if current.responder.send(Ok(value)).is_err() {
                debug!(thread, "Answer arrived after the request was abandoned");
            }
        }
        self.snapshot.send_modify(|s| s.request = None);
        Ok(())
    }

    /// Mutate the scratch state of the pending request and republish.
    pub fn update_scratch<F>(&self, thread: ThreadId, f: F) -> Result<(), RequestError>
    where
        F: FnOnce(&mut Scratch),
    {
        let current = self.lock();
        match current.as_ref() {
            None => return Err(RequestError::NoCurrentRequest),
            Some(c) if c.thread != thread => {
                return Err(RequestError::ThreadMismatch {
                    expected: c.thread,
                    got: thread,
                })
            }
            Some(_) => {}
        }
        self.snapshot.send_modify(|s| {
            if let Some(view) = s.request.as_mut() {
                f(&mut view.scratch);
            }
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Controller side
    // -------------------------------------------------------------------------

    pub(crate) fn set_server(&self, info: InitInfo) {
        self.snapshot.send_modify(|s| {
            s.server = Some(info);
            s.phase = SessionPhase::Running;
        });
    }

    pub(crate) fn set_state(&self, state: GameState) {
        self.snapshot.send_modify(|s| s.state = Some(Arc::new(state)));
    }

    pub(crate) fn set_result(&self, result: GameResult) {
        self.snapshot.send_modify(|s| {
            s.state = Some(Arc::new(result.state));
            s.winners = Some(result.winners);
            s.phase = SessionPhase::Finished;
        });
    }

    pub(crate) fn finish(&self) {
        self.snapshot.send_modify(|s| s.phase = SessionPhase::Finished);
    }

    /// Make `request` the current request. A still-pending older request is
    /// cancelled first.
    pub(crate) fn create_request(&self, request: &Request) -> PendingResponse {
        let (responder, rx) = oneshot::channel();
        let mut current = self.lock();
        if let Some(stale) = current.take() {
            warn!(
                stale = stale.thread,
                thread = request.thread,
                "Request superseded before it was answered"
            );
            let _ = stale.responder.send(Err(Cancelled));
        }
        *current = Some(Current {
            thread: request.thread,
            responder,
        });
        let view = RequestView {
            thread: request.thread,
            kind: request.kind.clone(),
            fields: request.fields.clone(),
            scratch: Scratch::for_kind(&request.kind),
        };
        let state = Arc::new(request.state.clone());
        self.snapshot.send_modify(|s| {
            s.state = Some(state);
            s.request = Some(view);
        });
        PendingResponse { rx }
    }

    /// Reject the pending request with [`Cancelled`]. Returns whether one
    /// existed.
    pub(crate) fn cancel_current(&self) -> bool {
        let mut current = self.lock();
        let Some(cancelled) = current.take() else {
            return false;
        };
        debug!(thread = cancelled.thread, "Cancelling pending request");
        let _ = cancelled.responder.send(Err(Cancelled));
        self.snapshot.send_modify(|s| s.request = None);
        true
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("current_thread", &self.current_thread())
            .finish()
    }
}

/// Resolves with the user's answer or [`Cancelled`].
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Value, Cancelled>>,
}

impl Future for PendingResponse {
    type Output = Result<Value, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::ids::{BLUE, RED};
    use serde_json::json;

    fn request(kind: RequestKind, thread: ThreadId, fields: Value) -> Request {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Request {
            kind,
            thread,
            state: GameState {
                turn_num: thread as u32,
                ..Default::default()
            },
            fields,
        }
    }

    #[tokio::test]
    async fn test_respond_resolves_pending() {
        let store = Store::new();
        let pending = store.create_request(&request(RequestKind::ActionType, 7, json!({})));

        let snap = store.snapshot();
        assert_eq!(snap.request.as_ref().map(|r| r.thread), Some(7));
        assert_eq!(snap.state.as_ref().map(|s| s.turn_num), Some(7));

        store.respond(7, json!("buy")).unwrap();
        assert_eq!(pending.await, Ok(json!("buy")));
        assert!(store.snapshot().request.is_none());
        assert_eq!(store.current_thread(), None);
    }

    #[test]
    fn test_respond_errors() {
        let store = Store::new();
        assert_eq!(
            store.respond(1, Value::Null),
            Err(RequestError::NoCurrentRequest)
        );

        let _pending = store.create_request(&request(RequestKind::BuyCard, 3, json!({})));
        assert_eq!(
            store.respond(4, Value::Null),
            Err(RequestError::ThreadMismatch {
                expected: 3,
                got: 4
            })
        );
        assert_eq!(store.current_thread(), Some(3));
    }

    #[tokio::test]
    async fn test_cancel_rejects_with_cancelled() {
        let store = Store::new();
        let pending = store.create_request(&request(RequestKind::CardExec, 5, json!({})));

        assert!(store.cancel_current());
        assert!(!store.cancel_current());
        assert_eq!(pending.await, Err(Cancelled));
        assert!(store.snapshot().request.is_none());
        assert_eq!(
            store.respond(5, Value::Null),
            Err(RequestError::NoCurrentRequest)
        );
    }

    #[tokio::test]
    async fn test_new_request_supersedes_old() {
        let store = Store::new();
        let first = store.create_request(&request(RequestKind::ColorExec, 1, json!({})));
        let second = store.create_request(&request(RequestKind::ColorExcl, 2, json!({})));

        assert_eq!(first.await, Err(Cancelled));
        assert_eq!(store.current_thread(), Some(2));

        store.respond(2, json!(3)).unwrap();
        assert_eq!(second.await, Ok(json!(3)));
    }

    #[tokio::test]
    async fn test_dropped_store_cancels() {
        let store = Store::new();
        let pending = store.create_request(&request(RequestKind::ActionType, 1, json!({})));
        drop(store);
        assert_eq!(pending.await, Err(Cancelled));
    }

    #[test]
    fn test_scratch_for_payment() {
        let store = Store::new();
        let fields = json!({
            "player": 0,
            "cost": {"possibilities": [[{"allowed_resources": [RED, BLUE]}, 2]]}
        });
        let _pending = store.create_request(&request(RequestKind::CardPayment, 9, fields));

        let view = store.snapshot().request.unwrap();
        assert_eq!(view.scratch, Scratch::Resources(ResourceCounter::new()));
        assert_eq!(view.player(), Some(0));
        assert!(!view.payment_matches());

        store
            .update_scratch(9, |s| {
                s.add_resource(RED, 1);
                s.add_resource(BLUE, 2);
                s.remove_resource(BLUE, 1);
            })
            .unwrap();

        let view = store.snapshot().request.unwrap();
        assert_eq!(view.scratch.total(), 2);
        assert!(view.payment_matches());

        assert_eq!(
            store.update_scratch(8, |_| {}),
            Err(RequestError::ThreadMismatch {
                expected: 9,
                got: 8
            })
        );
    }

    #[test]
    fn test_scratch_none_for_other_kinds() {
        let mut scratch = Scratch::for_kind(&RequestKind::ActionType);
        assert_eq!(scratch, Scratch::None);
        assert!(!scratch.add_resource(RED, 1));
        assert_eq!(scratch.total(), 0);

        let mut scratch = Scratch::for_kind(&RequestKind::SpendResources);
        scratch.add_resource(RED, 1);
        scratch.remove_resource(RED, 5);
        assert_eq!(scratch.resources(), Some(&ResourceCounter::new()));
    }

    #[test]
    fn test_scratch_add_saturates() {
        let mut scratch = Scratch::for_kind(&RequestKind::CardPayment);
        assert!(scratch.add_resource(RED, u32::MAX));
        assert!(scratch.add_resource(RED, u32::MAX));
        assert!(scratch.add_resource(BLUE, 1));
        assert_eq!(scratch.resources().and_then(|c| c.get(&RED)), Some(&u32::MAX));
        assert_eq!(scratch.total(), u32::MAX);
    }

    #[tokio::test]
    async fn test_subscribers_see_phases() {
        let store = Store::new();
        let mut rx = store.subscribe();
        assert_eq!(rx.borrow().phase, SessionPhase::Connecting);

        store.set_server(InitInfo {
            api_version: 1,
            server_version: "0.1".into(),
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().phase, SessionPhase::Running);

        store.set_result(GameResult {
            state: GameState::default(),
            winners: vec![1],
        });
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.phase, SessionPhase::Finished);
        assert_eq!(snap.winners, Some(vec![1]));
    }
}
