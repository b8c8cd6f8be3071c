//! In-memory mocks for testing the dispatch core.
//!
//! This provides a scriptable [`MockNetworkClient`], a [`MockMetadataCodec`]
//! that replays topology snapshots, and a [`ManualClock`], so the worker can
//! be exercised without sockets or wall-clock sleeps.
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! bureaucrat = { path = ".", features = ["test-utilities"] }
//! ```
//!
//! The client half moves into the worker thread; keep a [`MockHandle`]
//! around to script responses and inspect captured requests from the test
//! thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::{ApiKey, BrokerId, Cluster, CorrelationId, Node};

use super::metadata::MetadataCodec;
use super::network::{ClientRequest, ClientResponse, NetworkClient, ResponsePayload, WorkerWaker};
use super::time::Clock;

/// The mock never parks longer than this per `poll`, so a forgotten wakeup
/// cannot hang a test run. Returning early with no responses is allowed by
/// the `NetworkClient` contract.
const MAX_PARK: Duration = Duration::from_millis(50);

type AutoResponder = Box<dyn FnMut(&ClientRequest) -> Option<ResponsePayload> + Send>;

#[derive(Default)]
struct MockState {
    nodes: Vec<Node>,
    unready: HashSet<BrokerId>,
    poll_delays: HashMap<BrokerId, i64>,
    failed: HashSet<BrokerId>,
    auth_errors: HashMap<BrokerId, Error>,
    next_correlation: i32,
    sent: Vec<ClientRequest>,
    outstanding: Vec<(CorrelationId, BrokerId)>,
    responses: VecDeque<ClientResponse>,
    disconnects: Vec<BrokerId>,
    poll_timeouts: Vec<i64>,
    auto: Option<AutoResponder>,
    woken: bool,
    closed: bool,
}

struct Inner {
    state: Mutex<MockState>,
    cv: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A scriptable in-memory network client.
pub struct MockNetworkClient {
    inner: Arc<Inner>,
}

impl MockNetworkClient {
    /// All `nodes` start connected, ready, and authenticated.
    pub fn new(nodes: Vec<Node>) -> Self {
        let state = MockState {
            nodes,
            next_correlation: 1,
            ..Default::default()
        };
        MockNetworkClient {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                cv: Condvar::new(),
            }),
        }
    }

    /// A remote control for this client, usable after the client has moved
    /// into the worker thread.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl NetworkClient for MockNetworkClient {
    fn ready(&mut self, node: &Node, _now: i64) -> bool {
        !self.inner.lock().unready.contains(&node.id)
    }

    fn poll_delay_ms(&self, node: &Node, _now: i64) -> i64 {
        *self.inner.lock().poll_delays.get(&node.id).unwrap_or(&5)
    }

    fn next_correlation_id(&mut self) -> CorrelationId {
        let mut state = self.inner.lock();
        let id = CorrelationId(state.next_correlation);
        state.next_correlation = state.next_correlation.wrapping_add(1);
        id
    }

    fn send(&mut self, request: ClientRequest, _now: i64) {
        let mut state = self.inner.lock();
        state.sent.push(request.clone());
        let auto_payload = state.auto.as_mut().and_then(|auto| auto(&request));
        match auto_payload {
            Some(payload) => state.responses.push_back(ClientResponse {
                destination: request.destination,
                correlation_id: request.correlation_id,
                payload,
            }),
            None => state
                .outstanding
                .push((request.correlation_id, request.destination)),
        }
        self.inner.cv.notify_all();
    }

    fn poll(&mut self, timeout_ms: i64, _now: i64) -> Vec<ClientResponse> {
        let deadline = Instant::now() + MAX_PARK.min(Duration::from_millis(timeout_ms.max(0) as u64));
        let mut state = self.inner.lock();
        state.poll_timeouts.push(timeout_ms);
        loop {
            if state.woken || !state.responses.is_empty() {
                state.woken = false;
                return state.responses.drain(..).collect();
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            let (next, _timed_out) = self
                .inner
                .cv
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn least_loaded_node(&mut self, _now: i64) -> Option<Node> {
        let state = self.inner.lock();
        state
            .nodes
            .iter()
            .filter(|n| !state.unready.contains(&n.id))
            .min_by_key(|n| {
                let load = state
                    .outstanding
                    .iter()
                    .filter(|(_, dest)| *dest == n.id)
                    .count();
                (load, n.id)
            })
            .cloned()
    }

    fn disconnect(&mut self, node: BrokerId) {
        let mut state = self.inner.lock();
        state.disconnects.push(node);
        let (dropped, kept): (Vec<_>, Vec<_>) = state
            .outstanding
            .drain(..)
            .partition(|(_, dest)| *dest == node);
        state.outstanding = kept;
        for (correlation_id, destination) in dropped {
            state.responses.push_back(ClientResponse {
                destination,
                correlation_id,
                payload: ResponsePayload::Disconnected,
            });
        }
        self.inner.cv.notify_all();
    }

    fn connection_failed(&self, node: &Node) -> bool {
        self.inner.lock().failed.contains(&node.id)
    }

    fn authentication_error(&self, node: &Node) -> Option<Error> {
        self.inner.lock().auth_errors.get(&node.id).cloned()
    }

    fn waker(&self) -> Arc<dyn WorkerWaker> {
        Arc::new(MockWaker {
            inner: Arc::clone(&self.inner),
        })
    }

    fn close(&mut self) {
        self.inner.lock().closed = true;
    }
}

struct MockWaker {
    inner: Arc<Inner>,
}

impl WorkerWaker for MockWaker {
    fn wakeup(&self) {
        self.inner.lock().woken = true;
        self.inner.cv.notify_all();
    }
}

/// Test-side remote control for a [`MockNetworkClient`].
#[derive(Clone)]
pub struct MockHandle {
    inner: Arc<Inner>,
}

impl MockHandle {
    /// Every request handed to `send`, in order.
    pub fn sent(&self) -> Vec<ClientRequest> {
        self.inner.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().sent.len()
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().outstanding.len()
    }

    /// Answer the oldest outstanding request. Returns false when nothing
    /// is outstanding.
    pub fn respond_next(&self, payload: ResponsePayload) -> bool {
        let mut state = self.inner.lock();
        if state.outstanding.is_empty() {
            return false;
        }
        let (correlation_id, destination) = state.outstanding.remove(0);
        state.responses.push_back(ClientResponse {
            destination,
            correlation_id,
            payload,
        });
        self.inner.cv.notify_all();
        true
    }

    /// Queue a raw response, correlated or not. Lets tests exercise the
    /// unknown-correlation-id path.
    pub fn inject(&self, response: ClientResponse) {
        let mut state = self.inner.lock();
        state
            .outstanding
            .retain(|(id, _)| *id != response.correlation_id);
        state.responses.push_back(response);
        self.inner.cv.notify_all();
    }

    /// Install a responder consulted synchronously on every send. Returning
    /// `None` leaves the request outstanding for manual scripting. The
    /// responder runs under the mock's lock; it must not call back into
    /// this handle.
    pub fn set_auto_responder(
        &self,
        responder: impl FnMut(&ClientRequest) -> Option<ResponsePayload> + Send + 'static,
    ) {
        self.inner.lock().auto = Some(Box::new(responder));
    }

    pub fn set_ready(&self, node: BrokerId, ready: bool) {
        let mut state = self.inner.lock();
        if ready {
            state.unready.remove(&node);
        } else {
            state.unready.insert(node);
        }
        self.inner.cv.notify_all();
    }

    pub fn set_poll_delay(&self, node: BrokerId, delay_ms: i64) {
        self.inner.lock().poll_delays.insert(node, delay_ms);
    }

    pub fn set_connection_failed(&self, node: BrokerId, failed: bool) {
        let mut state = self.inner.lock();
        if failed {
            state.failed.insert(node);
        } else {
            state.failed.remove(&node);
        }
        self.inner.cv.notify_all();
    }

    pub fn set_auth_error(&self, node: BrokerId, err: Option<Error>) {
        let mut state = self.inner.lock();
        match err {
            Some(e) => {
                state.auth_errors.insert(node, e);
            }
            None => {
                state.auth_errors.remove(&node);
            }
        }
    }

    /// Simulate the server side dropping the connection: every request in
    /// flight to `node` surfaces as a disconnected response.
    pub fn break_connection(&self, node: BrokerId) {
        let mut state = self.inner.lock();
        let (dropped, kept): (Vec<_>, Vec<_>) = state
            .outstanding
            .drain(..)
            .partition(|(_, dest)| *dest == node);
        state.outstanding = kept;
        for (correlation_id, destination) in dropped {
            state.responses.push_back(ClientResponse {
                destination,
                correlation_id,
                payload: ResponsePayload::Disconnected,
            });
        }
        self.inner.cv.notify_all();
    }

    /// Node ids the worker asked to disconnect, in order.
    pub fn disconnects(&self) -> Vec<BrokerId> {
        self.inner.lock().disconnects.clone()
    }

    /// The timeout passed to each `poll`, in order.
    pub fn poll_timeouts(&self) -> Vec<i64> {
        self.inner.lock().poll_timeouts.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// A [`MetadataCodec`] replaying scripted topology snapshots. The request
/// body is empty and response bytes are ignored; tests script outcomes
/// directly.
pub struct MockMetadataCodec {
    state: Arc<Mutex<CodecState>>,
}

#[derive(Default)]
struct CodecState {
    script: VecDeque<Result<Cluster>>,
    fixed: Option<Cluster>,
    parsed: u32,
}

impl MockMetadataCodec {
    /// Every refresh yields a clone of `cluster`.
    pub fn fixed(cluster: Cluster) -> Self {
        MockMetadataCodec {
            state: Arc::new(Mutex::new(CodecState {
                fixed: Some(cluster),
                ..Default::default()
            })),
        }
    }

    /// Refreshes pop scripted outcomes; once the script is exhausted they
    /// fail with an internal error.
    pub fn scripted() -> (Self, MockCodecHandle) {
        let state = Arc::new(Mutex::new(CodecState::default()));
        (
            MockMetadataCodec {
                state: Arc::clone(&state),
            },
            MockCodecHandle { state },
        )
    }
}

impl MetadataCodec for MockMetadataCodec {
    fn build_request(&self, _timeout_ms: i32) -> (ApiKey, Bytes) {
        (ApiKey::METADATA, Bytes::new())
    }

    fn parse_response(&self, _body: Bytes) -> Result<Cluster> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.parsed += 1;
        if let Some(next) = state.script.pop_front() {
            return next;
        }
        match &state.fixed {
            Some(cluster) => Ok(cluster.clone()),
            None => Err(Error::Internal(
                "no scripted metadata response".to_string(),
            )),
        }
    }
}

/// Test-side control for a scripted [`MockMetadataCodec`].
#[derive(Clone)]
pub struct MockCodecHandle {
    state: Arc<Mutex<CodecState>>,
}

impl MockCodecHandle {
    pub fn push(&self, outcome: Result<Cluster>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .script
            .push_back(outcome);
    }

    /// How many refresh responses have been parsed.
    pub fn parsed_count(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .parsed
    }
}

/// A clock tests move by hand.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
