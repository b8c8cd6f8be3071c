//! The dispatch worker: one thread, one event loop, all call state.
//!
//! Every call the client accepts flows through the collections owned by
//! this module's [`Worker`]:
//!
//! 1. the shared [`SubmissionQueue`] (the only externally writable one),
//! 2. the pending set (awaiting node assignment or retry backoff),
//! 3. per-node send queues (assigned, waiting for a writable connection),
//! 4. the in-flight registry (request handed to the network client).
//!
//! A call lives in exactly one of them at a time, or has reached its
//! terminal state; the collections own the `Call` values outright, so that
//! exclusivity is structural rather than a runtime invariant.
//!
//! The loop's only blocking point is `NetworkClient::poll`, bounded by a
//! timeout folded together from deadlines, retry eligibility, connection
//! readiness, metadata scheduling, and the shutdown deadline. Everything
//! else the worker does is non-blocking and bounded.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::config::AdminConfig;
use crate::constants::{MAX_PROTOCOL_DOWNGRADES, NO_SHUTDOWN};
use crate::error::Error;
use crate::types::{BrokerId, CorrelationId, Node};

use super::call::{Call, CallBody, CallContext};
use super::metadata::{MetadataCodec, MetadataManager};
use super::network::{ClientRequest, ClientResponse, NetworkClient, ResponsePayload};
use super::time::{remaining_ms_as_i32, Clock};

/// The externally writable side of the worker, shared with every client
/// handle.
///
/// Holds freshly submitted calls until the worker drains them at the top
/// of an iteration, plus the hard-shutdown deadline cell. The queue is
/// sealed (set to `None`) exactly once, by the worker as it exits; pushes
/// after that hand the call back so the submitter can fail it.
pub(crate) struct SubmissionQueue {
    calls: Mutex<Option<Vec<Call>>>,
    hard_shutdown_ms: AtomicI64,
}

impl SubmissionQueue {
    pub(crate) fn new() -> Self {
        SubmissionQueue {
            calls: Mutex::new(Some(Vec::new())),
            hard_shutdown_ms: AtomicI64::new(NO_SHUTDOWN),
        }
    }

    pub(crate) fn push(&self, call: Call) -> Result<(), Call> {
        let mut guard = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(queue) => {
                queue.push(call);
                Ok(())
            }
            None => Err(call),
        }
    }

    fn drain(&self) -> Vec<Call> {
        let mut guard = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_mut().map(mem::take).unwrap_or_default()
    }

    fn seal(&self) -> Vec<Call> {
        let mut guard = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take().unwrap_or_default()
    }

    /// Record a close request. Racing closers combine to the earliest
    /// deadline; returns the effective one.
    pub(crate) fn initiate_shutdown(&self, deadline_ms: i64) -> i64 {
        let prev = self.hard_shutdown_ms.fetch_min(deadline_ms, Ordering::AcqRel);
        prev.min(deadline_ms)
    }

    pub(crate) fn shutdown_initiated(&self) -> bool {
        self.hard_shutdown_ms() != NO_SHUTDOWN
    }

    pub(crate) fn hard_shutdown_ms(&self) -> i64 {
        self.hard_shutdown_ms.load(Ordering::Acquire)
    }
}

/// Tracks, for one iteration's fixed `now`, which calls have expired and
/// how long until the next one would.
struct TimeoutTracker {
    now: i64,
    next_timeout_ms: i64,
}

impl TimeoutTracker {
    fn new(now: i64) -> Self {
        TimeoutTracker {
            now,
            next_timeout_ms: i64::MAX,
        }
    }

    /// Whether `call`'s deadline has passed. A call that has not expired
    /// contributes its remaining time to the next-timeout bound.
    fn expired(&mut self, call: &Call) -> bool {
        let remaining = call.deadline_ms.saturating_sub(self.now);
        if remaining < 0 {
            true
        } else {
            self.next_timeout_ms = self.next_timeout_ms.min(remaining);
            false
        }
    }

    fn next_timeout_ms(&self) -> i64 {
        self.next_timeout_ms
    }
}

/// Calls assigned to one destination, in send order.
struct NodeQueue {
    node: Node,
    calls: VecDeque<Call>,
}

impl NodeQueue {
    fn new(node: Node) -> Self {
        NodeQueue {
            node,
            calls: VecDeque::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Worker<N: NetworkClient, C: MetadataCodec> {
    client: N,
    codec: C,
    metadata: MetadataManager,
    queue: Arc<SubmissionQueue>,
    clock: Arc<dyn Clock>,
    retry_backoff_ms: i64,
    max_retries: u32,
    request_timeout_ms: i64,
    safety_poll_ceiling_ms: i64,
    pending: Vec<Call>,
    to_send: HashMap<BrokerId, NodeQueue>,
    in_flight: HashMap<CorrelationId, Call>,
    /// Send order per destination; the front entry is the oldest in-flight
    /// request on that connection.
    in_flight_order: HashMap<BrokerId, VecDeque<CorrelationId>>,
}

impl<N: NetworkClient, C: MetadataCodec> Worker<N, C> {
    pub(crate) fn new(
        config: &AdminConfig,
        client: N,
        codec: C,
        metadata: MetadataManager,
        queue: Arc<SubmissionQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Worker {
            client,
            codec,
            metadata,
            queue,
            clock,
            retry_backoff_ms: config.retry_backoff_ms,
            max_retries: config.max_retries,
            request_timeout_ms: config.request_timeout_ms,
            safety_poll_ceiling_ms: config.safety_poll_ceiling_ms,
            pending: Vec::new(),
            to_send: HashMap::new(),
            in_flight: HashMap::new(),
            in_flight_order: HashMap::new(),
        }
    }

    /// Drive the loop until shutdown, then drain.
    pub(crate) fn run(mut self) {
        let mut now = self.clock.now_ms();
        trace!("worker thread starting");
        while self.run_once(&mut now) == Flow::Continue {}
        self.drain_on_exit();
        debug!("worker thread exiting");
    }

    /// One loop iteration. `now` is fixed through the send phase and
    /// refreshed from the clock after `poll` returns.
    fn run_once(&mut self, now: &mut i64) -> Flow {
        self.drain_submissions();

        let hard_deadline = self.queue.hard_shutdown_ms();
        if hard_deadline != NO_SHUTDOWN && self.should_exit(*now, hard_deadline) {
            return Flow::Exit;
        }

        let mut timeouts = TimeoutTracker::new(*now);
        self.expire_pending(&mut timeouts);
        self.expire_unsent(&mut timeouts);
        self.abort_expired_in_flight(&mut timeouts);

        let mut poll_timeout = self.safety_poll_ceiling_ms.min(timeouts.next_timeout_ms());
        if hard_deadline != NO_SHUTDOWN {
            poll_timeout = poll_timeout.min(hard_deadline.saturating_sub(*now));
        }

        poll_timeout = poll_timeout.min(self.assign_pending(*now));

        let metadata_delay = self.metadata.metadata_fetch_delay_ms(*now);
        if metadata_delay == 0 {
            self.metadata.transition_to_update_pending(*now);
            let deadline = now.saturating_add(self.request_timeout_ms);
            // Assign the refresh call right away; the other pending calls
            // were handled above.
            if let Some(call) = self.try_assign(Call::metadata_refresh(deadline), *now) {
                self.pending.push(call);
            }
        }

        poll_timeout = poll_timeout.min(self.send_eligible(*now));
        if metadata_delay > 0 {
            poll_timeout = poll_timeout.min(metadata_delay);
        }
        // Pending calls should be re-tried promptly once a node becomes
        // reachable.
        if !self.pending.is_empty() {
            poll_timeout = poll_timeout.min(self.retry_backoff_ms);
        }

        trace!(poll_timeout, "entering poll");
        let responses = self.client.poll(poll_timeout.max(0), *now);
        trace!(count = responses.len(), "poll returned");

        self.unassign_unsent(|client, node| client.connection_failed(node));

        *now = self.clock.now_ms();
        self.handle_responses(*now, responses);
        Flow::Continue
    }

    fn drain_submissions(&mut self) {
        let drained = self.queue.drain();
        if !drained.is_empty() {
            trace!(count = drained.len(), "drained newly submitted calls");
            self.pending.extend(drained);
        }
    }

    fn should_exit(&self, now: i64, hard_deadline: i64) -> bool {
        if !self.has_active_external_calls() {
            trace!("all work has been completed; worker exiting");
            return true;
        }
        if now >= hard_deadline {
            info!("forcing a hard worker shutdown; requests in progress will be aborted");
            return true;
        }
        debug!(remaining_ms = hard_deadline - now, "hard shutdown pending");
        false
    }

    fn has_active_external_calls(&self) -> bool {
        self.pending.iter().any(|c| !c.internal)
            || self
                .to_send
                .values()
                .any(|nq| nq.calls.iter().any(|c| !c.internal))
            || self.in_flight.values().any(|c| !c.internal)
    }

    fn expire_pending(&mut self, timeouts: &mut TimeoutTracker) {
        let mut expired = Vec::new();
        let pending = mem::take(&mut self.pending);
        for call in pending {
            if timeouts.expired(&call) {
                expired.push(call);
            } else {
                self.pending.push(call);
            }
        }
        if expired.is_empty() {
            return;
        }
        debug!(count = expired.len(), "timed out pending calls");
        let now = timeouts.now;
        for call in expired {
            self.fail_call(
                call,
                now,
                Error::Timeout("timed out waiting for a node assignment".to_string()),
            );
        }
    }

    fn expire_unsent(&mut self, timeouts: &mut TimeoutTracker) {
        let mut expired = Vec::new();
        for nq in self.to_send.values_mut() {
            let calls = mem::take(&mut nq.calls);
            for call in calls {
                if timeouts.expired(&call) {
                    expired.push(call);
                } else {
                    nq.calls.push_back(call);
                }
            }
        }
        if expired.is_empty() {
            return;
        }
        debug!(count = expired.len(), "timed out calls awaiting send");
        let now = timeouts.now;
        for call in expired {
            self.fail_call(
                call,
                now,
                Error::Timeout("timed out waiting to send the call".to_string()),
            );
        }
    }

    /// In-flight calls cannot be removed outright: the server may still
    /// respond. Mark the expired ones aborted and close their connection;
    /// the next poll surfaces them as disconnected responses.
    fn abort_expired_in_flight(&mut self, timeouts: &mut TimeoutTracker) {
        let mut num_aborted = 0;
        for (node_id, order) in &self.in_flight_order {
            // The front request was sent first; it expires first.
            let Some(head) = order.front() else { continue };
            let Some(call) = self.in_flight.get_mut(head) else {
                continue;
            };
            if !timeouts.expired(call) {
                continue;
            }
            if call.aborted {
                warn!(call = call.name, "aborted call is still in flight");
            } else {
                debug!(node = %node_id, call = call.name, "closing connection to time out in-flight call");
                call.aborted = true;
                self.client.disconnect(*node_id);
                num_aborted += 1;
            }
        }
        if num_aborted > 0 {
            debug!(count = num_aborted, "timed out in-flight calls");
        }
    }

    /// Choose nodes for pending calls that are past their backoff. Returns
    /// the shortest remaining backoff, for the poll timeout.
    fn assign_pending(&mut self, now: i64) -> i64 {
        let mut poll_timeout = i64::MAX;
        let pending = mem::take(&mut self.pending);
        let mut still_pending = Vec::new();
        for call in pending {
            if now < call.next_allowed_try_ms {
                poll_timeout = poll_timeout.min(call.next_allowed_try_ms - now);
                still_pending.push(call);
            } else if let Some(call) = self.try_assign(call, now) {
                still_pending.push(call);
            }
        }
        self.pending.extend(still_pending);
        poll_timeout
    }

    /// Hand a call to its selected node's send queue. Returns the call if
    /// no node is available yet; a selection error fails the call.
    fn try_assign(&mut self, mut call: Call, now: i64) -> Option<Call> {
        match call
            .selector
            .provide(&mut self.metadata, &mut self.client, now)
        {
            Ok(Some(node)) => {
                trace!(call = call.name, node = %node, "assigned call to node");
                call.cur_node = Some(node.clone());
                self.to_send
                    .entry(node.id)
                    .or_insert_with(|| NodeQueue::new(node))
                    .calls
                    .push_back(call);
                None
            }
            Ok(None) => {
                trace!(call = call.name, "unable to assign call to a node");
                Some(call)
            }
            Err(err) => {
                debug!(call = call.name, error = %err, "node selection failed");
                self.fail_call(call, now, err);
                None
            }
        }
    }

    /// Send the head call of every queue whose connection is writable.
    /// Returns the shortest connection-readiness delay, for the poll
    /// timeout.
    fn send_eligible(&mut self, now: i64) -> i64 {
        let mut poll_timeout = i64::MAX;
        let mut failed = Vec::new();
        let ids: Vec<BrokerId> = self.to_send.keys().copied().collect();
        for id in ids {
            let node = match self.to_send.get(&id) {
                Some(nq) if nq.calls.is_empty() => {
                    self.to_send.remove(&id);
                    continue;
                }
                Some(nq) => nq.node.clone(),
                None => continue,
            };
            if !self.client.ready(&node, now) {
                let node_delay = self.client.poll_delay_ms(&node, now);
                poll_timeout = poll_timeout.min(node_delay);
                trace!(node = %node, delay_ms = node_delay, "connection not ready to send");
                continue;
            }
            let Some(mut call) = self
                .to_send
                .get_mut(&id)
                .and_then(|nq| nq.calls.pop_front())
            else {
                continue;
            };
            let timeout_ms = remaining_ms_as_i32(now, call.deadline_ms).max(0);
            let built = match &mut call.body {
                CallBody::User(handler) => handler.build_request(timeout_ms),
                CallBody::MetadataRefresh => Ok(self.codec.build_request(timeout_ms)),
            };
            let (api_key, body) = match built {
                Ok(parts) => parts,
                Err(err) => {
                    let message =
                        format!("error building {} request for node {}: {}", call.name, node, err);
                    failed.push((call, Error::Internal(message)));
                    continue;
                }
            };
            if call.downgrade_retry {
                call.downgrade_retry = false;
            } else {
                call.tries += 1;
            }
            let correlation_id = self.client.next_correlation_id();
            trace!(call = call.name, node = %node, correlation_id = %correlation_id, "sending request");
            self.client.send(
                ClientRequest {
                    destination: id,
                    correlation_id,
                    api_key,
                    timeout_ms,
                    body,
                },
                now,
            );
            self.in_flight_order
                .entry(id)
                .or_default()
                .push_back(correlation_id);
            debug_assert!(!self.in_flight.contains_key(&correlation_id));
            self.in_flight.insert(correlation_id, call);
        }
        for (call, err) in failed {
            self.fail_call(call, now, err);
        }
        poll_timeout
    }

    /// Move queued-but-unsent calls matching the predicate back to pending
    /// so the next iteration can pick fresh destinations.
    fn unassign_unsent<F>(&mut self, should_unassign: F)
    where
        F: Fn(&N, &Node) -> bool,
    {
        let client = &self.client;
        let pending = &mut self.pending;
        self.to_send.retain(|_, nq| {
            if nq.calls.is_empty() {
                return false;
            }
            if should_unassign(client, &nq.node) {
                trace!(node = %nq.node, count = nq.calls.len(), "unassigning unsent calls");
                for mut call in nq.calls.drain(..) {
                    call.cur_node = None;
                    pending.push(call);
                }
                return false;
            }
            true
        });
    }

    fn handle_responses(&mut self, now: i64, responses: Vec<ClientResponse>) {
        for response in responses {
            let Some(call) = self.in_flight.remove(&response.correlation_id) else {
                // A server answering a correlation id we never issued is
                // protocol corruption; drop the connection, not the worker.
                error!(
                    node = %response.destination,
                    correlation_id = %response.correlation_id,
                    "response for unknown correlation id; disconnecting"
                );
                self.client.disconnect(response.destination);
                continue;
            };
            match self.in_flight_order.get_mut(&response.destination) {
                Some(order) if order.contains(&response.correlation_id) => {
                    order.retain(|c| *c != response.correlation_id);
                }
                _ => {
                    error!(
                        call = call.name,
                        node = %response.destination,
                        "in-flight call missing from its node's send-order list"
                    );
                    continue;
                }
            }
            match response.payload {
                ResponsePayload::VersionMismatch(message) => {
                    self.fail_call(call, now, Error::UnsupportedVersion(message));
                }
                ResponsePayload::Disconnected => {
                    let auth = call
                        .cur_node
                        .as_ref()
                        .and_then(|node| self.client.authentication_error(node));
                    let err = auth.unwrap_or_else(|| {
                        Error::Disconnected(format!(
                            "cancelled {} request with correlation id {} due to node {} being disconnected",
                            call.name, response.correlation_id, response.destination
                        ))
                    });
                    self.fail_call(call, now, err);
                }
                ResponsePayload::Body(body) => {
                    self.complete_call(call, now, body);
                }
            }
        }
    }

    fn complete_call(&mut self, mut call: Call, now: i64, body: Bytes) {
        if matches!(call.body, CallBody::MetadataRefresh) {
            match self.codec.parse_response(body) {
                Ok(cluster) => {
                    self.metadata.update(cluster, now);
                    // New metadata may prefer different destinations for
                    // anything still waiting to be sent.
                    self.unassign_unsent(|_, _| true);
                }
                Err(err) => self.fail_call(call, now, err),
            }
            return;
        }
        let result = {
            let CallBody::User(handler) = &mut call.body else {
                unreachable!("non-metadata call without a user handler");
            };
            let mut ctx = CallContext {
                metadata: &mut self.metadata,
            };
            handler.handle_response(body, &mut ctx)
        };
        match result {
            Ok(()) => trace!(call = call.name, tries = call.tries, "call completed"),
            Err(err) => self.fail_call(call, now, err),
        }
    }

    /// The single failure handler: decides downgrade, retry, or terminal
    /// for every failed attempt.
    fn fail_call(&mut self, mut call: Call, now: i64, err: Error) {
        if call.aborted {
            // The connection was torn down to enforce the deadline; the
            // server's view of the attempt is unknown, so no retries.
            debug!(call = call.name, tries = call.tries, error = %err, "call aborted");
            self.terminate(call, now, Error::Timeout("aborted due to timeout".to_string()));
            return;
        }
        if err.is_unsupported_version()
            && call.downgrades < MAX_PROTOCOL_DOWNGRADES
            && call.handle_unsupported_version(&err)
        {
            // A protocol downgrade is not a retry; it neither waits out the
            // backoff nor counts against the attempt budget.
            debug!(call = call.name, "attempting protocol downgrade and retry");
            call.downgrades += 1;
            call.downgrade_retry = true;
            call.cur_node = None;
            self.pending.push(call);
            return;
        }
        call.next_allowed_try_ms = now.saturating_add(self.retry_backoff_ms);
        if call.deadline_ms.saturating_sub(now) < 0 {
            debug!(call = call.name, tries = call.tries, error = %err, "call timed out");
            self.terminate(call, now, err);
            return;
        }
        if !err.is_retriable() {
            debug!(
                call = call.name,
                tries = call.tries,
                error = %err,
                "call failed with a non-retriable error"
            );
            self.terminate(call, now, err);
            return;
        }
        if call.tries > self.max_retries {
            debug!(call = call.name, tries = call.tries, error = %err, "call exhausted its retries");
            self.terminate(call, now, err);
            return;
        }
        debug!(call = call.name, tries = call.tries, error = %err, "retrying call");
        call.cur_node = None;
        self.pending.push(call);
    }

    /// Deliver the terminal failure: the user handler's failure sink, or
    /// the metadata manager for the internal refresh call.
    fn terminate(&mut self, call: Call, now: i64, err: Error) {
        match call.body {
            CallBody::User(mut handler) => handler.handle_failure(err),
            CallBody::MetadataRefresh => self.metadata.update_failed(&err, now),
        }
    }

    /// Fail everything still owned by the worker, seal the submission
    /// queue, and release the network client.
    fn drain_on_exit(&mut self) {
        let mut leftovers = self.queue.seal();
        leftovers.extend(mem::take(&mut self.pending));
        for (_, mut nq) in self.to_send.drain() {
            leftovers.extend(nq.calls.drain(..));
        }
        self.in_flight_order.clear();
        leftovers.extend(mem::take(&mut self.in_flight).into_values());
        let count = leftovers.len();
        for call in leftovers {
            self.fail_call(
                call,
                i64::MAX,
                Error::Timeout("the admin client worker thread has exited".to_string()),
            );
        }
        if count > 0 {
            debug!(count, "timed out remaining calls at shutdown");
        }
        self.client.close();
    }
}
