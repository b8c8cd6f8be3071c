//! The network-client contract the worker drives.
//!
//! The dispatch core owns no sockets. It talks to a connection pool through
//! [`NetworkClient`]: a ready/send/poll/disconnect surface whose single
//! blocking point is [`NetworkClient::poll`]. Request and response bodies
//! are opaque [`Bytes`]; framing, version negotiation, and authentication
//! live behind the trait.
//!
//! Implementations must guarantee:
//!
//! - `poll` returns promptly after a [`WorkerWaker::wakeup`] that raced or
//!   preceded it.
//! - Disconnecting a node surfaces every in-flight request to that node as
//!   a [`ResponsePayload::Disconnected`] response on a later `poll`, and
//!   never disturbs requests targeting other nodes.
//! - Correlation ids minted by [`NetworkClient::next_correlation_id`] are
//!   unique among outstanding requests.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;
use crate::types::{ApiKey, BrokerId, CorrelationId, Node};

/// A wire request handed to the network layer.
///
/// The body was produced by the call's request builder for exactly this
/// attempt; `timeout_ms` is the call's remaining deadline at build time.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub destination: BrokerId,
    pub correlation_id: CorrelationId,
    pub api_key: ApiKey,
    pub timeout_ms: i32,
    pub body: Bytes,
}

/// A completed exchange reported by [`NetworkClient::poll`].
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub destination: BrokerId,
    pub correlation_id: CorrelationId,
    pub payload: ResponsePayload,
}

/// What came back for a request.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    /// A decoded-frame body, still opaque to the core.
    Body(Bytes),
    /// The destination rejected the protocol version before the request
    /// was sent; the message describes the mismatch.
    VersionMismatch(String),
    /// The connection dropped before a response arrived.
    Disconnected,
}

/// Cloneable handle that wakes the worker out of `poll` from other threads.
///
/// Captured via [`NetworkClient::waker`] before the client moves into the
/// worker thread; submission and close paths hold only this handle.
pub trait WorkerWaker: Send + Sync {
    fn wakeup(&self);
}

/// Connection-pool primitives consumed by the worker.
pub trait NetworkClient: Send + 'static {
    /// Whether a connection to `node` is established, authenticated, and
    /// writable right now. May initiate a connection attempt.
    fn ready(&mut self, node: &Node, now: i64) -> bool;

    /// When `ready` returned false: how long until it is worth asking
    /// again (connection backoff, throttle, handshake in progress).
    fn poll_delay_ms(&self, node: &Node, now: i64) -> i64;

    /// Mint the correlation id for the next request.
    fn next_correlation_id(&mut self) -> CorrelationId;

    /// Non-blocking enqueue of `request` for its destination. Only called
    /// after `ready` returned true for the node this iteration.
    fn send(&mut self, request: ClientRequest, now: i64);

    /// Drive I/O, blocking at most `timeout_ms`, and return completed
    /// exchanges in arrival order.
    fn poll(&mut self, timeout_ms: i64, now: i64) -> Vec<ClientResponse>;

    /// The known node with the fewest outstanding requests, by the
    /// client's own count, or `None` when every node is saturated or
    /// unknown.
    fn least_loaded_node(&mut self, now: i64) -> Option<Node>;

    /// Force-close the connection to a node. In-flight requests to it will
    /// surface as disconnected responses.
    fn disconnect(&mut self, node: BrokerId);

    /// Whether the connection to `node` failed since the last poll.
    fn connection_failed(&self, node: &Node) -> bool;

    /// The authentication error that broke the connection to `node`, if
    /// that is why it broke.
    fn authentication_error(&self, node: &Node) -> Option<Error>;

    /// A wake handle usable from other threads for the lifetime of this
    /// client.
    fn waker(&self) -> Arc<dyn WorkerWaker>;

    /// Release connections; called once when the worker exits.
    fn close(&mut self);
}
