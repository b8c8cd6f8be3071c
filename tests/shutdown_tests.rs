//! Shutdown-drain behavior of the dispatch worker.
//!
//! Covers the hard-shutdown path (zero wait), graceful drain, racing
//! closers, and submissions arriving after close.
//!
//! Run these tests with:
//! ```bash
//! cargo test --test shutdown_tests
//! ```

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use bureaucrat::config::AdminConfig;
use bureaucrat::dispatch::{
    completion, AdminClient, Call, CallContext, CallFuture, FnHandler, MockHandle,
    MockMetadataCodec, MockNetworkClient, NodeSelector, ResponsePayload,
};
use bureaucrat::error::Error;
use bureaucrat::types::{ApiKey, BrokerId, Cluster, Node};

const WAIT: Duration = Duration::from_secs(5);

fn nodes() -> Vec<Node> {
    vec![
        Node::new(BrokerId(1), "broker-1", 9092),
        Node::new(BrokerId(2), "broker-2", 9092),
    ]
}

fn cluster() -> Cluster {
    Cluster::new(nodes(), Some(BrokerId(1)), Default::default())
}

fn config() -> AdminConfig {
    AdminConfig {
        bootstrap_servers: vec!["broker-1:9092".to_string()],
        request_timeout_ms: 5_000,
        retry_backoff_ms: 10,
        max_retries: 2,
        metadata_max_age_ms: 60_000,
        ..Default::default()
    }
}

fn start() -> (AdminClient, MockHandle) {
    let client = MockNetworkClient::new(nodes());
    let handle = client.handle();
    let admin = AdminClient::new(config(), client, MockMetadataCodec::fixed(cluster())).unwrap();
    (admin, handle)
}

fn submit_call(admin: &AdminClient, timeout_ms: i64) -> CallFuture<Vec<u8>> {
    let (completer, future) = completion();
    let handler = FnHandler::new(
        completer,
        |_t| Ok((ApiKey::CREATE_TOPICS, Bytes::from_static(b"req"))),
        |body: Bytes, _ctx: &mut CallContext<'_>| Ok(body.to_vec()),
    );
    admin.submit(Call::new(
        "createTopics",
        admin.deadline_ms(Some(timeout_ms)),
        NodeSelector::Controller,
        Box::new(handler),
    ));
    future
}

// ============================================================================
// Hard shutdown
// ============================================================================

#[test]
fn test_close_zero_fails_outstanding_call_with_timeout() {
    let (admin, handle) = start();
    // No responder: the call stays in flight until close aborts it. The
    // internal metadata refresh is discarded without reaching any future.
    let future = submit_call(&admin, 60_000);

    let started = Instant::now();
    admin.close(Duration::ZERO);
    assert!(started.elapsed() < Duration::from_secs(3));

    let err = future.wait_for(WAIT).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
    assert!(handle.is_closed());
}

#[test]
fn test_close_returns_even_when_nothing_was_submitted() {
    let (admin, handle) = start();
    admin.close(Duration::ZERO);
    assert!(handle.is_closed());
}

// ============================================================================
// Graceful drain
// ============================================================================

#[test]
fn test_close_waits_for_outstanding_work() {
    let (admin, handle) = start();
    handle.set_auto_responder(|_req| Some(ResponsePayload::Body(Bytes::from_static(b"ok"))));
    let future = submit_call(&admin, 10_000);

    admin.close(Duration::from_secs(5));
    assert_eq!(future.wait_for(WAIT).unwrap(), b"ok".to_vec());
}

// ============================================================================
// Racing closers and late submissions
// ============================================================================

#[test]
fn test_racing_closers_take_the_earliest_deadline() {
    let (admin, _handle) = start();
    let _future = submit_call(&admin, 600_000);

    let admin = Arc::new(admin);
    let slow = Arc::clone(&admin);
    let slow_closer = thread::spawn(move || slow.close(Duration::from_secs(120)));
    // Give the slow closer a head start, then demand an immediate stop.
    thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    admin.close(Duration::ZERO);
    slow_closer.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_submission_after_close_fails_synchronously() {
    let (admin, _handle) = start();
    admin.close(Duration::ZERO);

    let future = submit_call(&admin, 10_000);
    let err = future.wait_for(WAIT).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[test]
fn test_drop_closes_the_worker() {
    let (admin, handle) = start();
    handle.set_auto_responder(|_req| Some(ResponsePayload::Body(Bytes::from_static(b"ok"))));
    let future = submit_call(&admin, 10_000);
    assert!(future.wait_for(WAIT).is_ok());
    drop(admin);
    assert!(handle.is_closed());
}
