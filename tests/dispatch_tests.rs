//! End-to-end dispatch scenarios against the mock network client.
//!
//! These tests run the real worker thread through the public API:
//! - Happy-path call completion
//! - Controller-moved re-routing through a metadata refresh
//! - Mid-flight disconnect retry
//! - Deadline expiry during retry backoff
//! - Protocol-version downgrade
//! - Retry budget exhaustion
//!
//! Run these tests with:
//! ```bash
//! cargo test --test dispatch_tests
//! ```

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use bureaucrat::config::AdminConfig;
use bureaucrat::dispatch::{
    completion, AdminClient, Call, CallContext, CallFuture, ClientRequest, FnHandler, MockHandle,
    MockMetadataCodec, MockNetworkClient, NodeSelector, ResponsePayload,
};
use bureaucrat::error::{Error, ErrorCode};
use bureaucrat::types::{ApiKey, BrokerId, Cluster, Node};

const WAIT: Duration = Duration::from_secs(5);

fn nodes() -> Vec<Node> {
    vec![
        Node::new(BrokerId(1), "broker-1", 9092),
        Node::new(BrokerId(2), "broker-2", 9092),
        Node::new(BrokerId(3), "broker-3", 9092),
    ]
}

fn cluster_with_controller(id: i32) -> Cluster {
    Cluster::new(nodes(), Some(BrokerId(id)), Default::default())
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

fn start(codec: MockMetadataCodec) -> (AdminClient, MockHandle) {
    let client = MockNetworkClient::new(nodes());
    let handle = client.handle();
    let admin = AdminClient::new(config(), client, codec).unwrap();
    (admin, handle)
}

/// Submit a call that echoes the response body back through its future.
fn echo_call(
    admin: &AdminClient,
    selector: NodeSelector,
    timeout_ms: i64,
) -> CallFuture<Vec<u8>> {
    let (completer, future) = completion();
    let handler = FnHandler::new(
        completer,
        |_t| Ok((ApiKey::CREATE_TOPICS, Bytes::from_static(b"req"))),
        |body: Bytes, _ctx: &mut CallContext<'_>| Ok(body.to_vec()),
    );
    admin.submit(Call::new(
        "createTopics",
        admin.deadline_ms(Some(timeout_ms)),
        selector,
        Box::new(handler),
    ));
    future
}

fn ok_body() -> ResponsePayload {
    ResponsePayload::Body(Bytes::from_static(b"ok"))
}

fn creates(handle: &MockHandle) -> Vec<ClientRequest> {
    handle
        .sent()
        .into_iter()
        .filter(|r| r.api_key == ApiKey::CREATE_TOPICS)
        .collect()
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn test_happy_path_completes_against_controller() {
    let (admin, handle) = start(MockMetadataCodec::fixed(cluster_with_controller(1)));
    handle.set_auto_responder(|_req| Some(ok_body()));

    let future = echo_call(&admin, NodeSelector::Controller, 10_000);
    assert_eq!(future.wait_for(WAIT).unwrap(), b"ok".to_vec());

    let creates = creates(&handle);
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].destination, BrokerId(1));
    admin.close(Duration::from_secs(1));
}

#[test]
fn test_concurrent_calls_each_complete_once() {
    let (admin, handle) = start(MockMetadataCodec::fixed(cluster_with_controller(1)));
    handle.set_auto_responder(|req| {
        Some(ResponsePayload::Body(Bytes::from(
            req.correlation_id.value().to_be_bytes().to_vec(),
        )))
    });

    let futures: Vec<_> = (0..32)
        .map(|_| echo_call(&admin, NodeSelector::LeastLoaded, 10_000))
        .collect();
    let mut seen = Vec::new();
    for future in futures {
        seen.push(future.wait_for(WAIT).unwrap());
    }
    // Every future resolved with its own response body.
    assert_eq!(seen.len(), 32);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 32);
    admin.close(Duration::from_secs(1));
}

// ============================================================================
// Controller moved
// ============================================================================

#[test]
fn test_controller_moved_reroutes_after_refresh() {
    let (codec, codec_handle) = MockMetadataCodec::scripted();
    codec_handle.push(Ok(cluster_with_controller(1)));
    codec_handle.push(Ok(cluster_with_controller(2)));
    let (admin, handle) = start(codec);
    handle.set_auto_responder(|_req| Some(ok_body()));

    let attempts = Arc::new(AtomicUsize::new(0));
    let parse_attempts = Arc::clone(&attempts);
    let (completer, future) = completion();
    let handler = FnHandler::new(
        completer,
        |_t| Ok((ApiKey::CREATE_TOPICS, Bytes::from_static(b"req"))),
        move |body: Bytes, ctx: &mut CallContext<'_>| {
            if parse_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                // The broker we asked is no longer the controller; drop the
                // stale cache before asking for a retry.
                ctx.clear_controller();
                ctx.request_metadata_refresh();
                return Err(Error::Api(ErrorCode::NotController));
            }
            Ok(body.to_vec())
        },
    );
    admin.submit(Call::new(
        "createTopics",
        admin.deadline_ms(Some(10_000)),
        NodeSelector::Controller,
        Box::new(handler),
    ));

    assert_eq!(future.wait_for(WAIT).unwrap(), b"ok".to_vec());
    let creates = creates(&handle);
    assert_eq!(creates.len(), 2);
    assert_eq!(creates[0].destination, BrokerId(1));
    assert_eq!(creates[1].destination, BrokerId(2));
    // At least the bootstrap refresh and the re-route refresh.
    assert!(codec_handle.parsed_count() >= 2);
    admin.close(Duration::from_secs(1));
}

// ============================================================================
// Disconnect mid-flight
// ============================================================================

#[test]
fn test_disconnect_mid_flight_retries() {
    let (admin, handle) = start(MockMetadataCodec::fixed(cluster_with_controller(1)));
    let creates_seen = Arc::new(AtomicUsize::new(0));
    let responder_creates = Arc::clone(&creates_seen);
    handle.set_auto_responder(move |req| {
        if req.api_key == ApiKey::CREATE_TOPICS {
            // Leave the first attempt hanging so the test can cut the
            // connection underneath it.
            if responder_creates.fetch_add(1, Ordering::SeqCst) == 0 {
                return None;
            }
        }
        Some(ok_body())
    });

    let future = echo_call(&admin, NodeSelector::Controller, 10_000);
    assert!(wait_until(
        || creates_seen.load(Ordering::SeqCst) == 1,
        WAIT
    ));
    handle.break_connection(BrokerId(1));

    assert_eq!(future.wait_for(WAIT).unwrap(), b"ok".to_vec());
    assert_eq!(creates(&handle).len(), 2);
    admin.close(Duration::from_secs(1));
}

// ============================================================================
// Deadlines
// ============================================================================

#[test]
fn test_deadline_expires_during_backoff() {
    let mut config = config();
    // Backoff far beyond the call deadline: the first retriable failure
    // parks the call until its deadline passes.
    config.retry_backoff_ms = 60_000;
    let client = MockNetworkClient::new(nodes());
    let handle = client.handle();
    let admin =
        AdminClient::new(config, client, MockMetadataCodec::fixed(cluster_with_controller(1)))
            .unwrap();
    handle.set_auto_responder(|_req| Some(ok_body()));

    let (completer, future) = completion::<Vec<u8>>();
    let handler = FnHandler::new(
        completer,
        |_t| Ok((ApiKey::CREATE_TOPICS, Bytes::from_static(b"req"))),
        |_body: Bytes, _ctx: &mut CallContext<'_>| Err(Error::Api(ErrorCode::RequestTimedOut)),
    );
    admin.submit(Call::new(
        "createTopics",
        admin.deadline_ms(Some(1_500)),
        NodeSelector::Controller,
        Box::new(handler),
    ));

    let err = future.wait_for(WAIT).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
    // No second attempt was ever sent.
    assert_eq!(creates(&handle).len(), 1);
    admin.close(Duration::from_secs(1));
}

// ============================================================================
// Unsupported version downgrade
// ============================================================================

#[test]
fn test_unsupported_version_downgrade_resends() {
    let (admin, handle) = start(MockMetadataCodec::fixed(cluster_with_controller(1)));
    handle.set_auto_responder(|req| {
        if req.api_key == ApiKey::CREATE_TOPICS && req.body.first() == Some(&9) {
            return Some(ResponsePayload::VersionMismatch("v9 unsupported".to_string()));
        }
        Some(ok_body())
    });

    let version = Arc::new(AtomicI64::new(9));
    let build_version = Arc::clone(&version);
    let (completer, future) = completion::<Vec<u8>>();
    let handler = FnHandler::new(
        completer,
        move |_t| {
            Ok((
                ApiKey::CREATE_TOPICS,
                Bytes::from(vec![build_version.load(Ordering::SeqCst) as u8]),
            ))
        },
        |body: Bytes, _ctx: &mut CallContext<'_>| Ok(body.to_vec()),
    )
    .on_unsupported_version(move |_err| {
        version.store(7, Ordering::SeqCst);
        true
    });
    admin.submit(Call::new(
        "createTopics",
        admin.deadline_ms(Some(10_000)),
        NodeSelector::Controller,
        Box::new(handler),
    ));

    assert_eq!(future.wait_for(WAIT).unwrap(), b"ok".to_vec());
    let creates = creates(&handle);
    assert_eq!(creates.len(), 2);
    assert_eq!(creates[0].body[0], 9);
    assert_eq!(creates[1].body[0], 7);
    admin.close(Duration::from_secs(1));
}

// ============================================================================
// Retry budget
// ============================================================================

#[test]
fn test_retry_budget_bounds_attempts() {
    let (admin, handle) = start(MockMetadataCodec::fixed(cluster_with_controller(1)));
    handle.set_auto_responder(|_req| Some(ok_body()));

    let (completer, future) = completion::<Vec<u8>>();
    let handler = FnHandler::new(
        completer,
        |_t| Ok((ApiKey::CREATE_TOPICS, Bytes::from_static(b"req"))),
        |_body: Bytes, _ctx: &mut CallContext<'_>| Err(Error::Api(ErrorCode::NotController)),
    );
    admin.submit(Call::new(
        "createTopics",
        admin.deadline_ms(Some(10_000)),
        NodeSelector::LeastLoaded,
        Box::new(handler),
    ));

    assert_eq!(
        future.wait_for(WAIT),
        Err(Error::Api(ErrorCode::NotController))
    );
    // max_retries = 2: the first try plus two retries.
    assert_eq!(creates(&handle).len(), 3);
    admin.close(Duration::from_secs(1));
}
