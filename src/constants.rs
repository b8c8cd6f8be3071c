//! Centralized configuration constants and protocol limits.
//!
//! This module consolidates the magic numbers used throughout the dispatch
//! core. Having them in one place makes it easier to:
//!
//! - Understand the timing constraints
//! - Update values consistently
//! - Document the rationale for each constant
//!
//! # Categories
//!
//! - **Timing defaults**: per-call deadlines, retry backoff, metadata age
//! - **Worker limits**: poll ceiling, shutdown clamp, downgrade cap

// =============================================================================
// Timing Defaults
// =============================================================================

/// Default per-call deadline, measured from submission.
///
/// Matches the conventional 30-second request timeout of broker admin
/// clients; callers can override it per call.
pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 30_000;

/// Default gap between attempts of the same call after a retriable failure.
pub const DEFAULT_RETRY_BACKOFF_MS: i64 = 100;

/// Default number of retry attempts beyond the first try.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default maximum age of a metadata snapshot before an in-band refresh is
/// scheduled even without an explicit request.
pub const DEFAULT_METADATA_MAX_AGE_MS: i64 = 300_000;

// =============================================================================
// Worker Limits
// =============================================================================

/// Default upper bound on how long a single `NetworkClient::poll` may
/// block.
///
/// 20 minutes. The worker normally computes a much smaller timeout from
/// deadlines, backoff, and metadata scheduling; this ceiling guards against
/// an idle worker sleeping past arithmetic mistakes in those inputs.
pub const MAX_POLL_TIMEOUT_MS: i64 = 1_200_000;

/// Upper clamp for the wait passed to `close`.
///
/// One year. A close with a longer wait is indistinguishable from "wait
/// forever" while still letting the hard-deadline cell hold a finite value.
pub const MAX_CLOSE_WAIT_MS: i64 = 365 * 24 * 60 * 60 * 1000;

/// Sentinel stored in the hard-shutdown cell while no close is in progress.
///
/// Using the maximum value lets racing closers combine through an atomic
/// `fetch_min`: the earliest requested deadline always wins.
pub const NO_SHUTDOWN: i64 = i64::MAX;

/// Maximum protocol downgrades a single call may perform.
///
/// Downgrades do not count against the retry budget, so without a cap a
/// server answering every version with a mismatch could loop a call
/// forever. The protocol ladder is opaque to the core, so the cap is a
/// constant rather than the number of known versions.
pub const MAX_PROTOCOL_DOWNGRADES: u32 = 16;

/// Thread name prefix for the worker thread.
pub const WORKER_THREAD_PREFIX: &str = "bureaucrat-worker";
