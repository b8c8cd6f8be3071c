//! Cluster metadata bookkeeping for the dispatch core.
//!
//! The worker owns one [`MetadataManager`]. Node selectors read it to pick
//! destinations and nudge it (`request_update`) when the view is missing or
//! stale; the in-band metadata refresh call replaces the snapshot wholesale.
//!
//! # Refresh scheduling
//!
//! The manager is a three-state machine:
//!
//! 1. **Quiescent** - the snapshot is current; a refresh becomes due when
//!    it reaches `max_age_ms`.
//! 2. **UpdateRequested** - something wants fresher metadata; a refresh
//!    becomes due once the backoff since the last attempt has elapsed.
//! 3. **UpdatePending** - a refresh call is in flight; nothing is due.
//!
//! [`MetadataManager::metadata_fetch_delay_ms`] collapses the state into
//! "milliseconds until a refresh is due" (zero means now), which the worker
//! folds into its poll timeout.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{ApiKey, BrokerId, Cluster, Node};

/// Builder/parser pair for the internal metadata refresh call.
///
/// The refresh call asks for node topology only (no topics); the concrete
/// wire format is supplied by the layer that owns encoding.
pub trait MetadataCodec: Send + 'static {
    /// Build the refresh request for an attempt with `timeout_ms` left.
    fn build_request(&self, timeout_ms: i32) -> (ApiKey, Bytes);

    /// Parse a refresh response body into a topology snapshot.
    fn parse_response(&self, body: Bytes) -> Result<Cluster>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateState {
    Quiescent,
    UpdateRequested,
    UpdatePending,
}

/// The worker's view of cluster topology plus refresh scheduling.
#[derive(Debug)]
pub struct MetadataManager {
    state: UpdateState,
    cluster: Cluster,
    /// Whether any non-bootstrap snapshot has ever been applied.
    updated: bool,
    last_update_ms: i64,
    last_attempt_ms: i64,
    refresh_backoff_ms: i64,
    max_age_ms: i64,
    /// Authentication failure from the last refresh attempt. Cleared by a
    /// later successful snapshot; until then metadata-dependent selectors
    /// surface it to their calls.
    fatal_auth: Option<Error>,
}

impl MetadataManager {
    pub fn new(refresh_backoff_ms: i64, max_age_ms: i64) -> Self {
        MetadataManager {
            state: UpdateState::UpdateRequested,
            cluster: Cluster::default(),
            updated: false,
            last_update_ms: 0,
            last_attempt_ms: 0,
            refresh_backoff_ms,
            max_age_ms,
            fatal_auth: None,
        }
    }

    /// Whether the current snapshot is usable for node selection.
    /// Bootstrap snapshots never are.
    pub fn is_ready(&self) -> bool {
        self.updated && !self.cluster.is_empty() && !self.cluster.is_bootstrap_configured()
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn controller(&self) -> Option<&Node> {
        self.cluster.controller()
    }

    pub fn node_by_id(&self, id: BrokerId) -> Option<&Node> {
        self.cluster.node_by_id(id)
    }

    /// Forget the cached controller. Called by response handlers that just
    /// learned the controller moved, before they return the retriable
    /// error that re-routes their call.
    pub fn clear_controller(&mut self) {
        self.cluster.clear_controller();
    }

    /// Ask for fresher metadata. A refresh already in flight is left alone.
    pub fn request_update(&mut self) {
        if self.state == UpdateState::Quiescent {
            self.state = UpdateState::UpdateRequested;
        }
    }

    /// Milliseconds until a refresh is due; zero means due now.
    pub fn metadata_fetch_delay_ms(&self, now: i64) -> i64 {
        match self.state {
            // Refreshes triggered by age alone still respect the backoff.
            UpdateState::Quiescent => self
                .delay_before_next_attempt(now)
                .max(self.delay_before_expiry(now)),
            UpdateState::UpdateRequested => self.delay_before_next_attempt(now),
            UpdateState::UpdatePending => i64::MAX,
        }
    }

    fn delay_before_expiry(&self, now: i64) -> i64 {
        (self.last_update_ms.saturating_add(self.max_age_ms) - now).max(0)
    }

    fn delay_before_next_attempt(&self, now: i64) -> i64 {
        (self.last_attempt_ms.saturating_add(self.refresh_backoff_ms) - now).max(0)
    }

    /// Record that the worker just issued a refresh call.
    pub fn transition_to_update_pending(&mut self, now: i64) {
        self.state = UpdateState::UpdatePending;
        self.last_attempt_ms = now;
    }

    /// Apply a topology snapshot.
    ///
    /// Bootstrap snapshots seed the node list without marking the manager
    /// ready. An empty live snapshot advances the clock but also leaves the
    /// manager not ready, so selectors keep asking for refreshes.
    pub fn update(&mut self, cluster: Cluster, now: i64) {
        if !cluster.is_bootstrap_configured() {
            self.updated = true;
            self.fatal_auth = None;
            if cluster.is_empty() {
                warn!("metadata response contained no nodes");
            }
            let controller = cluster.controller().map(|n| n.id).unwrap_or(BrokerId::INVALID);
            debug!(nodes = cluster.len(), controller = %controller, "updated cluster metadata");
        }
        self.cluster = cluster;
        self.state = UpdateState::Quiescent;
        self.last_update_ms = now;
    }

    /// Record a terminal refresh failure and schedule a retry after the
    /// backoff. Authentication failures are remembered and surfaced
    /// through node selection until a later snapshot succeeds.
    pub fn update_failed(&mut self, err: &Error, now: i64) {
        debug!(error = %err, "metadata update failed");
        if matches!(err, Error::Authentication(_)) {
            self.fatal_auth = Some(err.clone());
        }
        self.state = UpdateState::UpdateRequested;
        // Shutdown drain fails leftovers at now = i64::MAX; that timestamp
        // must not poison the backoff arithmetic.
        if now != i64::MAX {
            self.last_attempt_ms = now;
        }
    }

    /// The stored authentication failure, if refreshes are failing to
    /// authenticate.
    pub fn auth_error(&self) -> Option<&Error> {
        self.fatal_auth.as_ref()
    }
}
