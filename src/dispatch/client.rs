//! The public handle: submission, deadlines, shutdown.
//!
//! [`AdminClient`] spawns the worker thread at construction and is the only
//! way calls get to it. It can be shared freely across threads: submission
//! appends to the mutex-guarded queue and wakes the worker; close publishes
//! a hard deadline into an atomic cell (earliest wins) and joins the
//! worker.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::config::AdminConfig;
use crate::constants::{MAX_CLOSE_WAIT_MS, WORKER_THREAD_PREFIX};
use crate::error::{Error, Result};
use crate::types::Cluster;

use super::call::{Call, CallBody};
use super::metadata::{MetadataCodec, MetadataManager};
use super::network::{NetworkClient, WorkerWaker};
use super::time::{calc_deadline_ms, Clock, SystemClock};
use super::worker::{SubmissionQueue, Worker};

/// Handle to a running admin dispatch core.
///
/// Dropping the handle closes it with the maximum wait; call
/// [`AdminClient::close`] to bound the drain.
pub struct AdminClient {
    queue: Arc<SubmissionQueue>,
    waker: Arc<dyn WorkerWaker>,
    clock: Arc<dyn Clock>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
    default_timeout_ms: i64,
    client_id: String,
}

impl AdminClient {
    /// Validate `config`, seed bootstrap metadata, and start the worker
    /// thread on the system clock.
    pub fn new<N, C>(config: AdminConfig, client: N, codec: C) -> Result<Self>
    where
        N: NetworkClient,
        C: MetadataCodec,
    {
        Self::with_clock(config, client, codec, Arc::new(SystemClock))
    }

    /// [`AdminClient::new`] with an explicit clock; tests use this to drive
    /// deadlines by hand.
    pub fn with_clock<N, C>(
        config: AdminConfig,
        client: N,
        codec: C,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        N: NetworkClient,
        C: MetadataCodec,
    {
        config.validate()?;
        let client_id = config.effective_client_id();
        let now = clock.now_ms();

        let mut metadata = MetadataManager::new(config.retry_backoff_ms, config.metadata_max_age_ms);
        metadata.update(Cluster::bootstrap(config.parse_bootstrap()?), now);

        let queue = Arc::new(SubmissionQueue::new());
        let waker = client.waker();
        let worker = Worker::new(
            &config,
            client,
            codec,
            metadata,
            Arc::clone(&queue),
            Arc::clone(&clock),
        );
        let worker_thread = std::thread::Builder::new()
            .name(format!("{WORKER_THREAD_PREFIX}-{client_id}"))
            .spawn(move || worker.run())?;

        debug!(client_id = %client_id, "admin client initialized");
        Ok(AdminClient {
            queue,
            waker,
            clock,
            worker_thread: Mutex::new(Some(worker_thread)),
            default_timeout_ms: config.request_timeout_ms,
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The current time on the client's monotonic clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Absolute deadline for a call submitted now: `now + timeout`, or the
    /// configured default timeout when `None`.
    pub fn deadline_ms(&self, timeout_ms: Option<i64>) -> i64 {
        calc_deadline_ms(self.clock.now_ms(), timeout_ms, self.default_timeout_ms)
    }

    /// Hand a call to the worker.
    ///
    /// Once a close has been initiated the call fails synchronously with a
    /// timeout error instead of being accepted.
    pub fn submit(&self, call: Call) {
        if self.queue.shutdown_initiated() {
            debug!(call = %call, "rejecting call submitted during shutdown");
            fail_rejected(
                call,
                Error::Timeout("the admin client is not accepting new calls".to_string()),
            );
            return;
        }
        match self.queue.push(call) {
            Ok(()) => self.waker.wakeup(),
            Err(call) => {
                debug!(call = %call, "rejecting call submitted after worker exit");
                fail_rejected(
                    call,
                    Error::Timeout("the admin client worker thread has exited".to_string()),
                );
            }
        }
    }

    /// Initiate shutdown and wait for the worker to drain.
    ///
    /// The worker keeps running until every non-internal call completes or
    /// `timeout` elapses, whichever comes first; remaining calls then fail
    /// with a timeout error. Racing closers combine to the earliest
    /// deadline, and every closer blocks until the worker has exited.
    pub fn close(&self, timeout: Duration) {
        let wait_ms = (timeout.as_millis().min(MAX_CLOSE_WAIT_MS as u128)) as i64;
        let now = self.clock.now_ms();
        let requested = now.saturating_add(wait_ms);
        let effective = self.queue.initiate_shutdown(requested);
        if effective == requested {
            debug!(wait_ms, "initiating close");
        } else {
            debug!("hard shutdown already scheduled earlier");
        }
        self.waker.wakeup();

        let handle = {
            let mut guard = self
                .worker_thread
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                debug!("worker thread panicked before exiting");
            }
            debug!(client_id = %self.client_id, "admin client closed");
        }
    }
}

impl Drop for AdminClient {
    fn drop(&mut self) {
        self.close(Duration::from_millis(MAX_CLOSE_WAIT_MS as u64));
    }
}

/// Complete a call that never reached the worker.
fn fail_rejected(call: Call, err: Error) {
    match call.body {
        CallBody::User(mut handler) => handler.handle_failure(err),
        CallBody::MetadataRefresh => {}
    }
}
