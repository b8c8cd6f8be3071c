//! Call descriptors and completion futures.
//!
//! A [`Call`] is one user-initiated administrative operation, possibly
//! retried across multiple wire attempts. The worker owns every call
//! outright and moves it between its collections; per-operation behavior
//! hangs off the [`CallHandler`] trait (or the closure-based [`FnHandler`]
//! adapter), and the outcome reaches the caller through a one-shot
//! [`CallFuture`].

use std::fmt;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::types::{ApiKey, Node};

use super::metadata::MetadataManager;
use super::selector::NodeSelector;

/// Side-channel handed to [`CallHandler::handle_response`] so a handler can
/// adjust the worker's metadata view before asking for a retry.
///
/// The canonical use is the controller-moved dance: drop the cached
/// controller, request a refresh, then return the retriable error so the
/// next attempt re-selects a destination.
pub struct CallContext<'a> {
    pub(crate) metadata: &'a mut MetadataManager,
}

impl CallContext<'_> {
    /// Forget the cached controller.
    pub fn clear_controller(&mut self) {
        self.metadata.clear_controller();
    }

    /// Ask for a metadata refresh at the next opportunity.
    pub fn request_metadata_refresh(&mut self) {
        self.metadata.request_update();
    }
}

/// Per-operation behavior of a call.
///
/// The worker invokes these hooks from its own thread; implementations
/// complete the caller's future from `handle_response` (success) or
/// `handle_failure` (the single terminal error).
pub trait CallHandler: Send {
    /// Build the wire request for one attempt. `timeout_ms` is the call's
    /// remaining deadline, already clamped to the wire range.
    ///
    /// Failure here is an internal error and terminates the call.
    fn build_request(&mut self, timeout_ms: i32) -> Result<(ApiKey, Bytes)>;

    /// Consume a successful response body.
    ///
    /// Returning an error routes the call through the failure ladder: a
    /// retriable error requests another attempt, anything else is
    /// terminal. Implementations that detect a moved controller or
    /// coordinator must clear the stale cache via `ctx` before returning
    /// the retriable error.
    fn handle_response(&mut self, body: Bytes, ctx: &mut CallContext<'_>) -> Result<()>;

    /// Terminal failure sink. Called exactly once, and only if the call
    /// never completed successfully.
    fn handle_failure(&mut self, err: Error);

    /// Offered an unsupported-version failure before retry accounting.
    /// Return true only after reconfiguring the next `build_request` to
    /// use a lower protocol level.
    fn handle_unsupported_version(&mut self, err: &Error) -> bool {
        let _ = err;
        false
    }
}

/// What the worker dispatches when a call's response or failure arrives.
pub(crate) enum CallBody {
    /// A user operation behind the handler trait.
    User(Box<dyn CallHandler>),
    /// The internal metadata refresh; the worker handles it inline with
    /// the metadata codec.
    MetadataRefresh,
}

/// A single administrative operation flowing through the dispatch core.
pub struct Call {
    pub(crate) name: &'static str,
    pub(crate) internal: bool,
    pub(crate) deadline_ms: i64,
    pub(crate) selector: NodeSelector,
    pub(crate) tries: u32,
    pub(crate) downgrades: u32,
    /// The next send is a protocol-downgrade resend and must not count as
    /// a fresh attempt.
    pub(crate) downgrade_retry: bool,
    pub(crate) next_allowed_try_ms: i64,
    pub(crate) cur_node: Option<Node>,
    pub(crate) aborted: bool,
    pub(crate) body: CallBody,
}

impl Call {
    /// Create a user call. `deadline_ms` is absolute on the client's
    /// monotonic clock and fixed for the life of the call; see
    /// [`AdminClient::deadline_ms`](super::AdminClient::deadline_ms).
    pub fn new(
        name: &'static str,
        deadline_ms: i64,
        selector: NodeSelector,
        handler: Box<dyn CallHandler>,
    ) -> Self {
        Call {
            name,
            internal: false,
            deadline_ms,
            selector,
            tries: 0,
            downgrades: 0,
            downgrade_retry: false,
            next_allowed_try_ms: 0,
            cur_node: None,
            aborted: false,
            body: CallBody::User(handler),
        }
    }

    /// The internal metadata refresh call.
    pub(crate) fn metadata_refresh(deadline_ms: i64) -> Self {
        Call {
            name: "fetchMetadata",
            internal: true,
            deadline_ms,
            selector: NodeSelector::MetadataBootstrap,
            tries: 0,
            downgrades: 0,
            downgrade_retry: false,
            next_allowed_try_ms: 0,
            cur_node: None,
            aborted: false,
            body: CallBody::MetadataRefresh,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True for the metadata refresh call; internal calls do not keep the
    /// worker alive during shutdown drain.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub(crate) fn handle_unsupported_version(&mut self, err: &Error) -> bool {
        match &mut self.body {
            CallBody::User(handler) => handler.handle_unsupported_version(err),
            CallBody::MetadataRefresh => false,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Call(name={}, deadline={})", self.name, self.deadline_ms)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("name", &self.name)
            .field("internal", &self.internal)
            .field("deadline_ms", &self.deadline_ms)
            .field("selector", &self.selector)
            .field("tries", &self.tries)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

/// Create a linked completer/future pair for one call.
pub fn completion<T>() -> (CallCompleter<T>, CallFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (CallCompleter { tx: Some(tx) }, CallFuture { rx })
}

/// The worker-side half of a call's outcome. Completing it a second time
/// is a no-op; the first outcome wins.
pub struct CallCompleter<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> CallCompleter<T> {
    /// Deliver the success value. Returns false if already completed.
    pub fn complete(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Deliver the terminal error. Returns false if already completed.
    pub fn fail(&mut self, err: Error) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(Err(err)).is_ok(),
            None => false,
        }
    }

    /// Whether an outcome has already been delivered.
    pub fn is_done(&self) -> bool {
        self.tx.is_none()
    }
}

/// The caller-side handle observing one call's outcome.
///
/// Await it from async code, or use [`CallFuture::wait`] /
/// [`CallFuture::wait_for`] from a plain thread.
pub struct CallFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CallFuture<T> {
    /// Block until the call completes.
    pub fn wait(self) -> Result<T> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(dropped_without_completion()))
    }

    /// Block until the call completes or `timeout` elapses.
    pub fn wait_for(mut self, timeout: std::time::Duration) -> Result<T> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.rx.try_recv() {
                Ok(outcome) => return outcome,
                Err(oneshot::error::TryRecvError::Closed) => {
                    return Err(dropped_without_completion())
                }
                Err(oneshot::error::TryRecvError::Empty) => {
                    if std::time::Instant::now() >= deadline {
                        return Err(Error::Timeout(
                            "gave up waiting for the call future".to_string(),
                        ));
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            }
        }
    }
}

impl<T> std::future::Future for CallFuture<T> {
    type Output = Result<T>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::future::Future::poll(std::pin::Pin::new(&mut self.rx), cx)
            .map(|r| r.unwrap_or_else(|_| Err(dropped_without_completion())))
    }
}

fn dropped_without_completion() -> Error {
    Error::Internal("call was dropped without completing its future".to_string())
}

/// [`CallHandler`] assembled from plain closures: a request builder, a
/// response parser, and optionally a protocol-downgrade hook. This is the
/// lightest way for an API façade (or a test) to express an operation.
pub struct FnHandler<T, B, P>
where
    T: Send,
    B: FnMut(i32) -> Result<(ApiKey, Bytes)> + Send,
    P: FnMut(Bytes, &mut CallContext<'_>) -> Result<T> + Send,
{
    completer: CallCompleter<T>,
    build: B,
    parse: P,
    downgrade: Option<Box<dyn FnMut(&Error) -> bool + Send>>,
}

impl<T, B, P> FnHandler<T, B, P>
where
    T: Send,
    B: FnMut(i32) -> Result<(ApiKey, Bytes)> + Send,
    P: FnMut(Bytes, &mut CallContext<'_>) -> Result<T> + Send,
{
    pub fn new(completer: CallCompleter<T>, build: B, parse: P) -> Self {
        FnHandler {
            completer,
            build,
            parse,
            downgrade: None,
        }
    }

    /// Install a downgrade hook; it must reconfigure the builder before
    /// returning true.
    pub fn on_unsupported_version(
        mut self,
        hook: impl FnMut(&Error) -> bool + Send + 'static,
    ) -> Self {
        self.downgrade = Some(Box::new(hook));
        self
    }
}

impl<T, B, P> CallHandler for FnHandler<T, B, P>
where
    T: Send,
    B: FnMut(i32) -> Result<(ApiKey, Bytes)> + Send,
    P: FnMut(Bytes, &mut CallContext<'_>) -> Result<T> + Send,
{
    fn build_request(&mut self, timeout_ms: i32) -> Result<(ApiKey, Bytes)> {
        (self.build)(timeout_ms)
    }

    fn handle_response(&mut self, body: Bytes, ctx: &mut CallContext<'_>) -> Result<()> {
        let value = (self.parse)(body, ctx)?;
        self.completer.complete(value);
        Ok(())
    }

    fn handle_failure(&mut self, err: Error) {
        self.completer.fail(err);
    }

    fn handle_unsupported_version(&mut self, err: &Error) -> bool {
        match &mut self.downgrade {
            Some(hook) => hook(err),
            None => false,
        }
    }
}
