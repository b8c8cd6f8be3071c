//! The asynchronous call-dispatch core.
//!
//! A single worker thread multiplexes every administrative call onto a
//! shared pool of broker connections: it picks destinations from learned
//! cluster metadata, enforces per-call deadlines and retry backoff,
//! negotiates protocol-version fallbacks, refreshes metadata in-band, and
//! drains cleanly under a user-supplied shutdown deadline.
//!
//! # Architecture
//!
//! ```text
//!  caller threads                     worker thread
//! ┌──────────────┐   submit    ┌──────────────────────────┐
//! │ AdminClient  │────────────▶│ submission queue (mutex) │
//! └──────┬───────┘             └────────────┬─────────────┘
//!        │ CallFuture                       ▼ drain
//!        │                     ┌──────────────────────────┐
//!        │                     │       pending set        │◀─── retry /
//!        │                     └────────────┬─────────────┘     downgrade
//!        │                      NodeSelector▼
//!        │                     ┌──────────────────────────┐
//!        │                     │   per-node send queues   │
//!        │                     └────────────┬─────────────┘
//!        │                          send    ▼
//!        │                     ┌──────────────────────────┐
//!        │ complete / fail     │    in-flight registry    │
//!        └─────────────────────┤  (by correlation id and  │
//!                              │     destination node)    │
//!                              └────────────┬─────────────┘
//!                                           ▼
//!                                  NetworkClient::poll
//! ```
//!
//! Calls are owned by exactly one collection at a time; the worker moves
//! them between collections and completes each future exactly once.
//!
//! # Collaborators
//!
//! The wire protocol and the socket layer stay outside the core: request
//! and response bodies are opaque bytes, the connection pool lives behind
//! the [`NetworkClient`] trait, and the refresh call's builder/parser pair
//! behind [`MetadataCodec`].

mod call;
mod client;
mod metadata;
mod network;
mod selector;
mod time;
mod worker;

#[cfg(any(test, feature = "test-utilities"))]
pub mod mock;

pub use call::{
    completion, Call, CallCompleter, CallContext, CallFuture, CallHandler, FnHandler,
};
pub use client::AdminClient;
pub use metadata::{MetadataCodec, MetadataManager};
pub use network::{ClientRequest, ClientResponse, NetworkClient, ResponsePayload, WorkerWaker};
pub use selector::NodeSelector;
pub use time::{Clock, SystemClock};

#[cfg(any(test, feature = "test-utilities"))]
pub use mock::{ManualClock, MockCodecHandle, MockHandle, MockMetadataCodec, MockNetworkClient};
