//! # Bureaucrat
//! Asynchronous administrative call-dispatch core for Kafka-compatible clusters.
//!
//! This crate provides the machinery behind a cluster admin client: a
//! single network-owning worker that multiplexes hundreds of concurrent,
//! independently deadlined, retriable RPCs (topic lifecycle, configs, ACLs,
//! group inspection, reassignment, quotas, ...) onto a pool of broker
//! connections, returning each outcome through a future-style handle.
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/) and
//!   [tracing](https://docs.rs/tracing)
//! - Keep all call state on one thread; share only a submission queue, a
//!   shutdown cell, and one-shot futures
//! - Be a building block for admin tooling against Kafka-compatible services
//!
//! ## Getting started
//! The dispatch core deliberately owns no sockets and no wire format. To
//! use it, implement [`NetworkClient`](dispatch::NetworkClient) over your
//! connection pool and [`MetadataCodec`](dispatch::MetadataCodec) over your
//! metadata RPC, then submit [`Call`](dispatch::Call)s built from your
//! per-API request builders and response parsers.
//!
//! ```rust,ignore
//! use bureaucrat::prelude::*;
//!
//! let admin = AdminClient::new(AdminConfig::default(), my_network_client, my_codec)?;
//!
//! let (completer, future) = completion();
//! let handler = FnHandler::new(
//!     completer,
//!     |timeout_ms| build_create_topics_request(timeout_ms),
//!     |body, _ctx| parse_create_topics_response(body),
//! );
//! admin.submit(Call::new(
//!     "createTopics",
//!     admin.deadline_ms(None),
//!     NodeSelector::Controller,
//!     Box::new(handler),
//! ));
//! let outcome = future.wait()?;
//! admin.close(std::time::Duration::from_secs(5));
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Confluence Docs](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports of the dispatch core.
    //!
    //! Everything needed to stand up an [`AdminClient`], submit calls, and
    //! observe their futures.

    pub use crate::config::AdminConfig;
    pub use crate::dispatch::{
        completion, AdminClient, Call, CallCompleter, CallContext, CallFuture, CallHandler,
        Clock, FnHandler, MetadataCodec, MetadataManager, NetworkClient, NodeSelector,
        ResponsePayload, SystemClock, WorkerWaker,
    };
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::types::{
        ApiKey, BrokerId, Cluster, CorrelationId, Node, PartitionIndex, TopicPartition,
    };

    pub use bytes;
}
