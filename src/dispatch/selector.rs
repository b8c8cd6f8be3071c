//! Destination selection for pending calls.
//!
//! Selectors are a closed set of four strategies, so they live in an enum
//! the worker can match exhaustively. Each is a pure function of the
//! metadata view, the network client, and the current time; "no node right
//! now" is a first-class outcome that leaves the call pending without
//! consuming retry budget.

use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{BrokerId, Node};

use super::metadata::MetadataManager;
use super::network::NetworkClient;

/// Strategy for picking a call's destination node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelector {
    /// The node with the fewest in-flight requests. Requires ready
    /// metadata.
    LeastLoaded,
    /// The current controller. Requires ready metadata naming one.
    Controller,
    /// A specific broker, for broker-scoped operations (log dirs, per-
    /// broker configs). Requires ready metadata containing the id.
    ConstantId(BrokerId),
    /// The least-loaded node straight from the network client, usable
    /// before metadata is ready. Reserved for the metadata refresh call
    /// itself.
    MetadataBootstrap,
}

impl NodeSelector {
    /// Pick a destination, or `None` to stay pending (a metadata refresh
    /// has been requested where that could help). An error fails the call.
    pub(crate) fn provide<N: NetworkClient>(
        &self,
        metadata: &mut MetadataManager,
        client: &mut N,
        now: i64,
    ) -> Result<Option<Node>> {
        match self {
            NodeSelector::LeastLoaded => {
                check_auth(metadata)?;
                if metadata.is_ready() {
                    // May still be None if every node is saturated; the
                    // call waits for the next iteration.
                    Ok(client.least_loaded_node(now))
                } else {
                    metadata.request_update();
                    Ok(None)
                }
            }
            NodeSelector::Controller => {
                check_auth(metadata)?;
                if metadata.is_ready() {
                    if let Some(node) = metadata.controller() {
                        return Ok(Some(node.clone()));
                    }
                }
                metadata.request_update();
                Ok(None)
            }
            NodeSelector::ConstantId(id) => {
                check_auth(metadata)?;
                if metadata.is_ready() {
                    if let Some(node) = metadata.node_by_id(*id) {
                        return Ok(Some(node.clone()));
                    }
                }
                // The broker may simply not have joined yet; ask for fresh
                // metadata and hope it appears.
                trace!(broker = %id, "broker not in current metadata");
                metadata.request_update();
                Ok(None)
            }
            NodeSelector::MetadataBootstrap => Ok(client.least_loaded_node(now)),
        }
    }
}

fn check_auth(metadata: &MetadataManager) -> Result<()> {
    match metadata.auth_error() {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}
