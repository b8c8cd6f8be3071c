//! Type-safe wrappers for protocol primitives and cluster topology.
//!
//! The newtypes prevent mixing up integer values that share an underlying
//! representation but carry different semantic meanings (broker ids,
//! correlation ids, partition indexes, API keys). [`Node`] and [`Cluster`]
//! describe the topology snapshot the dispatch core learns from metadata
//! refreshes.

use std::collections::HashMap;
use std::fmt;

/// A broker identifier.
///
/// Broker ids are 32-bit signed integers that uniquely identify brokers
/// within a cluster. Bootstrap nodes, whose real ids are not yet known,
/// use negative ids (see [`Cluster::bootstrap`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BrokerId(pub i32);

impl BrokerId {
    /// Invalid broker id, typically used to indicate "no such broker".
    pub const INVALID: Self = BrokerId(-1);

    /// Create a new broker id from a raw value.
    #[inline]
    pub const fn new(value: i32) -> Self {
        BrokerId(value)
    }

    /// Get the raw i32 value.
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for BrokerId {
    fn from(value: i32) -> Self {
        BrokerId(value)
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A per-client monotonic integer tagging a request and matching its
/// response.
///
/// Correlation ids are minted by the network client just before a request
/// is handed over, and are unique across the in-flight registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CorrelationId(pub i32);

impl CorrelationId {
    /// Create a new correlation id from a raw value.
    #[inline]
    pub const fn new(value: i32) -> Self {
        CorrelationId(value)
    }

    /// Get the raw i32 value.
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// The id following this one, wrapping at `i32::MAX`.
    #[inline]
    pub const fn next(self) -> Self {
        CorrelationId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A partition index within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PartitionIndex(pub i32);

impl PartitionIndex {
    /// Create a new partition index from a raw value.
    #[inline]
    pub const fn new(value: i32) -> Self {
        PartitionIndex(value)
    }

    /// Get the raw i32 value.
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PartitionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wire-protocol API key.
///
/// The dispatch core never interprets request bodies; the key travels
/// alongside the opaque bytes so the network layer can frame the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ApiKey(pub i16);

impl ApiKey {
    pub const METADATA: Self = ApiKey(3);
    pub const FIND_COORDINATOR: Self = ApiKey(10);
    pub const DESCRIBE_GROUPS: Self = ApiKey(15);
    pub const LIST_GROUPS: Self = ApiKey(16);
    pub const CREATE_TOPICS: Self = ApiKey(19);
    pub const DELETE_TOPICS: Self = ApiKey(20);
    pub const DELETE_RECORDS: Self = ApiKey(21);
    pub const DESCRIBE_ACLS: Self = ApiKey(29);
    pub const CREATE_ACLS: Self = ApiKey(30);
    pub const DELETE_ACLS: Self = ApiKey(31);
    pub const DESCRIBE_CONFIGS: Self = ApiKey(32);
    pub const ALTER_CONFIGS: Self = ApiKey(33);
    pub const ALTER_REPLICA_LOG_DIRS: Self = ApiKey(34);
    pub const DESCRIBE_LOG_DIRS: Self = ApiKey(35);
    pub const CREATE_PARTITIONS: Self = ApiKey(37);
    pub const CREATE_DELEGATION_TOKEN: Self = ApiKey(38);
    pub const RENEW_DELEGATION_TOKEN: Self = ApiKey(39);
    pub const EXPIRE_DELEGATION_TOKEN: Self = ApiKey(40);
    pub const DESCRIBE_DELEGATION_TOKEN: Self = ApiKey(41);
    pub const DELETE_GROUPS: Self = ApiKey(42);
    pub const ELECT_LEADERS: Self = ApiKey(43);
    pub const ALTER_PARTITION_REASSIGNMENTS: Self = ApiKey(45);
    pub const LIST_PARTITION_REASSIGNMENTS: Self = ApiKey(46);
    pub const ALTER_CLIENT_QUOTAS: Self = ApiKey(49);
    pub const DESCRIBE_CLIENT_QUOTAS: Self = ApiKey(51);

    /// Create a new API key from a raw value.
    #[inline]
    pub const fn new(value: i16) -> Self {
        ApiKey(value)
    }

    /// Get the raw i16 value.
    #[inline]
    pub const fn value(self) -> i16 {
        self.0
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A topic name paired with a partition index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: PartitionIndex,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition: PartitionIndex(partition),
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single broker in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: BrokerId,
    pub host: String,
    pub port: u16,
    pub rack: Option<String>,
}

impl Node {
    pub fn new(id: BrokerId, host: impl Into<String>, port: u16) -> Self {
        Node {
            id,
            host: host.into(),
            port,
            rack: None,
        }
    }

    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (id: {})", self.host, self.port, self.id)
    }
}

/// An immutable snapshot of cluster topology.
///
/// The dispatch core never mutates a snapshot in place; the in-band
/// metadata refresh replaces the whole snapshot at once.
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    nodes: HashMap<BrokerId, Node>,
    controller: Option<BrokerId>,
    leaders: HashMap<TopicPartition, BrokerId>,
    bootstrap_configured: bool,
}

impl Cluster {
    /// Build a snapshot from a full node list, the current controller (if
    /// known), and the per-partition leader map.
    pub fn new(
        nodes: Vec<Node>,
        controller: Option<BrokerId>,
        leaders: HashMap<TopicPartition, BrokerId>,
    ) -> Self {
        Cluster {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            controller,
            leaders,
            bootstrap_configured: false,
        }
    }

    /// Build the initial snapshot from configured bootstrap addresses.
    ///
    /// Bootstrap nodes get synthetic negative ids and the snapshot is
    /// flagged so it never counts as "ready" metadata.
    pub fn bootstrap(addresses: Vec<(String, u16)>) -> Self {
        let nodes = addresses
            .into_iter()
            .enumerate()
            .map(|(i, (host, port))| {
                let id = BrokerId(-(i as i32) - 1);
                (id, Node::new(id, host, port))
            })
            .collect();
        Cluster {
            nodes,
            controller: None,
            leaders: HashMap::new(),
            bootstrap_configured: true,
        }
    }

    /// Whether this snapshot came from bootstrap configuration rather than
    /// a live metadata response.
    #[inline]
    pub fn is_bootstrap_configured(&self) -> bool {
        self.bootstrap_configured
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_by_id(&self, id: BrokerId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// The distinguished node that accepts cluster-metadata-mutating
    /// requests, if this snapshot knows one.
    pub fn controller(&self) -> Option<&Node> {
        self.controller.and_then(|id| self.nodes.get(&id))
    }

    pub(crate) fn clear_controller(&mut self) {
        self.controller = None;
    }

    /// The leader for a partition, if this snapshot knows one.
    pub fn leader_for(&self, tp: &TopicPartition) -> Option<&Node> {
        self.leaders.get(tp).and_then(|id| self.nodes.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_id_basics() {
        let id = BrokerId::new(7);
        assert_eq!(id.value(), 7);
        assert_eq!(format!("{}", id), "7");
        assert_eq!(BrokerId::from(7), id);
        assert_eq!(BrokerId::INVALID.value(), -1);
    }

    #[test]
    fn test_correlation_id_next_wraps() {
        assert_eq!(CorrelationId(4).next(), CorrelationId(5));
        assert_eq!(CorrelationId(i32::MAX).next(), CorrelationId(i32::MIN));
    }

    #[test]
    fn test_api_key_constants() {
        assert_eq!(ApiKey::METADATA.value(), 3);
        assert_eq!(ApiKey::CREATE_TOPICS.value(), 19);
        assert_eq!(ApiKey::ELECT_LEADERS.value(), 43);
        assert_eq!(ApiKey::new(99).value(), 99);
    }

    #[test]
    fn test_topic_partition_display() {
        let tp = TopicPartition::new("events", 3);
        assert_eq!(format!("{}", tp), "events-3");
    }

    #[test]
    fn test_node_display_and_rack() {
        let node = Node::new(BrokerId(1), "broker-1.internal", 9092).with_rack("us-east-1a");
        assert_eq!(format!("{}", node), "broker-1.internal:9092 (id: 1)");
        assert_eq!(node.rack.as_deref(), Some("us-east-1a"));
    }

    #[test]
    fn test_cluster_lookup() {
        let mut leaders = HashMap::new();
        leaders.insert(TopicPartition::new("events", 0), BrokerId(2));
        let cluster = Cluster::new(
            vec![
                Node::new(BrokerId(1), "a", 9092),
                Node::new(BrokerId(2), "b", 9092),
            ],
            Some(BrokerId(1)),
            leaders,
        );
        assert_eq!(cluster.len(), 2);
        assert!(!cluster.is_bootstrap_configured());
        assert_eq!(cluster.node_by_id(BrokerId(2)).unwrap().host, "b");
        assert_eq!(cluster.controller().unwrap().id, BrokerId(1));
        assert_eq!(
            cluster
                .leader_for(&TopicPartition::new("events", 0))
                .unwrap()
                .id,
            BrokerId(2)
        );
        assert!(cluster.leader_for(&TopicPartition::new("events", 1)).is_none());
    }

    #[test]
    fn test_cluster_clear_controller() {
        let mut cluster = Cluster::new(
            vec![Node::new(BrokerId(1), "a", 9092)],
            Some(BrokerId(1)),
            HashMap::new(),
        );
        assert!(cluster.controller().is_some());
        cluster.clear_controller();
        assert!(cluster.controller().is_none());
    }

    #[test]
    fn test_bootstrap_cluster() {
        let cluster = Cluster::bootstrap(vec![
            ("seed-1".to_string(), 9092),
            ("seed-2".to_string(), 9093),
        ]);
        assert!(cluster.is_bootstrap_configured());
        assert_eq!(cluster.len(), 2);
        assert!(cluster.controller().is_none());
        // Synthetic ids are negative so they can never shadow real brokers.
        assert!(cluster.nodes().all(|n| n.id.value() < 0));
    }
}
