//! Maps decoded Instaclustr records onto the exported metrics.
//!
//! Every metric lives in the `cassandra` namespace. Cluster metrics carry the `clusterId` and
//! `clusterName` labels; node metrics carry the full node identity: `clusterId`, `clusterName`,
//! `nodeId`, `nodePrivateIp`, `nodePublicIp` and `rack`.
//!
//! Client request latencies are exported in microseconds, exactly as reported upstream.
use tracing::warn;

use crate::model::{Cluster, MetricSample, Node};
use crate::registry::{LabelSet, MetricDef, MetricKind, Observation};

/// Namespace prefixed to every metric name.
pub const NAMESPACE: &str = "cassandra";

/// Metrics requested from the monitoring API for every node.
pub const NODE_METRICS_QUERY: [&str; 8] = [
    "n::cpuUtilization",
    "n::diskUtilization",
    "n::cassandraReads",
    "n::cassandraWrites",
    "n::compactions",
    "n::repairs",
    "n::clientRequestRead",
    "n::clientRequestWrite",
];

/// The node metrics query, joined as the monitoring API expects it.
pub fn node_metrics_query() -> String {
    NODE_METRICS_QUERY.join(",")
}

macro_rules! metric {
    ($ident:ident, $name:literal, $kind:ident, $help:literal) => {
        #[doc = $help]
        pub static $ident: MetricDef =
            MetricDef { name: concat!("cassandra_", $name), help: $help, kind: MetricKind::$kind };
    };
}

metric!(CLUSTER_INFO, "cluster_info", Counter, "A mapping between the clusterId and clusterName");
metric!(CLUSTER_RUNNING, "cluster_running", Gauge, "Whether or not the cassandra cluster is running.");
metric!(CLUSTER_NODES, "cluster_nodes_count", Gauge, "Number of nodes the cluster is composed");
metric!(CLUSTER_NODES_RUNNING, "cluster_nodes_running_count", Gauge, "Number of nodes running in the cluster");
metric!(NODE_INFO, "node_info", Counter, "A mapping between nodeId with its IPs, racks and cluster");
metric!(NODE_RUNNING, "node_running", Gauge, "Whether or not a single node is running");
metric!(
    NODE_CPU_UTILIZATION,
    "node_cpu_utilization_percentage",
    Gauge,
    "Current CPU utilisation as a percentage of total available. Maximum value is 100%, regardless of the number of cores on the node."
);
metric!(
    NODE_DISK_UTILIZATION,
    "node_disk_utilization_percentage",
    Gauge,
    "Total disk space utilisation, by Cassandra, as a percentage of total available."
);
metric!(NODE_READS, "node_reads_per_second", Gauge, "Reads per second by Cassandra.");
metric!(NODE_WRITES, "node_writes_per_second", Gauge, "Writes per second by Cassandra.");
metric!(NODE_COMPACTIONS, "node_compactions", Gauge, "Number of pending compactions.");
metric!(NODE_REPAIRS_PENDING, "node_repairs_pending", Gauge, "Number of pending repair tasks.");
metric!(NODE_REPAIRS_ACTIVE, "node_repairs_active", Gauge, "Number of active repair tasks.");
metric!(
    NODE_CLIENT_REQUEST_READ_LATENCY,
    "node_client_request_read_latency",
    Gauge,
    "Average latency (us/1) per client read request (i.e. the period from when a node receives a client request, gathers the records and response to the client)."
);
metric!(
    NODE_CLIENT_REQUEST_READ_PERCENTILE,
    "node_client_request_read_percentile",
    Gauge,
    "95th percentile (us) distribution per client read request (i.e. the period from when a node receives a client request, gathers the records and response to the client)."
);
metric!(
    NODE_CLIENT_REQUEST_WRITE_LATENCY,
    "node_client_request_write_latency",
    Gauge,
    "Average latency (us/1) per client write request (i.e. the period from when a node receives a client request, gathers the records and response to the client)."
);
metric!(
    NODE_CLIENT_REQUEST_WRITE_PERCENTILE,
    "node_client_request_write_percentile",
    Gauge,
    "95th percentile (us) distribution per client write request (i.e. the period from when a node receives a client request, gathers the records and response to the client)."
);

/// Every metric the exporter can produce.
#[cfg(test)]
static ALL_METRICS: [&MetricDef; 17] = [
    &CLUSTER_INFO,
    &CLUSTER_RUNNING,
    &CLUSTER_NODES,
    &CLUSTER_NODES_RUNNING,
    &NODE_INFO,
    &NODE_RUNNING,
    &NODE_CPU_UTILIZATION,
    &NODE_DISK_UTILIZATION,
    &NODE_READS,
    &NODE_WRITES,
    &NODE_COMPACTIONS,
    &NODE_REPAIRS_PENDING,
    &NODE_REPAIRS_ACTIVE,
    &NODE_CLIENT_REQUEST_READ_LATENCY,
    &NODE_CLIENT_REQUEST_READ_PERCENTILE,
    &NODE_CLIENT_REQUEST_WRITE_LATENCY,
    &NODE_CLIENT_REQUEST_WRITE_PERCENTILE,
];

/// Identity of a cluster, captured once per scrape.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterIdentity {
    pub id: String,
    pub name: String,
}

impl ClusterIdentity {
    pub fn of(cluster: &Cluster) -> Self {
        Self { id: cluster.id.clone(), name: cluster.name.clone() }
    }

    /// Labels attached to cluster metrics.
    pub fn labels(&self) -> LabelSet {
        LabelSet::from_pairs(vec![
            ("clusterId", self.id.clone()),
            ("clusterName", self.name.clone()),
        ])
    }

    /// Labels attached to every metric of `node`.
    ///
    /// Build this once per node and clone it, so every series of the node shares it.
    pub fn node_labels(&self, node: &Node) -> LabelSet {
        LabelSet::from_pairs(vec![
            ("clusterId", self.id.clone()),
            ("clusterName", self.name.clone()),
            ("nodeId", node.id.clone()),
            ("nodePrivateIp", node.private_ip.clone()),
            ("nodePublicIp", node.public_ip.clone()),
            ("rack", node.rack.clone()),
        ])
    }
}

fn running_value(running: bool) -> f64 {
    if running {
        1.0
    } else {
        0.0
    }
}

/// Info and health observations of a cluster.
pub fn cluster_observations(cluster: &Cluster) -> Vec<Observation> {
    let labels = ClusterIdentity::of(cluster).labels();
    let running = running_value(cluster.derived_status.is_running());
    vec![
        Observation::new(&CLUSTER_INFO, 1.0, labels.clone()),
        Observation::new(&CLUSTER_RUNNING, running, labels.clone()),
        Observation::new(&CLUSTER_NODES, cluster.node_count as f64, labels.clone()),
        Observation::new(&CLUSTER_NODES_RUNNING, cluster.running_node_count as f64, labels),
    ]
}

/// Info and health observations of a node.
pub fn node_observations(labels: &LabelSet, node: &Node) -> Vec<Observation> {
    vec![
        Observation::new(&NODE_INFO, 1.0, labels.clone()),
        Observation::new(&NODE_RUNNING, running_value(node.status.is_running()), labels.clone()),
    ]
}

/// Looks up the exported metric for an upstream `(metric, type)` pair.
pub fn lookup(name: &str, kind: &str) -> Option<&'static MetricDef> {
    let def = match (name, kind) {
        ("cpuUtilization", _) => &NODE_CPU_UTILIZATION,
        ("diskUtilization", _) => &NODE_DISK_UTILIZATION,
        ("cassandraReads", _) => &NODE_READS,
        ("cassandraWrites", _) => &NODE_WRITES,
        ("compactions", _) => &NODE_COMPACTIONS,
        ("repairs", "pendingtasks") => &NODE_REPAIRS_PENDING,
        ("repairs", "activetasks") => &NODE_REPAIRS_ACTIVE,
        ("clientRequestRead", "latency_per_operation") => &NODE_CLIENT_REQUEST_READ_LATENCY,
        ("clientRequestRead", "95thPercentile") => &NODE_CLIENT_REQUEST_READ_PERCENTILE,
        ("clientRequestWrite", "latency_per_operation") => &NODE_CLIENT_REQUEST_WRITE_LATENCY,
        ("clientRequestWrite", "95thPercentile") => &NODE_CLIENT_REQUEST_WRITE_PERCENTILE,
        _ => return None,
    };
    Some(def)
}

/// Maps one metric sample of a node.
///
/// Samples with an unknown `(metric, type)` pair are dropped with a warning, since the upstream
/// API may add new subtypes at any time.
pub fn map_sample(sample: &MetricSample, labels: &LabelSet) -> Option<Observation> {
    let Some(def) = lookup(&sample.name, &sample.kind) else {
        warn!(
            metric = %sample.name,
            kind = %sample.kind,
            "unknown n::{} metric type {}", sample.name, sample.kind
        );
        return None;
    };

    Some(Observation::new(def, sample.first_value(), labels.clone()))
}
