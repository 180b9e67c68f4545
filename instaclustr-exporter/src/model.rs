//! Typed records decoded from the Instaclustr API responses.
use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::common::{DecodeError, Shape};

/// Status of a cluster or node as reported upstream.
///
/// Only `RUNNING` is meaningful to the exporter; every other value is kept verbatim for logging.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Status {
    /// The entity is up.
    Running,
    /// Any other status, including an empty one.
    Other(String),
}

impl Status {
    /// Whether this is the `RUNNING` status.
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Other(String::new())
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        if value == "RUNNING" {
            Status::Running
        } else {
            Status::Other(value)
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer).map(|s| s.map(Status::from).unwrap_or_default())
    }
}

/// A cluster, as listed by the provisioning API.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Unique identifier of the cluster.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Number of nodes the cluster is composed of.
    pub node_count: u64,
    /// Number of those nodes currently running.
    pub running_node_count: u64,
    /// Overall status derived by the provider.
    #[serde(default)]
    pub derived_status: Status,
}

/// The status of one cluster: its data centres and their nodes.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Data centres of the cluster.
    pub data_centres: Vec<DataCentre>,
}

impl ClusterStatus {
    /// Iterates over every node of every data centre.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.data_centres.iter().flat_map(|dc| dc.nodes.iter())
    }
}

/// A data centre of a cluster.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCentre {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Cloud provider tag, e.g. `AWS_VPC`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub provider: String,
    /// Network configuration, kept opaque.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cdc_network: HashMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<Node>,
}

/// A node of a data centre.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Identifier, unique within the cluster.
    pub id: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rack: String,
    #[serde(default, rename = "publicAddress", deserialize_with = "null_as_default")]
    pub public_ip: String,
    #[serde(default, rename = "privateAddress", deserialize_with = "null_as_default")]
    pub private_ip: String,
    #[serde(default, rename = "nodeStatus")]
    pub status: Status,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spark_master: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spark_jobserver: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub zeppelin: bool,
}

/// Metrics of one node, as returned by the monitoring API.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeMetrics {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payload: Vec<MetricSample>,
}

/// One metric reported for a node.
#[derive(Clone, Debug, Deserialize)]
pub struct MetricSample {
    /// Metric name, e.g. `cpuUtilization`.
    #[serde(rename = "metric")]
    pub name: String,
    /// Metric subtype, e.g. `pendingtasks`.
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unit: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<MetricValue>,
}

impl MetricSample {
    /// Parses the first reported value.
    ///
    /// Later values are ignored. A missing or unparseable value is reported as `0`.
    pub fn first_value(&self) -> f64 {
        let Some(first) = self.values.first() else {
            warn!(metric = %self.name, kind = %self.kind, "metric has no values, using 0");
            return 0.0;
        };

        first.value.trim().parse::<f64>().unwrap_or_else(|_| {
            warn!(metric = %self.name, kind = %self.kind, value = %first.value,
                "error parsing metric value, using 0");
            0.0
        })
    }
}

/// A timestamped metric value. Both fields are strings upstream.
///
/// A numeric value is kept as its decimal text and a `null` one as an empty string, so that
/// [`MetricSample::first_value`] decides how to treat it.
#[derive(Clone, Debug, Deserialize)]
pub struct MetricValue {
    #[serde(default, deserialize_with = "value_as_text")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time: String,
}

/// The JSON body the API returns alongside error statuses.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub link: String,
}

/// Decodes an optional field, treating `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn value_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => {
            warn!(value = %other, "unexpected metric value type");
            String::new()
        }
    })
}

/// Decodes the cluster list of the provisioning API.
pub fn decode_clusters(data: &[u8]) -> Result<Vec<Cluster>, DecodeError> {
    serde_json::from_slice(data).map_err(|source| DecodeError { shape: Shape::Clusters, source })
}

/// Decodes the status of a single cluster.
pub fn decode_cluster_status(data: &[u8]) -> Result<ClusterStatus, DecodeError> {
    serde_json::from_slice(data)
        .map_err(|source| DecodeError { shape: Shape::ClusterStatus, source })
}

/// Decodes the node metrics of the monitoring API.
pub fn decode_node_metrics(data: &[u8]) -> Result<Vec<NodeMetrics>, DecodeError> {
    serde_json::from_slice(data)
        .map_err(|source| DecodeError { shape: Shape::NodeMetrics, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTERS: &str = r#"[{"cassandraVersion":"apache-cassandra-2.1.10","derivedStatus":"RUNNING","id":"cluster-uuid-1","name":"MOCKED_CLUSTER_01","nodeCount":1,"runningNodeCount":1}]"#;
    const CLUSTER_STATUS: &str = r#"{"dataCentres":[{"cdcNetwork":{"network":"a.b.0.0","prefixLength":16},"encryptionKeyId":null,"id":"datacentre-uuid-1","name":"MOCKED_DATACENTRE_01","nodeCount":1,"nodes":[{"id":"node-uuid-1","nodeStatus":"RUNNING","privateAddress":"e.f.g.h","publicAddress":"a.b.c.d","rack":"MOCKED_RACK_01","size":"size","sparkJobserver":false,"sparkMaster":false,"zeppelin":false}],"provider":"AWS_VPC","resizeTargetNodeSize":null}]}"#;
    const NOT_FOUND: &str = r#"{"link":"https://www.w3.org/Protocols/rfc2616/rfc2616-sec10.html","message":"HTTP 404 Not Found","status":404}"#;

    fn sample(value: Option<&str>) -> MetricSample {
        MetricSample {
            name: "cpuUtilization".to_string(),
            kind: "percentage".to_string(),
            unit: "1".to_string(),
            values: value
                .into_iter()
                .map(|v| MetricValue { value: v.to_string(), time: String::new() })
                .collect(),
        }
    }

    #[test]
    fn test_decode_clusters() {
        let clusters = decode_clusters(CLUSTERS.as_bytes()).unwrap();
        assert_eq!(clusters.len(), 1);

        let cluster = &clusters[0];
        assert_eq!(cluster.id, "cluster-uuid-1");
        assert_eq!(cluster.name, "MOCKED_CLUSTER_01");
        assert_eq!(cluster.node_count, 1);
        assert_eq!(cluster.running_node_count, 1);
        assert!(cluster.derived_status.is_running());
    }

    #[test]
    fn test_decode_clusters_rejects_error_body() {
        let err = decode_clusters(NOT_FOUND.as_bytes()).unwrap_err();
        assert_eq!(err.shape, Shape::Clusters);
    }

    #[test]
    fn test_decode_clusters_requires_counts() {
        let data = r#"[{"id":"c1","name":"n","derivedStatus":"RUNNING"}]"#;
        assert!(decode_clusters(data.as_bytes()).is_err());
    }

    #[test]
    fn test_decode_cluster_status() {
        let status = decode_cluster_status(CLUSTER_STATUS.as_bytes()).unwrap();
        assert_eq!(status.data_centres.len(), 1);

        let dc = &status.data_centres[0];
        assert_eq!(dc.provider, "AWS_VPC");
        assert_eq!(dc.cdc_network.get("prefixLength"), Some(&serde_json::json!(16)));

        let nodes = status.nodes().collect::<Vec<_>>();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, "node-uuid-1");
        assert_eq!(nodes[0].public_ip, "a.b.c.d");
        assert_eq!(nodes[0].private_ip, "e.f.g.h");
        assert_eq!(nodes[0].rack, "MOCKED_RACK_01");
        assert!(nodes[0].status.is_running());
    }

    #[test]
    fn test_decode_node_with_null_fields() {
        let data = r#"{"dataCentres":[{"nodes":[{"id":"n1","publicAddress":null,"nodeStatus":null}]}]}"#;
        let status = decode_cluster_status(data.as_bytes()).unwrap();
        let node = status.nodes().next().unwrap();
        assert_eq!(node.public_ip, "");
        assert_eq!(node.private_ip, "");
        assert_eq!(node.status, Status::Other(String::new()));
    }

    #[test]
    fn test_decode_cluster_status_with_null_optionals() {
        let data = r#"{"dataCentres":[{"id":null,"name":null,"provider":null,"cdcNetwork":null,"encryptionKeyId":null,"nodes":[{"id":"n1","rack":null,"size":null,"sparkMaster":null,"sparkJobserver":null,"zeppelin":null,"nodeStatus":"RUNNING"}]},{"id":"dc2","nodes":null}]}"#;
        let status = decode_cluster_status(data.as_bytes()).unwrap();
        assert_eq!(status.data_centres.len(), 2);

        let dc = &status.data_centres[0];
        assert_eq!(dc.provider, "");
        assert!(dc.cdc_network.is_empty());
        assert!(status.data_centres[1].nodes.is_empty());

        let node = status.nodes().next().unwrap();
        assert_eq!(node.rack, "");
        assert!(!node.spark_master && !node.spark_jobserver && !node.zeppelin);
        assert!(node.status.is_running());
    }

    #[test]
    fn test_status_from_string() {
        assert_eq!(Status::from("RUNNING".to_string()), Status::Running);
        assert_eq!(Status::from("running".to_string()), Status::Other("running".to_string()));
        assert_eq!(Status::from(String::new()), Status::Other(String::new()));
    }

    #[test]
    fn test_decode_node_metrics() {
        let data = r#"[{"id":"node-uuid-1","payload":[{"metric":"repairs","type":"pendingtasks","unit":"1","values":[{"time":"2017-07-03T09:37:04.000Z","value":"3"},{"time":"2017-07-03T09:36:04.000Z","value":"7"}]}]}]"#;
        let metrics = decode_node_metrics(data.as_bytes()).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].id, "node-uuid-1");

        let sample = &metrics[0].payload[0];
        assert_eq!(sample.name, "repairs");
        assert_eq!(sample.kind, "pendingtasks");
        assert_eq!(sample.first_value(), 3.0);
    }

    #[test]
    fn test_decode_node_metrics_with_odd_values() {
        let data = r#"[{"id":"n1","payload":[
            {"metric":"cpuUtilization","type":"percentage","unit":"1","values":[{"time":"t","value":"2.5884383"}]},
            {"metric":"diskUtilization","type":"percentage","unit":"1","values":[{"time":"t","value":null}]},
            {"metric":"cassandraReads","type":"count","unit":"1/s","values":[{"time":null,"value":3}]},
            {"metric":"cassandraWrites","type":"count","unit":"1/s","values":null},
            {"metric":"compactions","type":null,"unit":null,"values":[{"value":{"nested":true}}]}
        ]}]"#;
        let metrics = decode_node_metrics(data.as_bytes()).unwrap();
        let values = metrics[0].payload.iter().map(MetricSample::first_value).collect::<Vec<_>>();
        assert_eq!(values, vec![2.5884383, 0.0, 3.0, 0.0, 0.0]);
        assert_eq!(metrics[0].payload[4].kind, "");
    }

    #[test]
    fn test_decode_node_metrics_rejects_error_body() {
        let err = decode_node_metrics(NOT_FOUND.as_bytes()).unwrap_err();
        assert_eq!(err.shape, Shape::NodeMetrics);
    }

    #[test]
    fn test_first_value_substitutes_zero() {
        assert_eq!(sample(Some("2.5884383")).first_value(), 2.5884383);
        assert_eq!(sample(Some("N/A")).first_value(), 0.0);
        assert_eq!(sample(Some("")).first_value(), 0.0);
        assert_eq!(sample(None).first_value(), 0.0);
    }
}
