//! The per-scrape collection pipeline.
//!
//! A scrape fetches the cluster list, then fans out one task per cluster and, inside each
//! cluster, one task per node. Every branch writes straight into the [`MetricSink`]. Failures
//! below the cluster list only remove the failing branch from the output.
use std::num::NonZeroUsize;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use quanta::Instant;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::client::{MonitoringApi, ProvisioningApi};
use crate::common::{FetchError, ScrapeError};
use crate::mapper::{
    cluster_observations, map_sample, node_metrics_query, node_observations, ClusterIdentity,
};
use crate::model::{
    decode_cluster_status, decode_clusters, decode_node_metrics, Cluster, ClusterStatus, Node,
    NodeMetrics,
};
use crate::registry::MetricSink;

/// Counters describing how a scrape went.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScrapeSummary {
    /// Clusters in the cluster list.
    pub clusters: usize,
    /// Clusters whose status could not be fetched or decoded.
    pub clusters_failed: usize,
    /// Nodes found across all clusters.
    pub nodes: usize,
    /// Nodes whose metrics could not be fetched or decoded.
    pub nodes_failed: usize,
    /// Branches still running when the scrape timeout fired.
    pub timed_out: usize,
}

#[derive(Default)]
struct Stats {
    clusters_failed: AtomicUsize,
    nodes: AtomicUsize,
    nodes_failed: AtomicUsize,
}

struct Inner {
    provisioning: Arc<dyn ProvisioningApi>,
    monitoring: Arc<dyn MonitoringApi>,
    limiter: Option<Semaphore>,
    scrape_timeout: Option<Duration>,
    query: String,
}

/// Collects Cassandra metrics from the Instaclustr APIs.
///
/// The collector keeps no state between scrapes; clones share the same clients.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

impl Collector {
    /// Creates a collector using the given API clients.
    pub fn new(provisioning: Arc<dyn ProvisioningApi>, monitoring: Arc<dyn MonitoringApi>) -> Self {
        Self::with_options(provisioning, monitoring, None, None)
    }

    /// Creates a collector with limits.
    ///
    /// `max_concurrent_requests` bounds the number of in-flight upstream calls; `scrape_timeout`
    /// bounds how long a scrape waits for its branches. Both default to unbounded.
    pub fn with_options(
        provisioning: Arc<dyn ProvisioningApi>,
        monitoring: Arc<dyn MonitoringApi>,
        max_concurrent_requests: Option<NonZeroUsize>,
        scrape_timeout: Option<Duration>,
    ) -> Self {
        let limiter = max_concurrent_requests.map(|n| Semaphore::new(n.get()));
        Self {
            inner: Arc::new(Inner {
                provisioning,
                monitoring,
                limiter,
                scrape_timeout,
                query: node_metrics_query(),
            }),
        }
    }

    /// Runs one scrape, writing every observation into `sink`.
    ///
    /// Returns once every cluster and node branch has finished, or once the scrape timeout has
    /// elapsed.
    ///
    /// # Errors
    ///
    /// If the cluster list cannot be fetched or decoded, nothing is written and an error is
    /// returned. Any other failure is logged and only drops the affected branch.
    pub async fn scrape<S>(&self, sink: Arc<S>) -> Result<ScrapeSummary, ScrapeError>
    where
        S: MetricSink + ?Sized + 'static,
    {
        let start = Instant::now();

        let data = {
            let _permit = self.permit().await;
            self.inner.provisioning.list_clusters().await?
        };
        let clusters = decode_clusters(&data)?;

        let stats = Arc::new(Stats::default());
        let mut workers = JoinSet::new();
        for cluster in clusters.iter().cloned() {
            let this = self.clone();
            let sink = sink.clone();
            let stats = stats.clone();
            workers.spawn(async move { this.collect_cluster(cluster, sink, stats).await });
        }
        let timed_out = self.join(workers, "cluster").await;

        let summary = ScrapeSummary {
            clusters: clusters.len(),
            clusters_failed: stats.clusters_failed.load(Ordering::Relaxed),
            nodes: stats.nodes.load(Ordering::Relaxed),
            nodes_failed: stats.nodes_failed.load(Ordering::Relaxed),
            timed_out,
        };
        debug!(
            clusters = summary.clusters,
            clusters_failed = summary.clusters_failed,
            nodes = summary.nodes,
            nodes_failed = summary.nodes_failed,
            timed_out = summary.timed_out,
            elapsed = ?start.elapsed(),
            "scrape finished"
        );

        Ok(summary)
    }

    /// Waits for every worker, honoring the scrape timeout.
    ///
    /// Returns how many workers were aborted.
    async fn join(&self, mut workers: JoinSet<()>, branch: &'static str) -> usize {
        let drain = async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "{} worker failed", branch);
                }
            }
        };

        match self.inner.scrape_timeout {
            None => {
                drain.await;
                0
            }
            Some(timeout) => {
                if tokio::time::timeout(timeout, drain).await.is_ok() {
                    return 0;
                }
                let unfinished = workers.len();
                warn!(unfinished, ?timeout, "scrape timed out, aborting {} branches", branch);
                workers.abort_all();
                // Aborted tasks may still be mid-poll; wait for them so nothing writes afterwards.
                while workers.join_next().await.is_some() {}
                unfinished
            }
        }
    }

    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        match &self.inner.limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        }
    }

    async fn cluster_status(&self, cluster_id: &str) -> Result<ClusterStatus, FetchError> {
        let data = {
            let _permit = self.permit().await;
            self.inner.provisioning.cluster_status(cluster_id).await?
        };
        Ok(decode_cluster_status(&data)?)
    }

    async fn node_metrics(&self, node_id: &str) -> Result<Vec<NodeMetrics>, FetchError> {
        let data = {
            let _permit = self.permit().await;
            self.inner.monitoring.node_metrics(node_id, &self.inner.query).await?
        };
        Ok(decode_node_metrics(&data)?)
    }

    async fn collect_cluster<S>(&self, cluster: Cluster, sink: Arc<S>, stats: Arc<Stats>)
    where
        S: MetricSink + ?Sized + 'static,
    {
        sink.emit_all(cluster_observations(&cluster));

        let status = match self.cluster_status(&cluster.id).await {
            Ok(status) => status,
            Err(e) => {
                error!(cluster_id = %cluster.id, error = %e, "couldn't get cluster datacentres");
                stats.clusters_failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let identity = ClusterIdentity::of(&cluster);
        let mut workers = JoinSet::new();
        for node in status.nodes().cloned() {
            stats.nodes.fetch_add(1, Ordering::Relaxed);
            let this = self.clone();
            let sink = sink.clone();
            let stats = stats.clone();
            let identity = identity.clone();
            workers.spawn(async move { this.collect_node(identity, node, sink, stats).await });
        }

        // Aborting this task drops `workers`, which aborts the node tasks too.
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(cluster_id = %cluster.id, error = %e, "node worker failed");
            }
        }
    }

    async fn collect_node<S>(
        &self,
        cluster: ClusterIdentity,
        node: Node,
        sink: Arc<S>,
        stats: Arc<Stats>,
    ) where
        S: MetricSink + ?Sized + 'static,
    {
        let labels = cluster.node_labels(&node);
        sink.emit_all(node_observations(&labels, &node));

        let metrics = match self.node_metrics(&node.id).await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(
                    cluster_id = %cluster.id,
                    node_id = %node.id,
                    error = %e,
                    "could not gather any metric"
                );
                stats.nodes_failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // One batch per response, so a node's samples always come from the same call.
        let observations = metrics
            .iter()
            .flat_map(|m| m.payload.iter())
            .filter_map(|sample| map_sample(sample, &labels))
            .collect::<Vec<_>>();
        sink.emit_all(observations);
    }
}
