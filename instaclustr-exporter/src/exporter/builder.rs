use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::client::HttpClient;
use crate::collector::Collector;
use crate::common::BuildError;
use crate::config::InstaclustrConfig;

use super::http_listener::{new_http_listener, HEALTH_PATH, SHUTDOWN_PATH};
use super::{ExporterFuture, ShutdownHandle};

pub(crate) const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub(crate) const DEFAULT_PORT: u16 = 9999;

/// Builder for creating and running the Instaclustr exporter.
pub struct ExporterBuilder {
    config: InstaclustrConfig,
    listen_address: SocketAddr,
    telemetry_path: String,
    read_timeout: Duration,
    scrape_timeout: Option<Duration>,
    max_concurrent_requests: Option<NonZeroUsize>,
    collector: Option<Collector>,
}

impl ExporterBuilder {
    /// Creates a new [`ExporterBuilder`] for the given upstream configuration.
    pub fn new(config: InstaclustrConfig) -> Self {
        Self {
            config,
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            read_timeout: Duration::from_secs(10),
            scrape_timeout: None,
            max_concurrent_requests: None,
            collector: None,
        }
    }

    /// Sets the address the HTTP listener binds to.
    ///
    /// Defaults to `0.0.0.0:9999`.
    #[must_use]
    pub fn with_http_listener(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.listen_address = addr.into();
        self
    }

    /// Sets the path under which metrics are exposed.
    ///
    /// Defaults to `/metrics`.
    ///
    /// # Errors
    ///
    /// The path must start with `/` and must not shadow the home, health or shutdown routes.
    pub fn with_telemetry_path(mut self, path: impl Into<String>) -> Result<Self, BuildError> {
        let path = path.into();
        if !path.starts_with('/') || path == "/" || path == HEALTH_PATH || path == SHUTDOWN_PATH {
            return Err(BuildError::InvalidTelemetryPath(path));
        }

        self.telemetry_path = path;
        Ok(self)
    }

    /// Sets how long a client may take to send the request headers.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bounds how long a single scrape waits for its cluster and node branches.
    ///
    /// Branches still running when the timeout elapses are dropped from that scrape's output.
    #[must_use]
    pub fn with_scrape_timeout(mut self, timeout: Duration) -> Self {
        self.scrape_timeout = Some(timeout);
        self
    }

    /// Bounds the number of upstream requests in flight at once, across the whole scrape.
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrent_requests = Some(limit);
        self
    }

    /// Uses the given collector instead of one built from the configuration.
    ///
    /// The scrape timeout and request limit of this builder are ignored in that case.
    #[must_use]
    pub fn with_collector(mut self, collector: Collector) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Builds the exporter, returning the future that drives it and a handle to stop it.
    ///
    /// The listening socket is bound here, so address conflicts surface before the future is
    /// polled.
    ///
    /// # Errors
    ///
    /// If the API clients cannot be created, or the listen address cannot be bound, an error is
    /// returned.
    pub fn build(self) -> Result<(ExporterFuture, ShutdownHandle), BuildError> {
        let collector = match self.collector {
            Some(collector) => collector,
            None => Collector::with_options(
                Arc::new(HttpClient::provisioning(&self.config)?),
                Arc::new(HttpClient::monitoring(&self.config)?),
                self.max_concurrent_requests,
                self.scrape_timeout,
            ),
        };

        let shutdown = ShutdownHandle::new();
        let exporter = new_http_listener(
            collector,
            self.listen_address,
            self.telemetry_path,
            self.read_timeout,
            shutdown.clone(),
        )?;

        Ok((exporter, shutdown))
    }

    /// Builds the exporter and spawns it in the background.
    ///
    /// If called from within a Tokio runtime, the exporter is spawned onto it. Otherwise, a new
    /// single-threaded runtime is created on a background thread.
    ///
    /// # Errors
    ///
    /// If there is an error while building the exporter, or creating the runtime, an error is
    /// returned.
    pub fn install(self) -> Result<ShutdownHandle, BuildError> {
        use tokio::runtime;

        let (exporter, shutdown) = self.build()?;
        let run = async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = %e, "exporter stopped with an error");
            }
        };

        if let Ok(handle) = runtime::Handle::try_current() {
            handle.spawn(run);
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            thread::Builder::new()
                .name("instaclustr-exporter-http".to_string())
                .spawn(move || runtime.block_on(run))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;
        }

        Ok(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ExporterBuilder;
    use crate::client::{ApiFuture, MonitoringApi, ProvisioningApi};
    use crate::collector::Collector;
    use crate::common::{BuildError, ClientError};
    use crate::config::InstaclustrConfig;

    struct Unreachable;

    fn unreachable<'a>() -> ApiFuture<'a> {
        Box::pin(async {
            Err(ClientError::InvalidUri { uri: String::new(), reason: "unreachable".into() })
        })
    }

    impl ProvisioningApi for Unreachable {
        fn list_clusters(&self) -> ApiFuture<'_> {
            unreachable()
        }

        fn cluster_status<'a>(&'a self, _: &'a str) -> ApiFuture<'a> {
            unreachable()
        }
    }

    impl MonitoringApi for Unreachable {
        fn node_metrics<'a>(&'a self, _: &'a str, _: &'a str) -> ApiFuture<'a> {
            unreachable()
        }
    }

    #[test]
    fn test_telemetry_path_validation() {
        for path in ["metrics", "", "/", "/health", "/shutdown"] {
            let result = ExporterBuilder::new(InstaclustrConfig::default()).with_telemetry_path(path);
            assert!(
                matches!(result, Err(BuildError::InvalidTelemetryPath(ref p)) if p == path),
                "path {path:?} should be rejected"
            );
        }

        let builder = ExporterBuilder::new(InstaclustrConfig::default())
            .with_telemetry_path("/custom/metrics")
            .unwrap();
        assert_eq!(builder.telemetry_path, "/custom/metrics");
    }

    #[test]
    fn test_defaults() {
        let builder = ExporterBuilder::new(InstaclustrConfig::default());
        assert_eq!(builder.listen_address.port(), 9999);
        assert!(builder.listen_address.ip().is_unspecified());
        assert_eq!(builder.telemetry_path, "/metrics");
        assert!(builder.scrape_timeout.is_none());
        assert!(builder.max_concurrent_requests.is_none());
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let collector = Collector::new(Arc::new(Unreachable), Arc::new(Unreachable));
        let result = ExporterBuilder::new(InstaclustrConfig::default())
            .with_collector(collector)
            .with_http_listener(addr)
            .build();
        assert!(matches!(result, Err(BuildError::FailedToCreateHTTPListener(_))));
    }
}
