//! Exports metrics of Cassandra clusters managed by Instaclustr in the Prometheus exposition
//! format.
//!
//! Every request to the telemetry path runs a fresh scrape: the cluster list is read from the
//! provisioning API, each cluster's status is fetched concurrently, and the metrics of each node
//! are read from the monitoring API. Nothing is cached between scrapes.
//!
//! # Usage
//!
//! ```no_run
//! use instaclustr_exporter::{ExporterBuilder, InstaclustrConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = InstaclustrConfig {
//!     user: "alice".to_string(),
//!     provisioning_api_key: "provisioning-key".to_string(),
//!     monitoring_api_key: "monitoring-key".to_string(),
//!     ..Default::default()
//! };
//!
//! let (exporter, shutdown) = ExporterBuilder::new(config)
//!     .with_http_listener(([127, 0, 0, 1], 9999))
//!     .build()?;
//! tokio::spawn(instaclustr_exporter::shutdown_on_signal(shutdown));
//! exporter.await?;
//! # Ok(())
//! # }
//! ```
//!
//! A scrape can also be run without the HTTP listener, using any [`MetricSink`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use instaclustr_exporter::{Collector, HttpClient, InstaclustrConfig, Registry};
//!
//! # async fn run(config: InstaclustrConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let collector = Collector::new(
//!     Arc::new(HttpClient::provisioning(&config)?),
//!     Arc::new(HttpClient::monitoring(&config)?),
//! );
//! let registry = Arc::new(Registry::new());
//! collector.scrape(registry.clone()).await?;
//! print!("{}", registry.render());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

mod common;
pub use self::common::{BuildError, ClientError, DecodeError, FetchError, ScrapeError, Shape};

mod config;
pub use self::config::{InstaclustrConfig, DEFAULT_URL};

pub mod client;
pub use self::client::{HttpClient, MonitoringApi, ProvisioningApi};

pub mod model;

pub mod mapper;

pub mod formatting;

mod registry;
pub use self::registry::{LabelSet, MetricDef, MetricKind, MetricSink, Observation, Registry};

mod collector;
pub use self::collector::{Collector, ScrapeSummary};

mod exporter;
pub use self::exporter::builder::ExporterBuilder;
pub use self::exporter::{shutdown_on_signal, ExporterError, ExporterFuture, ShutdownHandle};
