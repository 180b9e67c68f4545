//! Clients for the Instaclustr provisioning and monitoring APIs.
//!
//! The pipeline only sees the [`ProvisioningApi`] and [`MonitoringApi`] capabilities, so a
//! substitute upstream can be plugged in without any network at all.
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Collected, Empty};
use hyper::{header::HeaderValue, Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tracing::{debug, trace, warn};

use crate::common::{BuildError, ClientError};
use crate::config::InstaclustrConfig;
use crate::model::ApiErrorBody;

/// Convenience type for the future returned by an upstream call.
pub type ApiFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes, ClientError>> + Send + 'a>>;

/// Read access to the provisioning API.
pub trait ProvisioningApi: Send + Sync {
    /// Fetches the JSON array of clusters visible to the account.
    fn list_clusters(&self) -> ApiFuture<'_>;

    /// Fetches the JSON status of a cluster, including its data centres and nodes.
    fn cluster_status<'a>(&'a self, cluster_id: &'a str) -> ApiFuture<'a>;
}

/// Read access to the monitoring API.
pub trait MonitoringApi: Send + Sync {
    /// Fetches the metrics named by `query`, a comma-separated list of query tokens, for a node.
    fn node_metrics<'a>(&'a self, node_id: &'a str, query: &'a str) -> ApiFuture<'a>;
}

type HyperClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

/// An authenticated HTTP client for one of the Instaclustr APIs.
///
/// Each instance is bound to one API endpoint and its key. Cloning is cheap and shares the
/// connection pool.
#[derive(Clone)]
pub struct HttpClient {
    endpoint: String,
    auth: HeaderValue,
    client: HyperClient,
}

impl HttpClient {
    /// Creates a client for the provisioning API.
    ///
    /// # Errors
    ///
    /// If the platform's root certificates cannot be loaded, an error is returned.
    pub fn provisioning(config: &InstaclustrConfig) -> Result<Self, BuildError> {
        Self::new(
            config.provisioning_endpoint(),
            &config.user,
            &config.provisioning_api_key,
        )
    }

    /// Creates a client for the monitoring API.
    ///
    /// # Errors
    ///
    /// If the platform's root certificates cannot be loaded, an error is returned.
    pub fn monitoring(config: &InstaclustrConfig) -> Result<Self, BuildError> {
        Self::new(config.monitoring_endpoint(), &config.user, &config.monitoring_api_key)
    }

    fn new(endpoint: String, user: &str, api_key: &str) -> Result<Self, BuildError> {
        let roots = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) if endpoint.starts_with("https://") => {
                return Err(BuildError::FailedToLoadRootCertificates(e.to_string()))
            }
            Err(e) => {
                // Plain HTTP endpoints never need a trust store.
                warn!(error = %e, %endpoint, "no root certificates available, HTTPS disabled");
                let tls = rustls::ClientConfig::builder()
                    .with_root_certificates(rustls::RootCertStore::empty())
                    .with_no_client_auth();
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls)
            }
        };
        let https = roots
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);

        Ok(Self { endpoint, auth: basic_auth(user, Some(api_key)), client })
    }

    async fn get(&self, uri: String) -> Result<Bytes, ClientError> {
        let uri = uri
            .parse::<Uri>()
            .map_err(|e| ClientError::InvalidUri { uri: uri.clone(), reason: e.to_string() })?;
        trace!(%uri, "querying upstream API");

        let req = Request::builder()
            .method(Method::GET)
            .uri(uri.clone())
            .header(hyper::header::AUTHORIZATION, self.auth.clone())
            .body(Empty::<Bytes>::new())
            .map_err(|e| ClientError::InvalidUri { uri: uri.to_string(), reason: e.to_string() })?;

        let response = self.client.request(req).await.map_err(|e| {
            debug!(%uri, error = ?e, "error sending request");
            ClientError::from(e)
        })?;

        let status = response.status();
        let body = response.into_body().collect().await.map(Collected::to_bytes)?;
        if !status.is_success() {
            debug!(%uri, %status, "upstream API returned an error");
            return Err(ClientError::Status { status, message: error_message(status, &body) });
        }

        Ok(body)
    }
}

impl ProvisioningApi for HttpClient {
    fn list_clusters(&self) -> ApiFuture<'_> {
        Box::pin(self.get(self.endpoint.clone()))
    }

    fn cluster_status<'a>(&'a self, cluster_id: &'a str) -> ApiFuture<'a> {
        Box::pin(self.get(format!("{}/{}", self.endpoint, cluster_id)))
    }
}

impl MonitoringApi for HttpClient {
    fn node_metrics<'a>(&'a self, node_id: &'a str, query: &'a str) -> ApiFuture<'a> {
        Box::pin(self.get(format!("{}/nodes/{}?metrics={}", self.endpoint, node_id, query)))
    }
}

/// Picks the message out of an upstream error body, if it has one.
fn error_message(status: hyper::StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(error) if !error.message.is_empty() => error.message,
        _ => status.canonical_reason().unwrap_or_else(|| status.as_str()).to_string(),
    }
}

fn basic_auth(username: &str, password: Option<&str>) -> HeaderValue {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;

    let credentials = match password {
        Some(password) => format!("{username}:{password}"),
        None => format!("{username}:"),
    };
    let encoded = format!("Basic {}", BASE64_STANDARD.encode(credentials));

    // Base64 output and the `Basic ` prefix are always visible ASCII.
    let mut header = HeaderValue::from_str(&encoded)
        .unwrap_or_else(|_| HeaderValue::from_static("Basic "));
    header.set_sensitive(true);
    header
}
