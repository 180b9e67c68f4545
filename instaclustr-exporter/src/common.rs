use hyper::StatusCode;
use thiserror::Error as ThisError;

/// Errors that could occur while building the exporter.
#[derive(Debug, ThisError)]
pub enum BuildError {
    /// The listen address could not be parsed or resolved.
    #[error("invalid listen address `{0}`")]
    InvalidListenAddress(String),

    /// The telemetry path was not an absolute path, or collides with a fixed route.
    #[error("invalid telemetry path: {0}")]
    InvalidTelemetryPath(String),

    /// Binding/listening to the given address did not succeed.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// The platform's root certificates could not be loaded for the upstream client.
    #[error("failed to load TLS root certificates: {0}")]
    FailedToLoadRootCertificates(String),

    /// Creating the networking event loop did not succeed.
    #[error("failed to spawn Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),
}

/// Errors returned by the upstream API clients.
#[derive(Debug, ThisError)]
pub enum ClientError {
    /// The request URI could not be built from the configured base URL.
    #[error("invalid request URI `{uri}`: {reason}")]
    InvalidUri {
        /// The URI that failed to parse.
        uri: String,
        /// Details about the parsing failure.
        reason: String,
    },

    /// The request could not be sent, or no response was received.
    #[error("error sending request: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    /// The upstream API answered with a non-successful status.
    #[error("unexpected status {status}: {message}")]
    Status {
        /// Status code of the response.
        status: StatusCode,
        /// Message from the upstream error body, or the canonical reason.
        message: String,
    },

    /// The response body could not be read.
    #[error("error reading response body: {0}")]
    Body(#[from] hyper::Error),
}

/// The upstream response shape that failed to decode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shape {
    /// The list of clusters from the provisioning API.
    Clusters,
    /// The data centres and nodes of a single cluster.
    ClusterStatus,
    /// The metric payloads of a node from the monitoring API.
    NodeMetrics,
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Shape::Clusters => "clusters",
            Shape::ClusterStatus => "cluster status",
            Shape::NodeMetrics => "node metrics",
        })
    }
}

/// A response body did not match the expected JSON shape.
#[derive(Debug, ThisError)]
#[error("malformed {shape} response: {source}")]
pub struct DecodeError {
    /// Which response was being decoded.
    pub shape: Shape,
    /// The underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}

/// Errors that abort a whole scrape.
///
/// Failures below the cluster list are logged and skipped, so this only ever describes the
/// cluster list itself.
#[derive(Debug, ThisError)]
pub enum ScrapeError {
    /// The cluster list could not be fetched.
    #[error("couldn't get clusters: {0}")]
    Clusters(#[from] ClientError),

    /// The cluster list could not be decoded.
    #[error("couldn't get clusters: {0}")]
    ClusterList(#[from] DecodeError),
}

/// A single upstream call failed, either in transit or while decoding.
///
/// Used below the cluster list, where failures are logged and skipped.
#[derive(Debug, ThisError)]
pub enum FetchError {
    /// The upstream call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The response could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
