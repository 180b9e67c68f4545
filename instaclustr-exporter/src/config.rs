use hyper::Uri;
use tracing::warn;

/// Base URL used when none, or an unusable one, is configured.
pub const DEFAULT_URL: &str = "https://api.instaclustr.com";

const PROVISIONING_API_ENDPOINT: &str = "provisioning";
const MONITORING_API_ENDPOINT: &str = "monitoring";
const PROVISIONING_API_VERSION: &str = "v1";
const MONITORING_API_VERSION: &str = "v1";

/// Credentials and location of the Instaclustr APIs.
#[derive(Clone, Default)]
pub struct InstaclustrConfig {
    /// Base URL of the APIs, e.g. `https://api.instaclustr.com`.
    pub url: String,
    /// Account user name, sent with every request.
    pub user: String,
    /// API key for the provisioning API.
    pub provisioning_api_key: String,
    /// API key for the monitoring API.
    pub monitoring_api_key: String,
}

impl InstaclustrConfig {
    /// Resolves the base URL, falling back to [`DEFAULT_URL`].
    ///
    /// The configured URL is used when it is an absolute `scheme://authority` URI. Trailing slashes
    /// are removed so endpoint paths can be appended directly.
    pub fn base_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        if url.is_empty() {
            return DEFAULT_URL.to_string();
        }

        match url.parse::<Uri>() {
            Ok(uri) if uri.scheme().is_some() && uri.authority().is_some() => url.to_string(),
            Ok(_) => {
                warn!(url, "upstream URL is not absolute, using {}", DEFAULT_URL);
                DEFAULT_URL.to_string()
            }
            Err(e) => {
                warn!(url, error = %e, "failed to parse upstream URL, using {}", DEFAULT_URL);
                DEFAULT_URL.to_string()
            }
        }
    }

    /// Root of the provisioning API.
    pub fn provisioning_endpoint(&self) -> String {
        format!("{}/{}/{}", self.base_url(), PROVISIONING_API_ENDPOINT, PROVISIONING_API_VERSION)
    }

    /// Root of the monitoring API.
    pub fn monitoring_endpoint(&self) -> String {
        format!("{}/{}/{}", self.base_url(), MONITORING_API_ENDPOINT, MONITORING_API_VERSION)
    }
}

// API keys stay out of logs.
impl std::fmt::Debug for InstaclustrConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstaclustrConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("provisioning_api_key", &"<redacted>")
            .field("monitoring_api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{InstaclustrConfig, DEFAULT_URL};

    fn config(url: &str) -> InstaclustrConfig {
        InstaclustrConfig { url: url.to_string(), ..Default::default() }
    }

    #[test]
    fn test_base_url_fallback() {
        let cases = &[
            ("", DEFAULT_URL),
            ("   ", DEFAULT_URL),
            ("not a url", DEFAULT_URL),
            ("/relative/path", DEFAULT_URL),
            ("http://127.0.0.1:8082", "http://127.0.0.1:8082"),
            ("http://127.0.0.1:8082/", "http://127.0.0.1:8082"),
            ("https://api.example.com/", "https://api.example.com"),
        ];

        for (input, expected) in cases {
            assert_eq!(*expected, config(input).base_url(), "input: {input:?}");
        }
    }

    #[test]
    fn test_endpoints() {
        let config = config("http://127.0.0.1:8082");
        assert_eq!(config.provisioning_endpoint(), "http://127.0.0.1:8082/provisioning/v1");
        assert_eq!(config.monitoring_endpoint(), "http://127.0.0.1:8082/monitoring/v1");
    }

    #[test]
    fn test_debug_redacts_keys() {
        let config = InstaclustrConfig {
            url: DEFAULT_URL.to_string(),
            user: "alice".to_string(),
            provisioning_api_key: "p-secret".to_string(),
            monitoring_api_key: "m-secret".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret"));
    }
}
