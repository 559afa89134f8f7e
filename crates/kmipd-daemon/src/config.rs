//! Daemon configuration.
//!
//! Loaded from a TOML file; everything lives under the top-level `[kmip]`
//! table. Both transports carry the same operation filter shape, applied to
//! their registry once at startup.
//!
//! ```toml
//! [kmip.tcp]
//! enabled = true
//! address = ":5696"
//!
//! [kmip.http]
//! enabled = true
//! address = ":8080"
//! base_path = "/kmip"
//!
//! [kmip.http.operation]
//! exclude = [0x14]
//!
//! [kmip.proxy]
//! endpoint = "https://upstream.example:8080/kmip"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default KMIP TCP bind address.
pub const DEFAULT_TCP_ADDRESS: &str = ":5696";

/// Default KMIP HTTP bind address.
pub const DEFAULT_HTTP_ADDRESS: &str = ":8080";

/// Default HTTP base path.
pub const DEFAULT_BASE_PATH: &str = "/kmip";

/// Default (and minimum) HTTP body cap: 1 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub kmip: KmipConfig,
}

impl Config {
    /// Loads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KmipConfig {
    #[serde(default)]
    pub tcp: TcpConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// KMIP framed TCP transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tcp_address")]
    pub address: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub operation: OperationFilter,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_tcp_address(),
            tls: None,
            operation: OperationFilter::default(),
        }
    }
}

/// KMIP HTTP transport. Timeouts are in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_address")]
    pub address: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub read_timeout: Option<u64>,
    #[serde(default)]
    pub read_header_timeout: Option<u64>,
    #[serde(default)]
    pub write_timeout: Option<u64>,
    #[serde(default)]
    pub idle_timeout: Option<u64>,
    #[serde(default)]
    pub max_header_bytes: Option<usize>,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default)]
    pub operation: OperationFilter,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_http_address(),
            tls: None,
            base_path: default_base_path(),
            read_timeout: None,
            read_header_timeout: None,
            write_timeout: None,
            idle_timeout: None,
            max_header_bytes: None,
            max_body_size: default_max_body_size(),
            operation: OperationFilter::default(),
        }
    }
}

impl HttpConfig {
    /// The effective body cap: configurable upward from
    /// [`DEFAULT_MAX_BODY_SIZE`], never below it.
    #[must_use]
    pub fn effective_max_body_size(&self) -> usize {
        self.max_body_size.max(DEFAULT_MAX_BODY_SIZE)
    }
}

/// mTLS material: PEM files on disk. A client CA turns on client
/// certificate verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,
}

/// Allow/deny filtering of registered operations, by operation code. A
/// non-empty `only` list wins over `exclude`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationFilter {
    #[serde(default)]
    pub only: Vec<u32>,
    #[serde(default)]
    pub exclude: Vec<u32>,
}

/// Upstream delegation. Configuring an endpoint switches the server into
/// edge mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

/// Resolves a listen address string. A bare `:port` binds all interfaces.
pub fn listen_addr(address: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_owned()
    };
    normalized
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(address.to_owned()))
}

fn default_tcp_address() -> String {
    DEFAULT_TCP_ADDRESS.to_owned()
}

fn default_http_address() -> String {
    DEFAULT_HTTP_ADDRESS.to_owned()
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_owned()
}

const fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_metrics_address() -> String {
    "127.0.0.1:9464".to_owned()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = Config::default();
        assert!(!config.kmip.tcp.enabled);
        assert!(!config.kmip.http.enabled);
        assert_eq!(config.kmip.tcp.address, DEFAULT_TCP_ADDRESS);
        assert_eq!(config.kmip.http.base_path, DEFAULT_BASE_PATH);
        assert!(config.kmip.proxy.is_none());
    }

    #[test]
    fn parses_a_full_document() {
        let doc = r#"
            [kmip.tcp]
            enabled = true
            address = ":5696"

            [kmip.tcp.operation]
            only = [1, 30]

            [kmip.http]
            enabled = true
            address = "127.0.0.1:8080"
            base_path = "/kmip"
            read_timeout = 30
            max_body_size = 2097152

            [kmip.http.operation]
            exclude = [20]

            [kmip.proxy]
            endpoint = "http://upstream:8080/kmip"

            [kmip.metrics]
            enabled = true
        "#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.kmip.tcp.enabled);
        assert_eq!(config.kmip.tcp.operation.only, vec![1, 30]);
        assert_eq!(config.kmip.http.read_timeout, Some(30));
        assert_eq!(config.kmip.http.max_body_size, 2 * 1024 * 1024);
        assert_eq!(
            config.kmip.proxy.as_ref().map(|p| p.endpoint.as_str()),
            Some("http://upstream:8080/kmip")
        );
        assert!(config.kmip.metrics.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let doc = "[kmip.tcp]\nenabled = true\nlisten = \":5696\"\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn body_cap_never_drops_below_the_default() {
        let mut http = HttpConfig {
            max_body_size: 16,
            ..HttpConfig::default()
        };
        assert_eq!(http.effective_max_body_size(), DEFAULT_MAX_BODY_SIZE);
        http.max_body_size = 8 * 1024 * 1024;
        assert_eq!(http.effective_max_body_size(), 8 * 1024 * 1024);
    }

    #[test]
    fn listen_addr_accepts_bare_ports() {
        assert_eq!(
            listen_addr(":5696").unwrap(),
            "0.0.0.0:5696".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            listen_addr("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(listen_addr("nonsense").is_err());
    }
}
