//! Configuration loading and validation for fire-server.
//!
//! All values are read from `FIRE_*` environment variables once at startup and
//! never change afterwards. The three certificate values are optional at this
//! layer; their presence is enforced by [`crate::certs`] right before the
//! listener is configured.

use std::{fmt, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::native::NativeConfig;

/// Prefix shared by every environment variable the server reads.
pub const ENV_PREFIX: &str = "FIRE";

/// Client certificate policy applied by the TLS listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    /// Clients are not asked for a certificate.
    #[default]
    None,
    /// A client certificate is verified against the CA when offered.
    Optional,
    /// Every client must present a certificate issued by the CA.
    Required,
}

/// A base64-encoded PEM blob taken verbatim from the environment.
///
/// `Debug` never prints the contents: one of these carries the private key.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PemBase64(pub String);

impl PemBase64 {
    /// The encoded value with surrounding whitespace removed.
    pub fn as_str(&self) -> &str {
        self.0.trim()
    }

    /// Whether the value is empty once whitespace is stripped.
    pub fn is_blank(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl fmt::Debug for PemBase64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PemBase64([{} bytes])", self.0.len())
    }
}

impl From<&str> for PemBase64 {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Validated server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port of the TLS listener.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on requests handled concurrently.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Per-connection timeout in milliseconds, covering the TLS handshake and
    /// the wait for request headers.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// CA certificate (base64 PEM). **Required** before the listener starts.
    #[serde(default)]
    pub ca_cert_pem_base64: Option<PemBase64>,

    /// Server certificate chain (base64 PEM). **Required** before the listener starts.
    #[serde(default)]
    pub server_cert_pem_base64: Option<PemBase64>,

    /// Unencrypted server private key (base64 PEM). **Required** before the
    /// listener starts.
    #[serde(default)]
    pub server_key_pem_base64: Option<PemBase64>,

    /// Directory the PEM files are written to.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Directory holding the bundled native shared objects.
    #[serde(default = "default_native_bundle_dir")]
    pub native_bundle_dir: PathBuf,

    /// Directory the bundled shared objects are copied into before loading.
    #[serde(default = "default_native_install_dir")]
    pub native_install_dir: PathBuf,

    /// Comma-separated library names tried in order after the bundle is loaded.
    #[serde(default = "default_native_libraries")]
    pub native_libraries: String,

    /// Client certificate policy.
    #[serde(default)]
    pub client_auth: ClientAuth,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8443
}
fn default_max_threads() -> usize {
    150
}
fn default_connection_timeout_ms() -> u64 {
    20_000
}
fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_native_bundle_dir() -> PathBuf {
    PathBuf::from("native")
}
fn default_native_install_dir() -> PathBuf {
    PathBuf::from("/opt/fire-server/lib")
}
fn default_native_libraries() -> String {
    "crypto,ssl".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    /// Every documented default, with no certificate material.
    fn default() -> Self {
        Self {
            port: default_port(),
            max_threads: default_max_threads(),
            connection_timeout_ms: default_connection_timeout_ms(),
            ca_cert_pem_base64: None,
            server_cert_pem_base64: None,
            server_key_pem_base64: None,
            base_dir: default_base_dir(),
            native_bundle_dir: default_native_bundle_dir(),
            native_install_dir: default_native_install_dir(),
            native_libraries: default_native_libraries(),
            client_auth: ClientAuth::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate configuration from `FIRE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load and validate configuration from an arbitrary `config` source.
    pub fn load<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate scalar fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("{ENV_PREFIX}_PORT must be a non-zero TCP port");
        }
        if self.max_threads == 0 {
            anyhow::bail!("{ENV_PREFIX}_MAX_THREADS must be > 0");
        }
        if self.connection_timeout_ms == 0 {
            anyhow::bail!("{ENV_PREFIX}_CONNECTION_TIMEOUT_MS must be > 0");
        }
        Ok(())
    }

    /// The connection timeout as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Candidate native library names, in the order they are tried.
    pub fn native_candidates(&self) -> Vec<String> {
        self.native_libraries
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Settings for [`crate::native::ensure_loaded`].
    pub fn native(&self) -> NativeConfig {
        NativeConfig {
            bundle_dir: self.native_bundle_dir.clone(),
            install_dir: self.native_install_dir.clone(),
            candidates: self.native_candidates(),
        }
    }
}
