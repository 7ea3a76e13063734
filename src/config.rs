//! # Configuration Management
//!
//! This module handles loading and validating the client configuration.
//! Configuration is loaded from TOML files, with `KVGATE_*` environment
//! variables overriding individual keys, and includes settings for:
//! - The gateway endpoint (host/port and API version prefix)
//! - The size of the worker pool driving all sockets
//! - Stream framing limits and one-shot request timeouts
//!
//! ## Example Configuration File (client.toml)
//! ```toml
//! host = "127.0.0.1"
//! port = 2379
//! worker_threads = 4
//! version_prefix = "/v3alpha"
//! max_frame_bytes = 16384
//! request_timeout_ms = 30000
//! ```

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::framing::DEFAULT_MAX_FRAME_BYTES;

/// API version prefix understood by gateways of the 3.2 series.
pub const DEFAULT_VERSION_PREFIX: &str = "/v3alpha";

/// Client configuration.
///
/// Every field has a default, so a configuration file only needs to name
/// the settings it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway host name or IP address (e.g., "127.0.0.1" or "etcd.local")
    pub host: String,

    /// Gateway port (2379 for a stock deployment)
    pub port: u16,

    /// Number of worker threads driving the shared reactor
    pub worker_threads: usize,

    /// Path prefix in front of every endpoint (e.g., "/v3alpha" or "/v3")
    pub version_prefix: String,

    /// Largest unterminated document a watch stream may buffer
    pub max_frame_bytes: usize,

    /// Timeout for one-shot requests in milliseconds, 0 disables it.
    /// Watch streams are never subject to it.
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2379,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            version_prefix: DEFAULT_VERSION_PREFIX.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            request_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Configuration for a gateway at `host:port`, defaults elsewhere.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// Environment variables prefixed with `KVGATE_` take precedence over the
    /// file, e.g. `KVGATE_PORT=23790`.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::path::Path;
    /// use kv_gateway_client::Config;
    /// let config = Config::load(Path::new("client.toml"))?;
    /// # Ok::<(), kv_gateway_client::Error>(())
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ConfigLib::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("KVGATE").try_parsing(true))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings a client cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::invalid_configuration("Invalid number of threads"));
        }
        if self.host.is_empty() {
            return Err(Error::invalid_configuration("Invalid address"));
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::invalid_configuration("max_frame_bytes must be positive"));
        }
        if !self.version_prefix.starts_with('/') {
            return Err(Error::invalid_configuration(format!(
                "version prefix '{}' must start with '/'",
                self.version_prefix
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
