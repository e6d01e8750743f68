//! Health endpoint configuration

use std::time::Duration;

use mailchat_module::{ConfigError, ConfigMap};

const DEFAULT_LISTEN_ADDRESS: &str = "[::]:8080";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration of one `health` endpoint block
///
/// ```ron
/// (name: "health", args: ["127.0.0.1:8080"], children: [
///     (name: "timeout", args: ["1s"]),
/// ])
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Addresses to listen on; `[::]:8080` when none are given.
    pub listen_addresses: Vec<String>,

    /// Upper bound on the time a probe may take to answer.
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec![DEFAULT_LISTEN_ADDRESS.to_string()],
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HealthConfig {
    pub fn from_config(addresses: &[String], cfg: &mut ConfigMap<'_>) -> Result<Self, ConfigError> {
        let timeout = cfg.duration("timeout", DEFAULT_TIMEOUT)?;
        if timeout.is_zero() {
            return Err(ConfigError::invalid(
                cfg.location(),
                "timeout must be greater than zero",
            ));
        }

        let listen_addresses = if addresses.is_empty() {
            Self::default().listen_addresses
        } else {
            addresses.to_vec()
        };

        Ok(Self {
            listen_addresses,
            timeout,
        })
    }
}
