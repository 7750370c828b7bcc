//! Environment-driven configuration.

use std::env;
use std::time::Duration;

use crate::policy::DEFAULT_CUTOFF_DAYS;

/// Server and gateway configuration, read from the environment with
/// development defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Payment gateway base URL. Empty means use the mock gateway.
    pub gateway_base_url: String,
    /// Gateway API key.
    pub gateway_api_key: String,
    /// Secret for webhook signature verification.
    pub webhook_secret: String,
    /// Per-request gateway timeout.
    pub gateway_timeout: Duration,
    /// Days before event start when cancellation closes.
    pub cancellation_cutoff_days: i64,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: var_or("REGISTRAR_HOST", "0.0.0.0"),
            port: var_or("REGISTRAR_PORT", "3000").parse().unwrap_or(3000),
            gateway_base_url: var_or("GATEWAY_BASE_URL", ""),
            gateway_api_key: var_or("GATEWAY_API_KEY", "sk_test_dev"),
            webhook_secret: var_or("GATEWAY_WEBHOOK_SECRET", "whsec_dev"),
            gateway_timeout: Duration::from_secs(
                var_or("GATEWAY_TIMEOUT_SECS", "10").parse().unwrap_or(10),
            ),
            cancellation_cutoff_days: var_or("CANCELLATION_CUTOFF_DAYS", "14")
                .parse()
                .unwrap_or(DEFAULT_CUTOFF_DAYS),
        }
    }

    /// Socket address string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
