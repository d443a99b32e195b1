//! Gateway configuration.

use nodegw_core::limits::TransferLimits;
use serde::{Deserialize, Serialize};

/// Default invoke deadline in milliseconds.
pub const DEFAULT_INVOKE_TIMEOUT_MS: u64 = 30_000;

/// Configuration for the node broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Byte limits for result transfer.
    pub limits: TransferLimits,
    /// Invoke deadline applied when the caller does not pass one.
    pub invoke_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            limits: TransferLimits::default(),
            invoke_timeout_ms: DEFAULT_INVOKE_TIMEOUT_MS,
        }
    }
}

impl GatewayConfig {
    /// Overrides the transfer limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: TransferLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides the default invoke deadline.
    #[must_use]
    pub const fn with_invoke_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.invoke_timeout_ms = timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.invoke_timeout_ms, 30_000);
        assert_eq!(config.limits, TransferLimits::default());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{ "invoke_timeout_ms": 5000, "limits": { "max_inflight_bytes": 1048576 } }"#,
        )
        .unwrap();
        assert_eq!(config.invoke_timeout_ms, 5000);
        assert_eq!(config.limits.max_inflight_bytes, 1_048_576);
        assert_eq!(config.limits.max_payload_bytes, 512 * 1024);
    }
}
