//! Payload, result, and inflight byte limits.
//!
//! Three ceilings govern invoke result delivery:
//!
//! | Limit                     | Default  | Purpose                          |
//! |---------------------------|----------|----------------------------------|
//! | `max_payload_bytes`       | 512 KiB  | Single-frame size cap            |
//! | `max_invoke_result_bytes` | 50 MiB   | Total payload cap per invoke     |
//! | `max_inflight_bytes`      | 256 MiB  | Sum across all active transfers  |
//!
//! A reply whose serialized form exceeds `max_payload_bytes` must be
//! delivered chunked; a transfer whose declared total exceeds
//! `max_invoke_result_bytes`, or would push the global inflight sum past
//! `max_inflight_bytes`, is rejected at start.

use serde::{Deserialize, Serialize};

/// Default single-frame payload cap (512 KiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 512 * 1024;

/// Default total payload cap per invoke (50 MiB).
pub const DEFAULT_MAX_INVOKE_RESULT_BYTES: u64 = 50 * 1024 * 1024;

/// Default inflight ceiling across all transfers (256 MiB).
pub const DEFAULT_MAX_INFLIGHT_BYTES: u64 = 256 * 1024 * 1024;

/// Upper bound on the recommended raw chunk size (256 KiB).
pub const MAX_CHUNK_BYTES: u64 = 256 * 1024;

/// Per-frame overhead reserved for the chunk envelope (4 KiB).
pub const CHUNK_FRAME_OVERHEAD_BYTES: u64 = 4 * 1024;

/// Byte limits governing invoke result transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferLimits {
    /// Single-frame size cap.
    pub max_payload_bytes: u64,
    /// Total payload cap per invoke.
    pub max_invoke_result_bytes: u64,
    /// Inflight ceiling across all active transfers.
    pub max_inflight_bytes: u64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_invoke_result_bytes: DEFAULT_MAX_INVOKE_RESULT_BYTES,
            max_inflight_bytes: DEFAULT_MAX_INFLIGHT_BYTES,
        }
    }
}

impl TransferLimits {
    /// Overrides the single-frame payload cap.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, bytes: u64) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Overrides the per-invoke total payload cap.
    #[must_use]
    pub const fn with_max_invoke_result_bytes(mut self, bytes: u64) -> Self {
        self.max_invoke_result_bytes = bytes;
        self
    }

    /// Overrides the inflight ceiling.
    #[must_use]
    pub const fn with_max_inflight_bytes(mut self, bytes: u64) -> Self {
        self.max_inflight_bytes = bytes;
        self
    }

    /// Recommended raw bytes per chunk for these limits.
    ///
    /// `min(256 KiB, ((max_payload_bytes - 4 KiB) * 3) / 4)`: the frame
    /// budget minus envelope overhead, shrunk by the 4/3 base64 inflation,
    /// capped so a single chunk never dominates channel latency.
    #[must_use]
    pub const fn recommended_chunk_bytes(&self) -> u64 {
        let budget = self
            .max_payload_bytes
            .saturating_sub(CHUNK_FRAME_OVERHEAD_BYTES)
            / 4
            * 3;
        if budget < MAX_CHUNK_BYTES {
            budget
        } else {
            MAX_CHUNK_BYTES
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = TransferLimits::default();
        assert_eq!(limits.max_payload_bytes, 512 * 1024);
        assert_eq!(limits.max_invoke_result_bytes, 50 * 1024 * 1024);
        assert!(limits.max_inflight_bytes >= 50 * 1024 * 1024);
    }

    #[test]
    fn test_recommended_chunk_bytes_caps_at_256_kib() {
        // Default 512 KiB frames leave well over 256 KiB of raw budget.
        let limits = TransferLimits::default();
        assert_eq!(limits.recommended_chunk_bytes(), MAX_CHUNK_BYTES);
    }

    #[test]
    fn test_recommended_chunk_bytes_scales_with_small_frames() {
        let limits = TransferLimits::default().with_max_payload_bytes(64 * 1024);
        let expected = (64 * 1024 - CHUNK_FRAME_OVERHEAD_BYTES) / 4 * 3;
        assert_eq!(limits.recommended_chunk_bytes(), expected);
        assert!(limits.recommended_chunk_bytes() < MAX_CHUNK_BYTES);
    }

    #[test]
    fn test_recommended_chunk_bytes_degenerate_frame_cap() {
        let limits = TransferLimits::default().with_max_payload_bytes(1024);
        assert_eq!(limits.recommended_chunk_bytes(), 0);
    }

    #[test]
    fn test_config_deserializes_with_partial_fields() {
        let limits: TransferLimits =
            serde_json::from_str(r#"{ "max_payload_bytes": 1024 }"#).unwrap();
        assert_eq!(limits.max_payload_bytes, 1024);
        assert_eq!(
            limits.max_invoke_result_bytes,
            DEFAULT_MAX_INVOKE_RESULT_BYTES
        );
    }
}
