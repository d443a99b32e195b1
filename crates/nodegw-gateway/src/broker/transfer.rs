//! Chunked result-transfer engine.
//!
//! Oversized invoke replies arrive as a start announcement followed by
//! base64 chunks in strict ascending index order. The engine admits a
//! transfer against the per-invoke and global byte ceilings, verifies
//! every chunk's declared length, feeds an incremental SHA-256, and on
//! the final chunk requires the byte total and digest to match the
//! announcement before synthesizing the reply payload.
//!
//! Every rejection also resolves the owning invoke with
//! `INVALID_REQUEST` and the matching message, so a caller never blocks
//! to its deadline behind a malformed transfer.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use nodegw_core::InvokePayload;
use nodegw_core::protocol::{ErrorCode, InvokeError, InvokeResultChunk, PayloadTransfer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::{BrokerInner, NodeBroker};

/// One partially received chunked payload.
pub(crate) struct PendingTransfer {
    /// Owning node id; chunks from any other node are rejected.
    pub node_id: String,
    /// Declared total raw payload size.
    pub total_bytes: u64,
    /// Advisory raw bytes per chunk, from the announcement or the
    /// configured recommendation.
    pub chunk_bytes: u64,
    /// Declared number of chunks.
    pub chunk_count: u64,
    /// Next expected 0-based chunk index.
    pub next_index: u64,
    /// Raw bytes received so far.
    pub bytes_received: u64,
    /// Expected digest, normalized to lowercase hex.
    pub expected_sha256: String,
    /// Incremental digest over the raw chunk bytes.
    pub hasher: Sha256,
    /// Received chunk buffers in arrival (= index) order.
    pub chunks: Vec<Vec<u8>>,
}

/// Progress reported by the transfer engine on acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// The start announcement was admitted.
    Started,
    /// A chunk was appended; more are expected.
    ChunkAccepted {
        /// The next expected chunk index.
        next_index: u64,
    },
    /// The final chunk arrived and the payload was handed to the caller.
    Completed,
}

/// Why the transfer engine rejected a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TransferError {
    /// No pending invoke (or transfer) matches the frame's id and node.
    #[error("unknown invoke id")]
    UnknownInvokeId,
    /// A start for an already-started transfer, or a chunk whose index is
    /// not the next expected one.
    #[error("chunk out of order")]
    ChunkOutOfOrder,
    /// A chunk's decoded length disagreed with its declaration, or the
    /// byte total did not add up.
    #[error("chunk bytes mismatch")]
    ChunkBytesMismatch,
    /// The declared total exceeds the per-invoke cap or would overflow
    /// the global inflight ceiling.
    #[error("payload too large")]
    PayloadTooLarge,
    /// The assembled payload's digest disagreed with the announcement.
    #[error("hash mismatch")]
    HashMismatch,
}

impl TransferError {
    /// Returns the wire reason slug for this rejection.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::UnknownInvokeId => "unknown-invoke-id",
            Self::ChunkOutOfOrder => "chunk-out-of-order",
            Self::ChunkBytesMismatch => "chunk-bytes-mismatch",
            Self::PayloadTooLarge => "payload-too-large",
            Self::HashMismatch => "hash-mismatch",
        }
    }

    /// Maps this rejection to the error resolving the owning invoke.
    #[must_use]
    pub fn to_invoke_error(self) -> InvokeError {
        InvokeError::new(ErrorCode::InvalidRequest, self.to_string())
    }
}

impl NodeBroker {
    /// Admits a chunked-transfer announcement.
    ///
    /// Validation order: a matching pending invoke must exist; no
    /// transfer may already exist for the id; the declared total must fit
    /// the per-invoke cap; and it must fit under the global inflight
    /// ceiling. On acceptance the declared total is charged against the
    /// inflight counter. A zero-chunk announcement completes immediately.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason; all but [`TransferError::UnknownInvokeId`]
    /// also resolve the owning invoke with `INVALID_REQUEST`.
    pub fn start_invoke_result_transfer(
        &self,
        id: &str,
        node_id: &str,
        transfer: &PayloadTransfer,
    ) -> Result<TransferProgress, TransferError> {
        let limits = self.config().limits;
        let mut inner = self.lock();

        if !inner
            .pending
            .get(id)
            .is_some_and(|pending| pending.node_id == node_id)
        {
            debug!(request_id = %id, node_id, "transfer start without matching invoke");
            return Err(TransferError::UnknownInvokeId);
        }
        if inner.transfers.contains_key(id) {
            return Err(inner.fail_transfer(id, TransferError::ChunkOutOfOrder));
        }
        if transfer.total_bytes > limits.max_invoke_result_bytes {
            return Err(inner.fail_transfer(id, TransferError::PayloadTooLarge));
        }
        if inner.inflight_bytes + transfer.total_bytes > limits.max_inflight_bytes {
            return Err(inner.fail_transfer(id, TransferError::PayloadTooLarge));
        }

        inner.inflight_bytes += transfer.total_bytes;
        inner.transfers.insert(
            id.to_string(),
            PendingTransfer {
                node_id: node_id.to_string(),
                total_bytes: transfer.total_bytes,
                chunk_bytes: transfer
                    .chunk_bytes
                    .unwrap_or_else(|| limits.recommended_chunk_bytes()),
                chunk_count: transfer.chunk_count,
                next_index: 0,
                bytes_received: 0,
                expected_sha256: transfer.sha256.to_lowercase(),
                hasher: Sha256::new(),
                chunks: Vec::new(),
            },
        );
        let chunk_bytes = inner.transfers[id].chunk_bytes;
        debug!(
            request_id = %id,
            node_id,
            total_bytes = transfer.total_bytes,
            chunk_count = transfer.chunk_count,
            chunk_bytes,
            inflight_bytes = inner.inflight_bytes,
            "transfer started"
        );

        if transfer.chunk_count == 0 {
            return inner.complete_transfer(id);
        }
        Ok(TransferProgress::Started)
    }

    /// Appends one chunk to its transfer.
    ///
    /// Validation order: the transfer must exist and belong to the
    /// sender; the index must be the next expected and within the
    /// declared count; the base64 body must decode to exactly the
    /// declared length; the running total must not exceed the declared
    /// total. Arrival of the final chunk triggers completion.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason. A chunk addressing a pending invoke
    /// that has no transfer resolves that invoke with `INVALID_REQUEST`/
    /// "unknown invoke id"; other rejections resolve the owner with the
    /// matching message.
    pub fn handle_invoke_result_chunk(
        &self,
        chunk: &InvokeResultChunk,
    ) -> Result<TransferProgress, TransferError> {
        let mut inner = self.lock();

        let header = inner
            .transfers
            .get(&chunk.id)
            .filter(|transfer| transfer.node_id == chunk.node_id)
            .map(|transfer| (transfer.next_index, transfer.chunk_count, transfer.total_bytes, transfer.bytes_received));
        let Some((next_index, chunk_count, total_bytes, bytes_received)) = header else {
            if inner
                .pending
                .get(&chunk.id)
                .is_some_and(|pending| pending.node_id == chunk.node_id)
            {
                // A chunk with no started transfer still resolves the
                // owner so the caller is not left to its deadline.
                inner.resolve_invoke(
                    &chunk.id,
                    Err(InvokeError::new(ErrorCode::InvalidRequest, "unknown invoke id")),
                );
            } else {
                debug!(request_id = %chunk.id, node_id = %chunk.node_id, "chunk without transfer dropped");
            }
            return Err(TransferError::UnknownInvokeId);
        };

        if chunk.index != next_index || chunk.index >= chunk_count {
            debug!(
                request_id = %chunk.id,
                index = chunk.index,
                expected = next_index,
                "chunk out of order"
            );
            return Err(inner.fail_transfer(&chunk.id, TransferError::ChunkOutOfOrder));
        }

        let Ok(data) = BASE64.decode(&chunk.data) else {
            return Err(inner.fail_transfer(&chunk.id, TransferError::ChunkBytesMismatch));
        };
        if data.len() as u64 != chunk.bytes {
            return Err(inner.fail_transfer(&chunk.id, TransferError::ChunkBytesMismatch));
        }
        if bytes_received + data.len() as u64 > total_bytes {
            return Err(inner.fail_transfer(&chunk.id, TransferError::ChunkBytesMismatch));
        }

        let transfer = inner
            .transfers
            .get_mut(&chunk.id)
            .expect("transfer presence checked above");
        transfer.hasher.update(&data);
        transfer.bytes_received += data.len() as u64;
        transfer.next_index += 1;
        transfer.chunks.push(data);
        let next_index = transfer.next_index;

        if next_index == chunk_count {
            return inner.complete_transfer(&chunk.id);
        }
        Ok(TransferProgress::ChunkAccepted { next_index })
    }
}

impl BrokerInner {
    /// Removes a transfer and returns its bytes to the inflight counter.
    /// The counter saturates at zero rather than underflowing.
    pub(crate) fn release_transfer(&mut self, id: &str) -> bool {
        match self.transfers.remove(id) {
            Some(transfer) => {
                self.inflight_bytes = self.inflight_bytes.saturating_sub(transfer.total_bytes);
                true
            },
            None => false,
        }
    }

    /// Rejects a transfer: tears it down, resolves the owning invoke with
    /// `INVALID_REQUEST` and the rejection's message, and hands the
    /// rejection back for the caller to return.
    fn fail_transfer(&mut self, id: &str, error: TransferError) -> TransferError {
        debug!(request_id = %id, reason = error.reason(), "transfer rejected");
        self.resolve_invoke(id, Err(error.to_invoke_error()));
        error
    }

    /// Runs the completion checks for a fully delivered transfer and
    /// resolves the owning invoke with the assembled payload.
    fn complete_transfer(&mut self, id: &str) -> Result<TransferProgress, TransferError> {
        let Some(transfer) = self.transfers.remove(id) else {
            return Err(TransferError::UnknownInvokeId);
        };
        self.inflight_bytes = self.inflight_bytes.saturating_sub(transfer.total_bytes);

        if transfer.bytes_received != transfer.total_bytes {
            return Err(self.fail_transfer_completed(id, TransferError::ChunkBytesMismatch));
        }
        let digest = hex::encode(transfer.hasher.finalize());
        if digest != transfer.expected_sha256 {
            return Err(self.fail_transfer_completed(id, TransferError::HashMismatch));
        }

        let mut body = Vec::with_capacity(usize::try_from(transfer.bytes_received).unwrap_or(0));
        for chunk in &transfer.chunks {
            body.extend_from_slice(chunk);
        }
        // Byte-exactness is already pinned by the digest; decoding is
        // lossy only for payloads that were never valid UTF-8.
        let payload_json = String::from_utf8_lossy(&body).into_owned();

        debug!(
            request_id = %id,
            total_bytes = transfer.total_bytes,
            chunk_count = transfer.chunk_count,
            "transfer completed"
        );
        self.resolve_invoke(id, Ok(InvokePayload::Serialized(payload_json)));
        Ok(TransferProgress::Completed)
    }

    /// [`fail_transfer`](Self::fail_transfer) for a transfer already
    /// removed from the table.
    fn fail_transfer_completed(&mut self, id: &str, error: TransferError) -> TransferError {
        debug!(request_id = %id, reason = error.reason(), "transfer rejected at completion");
        self.resolve_invoke(id, Err(error.to_invoke_error()));
        error
    }
}
