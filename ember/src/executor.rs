//! Executor contract
//!
//! Defines the [`Executor`] trait the session layer drives. An executor
//! wraps a compiled model graph and its KV cache on some hardware backend
//! (CPU, GPU, NPU); the session only sees prefill and decode primitives.
//!
//! Calls belonging to one session must be strictly ordered: the executor
//! mutates internal state (KV cache, step counters) on every call and is
//! not internally synchronized.

use crate::{Error, Result};

/// A compiled-model executor on some hardware backend.
///
/// Backends implement at least one of the two decode paths:
///
/// - [`Executor::decode`] — the backend samples internally and returns one
///   token id per batch row (ids in, ids out).
/// - [`Executor::decode_logits`] — the backend returns raw logits and the
///   caller samples externally (ids in, logits out).
///
/// The unimplemented path keeps its default body.
pub trait Executor {
    /// Vocabulary size of the compiled model.
    fn vocab_size(&self) -> usize;

    /// Run the prefill forward pass over the full prompt token sequence,
    /// populating the KV cache.
    ///
    /// When `wait` is false the backend may start the pass without
    /// blocking; the next decode call then synchronizes on it.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails.
    fn prefill(&mut self, token_ids: &[u32], wait: bool) -> Result<()>;

    /// One decode step with backend-internal sampling: returns exactly one
    /// sampled token id per batch row.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails, or
    /// [`Error::Unimplemented`] when this backend only supports the
    /// external-sampling path.
    fn decode(&mut self) -> Result<Vec<u32>> {
        Err(Error::Unimplemented(
            "backend does not support internal-sampling decode".to_string(),
        ))
    }

    /// One decode step returning raw logits: takes one input token id per
    /// batch row, returns a flat `[batch_size * vocab_size]` logits buffer.
    ///
    /// # Errors
    /// Returns an error if the forward pass fails, or
    /// [`Error::Unimplemented`] when this backend only supports the
    /// internal-sampling path.
    fn decode_logits(&mut self, _input_ids: &[u32]) -> Result<Vec<f32>> {
        Err(Error::Unimplemented(
            "backend does not support external-sampling decode".to_string(),
        ))
    }
}
