//! Token sampling
//!
//! Defines the backend-agnostic [`Sampler`] trait plus the configuration
//! and factory used to select a concrete implementation. The session layer
//! samples through the trait without knowing which backend does the work.
//!
//! Only the CPU sampler is implemented in this crate; GPU and NPU samplers
//! live with their executor backends and satisfy the same contract (same
//! input layout, same id/score outputs).

mod cpu;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use cpu::{softmax, softmax_over_indices, top_k_top_p_sample, CpuSampler};

/// Parameters for top-k/top-p (nucleus) sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Number of highest-probability candidates kept per row. Clamped to
    /// the vocabulary size; `1` means greedy decoding.
    pub top_k: usize,
    /// Nucleus probability threshold in `[0, 1]`.
    pub top_p: f32,
    /// Temperature for logit scaling (higher = more random). Must be > 0.
    pub temperature: f32,
    /// Seed for the PRNG. Same seed + same inputs → same output sequence.
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.9,
            temperature: 0.7,
            seed: 42,
        }
    }
}

/// Hardware backend a sampler runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerBackend {
    Cpu,
    Gpu,
    Npu,
}

/// Trait for samplers that turn a logits batch into token ids.
///
/// The logits buffer is flat `[batch_size * vocab_size]`, row-major.
/// Implementations own their RNG state: successive calls advance the same
/// generator, so a fixed seed reproduces a whole decode sequence but not
/// any individual step. One sampler instance must not be shared across
/// concurrently running sessions.
pub trait Sampler: Send {
    /// Sample one token id per batch row.
    ///
    /// # Errors
    /// Returns an error on malformed input buffers.
    fn sample_to_id(&mut self, logits: &[f32], batch_size: usize) -> Result<Vec<u32>>;

    /// Sample one token id per batch row, also reporting each sampled
    /// token's probability within the nucleus-local distribution. Callers
    /// wanting log-probabilities apply `ln` themselves.
    ///
    /// # Errors
    /// Returns an error on malformed input buffers.
    fn sample_to_id_and_score(
        &mut self,
        logits: &[f32],
        batch_size: usize,
    ) -> Result<(Vec<u32>, Vec<f32>)>;
}

/// Build a sampler for the given backend.
///
/// # Errors
/// [`Error::InvalidArgument`] on out-of-range config values, or
/// [`Error::Unimplemented`] for backends whose samplers are provided by
/// their executor crates rather than here.
pub fn create_sampler(
    backend: SamplerBackend,
    config: SamplerConfig,
) -> Result<Box<dyn Sampler>> {
    match backend {
        SamplerBackend::Cpu => Ok(Box::new(CpuSampler::new(config)?)),
        SamplerBackend::Gpu | SamplerBackend::Npu => Err(Error::Unimplemented(format!(
            "{backend:?} sampler is provided by its executor backend"
        ))),
    }
}
