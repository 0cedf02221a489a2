//! CPU sampling ops
//!
//! Batched softmax and top-k/top-p (nucleus) sampling over host logits.
//! Partial selection keeps the per-row cost at O(vocab + k log k), which
//! is cheap enough for vocab-sized rows (~50K) on every decode step.

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Error, Result};

use super::{Sampler, SamplerConfig};

fn check_batch(logits: &[f32], batch_size: usize) -> Result<usize> {
    if logits.is_empty() {
        return Err(Error::InvalidArgument("empty logits buffer".to_string()));
    }
    if batch_size == 0 || logits.len() % batch_size != 0 {
        return Err(Error::InvalidArgument(format!(
            "logits length {} not divisible by batch size {batch_size}",
            logits.len()
        )));
    }
    Ok(logits.len() / batch_size)
}

fn check_temperature(temperature: f32) -> Result<()> {
    // Exactly zero is rejected rather than clamped: it would divide by zero.
    if temperature <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "temperature must be > 0, got {temperature}"
        )));
    }
    Ok(())
}

/// Convert a flat `[batch_size * vocab_size]` logits buffer into
/// probability distributions, row by row, with temperature scaling.
///
/// Row maxima are subtracted before exponentiation for numerical
/// stability. When any row's exponential sum degenerates (≤ machine
/// epsilon, or non-finite), the **entire flattened buffer** is replaced by
/// a uniform distribution over all `batch_size * vocab_size` entries, not
/// just the affected row. Legacy behavior, kept for compatibility with
/// existing calibration output.
///
/// # Errors
/// [`Error::InvalidArgument`] on an empty buffer, a length not divisible
/// by `batch_size`, or a non-positive temperature.
pub fn softmax(logits: &[f32], temperature: f32, batch_size: usize) -> Result<Vec<f32>> {
    let vocab_size = check_batch(logits, batch_size)?;
    check_temperature(temperature)?;

    let mut probs = vec![0.0_f32; logits.len()];
    let mut degenerate = false;

    for row in 0..batch_size {
        let row_logits = &logits[row * vocab_size..(row + 1) * vocab_size];
        let max = row_logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0_f32;
        for (i, &v) in row_logits.iter().enumerate() {
            let e = ((v - max) / temperature).exp();
            probs[row * vocab_size + i] = e;
            sum += e;
        }
        // `!(sum > eps)` also catches NaN sums from all-infinite rows.
        if sum > f32::EPSILON {
            for p in &mut probs[row * vocab_size..(row + 1) * vocab_size] {
                *p /= sum;
            }
        } else {
            degenerate = true;
        }
    }

    if degenerate {
        let uniform = 1.0 / probs.len() as f32;
        probs.fill(uniform);
    }
    Ok(probs)
}

/// Softmax restricted to `k` pre-selected indices per row.
///
/// `indices` is a flat `[batch_size * k]` buffer of vocabulary indices.
/// Returns the `[batch_size * k]` probabilities (each row summing to 1
/// over its k entries) together with the per-row maximum logit that was
/// subtracted. Degenerate rows trigger the same whole-buffer uniform
/// fallback as [`softmax`], scoped to the `batch_size * k` output.
///
/// # Errors
/// [`Error::InvalidArgument`] on malformed buffers, an index outside the
/// vocabulary, or a non-positive temperature.
pub fn softmax_over_indices(
    logits: &[f32],
    indices: &[u32],
    k: usize,
    temperature: f32,
    batch_size: usize,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let vocab_size = check_batch(logits, batch_size)?;
    check_temperature(temperature)?;
    if k == 0 || indices.len() != batch_size * k {
        return Err(Error::InvalidArgument(format!(
            "expected {} top-k indices ({batch_size} rows of k={k}), got {}",
            batch_size * k,
            indices.len()
        )));
    }

    let mut probs = vec![0.0_f32; batch_size * k];
    let mut row_maxes = vec![0.0_f32; batch_size];
    let mut degenerate = false;

    for row in 0..batch_size {
        let row_indices = &indices[row * k..(row + 1) * k];
        let mut max = f32::NEG_INFINITY;
        for &idx in row_indices {
            if idx as usize >= vocab_size {
                return Err(Error::InvalidArgument(format!(
                    "top-k index {idx} out of range for vocab size {vocab_size}"
                )));
            }
            max = max.max(logits[row * vocab_size + idx as usize]);
        }
        row_maxes[row] = max;

        let mut sum = 0.0_f32;
        for (i, &idx) in row_indices.iter().enumerate() {
            let v = logits[row * vocab_size + idx as usize];
            let e = ((v - max) / temperature).exp();
            probs[row * k + i] = e;
            sum += e;
        }
        if sum > f32::EPSILON {
            for p in &mut probs[row * k..(row + 1) * k] {
                *p /= sum;
            }
        } else {
            degenerate = true;
        }
    }

    if degenerate {
        let uniform = 1.0 / probs.len() as f32;
        probs.fill(uniform);
    }
    Ok((probs, row_maxes))
}

/// Top-k/top-p (nucleus) sampling over a flat logits batch.
///
/// Per row:
/// 1. Partition out the `k` highest-logit indices in expected linear time,
///    then sort only those k descending (the nucleus walk requires the
///    descending order the partition alone does not guarantee).
/// 2. Softmax restricted to the sorted top-k, with temperature.
/// 3. The nucleus is the smallest prefix whose cumulative mass ≥ `p`,
///    capped at k.
/// 4. A nucleus with mass ≤ machine epsilon (double) selects the
///    highest-probability index deterministically; otherwise an
///    inverse-CDF draw in `[0, nucleus_sum)` picks the token.
///
/// When `scores` is supplied it receives, per row, the sampled token's
/// probability within the nucleus-local renormalized distribution (exactly
/// `1.0` when `k == 1`).
///
/// # Errors
/// [`Error::InvalidArgument`] on malformed buffers or out-of-range
/// `k`/`p`/`temperature`.
pub fn top_k_top_p_sample(
    logits: &[f32],
    k: usize,
    p: f32,
    temperature: f32,
    batch_size: usize,
    rng: &mut StdRng,
    mut scores: Option<&mut Vec<f32>>,
) -> Result<Vec<u32>> {
    let vocab_size = check_batch(logits, batch_size)?;
    if k == 0 {
        return Err(Error::InvalidArgument("top-k must be > 0".to_string()));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidArgument(format!(
            "top-p must be in [0, 1], got {p}"
        )));
    }
    let k = k.min(vocab_size);

    // Identify and sort the top-k indices for every row up front, then
    // renormalize over them in one batched pass.
    let mut topk_indices = Vec::with_capacity(batch_size * k);
    for row in 0..batch_size {
        let row_logits = &logits[row * vocab_size..(row + 1) * vocab_size];
        let mut indices: Vec<u32> = (0..vocab_size as u32).collect();
        let by_logit_desc =
            |a: &u32, b: &u32| row_logits[*b as usize].total_cmp(&row_logits[*a as usize]);
        if k < vocab_size {
            indices.select_nth_unstable_by(k - 1, by_logit_desc);
            indices.truncate(k);
        }
        indices.sort_unstable_by(by_logit_desc);
        topk_indices.extend_from_slice(&indices);
    }

    let (probs, _row_maxes) =
        softmax_over_indices(logits, &topk_indices, k, temperature, batch_size)?;

    let mut sampled = Vec::with_capacity(batch_size);
    for row in 0..batch_size {
        let row_probs = &probs[row * k..(row + 1) * k];

        let mut nucleus_sum = 0.0_f32;
        let mut nucleus_size = k;
        for (i, &pr) in row_probs.iter().enumerate() {
            nucleus_sum += pr;
            if nucleus_sum >= p {
                nucleus_size = i + 1;
                break;
            }
        }

        let (chosen, score) = if nucleus_sum <= f64::EPSILON as f32 {
            // Degenerate nucleus: deterministic argmax, no RNG advance.
            (0, 1.0)
        } else {
            let draw = rng.gen_range(0.0..nucleus_sum);
            let mut cumulative = 0.0_f32;
            let mut chosen = nucleus_size - 1;
            for (i, &pr) in row_probs[..nucleus_size].iter().enumerate() {
                cumulative += pr;
                if cumulative >= draw {
                    chosen = i;
                    break;
                }
            }
            (chosen, row_probs[chosen] / nucleus_sum)
        };

        sampled.push(topk_indices[row * k + chosen]);
        if let Some(out) = scores.as_deref_mut() {
            out.push(score);
        }
    }
    Ok(sampled)
}

/// Host-side top-k/top-p sampler.
///
/// Owns its RNG: the generator is seeded once at construction and advanced
/// on every call, so draws are reproducible end-to-end from a fixed seed.
pub struct CpuSampler {
    config: SamplerConfig,
    rng: StdRng,
}

impl CpuSampler {
    /// Create a sampler from validated config.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] on out-of-range `top_k`, `top_p`, or
    /// `temperature`.
    pub fn new(config: SamplerConfig) -> Result<Self> {
        if config.top_k == 0 {
            return Err(Error::InvalidArgument("top-k must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&config.top_p) {
            return Err(Error::InvalidArgument(format!(
                "top-p must be in [0, 1], got {}",
                config.top_p
            )));
        }
        check_temperature(config.temperature)?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self { config, rng })
    }

    /// The configuration this sampler was built with.
    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}

impl Sampler for CpuSampler {
    fn sample_to_id(&mut self, logits: &[f32], batch_size: usize) -> Result<Vec<u32>> {
        top_k_top_p_sample(
            logits,
            self.config.top_k,
            self.config.top_p,
            self.config.temperature,
            batch_size,
            &mut self.rng,
            None,
        )
    }

    fn sample_to_id_and_score(
        &mut self,
        logits: &[f32],
        batch_size: usize,
    ) -> Result<(Vec<u32>, Vec<f32>)> {
        let mut scores = Vec::with_capacity(batch_size);
        let ids = top_k_top_p_sample(
            logits,
            self.config.top_k,
            self.config.top_p,
            self.config.temperature,
            batch_size,
            &mut self.rng,
            Some(&mut scores),
        )?;
        Ok((ids, scores))
    }
}
