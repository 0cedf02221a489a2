//! Session-level prefill/decode orchestration
//!
//! A [`Session`] owns an executor and a tokenizer and drives text
//! generation: one prefill pass over the prompt, then token-by-token
//! decode steps until every output candidate hits a stop sequence or the
//! step ceiling is reached.
//!
//! Calls on one session must be strictly ordered — prefill, then decode —
//! and never issued concurrently: both the executor's internal state (KV
//! cache, step counters) and the stop detector depend on seeing every step
//! exactly once, in order.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use ember::{Error, Executor, Responses, Result, Sampler, StopTokenDetector, Tokenizer};

/// Leading word-boundary marker emitted by SentencePiece-style tokenizers;
/// mapped to an ordinary space in accumulated output.
const WORD_BOUNDARY_MARKER: char = '\u{2581}';

/// Why a decode loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishReason {
    /// Every candidate completed a stop sequence.
    StopToken,
    /// The hard step ceiling was reached. Not an error: the executor
    /// cannot signal KV-cache exhaustion, so the ceiling is the backstop
    /// and the partial response is returned as-is.
    StepLimit,
}

/// Configuration for one generation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of output candidates decoded in parallel (the batch size).
    #[serde(default = "default_num_output_candidates")]
    pub num_output_candidates: usize,
    /// Hard ceiling on decode steps per generation call.
    #[serde(default = "default_max_decode_steps")]
    pub max_decode_steps: usize,
    /// Stop sequences, each an ordered list of token ids.
    #[serde(default)]
    pub stop_token_ids: Vec<Vec<u32>>,
}

fn default_num_output_candidates() -> usize {
    1
}

fn default_max_decode_steps() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            num_output_candidates: default_num_output_candidates(),
            max_decode_steps: default_max_decode_steps(),
            stop_token_ids: Vec::new(),
        }
    }
}

/// A text-generation session over one executor + tokenizer pair.
///
/// The stop detector is owned by the session and reset on every prefill,
/// so one session can serve multiple generation calls in sequence. A
/// session is not internally synchronized and must not be shared across
/// threads without external ordering.
pub struct Session<E: Executor, T: Tokenizer> {
    executor: E,
    tokenizer: T,
    config: SessionConfig,
    detector: StopTokenDetector,
    last_prefill_token: Option<u32>,
}

impl<E: Executor, T: Tokenizer> Session<E, T> {
    /// Create a session, registering the configured stop sequences.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] on a zero candidate count or step
    /// ceiling, or on empty/duplicate stop sequences.
    pub fn new(executor: E, tokenizer: T, config: SessionConfig) -> Result<Self> {
        if config.num_output_candidates == 0 {
            return Err(Error::InvalidArgument(
                "num_output_candidates must be > 0".to_string(),
            ));
        }
        if config.max_decode_steps == 0 {
            return Err(Error::InvalidArgument(
                "max_decode_steps must be > 0".to_string(),
            ));
        }
        let mut detector = StopTokenDetector::new(config.num_output_candidates);
        for sequence in &config.stop_token_ids {
            detector.add_stop_token_ids(sequence)?;
        }
        Ok(Self {
            executor,
            tokenizer,
            config,
            detector,
            last_prefill_token: None,
        })
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The underlying executor.
    #[must_use]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The tokenizer.
    #[must_use]
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Register an additional stop sequence of token ids.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] on an empty sequence,
    /// [`Error::AlreadyExists`] on a duplicate.
    pub fn add_stop_token_ids(&mut self, ids: &[u32]) -> Result<()> {
        self.detector.add_stop_token_ids(ids)
    }

    /// Tokenize the prompt (BOS first), run the executor's prefill pass,
    /// and return the final token id of the submitted sequence — the first
    /// input of the decode phase.
    ///
    /// `bos_id` overrides the tokenizer's own BOS token; when `None` the
    /// tokenizer must provide one. With `wait` false the executor may
    /// start the pass without blocking.
    ///
    /// Resets stop-detection state from any previous generation call.
    ///
    /// # Errors
    /// Returns tokenizer or executor failures unchanged.
    pub fn prefill(&mut self, prompt: &str, bos_id: Option<u32>, wait: bool) -> Result<u32> {
        let bos = match bos_id {
            Some(id) => id,
            None => self.tokenizer.bos_id()?,
        };
        let mut token_ids = vec![bos];
        token_ids.extend(self.tokenizer.encode(prompt)?);

        self.executor.prefill(&token_ids, wait)?;
        self.detector.reset_batch();

        let last = token_ids.last().copied().unwrap_or(bos);
        self.last_prefill_token = Some(last);
        debug!(prompt_tokens = token_ids.len(), wait, "prefill submitted");
        Ok(last)
    }

    /// Decode with backend-internal sampling (ids in, ids out).
    ///
    /// Each step takes one sampled id per candidate from the executor,
    /// detokenizes it, and appends the text for candidates that had not
    /// already stopped before this step. Scores carry no information on
    /// this path and stay at the `-inf` sentinel.
    ///
    /// # Errors
    /// [`Error::Internal`] when the executor returns the wrong number of
    /// ids; executor, tokenizer, and detector failures unchanged.
    pub fn decode(&mut self) -> Result<Responses> {
        let num_candidates = self.config.num_output_candidates;
        let mut responses = Responses::new(num_candidates);
        let mut reason = FinishReason::StepLimit;
        let mut steps = 0_usize;

        for step in 0..self.config.max_decode_steps {
            let ids = self.executor.decode()?;
            if ids.len() != num_candidates {
                return Err(Error::Internal(format!(
                    "executor decode returned {} ids for {num_candidates} candidates",
                    ids.len()
                )));
            }
            trace!(step, ?ids, "decode step");

            let was_done = self.done_flags();
            self.detector.process_tokens(&ids)?;

            for (row, &id) in ids.iter().enumerate() {
                if was_done[row] {
                    continue;
                }
                let piece = self.tokenizer.decode(&[id])?;
                responses.texts[row].push_str(&normalize_piece(&piece));
            }

            steps = step + 1;
            if self.detector.all_done() {
                reason = FinishReason::StopToken;
                break;
            }
        }

        debug!(?reason, steps, "decode loop finished");
        Ok(responses)
    }

    /// Decode with external sampling (logits in, ids out).
    ///
    /// Each step feeds the previous step's sampled ids back into the
    /// executor, samples fresh ids and nucleus-local probabilities from
    /// the returned logits, and accumulates text, token counts, and
    /// log-probabilities — but only for candidates that had not already
    /// stopped: batched execution keeps producing tokens for finished
    /// rows, and those must not leak into the output.
    ///
    /// Final scores are the mean per-token log-probability, or `-inf` for
    /// a candidate that stopped before producing anything.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] when called before a prefill or when the
    /// executor returns a malformed logits buffer; sampler, executor,
    /// tokenizer, and detector failures unchanged.
    pub fn decode_custom_sampling(&mut self, sampler: &mut dyn Sampler) -> Result<Responses> {
        let num_candidates = self.config.num_output_candidates;
        let first_token = self.last_prefill_token.ok_or_else(|| {
            Error::InvalidArgument("decode_custom_sampling requires a prior prefill".to_string())
        })?;
        let vocab_size = self.executor.vocab_size();

        let mut responses = Responses::new(num_candidates);
        let mut score_sums = vec![0.0_f32; num_candidates];
        let mut token_counts = vec![0_usize; num_candidates];
        let mut input_ids = vec![first_token; num_candidates];
        let mut reason = FinishReason::StepLimit;
        let mut steps = 0_usize;

        for step in 0..self.config.max_decode_steps {
            let logits = self.executor.decode_logits(&input_ids)?;
            if logits.len() != num_candidates * vocab_size {
                return Err(Error::InvalidArgument(format!(
                    "executor returned a logits buffer of {} values, expected {num_candidates} x {vocab_size}",
                    logits.len()
                )));
            }

            let (ids, probs) = sampler.sample_to_id_and_score(&logits, num_candidates)?;
            if ids.len() != num_candidates || probs.len() != num_candidates {
                return Err(Error::Internal(format!(
                    "sampler returned {} ids / {} scores for {num_candidates} candidates",
                    ids.len(),
                    probs.len()
                )));
            }
            trace!(step, ?ids, "decode step");

            let was_done = self.done_flags();
            self.detector.process_tokens(&ids)?;

            for row in 0..num_candidates {
                if was_done[row] {
                    continue;
                }
                let piece = self.tokenizer.decode(&[ids[row]])?;
                responses.texts[row].push_str(&normalize_piece(&piece));
                score_sums[row] += probs[row].ln();
                token_counts[row] += 1;
            }

            // The sampled ids become the next step's input buffer.
            input_ids = ids;

            steps = step + 1;
            if self.detector.all_done() {
                reason = FinishReason::StopToken;
                break;
            }
        }

        for row in 0..num_candidates {
            if token_counts[row] > 0 {
                responses.scores[row] = score_sums[row] / token_counts[row] as f32;
            }
        }

        debug!(?reason, steps, "decode loop finished");
        Ok(responses)
    }

    /// Per-row trimming counts from the stop detector (see
    /// [`StopTokenDetector::steps_before_stop_tokens`]).
    #[must_use]
    pub fn steps_before_stop_tokens(&self) -> Vec<usize> {
        self.detector.steps_before_stop_tokens()
    }

    fn done_flags(&self) -> Vec<bool> {
        (0..self.config.num_output_candidates)
            .map(|row| self.detector.row_done(row))
            .collect()
    }
}

/// Map the tokenizer's leading word-boundary marker to a plain space.
fn normalize_piece(piece: &str) -> String {
    piece.replace(WORD_BOUNDARY_MARKER, " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_maps_word_boundary_marker() {
        assert_eq!(normalize_piece("\u{2581}hello"), " hello");
        assert_eq!(normalize_piece("plain"), "plain");
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.num_output_candidates, 1);
        assert_eq!(config.max_decode_steps, 256);
        assert!(config.stop_token_ids.is_empty());
    }
}
