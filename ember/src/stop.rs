//! Stop-token detection
//!
//! [`StopTokenDetector`] watches token-at-a-time decode output across a
//! batch and reports, per row, when any registered stop sequence has just
//! been completed. Each (row, sequence) pair runs an independent prefix
//! automaton that resets on mismatch.
//!
//! Two matching paths exist: token ids and token strings. They maintain
//! separate registries and separate automata. Only the id path drives the
//! trimming step counter used by [`StopTokenDetector::steps_before_stop_tokens`];
//! the string path is for plain output-boundary detection where no
//! trimming offset is needed.

use crate::{Error, Result};

/// Per-(row, sequence) prefix-match progress.
#[derive(Debug, Clone, Copy, Default)]
struct MatchState {
    /// Number of trailing tokens matching a prefix of the sequence.
    position: usize,
    /// Decode step at which the current contiguous match attempt began.
    start_step: usize,
}

/// Multi-pattern, per-batch-row stop-sequence matcher.
///
/// Created once per session with a fixed batch size and reused across
/// generation calls via [`StopTokenDetector::reset_batch`], which clears
/// all progress but keeps the registered sequences. One detector instance
/// must not be shared across concurrently running sessions.
pub struct StopTokenDetector {
    batch_size: usize,
    /// Registered id sequences, in registration order.
    id_sequences: Vec<Vec<u32>>,
    /// Registered string sequences, in registration order.
    str_sequences: Vec<Vec<String>>,
    /// Automaton state, indexed `[row][sequence]`.
    id_states: Vec<Vec<MatchState>>,
    str_positions: Vec<Vec<usize>>,
    /// Sticky per-row completion flag.
    done: Vec<bool>,
    /// Step at which the winning match began, latched on first completion.
    done_start_step: Vec<Option<usize>>,
    /// Number of `process_tokens` calls so far (the id-path step counter).
    steps: usize,
}

impl StopTokenDetector {
    /// Create a detector for a batch of `batch_size` rows.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            id_sequences: Vec::new(),
            str_sequences: Vec::new(),
            id_states: vec![Vec::new(); batch_size],
            str_positions: vec![Vec::new(); batch_size],
            done: vec![false; batch_size],
            done_start_step: vec![None; batch_size],
            steps: 0,
        }
    }

    /// Batch size this detector was configured with.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Register a stop sequence of token ids.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] on an empty sequence,
    /// [`Error::AlreadyExists`] on an exact duplicate.
    pub fn add_stop_token_ids(&mut self, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Err(Error::InvalidArgument(
                "stop token sequence must not be empty".to_string(),
            ));
        }
        if self.id_sequences.iter().any(|s| s.as_slice() == ids) {
            return Err(Error::AlreadyExists(format!(
                "stop token sequence {ids:?} already registered"
            )));
        }
        self.id_sequences.push(ids.to_vec());
        for row in &mut self.id_states {
            row.push(MatchState::default());
        }
        Ok(())
    }

    /// Register a stop sequence of token strings.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] on an empty sequence,
    /// [`Error::AlreadyExists`] on an exact duplicate.
    pub fn add_stop_token_strs(&mut self, strs: &[&str]) -> Result<()> {
        if strs.is_empty() {
            return Err(Error::InvalidArgument(
                "stop token sequence must not be empty".to_string(),
            ));
        }
        if self
            .str_sequences
            .iter()
            .any(|s| s.len() == strs.len() && s.iter().zip(strs).all(|(a, b)| a == b))
        {
            return Err(Error::AlreadyExists(format!(
                "stop token sequence {strs:?} already registered"
            )));
        }
        self.str_sequences
            .push(strs.iter().map(|s| (*s).to_string()).collect());
        for row in &mut self.str_positions {
            row.push(0);
        }
        Ok(())
    }

    /// Consume one decoded token id per row and advance the automata.
    ///
    /// Advances the global step counter by one, then runs every
    /// (row, sequence) automaton. Rows already done are skipped; their
    /// sticky flag and latched start step are never mutated again.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] if `tokens.len()` differs from the
    /// configured batch size.
    pub fn process_tokens(&mut self, tokens: &[u32]) -> Result<()> {
        if tokens.len() != self.batch_size {
            return Err(Error::InvalidArgument(format!(
                "expected {} tokens (one per row), got {}",
                self.batch_size,
                tokens.len()
            )));
        }
        let step = self.steps;
        self.steps += 1;

        for (row, &token) in tokens.iter().enumerate() {
            if self.done[row] {
                continue;
            }
            for (seq_idx, sequence) in self.id_sequences.iter().enumerate() {
                let state = &mut self.id_states[row][seq_idx];
                if token == sequence[state.position] {
                    if state.position == 0 {
                        state.start_step = step;
                    }
                    state.position += 1;
                } else {
                    state.position = 0;
                    // Re-check the mismatched token against the sequence
                    // head in the same step.
                    if token == sequence[0] {
                        state.position = 1;
                        state.start_step = step;
                    }
                }
                if state.position == sequence.len() {
                    self.done[row] = true;
                    // First completed sequence for this row wins.
                    if self.done_start_step[row].is_none() {
                        self.done_start_step[row] = Some(state.start_step);
                    }
                    state.position = 0;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Consume one decoded token string per row.
    ///
    /// Matching logic is identical to [`StopTokenDetector::process_tokens`],
    /// but this path intentionally leaves the trimming step counter
    /// untouched: `steps_before_stop_tokens` stays at whatever the id path
    /// last produced (typically all zero).
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] if `tokens.len()` differs from the
    /// configured batch size.
    pub fn process_token_strs(&mut self, tokens: &[&str]) -> Result<()> {
        if tokens.len() != self.batch_size {
            return Err(Error::InvalidArgument(format!(
                "expected {} tokens (one per row), got {}",
                self.batch_size,
                tokens.len()
            )));
        }

        for (row, &token) in tokens.iter().enumerate() {
            if self.done[row] {
                continue;
            }
            for (seq_idx, sequence) in self.str_sequences.iter().enumerate() {
                let position = &mut self.str_positions[row][seq_idx];
                if token == sequence[*position] {
                    *position += 1;
                } else {
                    *position = usize::from(token == sequence[0]);
                }
                if *position == sequence.len() {
                    self.done[row] = true;
                    *position = 0;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Whether the given row has completed a stop sequence.
    #[must_use]
    pub fn row_done(&self, row: usize) -> bool {
        self.done[row]
    }

    /// Whether every row has completed a stop sequence.
    #[must_use]
    pub fn all_done(&self) -> bool {
        self.done.iter().all(|&d| d)
    }

    /// Per-row count of decode steps from the start of the winning match
    /// through the current step, for trimming trailing stop tokens from
    /// accumulated output. Zero for rows that never completed (and for
    /// rows stopped via the string path).
    #[must_use]
    pub fn steps_before_stop_tokens(&self) -> Vec<usize> {
        self.done_start_step
            .iter()
            .map(|start| start.map_or(0, |s| self.steps - s))
            .collect()
    }

    /// Clear all match progress, done flags, and the step counter, keeping
    /// the registered stop sequences. Used to reuse one detector across
    /// multiple generation calls within a session.
    pub fn reset_batch(&mut self) {
        for row in &mut self.id_states {
            for state in row {
                *state = MatchState::default();
            }
        }
        for row in &mut self.str_positions {
            for position in row {
                *position = 0;
            }
        }
        self.done.fill(false);
        self.done_start_step.fill(None);
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    /// Feed one token per row per step until every row is done, returning
    /// the 0-based step index at which `all_done` first became true.
    fn run_until_done(detector: &mut StopTokenDetector, streams: &[&[u32]]) -> usize {
        let len = streams[0].len();
        for step in 0..len {
            let tokens: Vec<u32> = streams.iter().map(|s| s[step]).collect();
            detector.process_tokens(&tokens).unwrap();
            if detector.all_done() {
                return step;
            }
        }
        panic!("streams exhausted before all rows stopped");
    }

    #[test]
    fn single_token_sequence_two_rows() {
        let mut detector = StopTokenDetector::new(2);
        detector.add_stop_token_ids(&[5]).unwrap();

        let done_at = run_until_done(&mut detector, &[&[3, 4, 5, 6, 7], &[1, 0, 6, 5, 99]]);
        assert_eq!(done_at, 3);
        assert_eq!(detector.steps_before_stop_tokens(), vec![2, 1]);
    }

    #[test]
    fn multi_sequence_first_completion_wins() {
        let mut detector = StopTokenDetector::new(2);
        detector.add_stop_token_ids(&[5]).unwrap();
        detector.add_stop_token_ids(&[7, 8, 9]).unwrap();

        let done_at = run_until_done(
            &mut detector,
            &[&[3, 6, 7, 8, 9, 10, 11, 12], &[1, 0, 0, 0, 0, 6, 5, 99]],
        );
        assert_eq!(done_at, 6);
        assert_eq!(detector.steps_before_stop_tokens(), vec![5, 1]);
    }

    #[test]
    fn mismatch_restarts_on_sequence_head() {
        let mut detector = StopTokenDetector::new(1);
        detector.add_stop_token_ids(&[7, 8]).unwrap();

        // 7 starts a match, the second 7 mismatches position 1 but
        // restarts at position 1 in the same step, then 8 completes.
        detector.process_tokens(&[7]).unwrap();
        detector.process_tokens(&[7]).unwrap();
        assert!(!detector.all_done());
        detector.process_tokens(&[8]).unwrap();
        assert!(detector.all_done());
        assert_eq!(detector.steps_before_stop_tokens(), vec![2]);
    }

    #[test]
    fn done_rows_are_sticky() {
        let mut detector = StopTokenDetector::new(1);
        detector.add_stop_token_ids(&[5]).unwrap();

        detector.process_tokens(&[5]).unwrap();
        assert!(detector.all_done());
        assert_eq!(detector.steps_before_stop_tokens(), vec![1]);

        // Further processing is harmless; the trimming count keeps
        // growing with the global step.
        detector.process_tokens(&[1]).unwrap();
        detector.process_tokens(&[5]).unwrap();
        assert!(detector.all_done());
        assert_eq!(detector.steps_before_stop_tokens(), vec![3]);
    }

    #[test]
    fn reset_batch_keeps_sequences() {
        let mut detector = StopTokenDetector::new(2);
        detector.add_stop_token_ids(&[5]).unwrap();
        let _ = run_until_done(&mut detector, &[&[3, 4, 5, 6, 7], &[1, 0, 6, 5, 99]]);

        detector.reset_batch();
        assert!(!detector.all_done());
        assert_eq!(detector.steps_before_stop_tokens(), vec![0, 0]);

        // Re-matching behaves like a fresh detector.
        let done_at = run_until_done(&mut detector, &[&[3, 4, 5, 6, 7], &[1, 0, 6, 5, 99]]);
        assert_eq!(done_at, 3);
        assert_eq!(detector.steps_before_stop_tokens(), vec![2, 1]);
    }

    #[test]
    fn empty_sequence_rejected() {
        let mut detector = StopTokenDetector::new(1);
        assert!(matches!(
            detector.add_stop_token_ids(&[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            detector.add_stop_token_strs(&[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn duplicate_sequence_rejected() {
        let mut detector = StopTokenDetector::new(1);
        detector.add_stop_token_ids(&[7, 8, 9]).unwrap();
        assert!(matches!(
            detector.add_stop_token_ids(&[7, 8, 9]),
            Err(Error::AlreadyExists(_))
        ));
        // Prefix of a registered sequence is a different sequence.
        detector.add_stop_token_ids(&[7, 8]).unwrap();

        detector.add_stop_token_strs(&["<end>"]).unwrap();
        assert!(matches!(
            detector.add_stop_token_strs(&["<end>"]),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn wrong_batch_width_rejected() {
        let mut detector = StopTokenDetector::new(2);
        detector.add_stop_token_ids(&[5]).unwrap();
        assert!(matches!(
            detector.process_tokens(&[1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            detector.process_token_strs(&["a", "b", "c"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn string_path_matches_but_leaves_trim_count_untouched() {
        let mut detector = StopTokenDetector::new(1);
        detector.add_stop_token_strs(&["<eot", ">"]).unwrap();

        detector.process_token_strs(&["hello"]).unwrap();
        detector.process_token_strs(&["<eot"]).unwrap();
        assert!(!detector.all_done());
        detector.process_token_strs(&[">"]).unwrap();
        assert!(detector.all_done());
        assert_eq!(detector.steps_before_stop_tokens(), vec![0]);
    }
}
