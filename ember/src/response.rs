//! Per-candidate response accumulation
//!
//! [`Responses`] holds the text and score state the decode loop builds up,
//! one slot per output candidate.

/// Accumulated generation output, one entry per output candidate.
///
/// `scores[i]` is the mean log-probability of candidate `i`'s generated
/// tokens. It stays at `-inf` until the first token is scored, so a
/// candidate that stopped before producing anything reports `-inf` and an
/// empty string — callers must treat that as a valid degenerate result,
/// not an error.
#[derive(Debug, Clone)]
pub struct Responses {
    /// Response text per candidate, append-only during decoding.
    pub texts: Vec<String>,
    /// Mean log-probability per candidate, `-inf` sentinel until written.
    pub scores: Vec<f32>,
}

impl Responses {
    /// Create a container for `num_candidates` output candidates.
    #[must_use]
    pub fn new(num_candidates: usize) -> Self {
        Self {
            texts: vec![String::new(); num_candidates],
            scores: vec![f32::NEG_INFINITY; num_candidates],
        }
    }

    /// Number of output candidates.
    #[must_use]
    pub fn num_candidates(&self) -> usize {
        self.texts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_starts_empty_with_sentinel_scores() {
        let responses = Responses::new(3);
        assert_eq!(responses.num_candidates(), 3);
        assert!(responses.texts.iter().all(String::is_empty));
        assert!(responses.scores.iter().all(|s| *s == f32::NEG_INFINITY));
    }
}
