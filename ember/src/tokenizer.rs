//! Tokenizer contract
//!
//! Defines the [`Tokenizer`] trait the session layer uses to convert
//! between text and token IDs. Concrete implementations (SentencePiece,
//! HuggingFace, GGUF vocab) live with the model-loading crates.

use crate::{Error, Result};

/// Trait for tokenizers that convert between text and token IDs.
pub trait Tokenizer {
    /// Encode text to token IDs (no special tokens added).
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode token IDs to text.
    ///
    /// # Errors
    /// Returns an error if decoding fails.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// The beginning-of-sequence token ID, if the backing vocabulary
    /// defines one.
    ///
    /// # Errors
    /// Defaults to [`Error::Unimplemented`] for tokenizers without a BOS
    /// token; callers must then supply one explicitly.
    fn bos_id(&self) -> Result<u32> {
        Err(Error::Unimplemented(
            "tokenizer does not expose a BOS id".to_string(),
        ))
    }
}
