//! Ember Runtime: session-level text generation
//!
//! This crate provides the [`Session`] abstraction for running prefill and
//! decode against an executor/tokenizer pair.
//!
//! # Architecture
//!
//! ```text
//! Session<E, T>      ← prompt in, Responses out (owns StopTokenDetector)
//!   ├── E: Executor  ← prefill/decode forward passes (KV cache inside)
//!   ├── T: Tokenizer ← text ↔ token ids
//!   └── Sampler      ← logits → token ids (external-sampling path only)
//! ```

mod session;

pub use session::{Session, SessionConfig};
