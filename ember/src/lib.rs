//! Ember: core types for on-device LLM inference
//!
//! This crate provides the decode-time sampling engine, stop-token
//! detection, and the collaborator contracts (executor, tokenizer) used by
//! the session layer in `ember-runtime`. Hardware-specific executors live
//! in separate crates and plug in through the [`Executor`] trait.

pub mod error;
pub mod executor;
pub mod response;
pub mod sampler;
pub mod stop;
pub mod tokenizer;

pub use error::{Error, Result};
pub use executor::Executor;
pub use response::Responses;
pub use sampler::{
    create_sampler, softmax, softmax_over_indices, top_k_top_p_sample, CpuSampler, Sampler,
    SamplerBackend, SamplerConfig,
};
pub use stop::StopTokenDetector;
pub use tokenizer::Tokenizer;
