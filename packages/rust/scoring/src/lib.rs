//! Relevance scoring and its durable checkpoint.
//!
//! This crate provides:
//! - [`CompletionClient`] / [`ChatCompletionsClient`] — the language-model endpoint seam
//! - [`CheckpointLog`] — append-only, crash-safe record of scoring outcomes
//! - [`run_scoring`] — the bounded-concurrency scoring stage

pub mod checkpoint;
pub mod client;
pub mod scorer;

pub use checkpoint::CheckpointLog;
pub use client::{ChatCompletionsClient, CompletionClient};
pub use scorer::{ScoreOutcome, parse_score_response, run_scoring};
