//! Pipeline orchestration for PaperScout.
//!
//! This crate ties search aggregation, abstract indexing, and relevance
//! scoring into the end-to-end resumable run (`run_pipeline`).

pub mod pipeline;

pub use pipeline::{
    PipelineStage, ProgressReporter, RunSummary, SilentProgress, run_pipeline,
};
