//! Software pipelining of loops built around asynchronous tensor-core MMAs.
//!
//! The accumulator of each eligible MMA is hoisted out of its loop, optionally
//! multi-buffered, and guarded by a ring of hardware barriers; the loop then
//! gets a stage schedule that an external expander turns into prologue,
//! steady state and epilogue.
//!
//! # Module Organization
//!
//! - [`mma`] - Accumulator-chain analysis, override detection and the rewrite
//! - [`coarse_schedule`] - Operation → (stage, cluster) table
//! - [`stage`] - Stage propagation and async-copy alignment
//! - [`expander`] - Expansion options, the expander trait and default predication
//! - [`driver`] - Entry point over a set of candidate loops
//! - [`config`] - Pass configuration
//! - [`error`] - Skip reasons and fatal errors

pub mod coarse_schedule;
pub mod config;
pub mod driver;
pub mod error;
pub mod expander;
pub mod mma;
pub mod stage;

#[cfg(test)]
pub mod test;

pub use config::PipelineConfig;
pub use driver::{LoopSchedule, PipelineReport, SkippedMma, pipeline_mma_loops};
pub use error::{Error, Result, SkipReason};
pub use expander::{PipelineExpander, PipeliningOptions, predicate_op};
pub use stage::{mma_pipelining_options, mma_schedule};
