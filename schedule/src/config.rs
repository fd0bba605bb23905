//! Pass configuration.
//!
//! Typed configuration built with bon, with an environment-variable fallback
//! for command-line drivers.

use bon::bon;

/// Default ring depth for accumulators and barriers.
pub const DEFAULT_NUM_STAGES: u32 = 2;

/// Configuration of [`crate::pipeline_mma_loops`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Depth of the accumulator and barrier rings created by the rewrite.
    pub num_stages: u32,
    /// Number of stages of the schedule handed to the expander. At least `num_stages`.
    pub schedule_stages: u32,
    /// Stop after the rewrite; no schedule is computed or expanded.
    pub disable_expander: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl PipelineConfig {
    /// Create a pipeline configuration with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = DEFAULT_NUM_STAGES)] num_stages: u32,
        #[builder(default = DEFAULT_NUM_STAGES)] schedule_stages: u32,
        #[builder(default = false)] disable_expander: bool,
    ) -> Self {
        assert!(num_stages >= 1, "pipeline needs at least one stage");
        assert!(schedule_stages >= 1, "schedule needs at least one stage");
        assert!(
            num_stages <= schedule_stages,
            "ring of {num_stages} stages does not fit a schedule of {schedule_stages} stages"
        );
        Self { num_stages, schedule_stages, disable_expander }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `MMAPIPE_NUM_STAGES` - Ring depth (default: 2)
    /// * `MMAPIPE_DISABLE_EXPANDER` - Rewrite only if set
    ///
    /// The schedule depth stays at its default unless the ring is deeper, in which case it matches the ring.
    pub fn from_env() -> Self {
        let num_stages = std::env::var("MMAPIPE_NUM_STAGES")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &u32| n >= 1)
            .unwrap_or(DEFAULT_NUM_STAGES);
        let disable_expander = std::env::var("MMAPIPE_DISABLE_EXPANDER").is_ok();

        Self { num_stages, schedule_stages: num_stages.max(DEFAULT_NUM_STAGES), disable_expander }
    }
}
