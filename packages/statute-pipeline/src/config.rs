//! Pipeline configuration.

use std::time::Duration;

/// Tunables for a [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parts with less trimmed text than this are skipped, not failed.
    pub min_part_chars: usize,

    /// A part still `processing` after this long is considered abandoned
    /// and reclaimed to `failed` on the next resume.
    pub stale_after: Duration,

    /// Cap on rules requested per category call. Also enforced on the
    /// response, since oracle output is untrusted.
    pub max_rules_per_category: usize,

    /// Model override for extraction calls; `None` uses the oracle default.
    pub extraction_model: Option<String>,

    /// Model override for the summary call.
    pub summary_model: Option<String>,

    /// Output token budget per extraction call.
    pub extraction_max_tokens: u32,

    /// Output token budget for the summary call.
    pub summary_max_tokens: u32,

    /// How many top provisions/rules the summary prompt references.
    pub summary_top_items: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_part_chars: 50,
            stale_after: Duration::from_secs(15 * 60),
            max_rules_per_category: 20,
            extraction_model: None,
            summary_model: None,
            extraction_max_tokens: 4096,
            summary_max_tokens: 512,
            summary_top_items: 10,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_part_chars(mut self, chars: usize) -> Self {
        self.min_part_chars = chars;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_max_rules_per_category(mut self, max: usize) -> Self {
        self.max_rules_per_category = max;
        self
    }

    pub fn with_extraction_model(mut self, model: impl Into<String>) -> Self {
        self.extraction_model = Some(model.into());
        self
    }

    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = Some(model.into());
        self
    }
}
