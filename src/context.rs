use log::warn;

use crate::config::ProjectConfig;
use crate::error::PipelineWarning;
use crate::io::ExcludedFrame;

/// Run-scoped state passed explicitly through the stages: the configuration and
/// the warnings collected so far.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: ProjectConfig,
    warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(config: ProjectConfig) -> PipelineContext {
        PipelineContext {
            config,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, warning: PipelineWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Records warnings gathered by a stage or a parallel task.
    pub fn merge<I: IntoIterator<Item = PipelineWarning>>(&mut self, warnings: I) {
        for w in warnings {
            self.warn(w);
        }
    }

    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Every frame left out of the mosaic, with the reason, in the order the
    /// exclusions happened.
    pub fn excluded_frames(&self) -> Vec<ExcludedFrame> {
        self.warnings
            .iter()
            .filter_map(|w| {
                w.excluded_frame().map(|frame| ExcludedFrame {
                    frame: frame.to_string(),
                    reason: w.to_string(),
                })
            })
            .collect()
    }

    pub fn into_warnings(self) -> Vec<PipelineWarning> {
        self.warnings
    }
}
