use serde::Serialize;
use thiserror::Error;

/// Errors that abort a run, or that are downgraded to a [`PipelineWarning`]
/// when they only affect a single frame.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("input error: {0}")]
    Input(String),

    #[error("inconsistent band geometry in {frame}: {reason}")]
    InconsistentBandGeometry { frame: String, reason: String },

    #[error("{frame} has {found} keypoints, at least {required} required")]
    InsufficientFeatures {
        frame: String,
        found: usize,
        required: usize,
    },

    #[error("alignment failed: {0}")]
    Alignment(String),

    #[error("mosaic composition failed: {0}")]
    Composition(String),

    #[error("georeferencing failed: {0}")]
    Georeferencing(String),

    #[error("raster error: {0}")]
    Raster(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = MosaicError> = std::result::Result<T, E>;

/// Recoverable outcomes. A run that finishes with warnings still produces a
/// mosaic; frame-level warnings name the frame that was left out.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    #[error("{frame}: skipped ({reason})")]
    FrameSkipped { frame: String, reason: String },

    #[error("{frame}: too blurry (laplacian variance {variance:.2} <= {threshold:.2})")]
    BlurryFrame {
        frame: String,
        variance: f64,
        threshold: f64,
    },

    #[error("{frame}: inconsistent band geometry ({reason})")]
    InconsistentBandGeometry { frame: String, reason: String },

    #[error("{frame}: insufficient features ({found} < {required})")]
    InsufficientFeatures {
        frame: String,
        found: usize,
        required: usize,
    },

    #[error("{frame}: not aligned to the mosaic ({reason})")]
    UnalignedFrame { frame: String, reason: String },

    #[error("{frame}: position extrapolated from flight log boundary at {timestamp_ms} ms")]
    ExtrapolatedPosition { frame: String, timestamp_ms: i64 },

    #[error("{file}:{line}: malformed flight log row ({reason})")]
    MalformedLogRow {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("flight log timestamp {timestamp_ms} ms is duplicated, later row dropped")]
    DuplicateLogTimestamp { timestamp_ms: i64 },
}

impl PipelineWarning {
    /// The frame this warning removed from the mosaic, if any.
    pub fn excluded_frame(&self) -> Option<&str> {
        match self {
            PipelineWarning::FrameSkipped { frame, .. }
            | PipelineWarning::BlurryFrame { frame, .. }
            | PipelineWarning::InconsistentBandGeometry { frame, .. }
            | PipelineWarning::InsufficientFeatures { frame, .. }
            | PipelineWarning::UnalignedFrame { frame, .. } => Some(frame),
            PipelineWarning::ExtrapolatedPosition { .. }
            | PipelineWarning::MalformedLogRow { .. }
            | PipelineWarning::DuplicateLogTimestamp { .. } => None,
        }
    }
}

impl MosaicError {
    /// Downgrades a per-frame failure to a warning. Errors that cannot be
    /// isolated to one frame are handed back unchanged.
    pub fn into_warning(self) -> Result<PipelineWarning, MosaicError> {
        match self {
            MosaicError::InconsistentBandGeometry { frame, reason } => {
                Ok(PipelineWarning::InconsistentBandGeometry { frame, reason })
            }
            MosaicError::InsufficientFeatures {
                frame,
                found,
                required,
            } => Ok(PipelineWarning::InsufficientFeatures {
                frame,
                found,
                required,
            }),
            other => Err(other),
        }
    }
}
