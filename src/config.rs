use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{MosaicError, Result};
use crate::io::object_from_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    RgbVideo,
    Multispectral,
    Hyperspectral,
}

/// Directory layout created by the project manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPaths {
    pub project_root: PathBuf,
    #[serde(default)]
    pub rgb_video: Option<PathBuf>,
    #[serde(default)]
    pub multispectral: Option<PathBuf>,
    #[serde(default)]
    pub hyperspectral: Option<PathBuf>,
    pub flight_logs: PathBuf,
    /// Decoded video frames. Takes precedence over `rgb_video` when set.
    #[serde(default)]
    pub frames: Option<PathBuf>,
}

impl ProjectPaths {
    /// Relative paths are taken from `project_root`.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

/// Per-project configuration record. Consumed read-only by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_name: String,
    #[serde(default)]
    pub data_type: DataType,
    pub paths: ProjectPaths,
    #[serde(default)]
    pub processing_params: ProcessingParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParams {
    /// Minimum spacing between sampled video frames.
    pub frame_extraction_interval_ms: i64,
    /// Laplacian variance at or below which a video frame is dropped. 0 disables.
    pub blur_threshold: f64,
    /// 1-based band used for feature detection on band stacks. `None` averages all bands.
    #[serde(alias = "multispectral_band_for_stitching")]
    pub reference_band: Option<usize>,
    /// Base time for frames whose file name carries no timestamp.
    pub capture_start_ms: i64,
    pub features: FeatureParams,
    pub matching: MatchParams,
    pub ransac: RansacParams,
    pub mosaic: MosaicParams,
    pub georef: GeorefParams,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            frame_extraction_interval_ms: 5000,
            blur_threshold: 100.0,
            reference_band: Some(1),
            capture_start_ms: 0,
            features: FeatureParams::default(),
            matching: MatchParams::default(),
            ransac: RansacParams::default(),
            mosaic: MosaicParams::default(),
            georef: GeorefParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    pub max_keypoints: usize,
    pub min_keypoints: usize,
    pub harris_k: f32,
    /// Fraction of the strongest response a corner must reach.
    pub quality_level: f32,
    pub nms_radius: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_keypoints: 2000,
            min_keypoints: 20,
            harris_k: 0.04,
            quality_level: 0.01,
            nms_radius: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Frames at most this many positions apart in capture order are matched.
    pub window: usize,
    pub ratio: f32,
    pub cross_check: bool,
    pub min_matches: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            window: 2,
            ratio: 0.8,
            cross_check: true,
            min_matches: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformModel {
    #[default]
    Homography,
    Affine,
}

impl TransformModel {
    pub fn min_samples(&self) -> usize {
        match self {
            TransformModel::Homography => 4,
            TransformModel::Affine => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    pub model: TransformModel,
    pub inlier_threshold_px: f64,
    pub max_iterations: usize,
    pub confidence: f64,
    pub min_inlier_ratio: f64,
    pub min_inliers: usize,
    /// Largest linear scale change accepted between two frames.
    pub max_scale_change: f64,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            model: TransformModel::Homography,
            inlier_threshold_px: 3.0,
            max_iterations: 2000,
            confidence: 0.999,
            min_inlier_ratio: 0.25,
            min_inliers: 8,
            max_scale_change: 4.0,
            seed: 0,
        }
    }
}

impl RansacParams {
    pub fn required_inliers(&self) -> usize {
        self.min_inliers.max(self.model.min_samples())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    Nearest,
    #[default]
    Bilinear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicParams {
    pub nodata: f32,
    pub resampling: Resampling,
    pub max_pixels: u64,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            nodata: -9999.0,
            resampling: Resampling::Bilinear,
            max_pixels: 250_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoModel {
    #[default]
    Similarity,
    Affine,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeorefParams {
    pub crs: Crs,
    pub model: GeoModel,
}

/// Files written for one project run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub raster: PathBuf,
    pub track: PathBuf,
    pub report: PathBuf,
    pub preview: PathBuf,
}

impl ProjectConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ProjectConfig> {
        let config: ProjectConfig = object_from_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_name.trim().is_empty() {
            return Err(MosaicError::Input("project_name is empty".to_string()));
        }
        let params = &self.processing_params;
        if params.frame_extraction_interval_ms < 0 {
            return Err(MosaicError::Input(
                "frame_extraction_interval_ms must not be negative".to_string(),
            ));
        }
        if params.reference_band == Some(0) {
            return Err(MosaicError::Input(
                "reference_band is 1-based".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&params.matching.ratio) {
            return Err(MosaicError::Input(
                "matching.ratio must be within [0, 1]".to_string(),
            ));
        }
        if params.matching.window == 0 {
            return Err(MosaicError::Input("matching.window must be >= 1".to_string()));
        }
        if params.ransac.inlier_threshold_px <= 0.0 {
            return Err(MosaicError::Input(
                "ransac.inlier_threshold_px must be positive".to_string(),
            ));
        }
        if params.ransac.max_scale_change < 1.0 {
            return Err(MosaicError::Input(
                "ransac.max_scale_change must be >= 1".to_string(),
            ));
        }
        if let Crs::Utm { zone, .. } = params.georef.crs {
            if !(1..=60).contains(&zone) {
                return Err(MosaicError::Input(format!("invalid UTM zone {}", zone)));
            }
        }
        Ok(())
    }

    /// Source directory for the configured data type.
    pub fn source_dir(&self) -> Result<PathBuf> {
        let paths = &self.paths;
        let dir = match self.data_type {
            DataType::RgbVideo => paths.frames.as_deref().or(paths.rgb_video.as_deref()),
            DataType::Multispectral => paths.multispectral.as_deref(),
            DataType::Hyperspectral => paths.hyperspectral.as_deref(),
        };
        dir.map(|d| paths.resolve(d)).ok_or_else(|| {
            MosaicError::Input(format!("no source directory configured for {:?}", self.data_type))
        })
    }

    pub fn flight_log_dir(&self) -> PathBuf {
        self.paths.resolve(&self.paths.flight_logs)
    }

    pub fn output_paths<P: AsRef<Path>>(&self, output_root: P) -> OutputPaths {
        let dir = output_root.as_ref().join(&self.project_name);
        OutputPaths {
            raster: dir.join("stitched_georeferenced.tif"),
            track: dir.join("flight_track.json"),
            report: dir.join("run_report.json"),
            preview: dir.join("preview.png"),
            dir,
        }
    }
}
