use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::glob;
use image::ImageReader;

use crate::config::{DataType, ProjectConfig};
use crate::error::{MosaicError, PipelineWarning, Result};
use crate::frame::{BandLayout, Frame};
use crate::util::{dynamic_to_bands, laplacian_variance, read_tiff_bands, stem_to_timestamp};

const VIDEO_FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const BAND_STACK_EXTENSIONS: &[&str] = &["tif", "tiff"];

/// One capture waiting to be decoded: a frame image, or the band files that
/// share a capture key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEntry {
    pub name: String,
    pub timestamp_ms: i64,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    VideoFrames,
    BandStack,
}

/// Lazy, time-ordered sequence of frames. Nothing is decoded until the
/// iterator is advanced.
pub struct FrameSource {
    kind: SourceKind,
    entries: Vec<CaptureEntry>,
    cursor: usize,
    next_id: usize,
    interval_ms: i64,
    last_kept_ms: Option<i64>,
    blur_threshold: f64,
    reference_band: Option<usize>,
    warnings: Vec<PipelineWarning>,
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MosaicError::Input(format!(
            "source directory {} does not exist",
            dir.display()
        )));
    }
    let pattern = format!("{}/*", dir.display());
    let paths = glob(&pattern).map_err(|e| MosaicError::Input(e.to_string()))?;
    let mut files: Vec<PathBuf> = paths
        .filter_map(|p| p.ok())
        .filter(|p| p.is_file() && has_extension(p, extensions))
        .collect();
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Splits `KEY_<band>` into the capture key and band number.
fn split_band_suffix(stem: &str) -> Option<(&str, usize)> {
    let (key, band) = stem.rsplit_once('_')?;
    if key.is_empty() {
        return None;
    }
    band.parse::<usize>().ok().map(|b| (key, b))
}

/// One entry per frame image, timestamp from the file name or from the
/// capture index.
pub fn video_frame_entries(files: &[PathBuf], start_ms: i64, step_ms: i64) -> Vec<CaptureEntry> {
    let mut entries: Vec<_> = files
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            let name = file_stem(path);
            let timestamp_ms =
                stem_to_timestamp(&name).unwrap_or(start_ms + idx as i64 * step_ms);
            CaptureEntry {
                name,
                timestamp_ms,
                paths: vec![path.clone()],
            }
        })
        .collect();
    entries.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then(a.name.cmp(&b.name)));
    entries
}

/// Groups band files by capture key, bands ordered by their suffix.
pub fn band_stack_entries(files: &[PathBuf], start_ms: i64, step_ms: i64) -> Vec<CaptureEntry> {
    let mut groups: BTreeMap<String, Vec<(usize, PathBuf)>> = BTreeMap::new();
    for path in files {
        let stem = file_stem(path);
        match split_band_suffix(&stem) {
            Some((key, band)) => groups
                .entry(key.to_string())
                .or_default()
                .push((band, path.clone())),
            None => groups.entry(stem).or_default().push((0, path.clone())),
        }
    }
    let mut entries: Vec<_> = groups
        .into_iter()
        .enumerate()
        .map(|(idx, (key, mut bands))| {
            bands.sort();
            let timestamp_ms = stem_to_timestamp(&key).unwrap_or(start_ms + idx as i64 * step_ms);
            CaptureEntry {
                name: key,
                timestamp_ms,
                paths: bands.into_iter().map(|(_, p)| p).collect(),
            }
        })
        .collect();
    entries.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then(a.name.cmp(&b.name)));
    entries
}

impl FrameSource {
    pub fn from_config(config: &ProjectConfig) -> Result<FrameSource> {
        let dir = config.source_dir()?;
        let params = &config.processing_params;
        let step = params.frame_extraction_interval_ms.max(1);
        let source = match config.data_type {
            DataType::RgbVideo => {
                let files = list_files(&dir, VIDEO_FRAME_EXTENSIONS)?;
                log::info!("found {} decoded video frames in {}", files.len(), dir.display());
                FrameSource {
                    kind: SourceKind::VideoFrames,
                    entries: video_frame_entries(&files, params.capture_start_ms, step),
                    interval_ms: params.frame_extraction_interval_ms,
                    blur_threshold: params.blur_threshold,
                    ..FrameSource::empty(params.reference_band)
                }
            }
            DataType::Multispectral | DataType::Hyperspectral => {
                let files = list_files(&dir, BAND_STACK_EXTENSIONS)?;
                log::info!("found {} band files in {}", files.len(), dir.display());
                FrameSource {
                    kind: SourceKind::BandStack,
                    entries: band_stack_entries(&files, params.capture_start_ms, step),
                    ..FrameSource::empty(params.reference_band)
                }
            }
        };
        Ok(source)
    }

    fn empty(reference_band: Option<usize>) -> FrameSource {
        FrameSource {
            kind: SourceKind::BandStack,
            entries: Vec::new(),
            cursor: 0,
            next_id: 0,
            interval_ms: 0,
            last_kept_ms: None,
            blur_threshold: 0.0,
            reference_band,
            warnings: Vec::new(),
        }
    }

    pub fn len_hint(&self) -> usize {
        self.entries.len()
    }

    /// Warnings raised while skipping entries. Drained by the caller.
    pub fn take_warnings(&mut self) -> Vec<PipelineWarning> {
        std::mem::take(&mut self.warnings)
    }

    fn decode(&self, entry: &CaptureEntry, id: usize) -> Result<Frame> {
        match self.kind {
            SourceKind::VideoFrames => {
                let img = ImageReader::open(&entry.paths[0])?
                    .with_guessed_format()?
                    .decode()?;
                let (bands, color) = dynamic_to_bands(&img);
                let layout = BandLayout::resolve(bands.len(), color);
                Frame::new(id, entry.name.clone(), entry.timestamp_ms, layout, bands)
            }
            SourceKind::BandStack => {
                let mut bands = Vec::new();
                let mut color = false;
                for path in &entry.paths {
                    let (file_bands, file_color) = read_tiff_bands(path)?;
                    color |= file_color && entry.paths.len() == 1;
                    bands.extend(file_bands);
                }
                let layout = BandLayout::resolve(bands.len(), color);
                Frame::new(id, entry.name.clone(), entry.timestamp_ms, layout, bands)
            }
        }
    }
}

impl Iterator for FrameSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.entries.len() {
            let entry = self.entries[self.cursor].clone();
            self.cursor += 1;

            if self.kind == SourceKind::VideoFrames {
                if let Some(last) = self.last_kept_ms {
                    if entry.timestamp_ms < last + self.interval_ms {
                        log::trace!("{} inside sampling interval", entry.name);
                        continue;
                    }
                }
            }

            let frame = match self.decode(&entry, self.next_id) {
                Ok(frame) => frame,
                Err(err @ MosaicError::InconsistentBandGeometry { .. }) => return Some(Err(err)),
                Err(err) => {
                    self.warnings.push(PipelineWarning::FrameSkipped {
                        frame: entry.name.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if self.kind == SourceKind::VideoFrames && self.blur_threshold > 0.0 {
                let variance = match frame.reference_band(self.reference_band) {
                    Ok(band) => laplacian_variance(&band),
                    Err(err) => return Some(Err(err)),
                };
                if variance <= self.blur_threshold {
                    self.warnings.push(PipelineWarning::BlurryFrame {
                        frame: entry.name.clone(),
                        variance,
                        threshold: self.blur_threshold,
                    });
                    continue;
                }
            }

            self.last_kept_ms = Some(entry.timestamp_ms);
            self.next_id += 1;
            return Some(Ok(frame));
        }
        None
    }
}
