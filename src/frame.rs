use image::{ImageBuffer, Luma};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{MosaicError, Result};

/// One spectral band of a frame, raw sample values as `f32`.
pub type BandImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Band arrangement of a frame, resolved once when the frame is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BandLayout {
    Single,
    RgbTriplet,
    Stack(usize),
}

impl BandLayout {
    /// Layout for `count` bands. Three bands decoded from a color image are an
    /// RGB triplet, anything else read as separate bands is a stack.
    pub fn resolve(count: usize, from_color_image: bool) -> BandLayout {
        match count {
            1 => BandLayout::Single,
            3 if from_color_image => BandLayout::RgbTriplet,
            n => BandLayout::Stack(n),
        }
    }

    pub fn band_count(&self) -> usize {
        match self {
            BandLayout::Single => 1,
            BandLayout::RgbTriplet => 3,
            BandLayout::Stack(n) => *n,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub id: usize,
    pub name: String,
    pub timestamp_ms: i64,
    pub layout: BandLayout,
    bands: Vec<BandImage>,
}

impl Frame {
    /// Builds a frame, checking that every band shares one geometry and that the
    /// band count agrees with `layout`.
    pub fn new(
        id: usize,
        name: impl Into<String>,
        timestamp_ms: i64,
        layout: BandLayout,
        bands: Vec<BandImage>,
    ) -> Result<Frame> {
        let name = name.into();
        let Some(first) = bands.first() else {
            return Err(MosaicError::InconsistentBandGeometry {
                frame: name,
                reason: "frame has no bands".to_string(),
            });
        };
        if layout.band_count() != bands.len() {
            return Err(MosaicError::InconsistentBandGeometry {
                frame: name,
                reason: format!(
                    "layout {:?} expects {} bands, got {}",
                    layout,
                    layout.band_count(),
                    bands.len()
                ),
            });
        }
        let dims = first.dimensions();
        if dims.0 == 0 || dims.1 == 0 {
            return Err(MosaicError::InconsistentBandGeometry {
                frame: name,
                reason: "empty band".to_string(),
            });
        }
        if let Some((idx, band)) = bands
            .iter()
            .enumerate()
            .find(|(_, b)| b.dimensions() != dims)
        {
            return Err(MosaicError::InconsistentBandGeometry {
                frame: name,
                reason: format!(
                    "band {} is {}x{}, band 0 is {}x{}",
                    idx,
                    band.width(),
                    band.height(),
                    dims.0,
                    dims.1
                ),
            });
        }
        Ok(Frame {
            id,
            name,
            timestamp_ms,
            layout,
            bands,
        })
    }

    pub fn width(&self) -> u32 {
        self.bands[0].width()
    }

    pub fn height(&self) -> u32 {
        self.bands[0].height()
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn bands(&self) -> &[BandImage] {
        &self.bands
    }

    pub fn band(&self, idx: usize) -> &BandImage {
        &self.bands[idx]
    }

    /// Optical center in frame pixel coordinates.
    pub fn center(&self) -> glam::DVec2 {
        glam::DVec2::new(self.width() as f64 / 2.0, self.height() as f64 / 2.0)
    }

    /// Single band used for geometry. `reference_band` is 1-based and only
    /// consulted for band stacks; `None` averages the stack.
    pub fn reference_band(&self, reference_band: Option<usize>) -> Result<BandImage> {
        match self.layout {
            BandLayout::Single => Ok(self.bands[0].clone()),
            BandLayout::RgbTriplet => {
                let (r, g, b) = (&self.bands[0], &self.bands[1], &self.bands[2]);
                Ok(BandImage::from_par_fn(self.width(), self.height(), |x, y| {
                    Luma([0.299 * r.get_pixel(x, y)[0]
                        + 0.587 * g.get_pixel(x, y)[0]
                        + 0.114 * b.get_pixel(x, y)[0]])
                }))
            }
            BandLayout::Stack(n) => match reference_band {
                Some(band) if band >= 1 && band <= n => Ok(self.bands[band - 1].clone()),
                Some(band) => Err(MosaicError::Input(format!(
                    "reference band {} requested but {} has {} bands",
                    band, self.name, n
                ))),
                None => {
                    let mut mean = vec![0.0f32; (self.width() * self.height()) as usize];
                    let scale = 1.0 / n as f32;
                    mean.par_iter_mut().enumerate().for_each(|(idx, v)| {
                        *v = self.bands.iter().map(|b| b.as_raw()[idx]).sum::<f32>() * scale;
                    });
                    BandImage::from_raw(self.width(), self.height(), mean).ok_or_else(|| {
                        MosaicError::Input(format!("cannot average bands of {}", self.name))
                    })
                }
            },
        }
    }
}
