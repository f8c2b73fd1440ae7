use glam::DVec2;
use image::Luma;
use log::info;
use rayon::prelude::*;

use crate::config::{MosaicParams, Resampling};
use crate::error::{MosaicError, Result};
use crate::frame::{BandImage, Frame};
use crate::optimization::homography::Transform2D;
use crate::util::{sample_bilinear, sample_nearest};

const NO_SOURCE: u32 = u32::MAX;
/// Outline coordinates this close to an integer are treated as that integer.
const LAYOUT_SNAP: f64 = 1e-6;

/// Placement of the raster in mosaic space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicLayout {
    /// Mosaic-space coordinate of the top-left corner of raster pixel (0, 0).
    pub origin: DVec2,
    pub width: u32,
    pub height: u32,
}

impl MosaicLayout {
    /// Raster pixel coordinates (corner based) of a mosaic-space point.
    pub fn to_pixel(&self, p: DVec2) -> DVec2 {
        p - self.origin
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Outline of a frame in mosaic space.
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    pub corners: [DVec2; 4],
}

impl Footprint {
    /// Maps the frame outline. `None` if a corner goes to infinity.
    pub fn new(transform: &Transform2D, width: u32, height: u32) -> Option<Footprint> {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            transform.apply(DVec2::new(0.0, 0.0))?,
            transform.apply(DVec2::new(w, 0.0))?,
            transform.apply(DVec2::new(w, h))?,
            transform.apply(DVec2::new(0.0, h))?,
        ];
        Some(Footprint { corners })
    }

    fn min(&self) -> DVec2 {
        self.corners.iter().fold(DVec2::INFINITY, |m, c| m.min(*c))
    }

    fn max(&self) -> DVec2 {
        self.corners.iter().fold(DVec2::NEG_INFINITY, |m, c| m.max(*c))
    }
}

/// Bounding box of the union of all footprints.
pub fn compute_layout(footprints: &[Footprint], max_pixels: u64) -> Result<MosaicLayout> {
    if footprints.is_empty() {
        return Err(MosaicError::Composition("no frames to compose".to_string()));
    }
    let min = footprints
        .iter()
        .fold(DVec2::INFINITY, |m, f| m.min(f.min()))
        + DVec2::splat(LAYOUT_SNAP);
    let min = min.floor();
    let max = footprints
        .iter()
        .fold(DVec2::NEG_INFINITY, |m, f| m.max(f.max()))
        - DVec2::splat(LAYOUT_SNAP);
    let max = max.ceil();
    let size = max - min;
    if !size.is_finite() || size.x < 1.0 || size.y < 1.0 {
        return Err(MosaicError::Composition(format!(
            "degenerate mosaic extent {:?}",
            size
        )));
    }
    if size.x * size.y > max_pixels as f64 {
        return Err(MosaicError::Composition(format!(
            "mosaic of {}x{} pixels exceeds the limit of {} pixels",
            size.x, size.y, max_pixels
        )));
    }
    Ok(MosaicLayout {
        origin: min,
        width: size.x as u32,
        height: size.y as u32,
    })
}

/// Composed multi-band raster in mosaic space.
#[derive(Debug, Clone)]
pub struct Mosaic {
    pub layout: MosaicLayout,
    pub bands: Vec<BandImage>,
    pub nodata: f32,
    /// Frame id of the contributing frame per pixel, row-major.
    source: Vec<u32>,
    /// Ids of frames that contributed at least one pixel, ascending.
    pub frame_ids: Vec<usize>,
}

impl Mosaic {
    pub fn width(&self) -> u32 {
        self.layout.width
    }

    pub fn height(&self) -> u32 {
        self.layout.height
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Frame id that supplied pixel `(x, y)`, `None` for no-data pixels.
    pub fn source_frame(&self, x: u32, y: u32) -> Option<usize> {
        let s = self.source[y as usize * self.layout.width as usize + x as usize];
        (s != NO_SOURCE).then_some(s as usize)
    }

    /// Number of pixels each contributing frame supplied, by frame id.
    pub fn coverage(&self) -> Vec<(usize, usize)> {
        self.frame_ids
            .iter()
            .map(|&id| (id, self.source.iter().filter(|&&s| s == id as u32).count()))
            .collect()
    }
}

/// Per-pixel sampling location shared by every band.
struct WarpMap {
    source: Vec<u32>,
    xmap: Vec<f32>,
    ymap: Vec<f32>,
}

struct Placed<'a> {
    frame: &'a Frame,
    /// Index into the frame slice.
    slot: usize,
    inverse: Transform2D,
    min: (i64, i64),
    max: (i64, i64),
    center: DVec2,
    half_diagonal: f64,
}

fn build_warp_map(placed: &[Placed], layout: &MosaicLayout) -> WarpMap {
    let w = layout.width as usize;
    let h = layout.height as usize;
    let mut source = vec![NO_SOURCE; w * h];
    let mut xmap = vec![f32::NAN; w * h];
    let mut ymap = vec![f32::NAN; w * h];
    source
        .par_chunks_mut(w)
        .zip(xmap.par_chunks_mut(w))
        .zip(ymap.par_chunks_mut(w))
        .enumerate()
        .for_each(|(y, ((src_row, x_row), y_row))| {
            let row_frames: Vec<&Placed> = placed
                .iter()
                .filter(|p| (y as i64) >= p.min.1 && (y as i64) < p.max.1)
                .collect();
            if row_frames.is_empty() {
                return;
            }
            for x in 0..w {
                let q = layout.origin + DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                let mut best: Option<(f64, usize, DVec2, u32)> = None;
                for p in &row_frames {
                    if (x as i64) < p.min.0 || (x as i64) >= p.max.0 {
                        continue;
                    }
                    let Some(local) = p.inverse.apply(q) else {
                        continue;
                    };
                    let (fw, fh) = (p.frame.width() as f64, p.frame.height() as f64);
                    if local.x < 0.0 || local.y < 0.0 || local.x >= fw || local.y >= fh {
                        continue;
                    }
                    let d = (local - p.center).length() / p.half_diagonal;
                    let closer = match best {
                        None => true,
                        Some((bd, bid, _, _)) => d < bd || (d == bd && p.frame.id < bid),
                    };
                    if closer {
                        best = Some((d, p.frame.id, local, p.slot as u32));
                    }
                }
                if let Some((_, _, local, slot)) = best {
                    src_row[x] = slot;
                    x_row[x] = (local.x - 0.5) as f32;
                    y_row[x] = (local.y - 0.5) as f32;
                }
            }
        });
    WarpMap { source, xmap, ymap }
}

/// Warps every frame into mosaic space with its global transform. The warp is
/// computed once and reused unchanged for all bands; overlaps go to the frame
/// whose optical center is nearest.
pub fn composite(
    frames: Vec<Frame>,
    transforms: &[Transform2D],
    layout: MosaicLayout,
    params: &MosaicParams,
) -> Result<Mosaic> {
    if frames.len() != transforms.len() {
        return Err(MosaicError::Composition(format!(
            "{} frames but {} transforms",
            frames.len(),
            transforms.len()
        )));
    }
    let band_count = frames
        .first()
        .map(|f| f.band_count())
        .ok_or_else(|| MosaicError::Composition("no frames to compose".to_string()))?;
    if let Some(f) = frames.iter().find(|f| f.band_count() != band_count) {
        return Err(MosaicError::InconsistentBandGeometry {
            frame: f.name.clone(),
            reason: format!("{} bands, mosaic has {}", f.band_count(), band_count),
        });
    }

    let mut placed = Vec::with_capacity(frames.len());
    for (slot, (frame, transform)) in frames.iter().zip(transforms).enumerate() {
        let footprint = Footprint::new(transform, frame.width(), frame.height()).ok_or_else(
            || MosaicError::Composition(format!("{} maps to infinity", frame.name)),
        )?;
        let inverse = transform.inverse().ok_or_else(|| {
            MosaicError::Composition(format!("{} has a singular transform", frame.name))
        })?;
        let min = layout.to_pixel(footprint.min()).floor();
        let max = layout.to_pixel(footprint.max()).ceil();
        placed.push(Placed {
            frame,
            slot,
            inverse,
            min: (min.x as i64, min.y as i64),
            max: (max.x as i64, max.y as i64),
            center: frame.center(),
            half_diagonal: frame.center().length().max(f64::EPSILON),
        });
    }

    let map = build_warp_map(&placed, &layout);
    let (w, h) = (layout.width, layout.height);
    let nodata = params.nodata;
    let sample: fn(&BandImage, f32, f32) -> f32 = match params.resampling {
        Resampling::Bilinear => sample_bilinear,
        Resampling::Nearest => sample_nearest,
    };
    let bands: Vec<BandImage> = (0..band_count)
        .map(|band| {
            BandImage::from_par_fn(w, h, |x, y| {
                let idx = y as usize * w as usize + x as usize;
                let slot = map.source[idx];
                if slot == NO_SOURCE {
                    return Luma([nodata]);
                }
                let frame = placed[slot as usize].frame;
                Luma([sample(frame.band(band), map.xmap[idx], map.ymap[idx])])
            })
        })
        .collect();

    let mut contributed = vec![false; frames.len()];
    for &s in &map.source {
        if s != NO_SOURCE {
            contributed[s as usize] = true;
        }
    }
    let source: Vec<u32> = map
        .source
        .par_iter()
        .map(|&s| {
            if s == NO_SOURCE {
                NO_SOURCE
            } else {
                frames[s as usize].id as u32
            }
        })
        .collect();
    let mut frame_ids: Vec<usize> = frames
        .iter()
        .zip(&contributed)
        .filter(|(_, c)| **c)
        .map(|(f, _)| f.id)
        .collect();
    frame_ids.sort_unstable();
    info!(
        "composed {}x{} mosaic, {} bands, {} contributing frames",
        w,
        h,
        band_count,
        frame_ids.len()
    );
    drop(placed);
    drop(frames);
    Ok(Mosaic {
        layout,
        bands,
        nodata,
        source,
        frame_ids,
    })
}
