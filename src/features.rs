use glam::Vec2;
use rayon::prelude::*;

use crate::config::{FeatureParams, MatchParams};
use crate::error::{MosaicError, Result};
use crate::frame::{BandImage, Frame};

/// Half size of the square patch a descriptor is computed from.
const PATCH_RADIUS: usize = 8;
/// Side of the pooling cell inside the patch.
const CELL: usize = 2;
pub const DESCRIPTOR_LEN: usize = (2 * PATCH_RADIUS / CELL) * (2 * PATCH_RADIUS / CELL);
/// Structure tensor summation radius.
const WINDOW_RADIUS: usize = 2;

pub type Descriptor = [f32; DESCRIPTOR_LEN];

#[derive(Debug, Clone)]
pub struct Keypoint {
    pub p2d: Vec2,
    pub response: f32,
    pub descriptor: Descriptor,
}

/// Keypoints of one frame, detected on its reference band only.
#[derive(Debug, Clone)]
pub struct FrameFeatures {
    pub frame_id: usize,
    pub timestamp_ms: i64,
    pub img_w_h: (u32, u32),
    pub keypoints: Vec<Keypoint>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Keypoint index in the first frame of the pair.
    pub query: usize,
    /// Keypoint index in the second frame of the pair.
    pub train: usize,
    pub distance: f32,
}

/// Separable box sum of radius `r`, zero outside the image.
fn box_sum(src: &[f32], w: usize, h: usize, r: usize) -> Vec<f32> {
    let mut horizontal = vec![0.0f32; w * h];
    horizontal
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let line = &src[y * w..(y + 1) * w];
            for (x, out) in row.iter_mut().enumerate() {
                let x0 = x.saturating_sub(r);
                let x1 = (x + r).min(w - 1);
                *out = line[x0..=x1].iter().sum();
            }
        });
    let mut out = vec![0.0f32; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r).min(h - 1);
        for (x, v) in row.iter_mut().enumerate() {
            *v = (y0..=y1).map(|yy| horizontal[yy * w + x]).sum();
        }
    });
    out
}

/// Harris corner response for every pixel. Border pixels get zero.
pub fn harris_response(band: &BandImage, k: f32) -> Vec<f32> {
    let (w, h) = (band.width() as usize, band.height() as usize);
    let data = band.as_raw();
    let mut ixx = vec![0.0f32; w * h];
    let mut iyy = vec![0.0f32; w * h];
    let mut ixy = vec![0.0f32; w * h];
    if w < 3 || h < 3 {
        return vec![0.0; w * h];
    }
    ixx.par_chunks_mut(w)
        .zip(iyy.par_chunks_mut(w))
        .zip(ixy.par_chunks_mut(w))
        .enumerate()
        .filter(|(y, _)| *y >= 1 && *y < h - 1)
        .for_each(|(y, ((rxx, ryy), rxy))| {
            let p = |x: usize, yy: usize| data[yy * w + x];
            for x in 1..w - 1 {
                let gx = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1))
                    - (p(x - 1, y - 1) + 2.0 * p(x - 1, y) + p(x - 1, y + 1));
                let gy = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1))
                    - (p(x - 1, y - 1) + 2.0 * p(x, y - 1) + p(x + 1, y - 1));
                let gx = gx / 8.0;
                let gy = gy / 8.0;
                rxx[x] = gx * gx;
                ryy[x] = gy * gy;
                rxy[x] = gx * gy;
            }
        });
    let sxx = box_sum(&ixx, w, h, WINDOW_RADIUS);
    let syy = box_sum(&iyy, w, h, WINDOW_RADIUS);
    let sxy = box_sum(&ixy, w, h, WINDOW_RADIUS);
    (0..w * h)
        .into_par_iter()
        .map(|i| {
            let det = sxx[i] * syy[i] - sxy[i] * sxy[i];
            let trace = sxx[i] + syy[i];
            det - k * trace * trace
        })
        .collect()
}

fn is_local_max(response: &[f32], w: usize, x: usize, y: usize, radius: usize) -> bool {
    let idx = y * w + x;
    let r = response[idx];
    for yy in y - radius..=y + radius {
        for xx in x - radius..=x + radius {
            let n = yy * w + xx;
            if n == idx {
                continue;
            }
            // plateaus keep their first pixel in raster order
            if response[n] > r || (response[n] == r && n < idx) {
                return false;
            }
        }
    }
    true
}

/// Offset of the vertex of the parabola through three samples.
fn parabola_peak(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < f32::EPSILON {
        0.0
    } else {
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    }
}

/// Pooled, mean-free, unit-length patch around an integer location. `None`
/// for flat patches.
pub fn describe(band: &BandImage, x: usize, y: usize) -> Option<Descriptor> {
    let w = band.width() as usize;
    let h = band.height() as usize;
    if x < PATCH_RADIUS || y < PATCH_RADIUS || x + PATCH_RADIUS > w || y + PATCH_RADIUS > h {
        return None;
    }
    let data = band.as_raw();
    let cells = 2 * PATCH_RADIUS / CELL;
    let mut descriptor = [0.0f32; DESCRIPTOR_LEN];
    for cy in 0..cells {
        for cx in 0..cells {
            let mut sum = 0.0;
            for dy in 0..CELL {
                for dx in 0..CELL {
                    let px = x - PATCH_RADIUS + cx * CELL + dx;
                    let py = y - PATCH_RADIUS + cy * CELL + dy;
                    sum += data[py * w + px];
                }
            }
            descriptor[cy * cells + cx] = sum / (CELL * CELL) as f32;
        }
    }
    let mean = descriptor.iter().sum::<f32>() / DESCRIPTOR_LEN as f32;
    descriptor.iter_mut().for_each(|v| *v -= mean);
    let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-6 {
        return None;
    }
    descriptor.iter_mut().for_each(|v| *v /= norm);
    Some(descriptor)
}

/// Detects Harris corners and describes them. Keypoints are sorted by
/// decreasing response.
pub fn detect_keypoints(band: &BandImage, params: &FeatureParams) -> Vec<Keypoint> {
    let (w, h) = (band.width() as usize, band.height() as usize);
    let response = harris_response(band, params.harris_k);
    let max_response = response.iter().cloned().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Vec::new();
    }
    let threshold = params.quality_level * max_response;
    let margin = (PATCH_RADIUS + 1).max(params.nms_radius + 1).max(WINDOW_RADIUS + 2);
    if w <= 2 * margin || h <= 2 * margin {
        return Vec::new();
    }
    let mut keypoints: Vec<Keypoint> = (margin..h - margin)
        .into_par_iter()
        .flat_map_iter(|y| {
            let response = &response;
            (margin..w - margin).filter_map(move |x| {
                let r = response[y * w + x];
                if r <= threshold || !is_local_max(response, w, x, y, params.nms_radius) {
                    return None;
                }
                let descriptor = describe(band, x, y)?;
                let dx = parabola_peak(response[y * w + x - 1], r, response[y * w + x + 1]);
                let dy = parabola_peak(response[(y - 1) * w + x], r, response[(y + 1) * w + x]);
                Some(Keypoint {
                    p2d: Vec2::new(x as f32 + dx + 0.5, y as f32 + dy + 0.5),
                    response: r,
                    descriptor,
                })
            })
        })
        .collect();
    keypoints.sort_by(|a, b| {
        b.response
            .total_cmp(&a.response)
            .then(a.p2d.y.total_cmp(&b.p2d.y))
            .then(a.p2d.x.total_cmp(&b.p2d.x))
    });
    keypoints.truncate(params.max_keypoints);
    keypoints
}

/// Keypoints of a frame, detected on its reference band. Fails with
/// `InsufficientFeatures` below `min_keypoints`.
pub fn extract_features(
    frame: &Frame,
    reference_band: Option<usize>,
    params: &FeatureParams,
) -> Result<FrameFeatures> {
    let band = frame.reference_band(reference_band)?;
    let keypoints = detect_keypoints(&band, params);
    log::trace!("{}: {} keypoints", frame.name, keypoints.len());
    if keypoints.len() < params.min_keypoints {
        return Err(MosaicError::InsufficientFeatures {
            frame: frame.name.clone(),
            found: keypoints.len(),
            required: params.min_keypoints,
        });
    }
    Ok(FrameFeatures {
        frame_id: frame.id,
        timestamp_ms: frame.timestamp_ms,
        img_w_h: (frame.width(), frame.height()),
        keypoints,
    })
}

fn squared_distance(a: &Descriptor, b: &Descriptor) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Best and second best squared distance from `d` into `candidates`.
fn two_nearest(d: &Descriptor, candidates: &[Keypoint]) -> Option<(usize, f32, f32)> {
    let mut best = (usize::MAX, f32::INFINITY);
    let mut second = f32::INFINITY;
    for (idx, c) in candidates.iter().enumerate() {
        let dist = squared_distance(d, &c.descriptor);
        if dist < best.1 {
            second = best.1;
            best = (idx, dist);
        } else if dist < second {
            second = dist;
        }
    }
    if best.0 == usize::MAX {
        None
    } else {
        Some((best.0, best.1, second))
    }
}

/// Nearest-descriptor matching with Lowe's ratio test and optional mutual
/// consistency check.
pub fn match_features(a: &FrameFeatures, b: &FrameFeatures, params: &MatchParams) -> Vec<Match> {
    let ratio_sq = params.ratio * params.ratio;
    let forward: Vec<Option<(usize, f32, f32)>> = a
        .keypoints
        .par_iter()
        .map(|k| two_nearest(&k.descriptor, &b.keypoints))
        .collect();
    let backward: Option<Vec<Option<usize>>> = params.cross_check.then(|| {
        b.keypoints
            .par_iter()
            .map(|k| two_nearest(&k.descriptor, &a.keypoints).map(|(idx, _, _)| idx))
            .collect()
    });
    forward
        .into_iter()
        .enumerate()
        .filter_map(|(query, nearest)| {
            let (train, d1, d2) = nearest?;
            if d1 >= ratio_sq * d2 {
                return None;
            }
            if let Some(backward) = &backward {
                if backward[train] != Some(query) {
                    return None;
                }
            }
            Some(Match {
                query,
                train,
                distance: d1.sqrt(),
            })
        })
        .collect()
}

/// Frame pairs close enough in capture order to overlap. Indices refer to the
/// slice order, which is capture order.
pub fn candidate_pairs(count: usize, window: usize) -> Vec<(usize, usize)> {
    (0..count)
        .flat_map(|i| ((i + 1)..count.min(i + window + 1)).map(move |j| (i, j)))
        .collect()
}
