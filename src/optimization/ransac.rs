use glam::DVec2;
use log::trace;
use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;

use super::homography::{
    Transform2D, estimate_affine, estimate_homography, has_collinear_triplet, reprojection_error,
};
use crate::config::{RansacParams, TransformModel};

/// Minimum number of trials before the adaptive stopping rule may end the loop.
const MIN_TRIALS: usize = 16;
/// Twice the triangle area below which a sample counts as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct RansacResult {
    pub transform: Transform2D,
    /// Indices of the inlier correspondences.
    pub inliers: Vec<usize>,
    /// RMS reprojection error over the inliers, in pixels.
    pub residual: f64,
}

impl RansacResult {
    pub fn inlier_ratio(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / total as f64
        }
    }
}

pub fn fit_model(model: TransformModel, src: &[DVec2], dst: &[DVec2]) -> Option<Transform2D> {
    match model {
        TransformModel::Homography => estimate_homography(src, dst),
        TransformModel::Affine => estimate_affine(src, dst),
    }
}

fn inliers_of(transform: &Transform2D, src: &[DVec2], dst: &[DVec2], threshold: f64) -> Vec<usize> {
    src.iter()
        .zip(dst)
        .enumerate()
        .filter(|(_, (p, q))| reprojection_error(transform, **p, **q) < threshold)
        .map(|(i, _)| i)
        .collect()
}

fn rms_error(transform: &Transform2D, src: &[DVec2], dst: &[DVec2], inliers: &[usize]) -> f64 {
    if inliers.is_empty() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = inliers
        .iter()
        .map(|&i| reprojection_error(transform, src[i], dst[i]).powi(2))
        .sum();
    (sum_sq / inliers.len() as f64).sqrt()
}

/// Trials needed to draw one all-inlier sample with the given confidence.
fn required_trials(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    let p_good = inlier_ratio.powi(sample_size as i32);
    if p_good <= f64::EPSILON {
        return usize::MAX;
    }
    if p_good >= 1.0 - f64::EPSILON {
        return MIN_TRIALS;
    }
    let n = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if n.is_finite() {
        (n.ceil() as usize).max(MIN_TRIALS)
    } else {
        usize::MAX
    }
}

/// Random sample consensus over point correspondences `src[i] -> dst[i]`.
/// `seed` makes the result reproducible regardless of scheduling.
pub fn ransac(
    src: &[DVec2],
    dst: &[DVec2],
    params: &RansacParams,
    seed: u64,
) -> Option<RansacResult> {
    let sample_size = params.model.min_samples();
    let n = src.len();
    if n < sample_size || n != dst.len() {
        return None;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let threshold = params.inlier_threshold_px;

    let mut best: Option<(Transform2D, Vec<usize>)> = None;
    let mut trials_needed = params.max_iterations;
    let mut sample_src = Vec::with_capacity(sample_size);
    let mut sample_dst = Vec::with_capacity(sample_size);
    let mut trial = 0;
    while trial < trials_needed.min(params.max_iterations) {
        trial += 1;
        let sample = index::sample(&mut rng, n, sample_size);
        sample_src.clear();
        sample_dst.clear();
        for i in sample.iter() {
            sample_src.push(src[i]);
            sample_dst.push(dst[i]);
        }
        if has_collinear_triplet(&sample_src, COLLINEAR_TOLERANCE)
            || has_collinear_triplet(&sample_dst, COLLINEAR_TOLERANCE)
        {
            continue;
        }
        let Some(candidate) = fit_model(params.model, &sample_src, &sample_dst) else {
            continue;
        };
        let inliers = inliers_of(&candidate, src, dst, threshold);
        let better = match &best {
            Some((_, best_inliers)) => inliers.len() > best_inliers.len(),
            None => inliers.len() >= sample_size,
        };
        if better {
            trials_needed =
                required_trials(inliers.len() as f64 / n as f64, sample_size, params.confidence);
            best = Some((candidate, inliers));
        }
    }
    trace!("ransac stopped after {} trials", trial);

    let (mut transform, mut inliers) = best?;
    // refit on the consensus set, keep it only if it does not lose support
    let in_src: Vec<_> = inliers.iter().map(|&i| src[i]).collect();
    let in_dst: Vec<_> = inliers.iter().map(|&i| dst[i]).collect();
    if let Some(refined) = fit_model(params.model, &in_src, &in_dst) {
        let refined_inliers = inliers_of(&refined, src, dst, threshold);
        if refined_inliers.len() >= inliers.len() {
            transform = refined;
            inliers = refined_inliers;
        }
    }
    let residual = rms_error(&transform, src, dst, &inliers);
    Some(RansacResult {
        transform,
        inliers,
        residual,
    })
}
