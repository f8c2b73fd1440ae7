use aerial_orthomosaic::config::{RansacParams, TransformModel};
use aerial_orthomosaic::optimization::homography::{
    Transform2D, estimate_affine, estimate_homography, has_collinear_triplet,
    is_plausible_outline,
};
use aerial_orthomosaic::optimization::linear::{fit_affine, fit_similarity, is_collinear};
use aerial_orthomosaic::optimization::ransac::ransac;
use approx::assert_abs_diff_eq;
use glam::DVec2;
use nalgebra as na;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn sample_homography() -> Transform2D {
    Transform2D::from_matrix(na::Matrix3::new(
        1.02, 0.05, 12.0, -0.03, 0.98, -7.5, 1e-4, -5e-5, 1.0,
    ))
    .unwrap()
}

fn grid_points() -> Vec<DVec2> {
    let mut points = Vec::new();
    for y in 0..6 {
        for x in 0..8 {
            points.push(DVec2::new(10.0 + x as f64 * 19.0, 8.0 + y as f64 * 21.0));
        }
    }
    points
}

#[test]
fn test_transform_composition_associative_and_normalized() {
    let a = sample_homography();
    let b = Transform2D::from_matrix(na::Matrix3::new(
        0.9, -0.1, 3.0, 0.12, 1.1, 4.0, -2e-4, 1e-4, 2.0,
    ))
    .unwrap();
    let c = Transform2D::translation(-30.0, 17.0);
    let left = a.compose(&b).compose(&c);
    let right = a.compose(&b.compose(&c));
    assert!(left.max_abs_diff(&right) < 1e-9);
    assert_eq!(left.matrix()[(2, 2)], 1.0);
    assert_eq!(b.matrix()[(2, 2)], 1.0);

    let p = DVec2::new(42.0, -13.0);
    let via_compose = left.apply(p).unwrap();
    let via_steps = a.apply(b.apply(c.apply(p).unwrap()).unwrap()).unwrap();
    assert_abs_diff_eq!(via_compose.x, via_steps.x, epsilon = 1e-9);
    assert_abs_diff_eq!(via_compose.y, via_steps.y, epsilon = 1e-9);
}

#[test]
fn test_inverse_round_trip() {
    let h = sample_homography();
    let inv = h.inverse().unwrap();
    assert!(h.compose(&inv).max_abs_diff(&Transform2D::identity()) < 1e-12);
    assert!(Transform2D::from_matrix(na::Matrix3::zeros()).is_none());
}

#[test]
fn test_estimate_homography_exact() {
    let h = sample_homography();
    let src = grid_points();
    let dst: Vec<DVec2> = src.iter().map(|p| h.apply(*p).unwrap()).collect();
    let estimated = estimate_homography(&src, &dst).unwrap();
    for p in &src {
        let a = h.apply(*p).unwrap();
        let b = estimated.apply(*p).unwrap();
        assert!((a - b).length() < 1e-6);
    }
}

#[test]
fn test_estimate_affine_exact() {
    let t = Transform2D::from_matrix(na::Matrix3::new(
        0.8, 0.2, 5.0, -0.1, 1.3, -2.0, 0.0, 0.0, 1.0,
    ))
    .unwrap();
    let src = grid_points();
    let dst: Vec<DVec2> = src.iter().map(|p| t.apply(*p).unwrap()).collect();
    let estimated = estimate_affine(&src, &dst).unwrap();
    assert!(estimated.is_affine());
    assert!(estimated.max_abs_diff(&t) < 1e-8);
}

#[test]
fn test_collinear_detection() {
    let line = [
        DVec2::new(0.0, 0.0),
        DVec2::new(1.0, 1.0),
        DVec2::new(2.0, 2.0),
        DVec2::new(5.0, 0.0),
    ];
    assert!(has_collinear_triplet(&line, 1e-6));
    assert!(!has_collinear_triplet(&line[1..], 1e-6));
    assert!(is_collinear(&line[..3]));
    assert!(!is_collinear(&line));
}

#[test]
fn test_plausible_outline() {
    assert!(is_plausible_outline(&Transform2D::identity(), 160.0, 120.0, 4.0));
    assert!(is_plausible_outline(&sample_homography(), 160.0, 120.0, 4.0));
    let mirrored =
        Transform2D::from_matrix(na::Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0))
            .unwrap();
    assert!(!is_plausible_outline(&mirrored, 160.0, 120.0, 4.0));
    let shrunk =
        Transform2D::from_matrix(na::Matrix3::new(0.1, 0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.0, 1.0))
            .unwrap();
    assert!(!is_plausible_outline(&shrunk, 160.0, 120.0, 4.0));
}

fn contaminated(seed: u64) -> (Vec<DVec2>, Vec<DVec2>, usize) {
    let h = sample_homography();
    let mut src = grid_points();
    let mut dst: Vec<DVec2> = src.iter().map(|p| h.apply(*p).unwrap()).collect();
    let inliers = src.len();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    while src.len() < inliers + 20 {
        let s = DVec2::new(rng.random_range(0.0..160.0), rng.random_range(0.0..120.0));
        let d = DVec2::new(rng.random_range(0.0..160.0), rng.random_range(0.0..120.0));
        // keep outliers clearly off the model
        if (h.apply(s).unwrap() - d).length() > 10.0 {
            src.push(s);
            dst.push(d);
        }
    }
    (src, dst, inliers)
}

#[test]
fn test_ransac_rejects_outliers() {
    let (src, dst, true_inliers) = contaminated(9);
    let params = RansacParams::default();
    let result = ransac(&src, &dst, &params, 1).unwrap();
    for i in 0..true_inliers {
        assert!(result.inliers.contains(&i), "true inlier {} missed", i);
    }
    assert_eq!(result.inliers.len(), true_inliers);
    assert!(result.residual < 1e-6);
    let h = sample_homography();
    let p = DVec2::new(80.0, 60.0);
    assert!((h.apply(p).unwrap() - result.transform.apply(p).unwrap()).length() < 1e-6);
}

#[test]
fn test_ransac_is_deterministic_per_seed() {
    let (src, dst, _) = contaminated(4);
    let params = RansacParams {
        model: TransformModel::Affine,
        inlier_threshold_px: 50.0,
        ..RansacParams::default()
    };
    let a = ransac(&src, &dst, &params, 77).unwrap();
    let b = ransac(&src, &dst, &params, 77).unwrap();
    assert_eq!(a.inliers, b.inliers);
    assert_eq!(a.transform, b.transform);
}

#[test]
fn test_ransac_needs_minimal_sample() {
    let src = vec![DVec2::ZERO, DVec2::X, DVec2::Y];
    let dst = src.clone();
    assert!(ransac(&src, &dst, &RansacParams::default(), 0).is_none());
}

#[test]
fn test_similarity_fit_with_mirror() {
    let pixels = [DVec2::new(80.0, 60.0), DVec2::new(112.0, 60.0)];
    let world = [DVec2::new(10.0, 45.0), DVec2::new(10.0001, 45.0)];
    let c = fit_similarity(&pixels, &world).unwrap();
    let a = 0.0001 / 32.0;
    assert_abs_diff_eq!(c[1], a, epsilon = 1e-15);
    assert_abs_diff_eq!(c[2], 0.0, epsilon = 1e-15);
    assert_abs_diff_eq!(c[5], -a, epsilon = 1e-15);
    assert_abs_diff_eq!(c[0], 10.0 - a * 80.0, epsilon = 1e-12);
    assert_abs_diff_eq!(c[3], 45.0 + a * 60.0, epsilon = 1e-12);
}

#[test]
fn test_affine_fit_requires_spread() {
    let pixels = [
        DVec2::new(0.0, 0.0),
        DVec2::new(10.0, 0.0),
        DVec2::new(0.0, 10.0),
        DVec2::new(10.0, 10.0),
    ];
    let world: Vec<DVec2> = pixels
        .iter()
        .map(|p| DVec2::new(100.0 + 2.0 * p.x + 0.5 * p.y, 50.0 - 0.25 * p.x - 2.0 * p.y))
        .collect();
    let c = fit_affine(&pixels, &world).unwrap();
    let expected = [100.0, 2.0, 0.5, 50.0, -0.25, -2.0];
    for (got, want) in c.iter().zip(expected) {
        assert_abs_diff_eq!(*got, want, epsilon = 1e-9);
    }
    assert!(fit_affine(&pixels[..2], &world[..2]).is_none());
}
