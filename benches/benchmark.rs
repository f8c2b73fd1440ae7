use aerial_orthomosaic::config::{FeatureParams, RansacParams};
use aerial_orthomosaic::features::detect_keypoints;
use aerial_orthomosaic::frame::BandImage;
use aerial_orthomosaic::optimization::homography::{Transform2D, estimate_homography};
use aerial_orthomosaic::optimization::ransac::ransac;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use glam::DVec2;
use image::Luma;
use nalgebra as na;

fn sample_homography() -> Transform2D {
    Transform2D::from_matrix(na::Matrix3::new(
        1.01, 0.04, 25.0, -0.02, 0.99, -3.0, 5e-5, -2e-5, 1.0,
    ))
    .unwrap_or_else(Transform2D::identity)
}

fn correspondences() -> (Vec<DVec2>, Vec<DVec2>) {
    let h = sample_homography();
    let src: Vec<DVec2> = (0..200)
        .map(|i| DVec2::new((i * 37 % 640) as f64, (i * 53 % 480) as f64))
        .collect();
    let dst = src
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let q = h.apply(*p).unwrap_or(*p);
            // every fifth point is an outlier
            if i % 5 == 0 { q + DVec2::new(40.0, -25.0) } else { q }
        })
        .collect();
    (src, dst)
}

fn bench_homography_estimation(c: &mut Criterion) {
    let (src, dst) = correspondences();
    let inlier_src: Vec<DVec2> = src.iter().copied().skip(1).step_by(5).collect();
    let inlier_dst: Vec<DVec2> = dst.iter().copied().skip(1).step_by(5).collect();
    c.bench_function("estimate_homography", |b| {
        b.iter(|| estimate_homography(black_box(&inlier_src), black_box(&inlier_dst)))
    });
    let params = RansacParams::default();
    c.bench_function("ransac_homography", |b| {
        b.iter(|| ransac(black_box(&src), black_box(&dst), &params, 0))
    });
}

fn bench_harris_detection(c: &mut Criterion) {
    let band = BandImage::from_fn(640, 480, |x, y| {
        let v = ((x / 9 + y / 7) % 3) as f32 * 60.0 + ((x * 31 + y * 17) % 13) as f32;
        Luma([v])
    });
    let params = FeatureParams::default();
    c.bench_function("detect_keypoints_640x480", |b| {
        b.iter(|| detect_keypoints(black_box(&band), &params))
    });
}

criterion_group!(benches, bench_homography_estimation, bench_harris_detection);
criterion_main!(benches);
