use glam::DVec2;
use log::trace;
use nalgebra as na;

const EPS: f64 = 1e-12;

/// Planar projective transform in homogeneous coordinates, kept normalized so
/// that the bottom-right element is 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    mat: na::Matrix3<f64>,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform2D {
    pub fn identity() -> Transform2D {
        Transform2D {
            mat: na::Matrix3::identity(),
        }
    }

    /// `None` when the matrix cannot be normalized or is singular.
    pub fn from_matrix(mat: na::Matrix3<f64>) -> Option<Transform2D> {
        if mat.iter().any(|v| !v.is_finite()) || mat[(2, 2)].abs() < EPS {
            return None;
        }
        let mat = mat / mat[(2, 2)];
        if mat.determinant().abs() < EPS {
            return None;
        }
        Some(Transform2D { mat })
    }

    pub fn translation(tx: f64, ty: f64) -> Transform2D {
        Transform2D {
            mat: na::Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0),
        }
    }

    pub fn matrix(&self) -> &na::Matrix3<f64> {
        &self.mat
    }

    pub fn is_affine(&self) -> bool {
        self.mat[(2, 0)].abs() < EPS && self.mat[(2, 1)].abs() < EPS
    }

    fn normalized(mat: na::Matrix3<f64>) -> na::Matrix3<f64> {
        let s = mat[(2, 2)];
        if s.abs() < EPS { mat } else { mat / s }
    }

    /// `self ∘ other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Transform2D) -> Transform2D {
        Transform2D {
            mat: Self::normalized(self.mat * other.mat),
        }
    }

    pub fn inverse(&self) -> Option<Transform2D> {
        self.mat.try_inverse().and_then(Transform2D::from_matrix)
    }

    /// Maps a point. `None` when the point lands on the line at infinity.
    pub fn apply(&self, p: DVec2) -> Option<DVec2> {
        let v = self.mat * na::Vector3::new(p.x, p.y, 1.0);
        if v[2].abs() < EPS {
            return None;
        }
        Some(DVec2::new(v[0] / v[2], v[1] / v[2]))
    }

    /// Largest elementwise difference to another transform.
    pub fn max_abs_diff(&self, other: &Transform2D) -> f64 {
        (self.mat - other.mat).abs().max()
    }
}

/// Similarity that moves the centroid to the origin and the mean distance to
/// sqrt(2).
fn normalizing_transform(points: &[DVec2]) -> Option<na::Matrix3<f64>> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(DVec2::ZERO, |acc, p| acc + *p) / n;
    let mean_dist = points.iter().map(|p| (*p - centroid).length()).sum::<f64>() / n;
    if mean_dist < EPS {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(na::Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    ))
}

fn apply_mat(m: &na::Matrix3<f64>, p: DVec2) -> DVec2 {
    let v = m * na::Vector3::new(p.x, p.y, 1.0);
    DVec2::new(v[0] / v[2], v[1] / v[2])
}

/// Twice the signed area of a triangle.
fn triangle_area2(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    (b - a).perp_dot(c - a)
}

/// True when any three of the points are (nearly) collinear.
pub fn has_collinear_triplet(points: &[DVec2], tolerance: f64) -> bool {
    let n = points.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if triangle_area2(points[i], points[j], points[k]).abs() < tolerance {
                    return true;
                }
            }
        }
    }
    false
}

/// Normalized direct linear transform. Uses every correspondence, so it serves
/// both minimal samples and the final refit on inliers.
pub fn estimate_homography(src: &[DVec2], dst: &[DVec2]) -> Option<Transform2D> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }
    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    let mut ata = na::SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in src.iter().zip(dst) {
        let p = apply_mat(&t_src, *p);
        let q = apply_mat(&t_dst, *q);
        let r0 = na::SVector::<f64, 9>::from_row_slice(&[
            -p.x,
            -p.y,
            -1.0,
            0.0,
            0.0,
            0.0,
            q.x * p.x,
            q.x * p.y,
            q.x,
        ]);
        let r1 = na::SVector::<f64, 9>::from_row_slice(&[
            0.0,
            0.0,
            0.0,
            -p.x,
            -p.y,
            -1.0,
            q.y * p.x,
            q.y * p.y,
            q.y,
        ]);
        ata += r0 * r0.transpose() + r1 * r1.transpose();
    }
    let eigen = ata.symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);
    let h_norm = na::Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_dst_inv = t_dst.try_inverse()?;
    let h_mat = t_dst_inv * h_norm * t_src;
    let transform = Transform2D::from_matrix(h_mat);
    if transform.is_none() {
        trace!("degenerate homography");
    }
    transform
}

/// Least-squares affine fit, at least three non-collinear correspondences.
pub fn estimate_affine(src: &[DVec2], dst: &[DVec2]) -> Option<Transform2D> {
    if src.len() < 3 || src.len() != dst.len() {
        return None;
    }
    let mut m = na::Matrix3::<f64>::zeros();
    let mut bx = na::Vector3::<f64>::zeros();
    let mut by = na::Vector3::<f64>::zeros();
    for (p, q) in src.iter().zip(dst) {
        let row = na::Vector3::new(p.x, p.y, 1.0);
        m += row * row.transpose();
        bx += row * q.x;
        by += row * q.y;
    }
    let chol = m.cholesky()?;
    let ax = chol.solve(&bx);
    let ay = chol.solve(&by);
    Transform2D::from_matrix(na::Matrix3::new(
        ax[0], ax[1], ax[2], ay[0], ay[1], ay[2], 0.0, 0.0, 1.0,
    ))
}

/// Reprojection error of one correspondence, infinite if the point maps to
/// infinity.
pub fn reprojection_error(transform: &Transform2D, src: DVec2, dst: DVec2) -> f64 {
    transform
        .apply(src)
        .map(|p| (p - dst).length())
        .unwrap_or(f64::INFINITY)
}

/// Checks that a `w`×`h` frame outline stays a convex, orientation-preserving
/// quad whose area changes by at most `max_scale²`.
pub fn is_plausible_outline(transform: &Transform2D, w: f64, h: f64, max_scale: f64) -> bool {
    let corners = [
        DVec2::new(0.0, 0.0),
        DVec2::new(w, 0.0),
        DVec2::new(w, h),
        DVec2::new(0.0, h),
    ];
    let mut mapped = [DVec2::ZERO; 4];
    for (m, c) in mapped.iter_mut().zip(corners) {
        match transform.apply(c) {
            Some(p) => *m = p,
            None => return false,
        }
    }
    for i in 0..4 {
        let a = mapped[i];
        let b = mapped[(i + 1) % 4];
        let c = mapped[(i + 2) % 4];
        if triangle_area2(a, b, c) <= 0.0 {
            return false;
        }
    }
    let area = 0.5
        * (0..4)
            .map(|i| mapped[i].perp_dot(mapped[(i + 1) % 4]))
            .sum::<f64>();
    let ratio = area / (w * h);
    ratio.is_finite() && ratio >= 1.0 / (max_scale * max_scale) && ratio <= max_scale * max_scale
}
