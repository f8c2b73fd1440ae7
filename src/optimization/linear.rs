use faer::linalg::solvers::SolveLstsqCore;
use glam::DVec2;

/// Relative size of the smaller principal spread below which points are
/// treated as lying on a line.
const COLLINEAR_RATIO: f64 = 1e-3;

/// Solves `a x = b` in the least-squares sense with a QR decomposition.
fn solve_lstsq(rows: usize, cols: usize, a: impl Fn(usize, usize) -> f64, b: impl Fn(usize) -> f64) -> Option<Vec<f64>> {
    if rows < cols {
        return None;
    }
    let a_mat: faer::Mat<f64> = faer::Mat::from_fn(rows, cols, |i, j| a(i, j));
    let mut x: faer::Mat<f64> = faer::Mat::from_fn(rows, 1, |i, _| b(i));
    a_mat
        .qr()
        .solve_lstsq_in_place_with_conj(faer::Conj::No, x.as_mut());
    let solution: Vec<f64> = (0..cols).map(|i| *x.get(i, 0)).collect();
    if solution.iter().all(|v| v.is_finite()) {
        Some(solution)
    } else {
        None
    }
}

/// Fits `world = [a b; b -a] * pixel + t`, a similarity with the mirror that
/// maps image rows (down) to northing (up). Returns GDAL-ordered coefficients.
pub fn fit_similarity(pixels: &[DVec2], world: &[DVec2]) -> Option<[f64; 6]> {
    let n = pixels.len();
    if n < 2 || n != world.len() {
        return None;
    }
    // normalize both sides for conditioning
    let pc = pixels.iter().fold(DVec2::ZERO, |s, p| s + *p) / n as f64;
    let wc = world.iter().fold(DVec2::ZERO, |s, p| s + *p) / n as f64;
    let x = solve_lstsq(
        2 * n,
        2,
        |row, col| {
            let p = pixels[row / 2] - pc;
            match (row % 2, col) {
                (0, 0) => p.x,
                (0, _) => p.y,
                (_, 0) => -p.y,
                (_, _) => p.x,
            }
        },
        |row| {
            let w = world[row / 2] - wc;
            if row % 2 == 0 { w.x } else { w.y }
        },
    )?;
    let (a, b) = (x[0], x[1]);
    if (a * a + b * b).sqrt() < f64::EPSILON {
        return None;
    }
    let x0 = wc.x - a * pc.x - b * pc.y;
    let y0 = wc.y - b * pc.x + a * pc.y;
    Some([x0, a, b, y0, b, -a])
}

/// Full 6-parameter least-squares affine fit. `None` for fewer than three
/// points or collinear points.
pub fn fit_affine(pixels: &[DVec2], world: &[DVec2]) -> Option<[f64; 6]> {
    let n = pixels.len();
    if n < 3 || n != world.len() || is_collinear(pixels) {
        return None;
    }
    let pc = pixels.iter().fold(DVec2::ZERO, |s, p| s + *p) / n as f64;
    let wc = world.iter().fold(DVec2::ZERO, |s, p| s + *p) / n as f64;
    let design = |row: usize, col: usize| {
        let p = pixels[row] - pc;
        if col == 0 { p.x } else { p.y }
    };
    let gx = solve_lstsq(n, 2, design, |row| world[row].x - wc.x)?;
    let gy = solve_lstsq(n, 2, design, |row| world[row].y - wc.y)?;
    let x0 = wc.x - gx[0] * pc.x - gx[1] * pc.y;
    let y0 = wc.y - gy[0] * pc.x - gy[1] * pc.y;
    Some([x0, gx[0], gx[1], y0, gy[0], gy[1]])
}

/// True when the points have (almost) no spread across their principal axis.
pub fn is_collinear(points: &[DVec2]) -> bool {
    if points.len() < 3 {
        return true;
    }
    let n = points.len() as f64;
    let c = points.iter().fold(DVec2::ZERO, |s, p| s + *p) / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = *p - c;
        sxx += d.x * d.x;
        syy += d.y * d.y;
        sxy += d.x * d.y;
    }
    let trace = sxx + syy;
    if trace <= f64::EPSILON {
        return true;
    }
    let det = sxx * syy - sxy * sxy;
    let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();
    let small = trace / 2.0 - disc;
    let large = trace / 2.0 + disc;
    small.max(0.0).sqrt() < COLLINEAR_RATIO * large.sqrt()
}
