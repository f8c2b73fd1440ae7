use glam::DVec2;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{GeoModel, GeorefParams};
use crate::crs::{Crs, meters_per_degree};
use crate::error::{MosaicError, PipelineWarning, Result};
use crate::flight_log::FlightLog;
use crate::optimization::linear::{fit_affine, fit_similarity, is_collinear};

/// Pixel-to-world mapping in GDAL order:
/// `X = c[0] + col * c[1] + row * c[2]`, `Y = c[3] + col * c[4] + row * c[5]`,
/// with `(col, row)` the corner-based raster coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    coefficients: [f64; 6],
    crs: Crs,
}

impl GeoTransform {
    pub fn new(coefficients: [f64; 6], crs: Crs) -> GeoTransform {
        GeoTransform { coefficients, crs }
    }

    /// North-up transform with square pixels.
    pub fn north_up(origin: DVec2, pixel_size: f64, crs: Crs) -> GeoTransform {
        GeoTransform::new(
            [origin.x, pixel_size, 0.0, origin.y, 0.0, -pixel_size],
            crs,
        )
    }

    pub fn coefficients(&self) -> &[f64; 6] {
        &self.coefficients
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn apply(&self, pixel: DVec2) -> DVec2 {
        let c = &self.coefficients;
        DVec2::new(
            c[0] + pixel.x * c[1] + pixel.y * c[2],
            c[3] + pixel.x * c[4] + pixel.y * c[5],
        )
    }

    /// World size of one pixel step along columns and rows.
    pub fn pixel_size(&self) -> (f64, f64) {
        let c = &self.coefficients;
        (c[1].hypot(c[4]), c[2].hypot(c[5]))
    }

    /// World-to-pixel mapping, `None` when the linear part is singular.
    pub fn inverse(&self, world: DVec2) -> Option<DVec2> {
        let c = &self.coefficients;
        let det = c[1] * c[5] - c[2] * c[4];
        if det.abs() < f64::MIN_POSITIVE {
            return None;
        }
        let d = world - DVec2::new(c[0], c[3]);
        Some(DVec2::new(
            (c[5] * d.x - c[2] * d.y) / det,
            (-c[4] * d.x + c[1] * d.y) / det,
        ))
    }
}

/// An aligned frame's optical center in raster pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlacement {
    pub frame_id: usize,
    pub name: String,
    pub timestamp_ms: i64,
    pub center_px: DVec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlPoint {
    pub frame_id: usize,
    pub pixel: DVec2,
    pub world: DVec2,
    pub altitude_m: f64,
    pub extrapolated: bool,
}

/// Pairs each placement with its interpolated, projected position.
pub fn control_points(
    placements: &[FramePlacement],
    log: &FlightLog,
    crs: Crs,
    warnings: &mut Vec<PipelineWarning>,
) -> Vec<ControlPoint> {
    placements
        .iter()
        .map(|p| {
            let position = log.interpolate(p.timestamp_ms);
            if position.extrapolated {
                warnings.push(PipelineWarning::ExtrapolatedPosition {
                    frame: p.name.clone(),
                    timestamp_ms: p.timestamp_ms,
                });
            }
            let world = crs.project(position.entry.latitude, position.entry.longitude);
            debug!(
                "{}: pixel ({:.1}, {:.1}) -> ({:.8}, {:.8})",
                p.name, p.center_px.x, p.center_px.y, world.x, world.y
            );
            ControlPoint {
                frame_id: p.frame_id,
                pixel: p.center_px,
                world,
                altitude_m: position.entry.altitude_m,
                extrapolated: position.extrapolated,
            }
        })
        .collect()
}

fn distinct_positions(points: &[ControlPoint]) -> usize {
    let mut worlds: Vec<DVec2> = Vec::with_capacity(points.len());
    for p in points {
        if !worlds.iter().any(|w| w.abs_diff_eq(p.world, 1e-12)) {
            worlds.push(p.world);
        }
    }
    worlds.len()
}

/// Local tangent frame the fit runs in: world offsets from the control point
/// centroid, in meters for geographic CRSs.
struct FitFrame {
    origin: DVec2,
    scale: DVec2,
}

impl FitFrame {
    fn new(world: &[DVec2], crs: Crs) -> FitFrame {
        let origin = world.iter().copied().sum::<DVec2>() / world.len() as f64;
        let scale = if crs.is_geographic() {
            meters_per_degree(origin.y)
        } else {
            DVec2::ONE
        };
        FitFrame { origin, scale }
    }

    fn to_local(&self, world: DVec2) -> DVec2 {
        (world - self.origin) * self.scale
    }

    fn to_world(&self, c: [f64; 6]) -> [f64; 6] {
        let s = self.scale;
        [
            self.origin.x + c[0] / s.x,
            c[1] / s.x,
            c[2] / s.x,
            self.origin.y + c[3] / s.y,
            c[4] / s.y,
            c[5] / s.y,
        ]
    }
}

/// Least-squares pixel-to-world fit over the control points. The model is fit
/// in a local metric frame so a similarity keeps ground pixels square.
pub fn fit_geo_transform(points: &[ControlPoint], params: &GeorefParams) -> Result<GeoTransform> {
    let distinct = distinct_positions(points);
    if distinct < 2 {
        return Err(MosaicError::Georeferencing(format!(
            "{} distinct positions, at least 2 required",
            distinct
        )));
    }
    let pixels: Vec<DVec2> = points.iter().map(|p| p.pixel).collect();
    let world: Vec<DVec2> = points.iter().map(|p| p.world).collect();
    let frame = FitFrame::new(&world, params.crs);
    let local: Vec<DVec2> = world.iter().map(|&w| frame.to_local(w)).collect();
    let coefficients = match params.model {
        GeoModel::Affine if points.len() >= 3 && !is_collinear(&pixels) => {
            fit_affine(&pixels, &local)
        }
        GeoModel::Affine => {
            info!("control points are collinear, fitting a similarity instead");
            fit_similarity(&pixels, &local)
        }
        GeoModel::Similarity => fit_similarity(&pixels, &local),
    }
    .ok_or_else(|| {
        MosaicError::Georeferencing("degenerate control point configuration".to_string())
    })?;
    let transform = GeoTransform::new(frame.to_world(coefficients), params.crs);
    let rms = (points
        .iter()
        .map(|p| (transform.apply(p.pixel) - p.world).length_squared())
        .sum::<f64>()
        / points.len() as f64)
        .sqrt();
    let (sx, sy) = transform.pixel_size();
    info!(
        "georeferenced with {} control points, pixel size {:.3e} x {:.3e}, rms {:.3e} (EPSG:{})",
        points.len(),
        sx,
        sy,
        rms,
        params.crs.epsg()
    );
    Ok(transform)
}

/// Derives the GeoTransform of the mosaic from the aligned frame placements
/// and the flight log.
pub fn georeference(
    placements: &[FramePlacement],
    log: &FlightLog,
    params: &GeorefParams,
    warnings: &mut Vec<PipelineWarning>,
) -> Result<(GeoTransform, Vec<ControlPoint>)> {
    let points = control_points(placements, log, params.crs, warnings);
    let transform = fit_geo_transform(&points, params)?;
    Ok((transform, points))
}
