use std::path::Path;

use image::{Rgb, RgbImage};
use log::info;

use crate::error::{MosaicError, Result};
use crate::frame::BandImage;

/// Valid-data range of a band, `None` when every pixel is no-data.
fn band_range(band: &BandImage, nodata: f32) -> Option<(f32, f32)> {
    band.as_raw()
        .iter()
        .filter(|v| **v != nodata && v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn stretch(v: f32, (lo, hi): (f32, f32)) -> u8 {
    if hi <= lo {
        return 128;
    }
    (((v - lo) / (hi - lo)).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Quick-look rendering: the first three bands as RGB (a single band as
/// gray), each min/max stretched. No-data pixels are black.
pub fn preview_image(bands: &[BandImage], nodata: f32) -> Result<RgbImage> {
    let channels: Vec<&BandImage> = match bands.len() {
        0 => return Err(MosaicError::Raster("no bands to preview".to_string())),
        1 | 2 => vec![&bands[0]; 3],
        _ => bands[..3].iter().collect(),
    };
    let ranges: Vec<(f32, f32)> = channels
        .iter()
        .map(|b| band_range(b, nodata).unwrap_or((0.0, 0.0)))
        .collect();
    let (w, h) = channels[0].dimensions();
    Ok(RgbImage::from_par_fn(w, h, |x, y| {
        let mut px = [0u8; 3];
        for (c, (band, range)) in channels.iter().zip(&ranges).enumerate() {
            let v = band.get_pixel(x, y)[0];
            if v == nodata {
                return Rgb([0, 0, 0]);
            }
            px[c] = stretch(v, *range);
        }
        Rgb(px)
    }))
}

pub fn write_preview(path: &Path, bands: &[BandImage], nodata: f32) -> Result<()> {
    let img = preview_image(bands, nodata)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save(path)?;
    info!("preview written to {}", path.display());
    Ok(())
}
