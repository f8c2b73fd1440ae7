use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::{DynamicImage, Luma};
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};

use crate::error::{MosaicError, Result};
use crate::frame::BandImage;

/// Splits a decoded image into raw-valued bands. Returns the bands and whether
/// they came from a color image.
pub fn dynamic_to_bands(img: &DynamicImage) -> (Vec<BandImage>, bool) {
    let (w, h) = (img.width(), img.height());
    match img {
        DynamicImage::ImageLuma8(buf) => (
            vec![BandImage::from_fn(w, h, |x, y| {
                Luma([buf.get_pixel(x, y)[0] as f32])
            })],
            false,
        ),
        DynamicImage::ImageLuma16(buf) => (
            vec![BandImage::from_fn(w, h, |x, y| {
                Luma([buf.get_pixel(x, y)[0] as f32])
            })],
            false,
        ),
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => {
            let luma = img.to_luma16();
            let scale = if matches!(img, DynamicImage::ImageLumaA8(_)) {
                1.0 / 257.0
            } else {
                1.0
            };
            (
                vec![BandImage::from_fn(w, h, |x, y| {
                    Luma([luma.get_pixel(x, y)[0] as f32 * scale])
                })],
                false,
            )
        }
        DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => {
            let rgb = img.to_rgb16();
            (split_channels(w, h, 3, |x, y, c| rgb.get_pixel(x, y)[c] as f32), true)
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let rgb = img.to_rgb32f();
            (split_channels(w, h, 3, |x, y, c| rgb.get_pixel(x, y)[c]), true)
        }
        _ => {
            let rgb = img.to_rgb8();
            (split_channels(w, h, 3, |x, y, c| rgb.get_pixel(x, y)[c] as f32), true)
        }
    }
}

fn split_channels<F>(w: u32, h: u32, channels: usize, sample: F) -> Vec<BandImage>
where
    F: Fn(u32, u32, usize) -> f32,
{
    (0..channels)
        .map(|c| BandImage::from_fn(w, h, |x, y| Luma([sample(x, y, c)])))
        .collect()
}

/// Reads every page of a TIFF file as bands. Single-sample pages yield one
/// band each, RGB pages yield three.
pub fn read_tiff_bands(path: &Path) -> Result<(Vec<BandImage>, bool)> {
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());
    let mut bands = Vec::new();
    let mut color = false;
    loop {
        let (w, h) = decoder.dimensions()?;
        let channels = match decoder.colortype()? {
            ColorType::Gray(_) => 1,
            ColorType::RGB(_) => {
                color = true;
                3
            }
            ColorType::Multiband { num_samples, .. } => num_samples as usize,
            other => {
                return Err(MosaicError::Input(format!(
                    "{}: unsupported TIFF color type {:?}",
                    path.display(),
                    other
                )));
            }
        };
        let samples = decoding_result_to_f32(decoder.read_image()?);
        if samples.len() != (w * h) as usize * channels {
            return Err(MosaicError::Input(format!(
                "{}: page holds {} samples, expected {}",
                path.display(),
                samples.len(),
                (w * h) as usize * channels
            )));
        }
        bands.extend(split_channels(w, h, channels, |x, y, c| {
            samples[(y as usize * w as usize + x as usize) * channels + c]
        }));
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok((bands, color))
}

fn decoding_result_to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::F16(v) => v.into_iter().map(|s| s.to_f32()).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|s| s as f32).collect(),
    }
}

/// Variance of the 4-neighbour Laplacian, a cheap sharpness measure.
pub fn laplacian_variance(band: &BandImage) -> f64 {
    let (w, h) = band.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let data = band.as_raw();
    let w = w as usize;
    let h = h as usize;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = data[y * w + x] as f64;
            let lap = data[y * w + x - 1] as f64
                + data[y * w + x + 1] as f64
                + data[(y - 1) * w + x] as f64
                + data[(y + 1) * w + x] as f64
                - 4.0 * c;
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let n = ((w - 2) * (h - 2)) as f64;
    let mean = sum / n;
    sum_sq / n - mean * mean
}

/// Bilinear sample at continuous index coordinates, clamping at the border.
pub fn sample_bilinear(band: &BandImage, x: f32, y: f32) -> f32 {
    let (w, h) = band.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let p00 = band.get_pixel(x0, y0)[0];
    let p10 = band.get_pixel(x1, y0)[0];
    let p01 = band.get_pixel(x0, y1)[0];
    let p11 = band.get_pixel(x1, y1)[0];
    let top = p00 + (p10 - p00) * fx;
    let bottom = p01 + (p11 - p01) * fx;
    top + (bottom - top) * fy
}

/// Nearest sample at continuous index coordinates, clamping at the border.
pub fn sample_nearest(band: &BandImage, x: f32, y: f32) -> f32 {
    let (w, h) = band.dimensions();
    let xi = (x.round().max(0.0) as u32).min(w - 1);
    let yi = (y.round().max(0.0) as u32).min(h - 1);
    band.get_pixel(xi, yi)[0]
}

/// Parses the capture time from a file stem: the last `_`-separated token as
/// milliseconds since epoch.
pub fn stem_to_timestamp(stem: &str) -> Option<i64> {
    stem.rsplit('_').next().and_then(|t| t.parse::<i64>().ok())
}
