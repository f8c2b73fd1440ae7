#![allow(dead_code)]

use std::path::{Path, PathBuf};

use aerial_orthomosaic::config::{DataType, ProcessingParams, ProjectConfig, ProjectPaths};
use aerial_orthomosaic::frame::{BandImage, BandLayout, Frame};
use image::{GrayImage, Luma};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const FRAME_W: u32 = 160;
pub const FRAME_H: u32 = 120;
/// Horizontal step between consecutive synthetic frames, 80 % overlap.
pub const STEP: u32 = 32;

/// Dense random rectangles plus mild noise, so that corners are plentiful and
/// every descriptor patch is unique.
pub fn ground_texture(w: u32, h: u32, seed: u64) -> GrayImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(w, h, Luma([0]));
    for _ in 0..(w * h / 40) {
        let x0 = rng.random_range(0..w);
        let y0 = rng.random_range(0..h);
        let rw = rng.random_range(3..18);
        let rh = rng.random_range(3..18);
        let value: u8 = rng.random_range(0..=230);
        for y in y0..(y0 + rh).min(h) {
            for x in x0..(x0 + rw).min(w) {
                img.put_pixel(x, y, Luma([value]));
            }
        }
    }
    for p in img.pixels_mut() {
        let noise: u8 = rng.random_range(0..16);
        p[0] = p[0].saturating_add(noise);
    }
    img
}

pub fn crop(ground: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    image::imageops::crop_imm(ground, x, y, w, h).to_image()
}

pub fn to_band(img: &GrayImage) -> BandImage {
    BandImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([img.get_pixel(x, y)[0] as f32])
    })
}

pub fn single_band_frame(id: usize, timestamp_ms: i64, img: &GrayImage) -> Frame {
    Frame::new(
        id,
        format!("frame_{}", timestamp_ms),
        timestamp_ms,
        BandLayout::Single,
        vec![to_band(img)],
    )
    .unwrap()
}

/// Three frames cut from one ground texture at x = 0, 32, 64, captured at
/// 1000, 2000 and 3000 ms.
pub fn strip_frames(ground: &GrayImage) -> Vec<Frame> {
    (0..3)
        .map(|i| {
            let img = crop(ground, i * STEP, 0, FRAME_W, FRAME_H);
            single_band_frame(i as usize, 1000 * (i as i64 + 1), &img)
        })
        .collect()
}

pub fn write_png_frames(dir: &Path, frames: &[(i64, GrayImage)]) {
    std::fs::create_dir_all(dir).unwrap();
    for (ts, img) in frames {
        img.save(dir.join(format!("frame_{}.png", ts))).unwrap();
    }
}

pub fn write_flight_log(dir: &Path, name: &str, rows: &[(i64, f64, f64, f64)]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut text = String::from("timestamp_ms,latitude,longitude,altitude_m\n");
    for (ts, lat, lon, alt) in rows {
        text += &format!("{},{},{},{}\n", ts, lat, lon, alt);
    }
    std::fs::write(dir.join(name), text).unwrap();
}

/// Straight eastward flight at latitude 45, 0.0001 degrees per second.
pub fn straight_flight_rows() -> Vec<(i64, f64, f64, f64)> {
    vec![
        (1000, 45.0, 10.0, 100.0),
        (2000, 45.0, 10.0001, 100.0),
        (3000, 45.0, 10.0002, 100.0),
    ]
}

/// Video-frame project rooted at `root` with blur filtering and interval
/// sampling disabled.
pub fn video_project(root: &Path) -> ProjectConfig {
    let mut processing_params = ProcessingParams::default();
    processing_params.frame_extraction_interval_ms = 0;
    processing_params.blur_threshold = 0.0;
    ProjectConfig {
        project_name: "synthetic".to_string(),
        data_type: DataType::RgbVideo,
        paths: ProjectPaths {
            project_root: root.to_path_buf(),
            rgb_video: Some(root.join("frames")),
            multispectral: None,
            hyperspectral: None,
            flight_logs: root.join("flight_logs"),
            frames: None,
        },
        processing_params,
    }
}

pub fn frames_dir(config: &ProjectConfig) -> PathBuf {
    config.paths.rgb_video.clone().unwrap()
}
