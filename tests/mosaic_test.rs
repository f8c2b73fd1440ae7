mod common;

use aerial_orthomosaic::MosaicError;
use aerial_orthomosaic::config::{MosaicParams, Resampling};
use aerial_orthomosaic::frame::{BandImage, BandLayout, Frame};
use aerial_orthomosaic::mosaic::{Footprint, composite, compute_layout};
use aerial_orthomosaic::optimization::homography::Transform2D;
use aerial_orthomosaic::pipeline::check_band_counts;
use common::*;
use glam::DVec2;
use image::Luma;

fn strip_transforms() -> Vec<Transform2D> {
    (0..3)
        .map(|i| Transform2D::translation((i * STEP) as f64, 0.0))
        .collect()
}

fn layout_for(frames: &[Frame], transforms: &[Transform2D]) -> aerial_orthomosaic::mosaic::MosaicLayout {
    let footprints: Vec<Footprint> = frames
        .iter()
        .zip(transforms)
        .map(|(f, t)| Footprint::new(t, f.width(), f.height()).unwrap())
        .collect();
    compute_layout(&footprints, MosaicParams::default().max_pixels).unwrap()
}

#[test]
fn test_strip_mosaic_reproduces_ground() {
    let ground = ground_texture(224, FRAME_H, 31);
    let frames = strip_frames(&ground);
    let transforms = strip_transforms();
    let layout = layout_for(&frames, &transforms);
    assert_eq!((layout.width, layout.height), (224, 120));
    assert_eq!(layout.origin, DVec2::ZERO);

    let mosaic = composite(frames, &transforms, layout, &MosaicParams::default()).unwrap();
    assert_eq!(mosaic.band_count(), 1);
    assert_eq!(mosaic.frame_ids, vec![0, 1, 2]);
    for y in 0..mosaic.height() {
        for x in 0..mosaic.width() {
            assert_eq!(
                mosaic.bands[0].get_pixel(x, y)[0],
                ground.get_pixel(x, y)[0] as f32,
                "pixel ({}, {})",
                x,
                y
            );
        }
    }
    assert_eq!(mosaic.source_frame(10, 60), Some(0));
    assert_eq!(mosaic.source_frame(100, 60), Some(1));
    assert_eq!(mosaic.source_frame(220, 60), Some(2));
    let covered: usize = mosaic.coverage().iter().map(|(_, n)| n).sum();
    assert_eq!(covered, 224 * 120);
}

#[test]
fn test_uncovered_pixels_get_nodata() {
    let ground = ground_texture(FRAME_W, FRAME_H, 32);
    let frames = vec![
        single_band_frame(0, 0, &ground),
        single_band_frame(1, 1, &ground),
    ];
    let transforms = vec![
        Transform2D::identity(),
        Transform2D::translation(100.0, 100.0),
    ];
    let layout = layout_for(&frames, &transforms);
    assert_eq!((layout.width, layout.height), (260, 220));
    let params = MosaicParams {
        resampling: Resampling::Nearest,
        ..MosaicParams::default()
    };
    let mosaic = composite(frames, &transforms, layout, &params).unwrap();
    assert_eq!(mosaic.bands[0].get_pixel(200, 10)[0], -9999.0);
    assert_eq!(mosaic.source_frame(200, 10), None);
    assert_eq!(mosaic.bands[0].get_pixel(5, 150)[0], -9999.0);
    // row-major source lookup on a non-square layout
    assert_eq!(mosaic.source_frame(0, 0), Some(0));
    assert_eq!(mosaic.source_frame(5, 150), None);
    assert_eq!(mosaic.source_frame(259, 219), Some(1));
    assert_eq!(mosaic.source_frame(150, 105), Some(1));
    assert_eq!(
        mosaic.bands[0].get_pixel(250, 210)[0],
        ground.get_pixel(150, 110)[0] as f32
    );
}

#[test]
fn test_all_bands_share_one_warp() {
    let ground = ground_texture(224, FRAME_H, 33);
    let frames: Vec<Frame> = (0..2)
        .map(|i| {
            let band = to_band(&crop(&ground, i * STEP, 0, FRAME_W, FRAME_H));
            let bands: Vec<BandImage> = (0..3)
                .map(|k| {
                    BandImage::from_fn(FRAME_W, FRAME_H, |x, y| {
                        Luma([band.get_pixel(x, y)[0] + 1000.0 * k as f32])
                    })
                })
                .collect();
            Frame::new(i as usize, format!("cap_{}", i), i as i64, BandLayout::Stack(3), bands)
                .unwrap()
        })
        .collect();
    // sub-pixel shift so bilinear interpolation is exercised
    let transforms = vec![
        Transform2D::identity(),
        Transform2D::translation(STEP as f64 + 0.25, 0.5),
    ];
    let layout = layout_for(&frames, &transforms);
    let mosaic = composite(frames, &transforms, layout, &MosaicParams::default()).unwrap();
    assert_eq!(mosaic.band_count(), 3);
    for y in 0..mosaic.height() {
        for x in 0..mosaic.width() {
            let base = mosaic.bands[0].get_pixel(x, y)[0];
            if base == mosaic.nodata {
                assert_eq!(mosaic.bands[2].get_pixel(x, y)[0], mosaic.nodata);
                continue;
            }
            for k in 1..3 {
                let v = mosaic.bands[k].get_pixel(x, y)[0];
                approx::assert_abs_diff_eq!(v - base, 1000.0 * k as f32, epsilon = 1e-2);
            }
        }
    }
}

#[test]
fn test_layout_limit() {
    let footprints = vec![
        Footprint::new(&Transform2D::identity(), 1000, 1000).unwrap(),
    ];
    assert!(matches!(
        compute_layout(&footprints, 10_000),
        Err(MosaicError::Composition(_))
    ));
    assert!(matches!(
        compute_layout(&[], 10_000),
        Err(MosaicError::Composition(_))
    ));
}

#[test]
fn test_band_count_mismatch_is_fatal() {
    let one = Frame::new(
        0,
        "single",
        0,
        BandLayout::Single,
        vec![BandImage::new(8, 8)],
    )
    .unwrap();
    let three = Frame::new(
        1,
        "triple",
        1,
        BandLayout::Stack(3),
        vec![BandImage::new(8, 8), BandImage::new(8, 8), BandImage::new(8, 8)],
    )
    .unwrap();
    assert_eq!(check_band_counts(&[one.clone(), one.clone()]).unwrap(), 1);
    assert!(matches!(
        check_band_counts(&[one.clone(), three.clone()]),
        Err(MosaicError::InconsistentBandGeometry { .. })
    ));
    let transforms = vec![Transform2D::identity(); 2];
    let layout = compute_layout(
        &[Footprint::new(&Transform2D::identity(), 8, 8).unwrap()],
        1000,
    )
    .unwrap();
    assert!(matches!(
        composite(vec![one, three], &transforms, layout, &MosaicParams::default()),
        Err(MosaicError::InconsistentBandGeometry { .. })
    ));
}

#[test]
fn test_band_sizes_must_agree_within_frame() {
    let result = Frame::new(
        0,
        "bad",
        0,
        BandLayout::Stack(2),
        vec![BandImage::new(8, 8), BandImage::new(8, 9)],
    );
    assert!(matches!(
        result,
        Err(MosaicError::InconsistentBandGeometry { .. })
    ));
}
