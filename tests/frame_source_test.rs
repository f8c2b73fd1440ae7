mod common;

use std::path::{Path, PathBuf};

use aerial_orthomosaic::MosaicError;
use aerial_orthomosaic::PipelineWarning;
use aerial_orthomosaic::config::{DataType, ProjectConfig};
use aerial_orthomosaic::frame::BandLayout;
use aerial_orthomosaic::frame_source::{FrameSource, band_stack_entries, video_frame_entries};
use common::*;
use image::{GrayImage, ImageBuffer, Luma};

fn write_band(dir: &Path, name: &str, w: u32, h: u32, value: u16) {
    std::fs::create_dir_all(dir).unwrap();
    let img: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(w, h, |x, y| Luma([value + (x * 7 + y * 3) as u16]));
    img.save(dir.join(name)).unwrap();
}

fn multispectral_project(root: &Path) -> ProjectConfig {
    let mut config = video_project(root);
    config.data_type = DataType::Multispectral;
    config.paths.rgb_video = None;
    config.paths.multispectral = Some(root.join("multispectral"));
    config
}

#[test]
fn test_video_frames_sampled_by_interval() {
    let root = tempfile::tempdir().unwrap();
    let mut config = video_project(root.path());
    config.processing_params.frame_extraction_interval_ms = 1500;
    let frames: Vec<(i64, GrayImage)> = (1..=4)
        .map(|i| (1000 * i, ground_texture(48, 32, i as u64)))
        .collect();
    write_png_frames(&frames_dir(&config), &frames);

    let mut source = FrameSource::from_config(&config).unwrap();
    assert_eq!(source.len_hint(), 4);
    let kept: Vec<_> = source.by_ref().map(|f| f.unwrap()).collect();
    assert_eq!(
        kept.iter().map(|f| f.timestamp_ms).collect::<Vec<_>>(),
        vec![1000, 3000]
    );
    assert_eq!(kept.iter().map(|f| f.id).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(kept[0].name, "frame_1000");
    assert_eq!(kept[0].layout, BandLayout::Single);
    assert_eq!(kept[0].band(0).get_pixel(5, 7)[0], frames[0].1.get_pixel(5, 7)[0] as f32);
    assert!(source.take_warnings().is_empty());
}

#[test]
fn test_blurry_frames_dropped() {
    let root = tempfile::tempdir().unwrap();
    let mut config = video_project(root.path());
    config.processing_params.blur_threshold = 100.0;
    write_png_frames(
        &frames_dir(&config),
        &[
            (1000, GrayImage::from_pixel(48, 32, Luma([90]))),
            (2000, ground_texture(48, 32, 5)),
        ],
    );
    let mut source = FrameSource::from_config(&config).unwrap();
    let kept: Vec<_> = source.by_ref().map(|f| f.unwrap()).collect();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].timestamp_ms, 2000);
    assert_eq!(kept[0].id, 0);
    match source.take_warnings().as_slice() {
        [PipelineWarning::BlurryFrame { frame, variance, .. }] => {
            assert_eq!(frame, "frame_1000");
            assert_eq!(*variance, 0.0);
        }
        other => panic!("unexpected warnings {:?}", other),
    }
}

#[test]
fn test_undecodable_frame_skipped_with_warning() {
    let root = tempfile::tempdir().unwrap();
    let config = video_project(root.path());
    let dir = frames_dir(&config);
    write_png_frames(&dir, &[(2000, ground_texture(48, 32, 8))]);
    std::fs::write(dir.join("frame_1000.png"), b"not an image").unwrap();
    std::fs::write(dir.join("readme.txt"), b"ignored").unwrap();

    let mut source = FrameSource::from_config(&config).unwrap();
    assert_eq!(source.len_hint(), 2);
    let kept: Vec<_> = source.by_ref().map(|f| f.unwrap()).collect();
    assert_eq!(kept.len(), 1);
    let warnings = source.take_warnings();
    assert!(matches!(
        warnings.as_slice(),
        [PipelineWarning::FrameSkipped { frame, .. }] if frame == "frame_1000"
    ));
}

#[test]
fn test_multispectral_bands_grouped_by_capture() {
    let root = tempfile::tempdir().unwrap();
    let config = multispectral_project(root.path());
    let dir = config.paths.multispectral.clone().unwrap();
    for band in 1..=3 {
        write_band(&dir, &format!("cap_2000_{}.tif", band), 24, 16, 1000 * band as u16);
        write_band(&dir, &format!("cap_1000_{}.tif", band), 24, 16, 100 * band as u16);
    }
    let frames: Vec<_> = FrameSource::from_config(&config)
        .unwrap()
        .map(|f| f.unwrap())
        .collect();
    assert_eq!(frames.len(), 2);
    let first = &frames[0];
    assert_eq!(first.name, "cap_1000");
    assert_eq!(first.timestamp_ms, 1000);
    assert_eq!(first.layout, BandLayout::Stack(3));
    assert_eq!((first.width(), first.height()), (24, 16));
    assert_eq!(first.band(0).get_pixel(0, 0)[0], 100.0);
    assert_eq!(first.band(2).get_pixel(1, 1)[0], 310.0);
    assert_eq!(frames[1].band(1).get_pixel(0, 0)[0], 2000.0);
}

#[test]
fn test_multispectral_band_size_mismatch() {
    let root = tempfile::tempdir().unwrap();
    let config = multispectral_project(root.path());
    let dir = config.paths.multispectral.clone().unwrap();
    write_band(&dir, "cap_1000_1.tif", 24, 16, 0);
    write_band(&dir, "cap_1000_2.tif", 12, 8, 0);
    let mut source = FrameSource::from_config(&config).unwrap();
    assert!(matches!(
        source.next(),
        Some(Err(MosaicError::InconsistentBandGeometry { .. }))
    ));
    assert!(source.next().is_none());
}

#[test]
fn test_missing_source_directory() {
    let root = tempfile::tempdir().unwrap();
    let config = video_project(root.path());
    assert!(matches!(
        FrameSource::from_config(&config),
        Err(MosaicError::Input(_))
    ));
    let mut unconfigured = config.clone();
    unconfigured.data_type = DataType::Hyperspectral;
    assert!(matches!(
        FrameSource::from_config(&unconfigured),
        Err(MosaicError::Input(_))
    ));
}

#[test]
fn test_capture_order_and_fallback_timestamps() {
    let files: Vec<PathBuf> = ["b.png", "a.png", "shot_500.png"]
        .iter()
        .map(PathBuf::from)
        .collect();
    let entries = video_frame_entries(&files, 10_000, 200);
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["shot_500", "b", "a"]);
    assert_eq!(entries[1].timestamp_ms, 10_000);
    assert_eq!(entries[2].timestamp_ms, 10_200);

    let bands: Vec<PathBuf> = ["x_9000_2.tif", "x_9000_10.tif", "x_9000_1.tif"]
        .iter()
        .map(PathBuf::from)
        .collect();
    let stacks = band_stack_entries(&bands, 0, 1);
    assert_eq!(stacks.len(), 1);
    assert_eq!(stacks[0].timestamp_ms, 9000);
    assert_eq!(
        stacks[0].paths,
        vec![
            PathBuf::from("x_9000_1.tif"),
            PathBuf::from("x_9000_2.tif"),
            PathBuf::from("x_9000_10.tif"),
        ]
    );
}
