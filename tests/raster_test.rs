use aerial_orthomosaic::MosaicError;
use aerial_orthomosaic::crs::Crs;
use aerial_orthomosaic::flight_log::{FlightLog, FlightLogEntry};
use aerial_orthomosaic::frame::BandImage;
use aerial_orthomosaic::georef::GeoTransform;
use aerial_orthomosaic::io::{FlightTrack, read_flight_track, write_flight_track};
use aerial_orthomosaic::raster::{read_geotiff, write_geotiff};
use aerial_orthomosaic::visualization::preview_image;
use glam::DVec2;
use image::Luma;

fn gradient_band(w: u32, h: u32, offset: f32) -> BandImage {
    BandImage::from_fn(w, h, |x, y| {
        if x == 0 && y == 0 {
            Luma([-9999.0])
        } else {
            Luma([offset + x as f32 * 0.37 - y as f32 * 1.13])
        }
    })
}

#[test]
fn test_geotiff_round_trip_geographic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("mosaic.tif");
    let bands = vec![gradient_band(37, 23, 0.0), gradient_band(37, 23, 500.5)];
    let gt = GeoTransform::new(
        [9.999_975, 3.125e-6, 1.0e-9, 45.000_187_5, -1.0e-9, -3.125e-6],
        Crs::Wgs84,
    );
    write_geotiff(&path, &bands, &gt, -9999.0).unwrap();

    let dataset = read_geotiff(&path).unwrap();
    assert_eq!(dataset.bands.len(), 2);
    assert_eq!((dataset.width(), dataset.height()), (37, 23));
    for (written, read) in bands.iter().zip(&dataset.bands) {
        assert_eq!(written.as_raw(), read.as_raw());
    }
    assert_eq!(dataset.geo_transform, gt);
    assert_eq!(dataset.nodata, -9999.0);
    let expected_coverage = (37.0 * 23.0 - 1.0) / (37.0 * 23.0);
    approx::assert_abs_diff_eq!(dataset.coverage(), expected_coverage, epsilon = 1e-12);
}

#[test]
fn test_geotiff_round_trip_utm() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("utm.tif");
    let crs = Crs::Utm {
        zone: 33,
        north: false,
    };
    let gt = GeoTransform::north_up(DVec2::new(412_345.25, 8_765_432.5), 0.05, crs);
    write_geotiff(&path, &[gradient_band(8, 5, 1.0)], &gt, f32::MIN).unwrap();
    let dataset = read_geotiff(&path).unwrap();
    assert_eq!(dataset.geo_transform.crs(), crs);
    assert_eq!(dataset.geo_transform.coefficients(), gt.coefficients());
    assert_eq!(dataset.nodata, f32::MIN);
}

#[test]
fn test_geotiff_rejects_mismatched_bands() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.tif");
    let gt = GeoTransform::north_up(DVec2::ZERO, 1.0, Crs::Wgs84);
    let result = write_geotiff(
        &path,
        &[gradient_band(8, 5, 0.0), gradient_band(5, 8, 0.0)],
        &gt,
        -9999.0,
    );
    assert!(matches!(result, Err(MosaicError::Raster(_))));
    assert!(matches!(
        write_geotiff(&path, &[], &gt, -9999.0),
        Err(MosaicError::Raster(_))
    ));
}

#[test]
fn test_flight_track_round_trip() {
    let log = FlightLog::new(vec![
        FlightLogEntry {
            timestamp_ms: 1000,
            latitude: 45.0,
            longitude: 3.0,
            altitude_m: 90.0,
        },
        FlightLogEntry {
            timestamp_ms: 2000,
            latitude: 45.0001,
            longitude: 3.0001,
            altitude_m: 91.5,
        },
    ])
    .unwrap();
    let crs = Crs::Utm {
        zone: 31,
        north: true,
    };
    let track = FlightTrack::from_log(&log, crs);
    assert_eq!(track.epsg, 32631);
    approx::assert_abs_diff_eq!(track.points[0].x, 500_000.0, epsilon = 1e-6);
    assert!(track.points[1].y > track.points[0].y);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("flight_track.json");
    write_flight_track(&path, &track).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"timestamp_ms\": 2000"));
    let read = read_flight_track(&path).unwrap();
    assert_eq!(read, track);
    assert_eq!(read.crs(), Some(crs));
}

#[test]
fn test_preview_stretch_and_nodata() {
    let band = BandImage::from_fn(4, 1, |x, _| Luma([[-9999.0, 10.0, 15.0, 20.0][x as usize]]));
    let preview = preview_image(&[band], -9999.0).unwrap();
    assert_eq!(preview.get_pixel(0, 0).0, [0, 0, 0]);
    assert_eq!(preview.get_pixel(1, 0).0, [0, 0, 0]);
    assert_eq!(preview.get_pixel(3, 0).0, [255, 255, 255]);
    let mid = preview.get_pixel(2, 0).0;
    assert!(mid[0] == 127 || mid[0] == 128);
}
