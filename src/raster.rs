use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use crate::crs::Crs;
use crate::error::{MosaicError, Result};
use crate::frame::BandImage;
use crate::georef::GeoTransform;

const MODEL_TRANSFORMATION_TAG: u16 = 34264;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GDAL_NODATA_TAG: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// A georeferenced raster as read back from disk.
#[derive(Debug, Clone)]
pub struct RasterDataset {
    pub bands: Vec<BandImage>,
    pub geo_transform: GeoTransform,
    pub nodata: f32,
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Row-major 4x4 model transformation for a GDAL-ordered transform.
fn model_transformation(gt: &GeoTransform) -> [f64; 16] {
    let c = gt.coefficients();
    [
        c[1], c[2], 0.0, c[0], //
        c[4], c[5], 0.0, c[3], //
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

fn geo_key_directory(crs: Crs) -> [u16; 16] {
    let (model, key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY)
    };
    [
        1, 1, 0, 3, //
        GT_MODEL_TYPE_KEY, 0, 1, model, //
        GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA, //
        key, 0, 1, crs.epsg(),
    ]
}

/// Shortest text that parses back to the identical `f32`.
fn nodata_text(nodata: f32) -> String {
    format!("{}", nodata)
}

/// Writes every band as an IEEE-float page carrying the georeferencing tags.
pub fn write_geotiff(
    path: &Path,
    bands: &[BandImage],
    geo_transform: &GeoTransform,
    nodata: f32,
) -> Result<()> {
    let Some(first) = bands.first() else {
        return Err(MosaicError::Raster("no bands to write".to_string()));
    };
    let (w, h) = first.dimensions();
    if bands.iter().any(|b| b.dimensions() != (w, h)) {
        return Err(MosaicError::Raster("bands differ in size".to_string()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let transformation = model_transformation(geo_transform);
    let keys = geo_key_directory(geo_transform.crs());
    let nodata = nodata_text(nodata);

    let mut file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(&mut file)?;
    for band in bands {
        let mut image = encoder.new_image::<colortype::Gray32Float>(w, h)?;
        image
            .encoder()
            .write_tag(tag(MODEL_TRANSFORMATION_TAG), &transformation[..])?;
        image
            .encoder()
            .write_tag(tag(GEO_KEY_DIRECTORY_TAG), &keys[..])?;
        image
            .encoder()
            .write_tag(tag(GDAL_NODATA_TAG), nodata.as_str())?;
        image.write_data(band.as_raw())?;
    }
    drop(encoder);
    std::io::Write::flush(&mut file)?;
    info!(
        "wrote {} bands of {}x{} to {}",
        bands.len(),
        w,
        h,
        path.display()
    );
    Ok(())
}

fn parse_geo_transform(transformation: &[f64], keys: &[u16]) -> Result<GeoTransform> {
    if transformation.len() != 16 {
        return Err(MosaicError::Raster(format!(
            "model transformation has {} values",
            transformation.len()
        )));
    }
    let t = transformation;
    let coefficients = [t[3], t[0], t[1], t[7], t[4], t[5]];

    let key_count = keys.get(3).copied().unwrap_or(0) as usize;
    let epsg = keys
        .chunks_exact(4)
        .skip(1)
        .take(key_count)
        .find(|k| k[0] == GEOGRAPHIC_TYPE_KEY || k[0] == PROJECTED_CS_TYPE_KEY)
        .map(|k| k[3])
        .ok_or_else(|| MosaicError::Raster("no CRS key in GeoKeyDirectory".to_string()))?;
    let crs = Crs::from_epsg(epsg)
        .ok_or_else(|| MosaicError::Raster(format!("unsupported EPSG:{}", epsg)))?;
    Ok(GeoTransform::new(coefficients, crs))
}

/// Reads a raster written by [`write_geotiff`].
pub fn read_geotiff(path: &Path) -> Result<RasterDataset> {
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());

    let transformation = decoder.get_tag_f64_vec(tag(MODEL_TRANSFORMATION_TAG))?;
    let keys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY_TAG))?;
    let geo_transform = parse_geo_transform(&transformation, &keys)?;
    let nodata_text = decoder.get_tag_ascii_string(tag(GDAL_NODATA_TAG))?;
    let nodata = nodata_text
        .trim_end_matches('\0')
        .trim()
        .parse::<f32>()
        .map_err(|_| MosaicError::Raster(format!("invalid GDAL_NODATA {:?}", nodata_text)))?;

    let mut bands = Vec::new();
    loop {
        let (w, h) = decoder.dimensions()?;
        let samples = match decoder.read_image()? {
            DecodingResult::F32(v) => v,
            _ => {
                return Err(MosaicError::Raster(
                    "expected 32-bit float samples".to_string(),
                ));
            }
        };
        let band = BandImage::from_raw(w, h, samples)
            .ok_or_else(|| MosaicError::Raster("page size mismatch".to_string()))?;
        bands.push(band);
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(RasterDataset {
        bands,
        geo_transform,
        nodata,
    })
}

impl RasterDataset {
    pub fn width(&self) -> u32 {
        self.bands.first().map(|b| b.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.bands.first().map(|b| b.height()).unwrap_or(0)
    }

    /// Fraction of pixels in the first band that hold data.
    pub fn coverage(&self) -> f64 {
        let Some(band) = self.bands.first() else {
            return 0.0;
        };
        let total = band.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let valid = band.pixels().filter(|p| p[0] != self.nodata).count();
        valid as f64 / total as f64
    }
}
