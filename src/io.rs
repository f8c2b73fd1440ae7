use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::crs::Crs;
use crate::error::{MosaicError, PipelineWarning, Result};
use crate::flight_log::{FlightLog, FlightLogEntry};
use crate::georef::ControlPoint;
use crate::mosaic::MosaicLayout;

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize>(output_path: &Path, object: &T) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let j = serde_json::to_string_pretty(object)?;
    let mut file = std::fs::File::create(output_path)?;
    file.write_all(j.as_bytes())?;
    Ok(())
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(file_path).map_err(|e| {
        MosaicError::Input(format!("cannot read {}: {}", file_path.display(), e))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    #[serde(flatten)]
    pub entry: FlightLogEntry,
    /// Position in the output CRS.
    pub x: f64,
    pub y: f64,
}

/// Flight path in the raster's CRS, for overlay by a map viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightTrack {
    pub epsg: u16,
    pub points: Vec<TrackPoint>,
}

impl FlightTrack {
    pub fn from_log(log: &FlightLog, crs: Crs) -> FlightTrack {
        let points = log
            .entries()
            .iter()
            .map(|e| {
                let p = crs.project(e.latitude, e.longitude);
                TrackPoint {
                    entry: *e,
                    x: p.x,
                    y: p.y,
                }
            })
            .collect();
        FlightTrack {
            epsg: crs.epsg(),
            points,
        }
    }

    pub fn crs(&self) -> Option<Crs> {
        Crs::from_epsg(self.epsg)
    }
}

pub fn write_flight_track(path: &Path, track: &FlightTrack) -> Result<()> {
    object_to_json(path, track)
}

pub fn read_flight_track(path: &Path) -> Result<FlightTrack> {
    object_from_json(path)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedFrame {
    pub frame: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutReport {
    pub origin: [f64; 2],
    pub width: u32,
    pub height: u32,
}

impl From<&MosaicLayout> for LayoutReport {
    fn from(layout: &MosaicLayout) -> Self {
        LayoutReport {
            origin: [layout.origin.x, layout.origin.y],
            width: layout.width,
            height: layout.height,
        }
    }
}

/// Summary of one run, written next to the raster.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub project_name: String,
    pub time: String,
    pub frames_loaded: usize,
    pub frames_aligned: usize,
    pub frames_in_mosaic: usize,
    pub band_count: usize,
    pub anchor_frame: String,
    pub pair_edges: usize,
    pub layout: LayoutReport,
    pub epsg: u16,
    pub geo_transform: [f64; 6],
    pub pixel_size: [f64; 2],
    pub control_points: Vec<ControlPoint>,
    pub excluded_frames: Vec<ExcludedFrame>,
    pub warnings: Vec<PipelineWarning>,
}

/// Current time as RFC 3339, local offset when it can be determined.
pub fn report_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string())
}

pub fn write_run_report(path: &Path, report: &RunReport) -> Result<()> {
    object_to_json(path, report)
}
