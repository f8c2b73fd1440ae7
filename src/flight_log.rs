use std::path::Path;

use glob::glob;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, PipelineWarning, Result};

const TIMESTAMP_COLUMN: &str = "timestamp_ms";
const LATITUDE_COLUMN: &str = "latitude";
const LONGITUDE_COLUMN: &str = "longitude";
const ALTITUDE_COLUMN: &str = "altitude_m";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlightLogEntry {
    pub timestamp_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
}

impl FlightLogEntry {
    fn lerp(&self, other: &FlightLogEntry, t: f64, timestamp_ms: i64) -> FlightLogEntry {
        FlightLogEntry {
            timestamp_ms,
            latitude: self.latitude + (other.latitude - self.latitude) * t,
            longitude: self.longitude + (other.longitude - self.longitude) * t,
            altitude_m: self.altitude_m + (other.altitude_m - self.altitude_m) * t,
        }
    }
}

/// Interpolated position at a capture time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolated {
    pub entry: FlightLogEntry,
    /// The capture time lies outside the log and the nearest boundary entry was
    /// used.
    pub extrapolated: bool,
}

/// Non-empty flight log with strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightLog {
    entries: Vec<FlightLogEntry>,
}

impl FlightLog {
    pub fn new(entries: Vec<FlightLogEntry>) -> Result<FlightLog> {
        if entries.is_empty() {
            return Err(MosaicError::Georeferencing(
                "flight log has no usable entries".to_string(),
            ));
        }
        if let Some(w) = entries
            .windows(2)
            .find(|w| w[1].timestamp_ms <= w[0].timestamp_ms)
        {
            return Err(MosaicError::Georeferencing(format!(
                "flight log timestamps not strictly increasing at {} ms",
                w[1].timestamp_ms
            )));
        }
        Ok(FlightLog { entries })
    }

    /// Sorts by time and drops repeated timestamps, keeping the first row.
    pub fn from_unsorted(
        mut entries: Vec<FlightLogEntry>,
        warnings: &mut Vec<PipelineWarning>,
    ) -> Result<FlightLog> {
        entries.sort_by_key(|e| e.timestamp_ms);
        let mut deduped: Vec<FlightLogEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            match deduped.last() {
                Some(last) if last.timestamp_ms == entry.timestamp_ms => {
                    warnings.push(PipelineWarning::DuplicateLogTimestamp {
                        timestamp_ms: entry.timestamp_ms,
                    });
                }
                _ => deduped.push(entry),
            }
        }
        FlightLog::new(deduped)
    }

    pub fn entries(&self) -> &[FlightLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn time_range(&self) -> (i64, i64) {
        (
            self.entries[0].timestamp_ms,
            self.entries[self.entries.len() - 1].timestamp_ms,
        )
    }

    /// Linear interpolation in time. Outside the log the boundary entry is
    /// returned and flagged.
    pub fn interpolate(&self, timestamp_ms: i64) -> Interpolated {
        let first = &self.entries[0];
        let last = &self.entries[self.entries.len() - 1];
        if timestamp_ms < first.timestamp_ms || timestamp_ms > last.timestamp_ms {
            let boundary = if timestamp_ms < first.timestamp_ms {
                first
            } else {
                last
            };
            return Interpolated {
                entry: FlightLogEntry {
                    timestamp_ms,
                    ..*boundary
                },
                extrapolated: true,
            };
        }
        let idx = self
            .entries
            .partition_point(|e| e.timestamp_ms < timestamp_ms);
        let after = &self.entries[idx];
        if after.timestamp_ms == timestamp_ms || idx == 0 {
            return Interpolated {
                entry: *after,
                extrapolated: false,
            };
        }
        let before = &self.entries[idx - 1];
        let t = (timestamp_ms - before.timestamp_ms) as f64
            / (after.timestamp_ms - before.timestamp_ms) as f64;
        Interpolated {
            entry: before.lerp(after, t, timestamp_ms),
            extrapolated: false,
        }
    }
}

struct Columns {
    timestamp: usize,
    latitude: usize,
    longitude: usize,
    altitude: Option<usize>,
    count: usize,
}

fn find_columns(file: &str, header: &str) -> Result<Columns> {
    let names: Vec<&str> = header
        .split(',')
        .map(|h| h.trim().trim_matches('"'))
        .collect();
    let find = |name: &str| names.iter().position(|h| h.eq_ignore_ascii_case(name));
    let required = |name: &str| {
        find(name).ok_or_else(|| {
            MosaicError::Georeferencing(format!("{}: missing column {}", file, name))
        })
    };
    Ok(Columns {
        timestamp: required(TIMESTAMP_COLUMN)?,
        latitude: required(LATITUDE_COLUMN)?,
        longitude: required(LONGITUDE_COLUMN)?,
        altitude: find(ALTITUDE_COLUMN),
        count: names.len(),
    })
}

fn parse_row(fields: &[&str], columns: &Columns) -> std::result::Result<FlightLogEntry, String> {
    if fields.len() != columns.count {
        return Err(format!(
            "{} fields, header has {}",
            fields.len(),
            columns.count
        ));
    }
    let number = |idx: usize, name: &str| {
        fields[idx]
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("{} is not a number: {:?}", name, fields[idx]))
    };
    let timestamp = fields[columns.timestamp]
        .trim()
        .parse::<i64>()
        .or_else(|_| number(columns.timestamp, TIMESTAMP_COLUMN).map(|v| v.round() as i64))?;
    let latitude = number(columns.latitude, LATITUDE_COLUMN)?;
    let longitude = number(columns.longitude, LONGITUDE_COLUMN)?;
    let altitude_m = match columns.altitude {
        Some(idx) => number(idx, ALTITUDE_COLUMN)?,
        None => 0.0,
    };
    if !latitude.is_finite() || !longitude.is_finite() || !altitude_m.is_finite() {
        return Err("non-finite value".to_string());
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {} out of range", latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {} out of range", longitude));
    }
    Ok(FlightLogEntry {
        timestamp_ms: timestamp,
        latitude,
        longitude,
        altitude_m,
    })
}

/// Parses one flight-log CSV. Columns are found by header name; rows that fail
/// to parse are skipped with a warning.
pub fn parse_flight_log_csv(
    file: &str,
    text: &str,
    warnings: &mut Vec<PipelineWarning>,
) -> Result<Vec<FlightLogEntry>> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Err(MosaicError::Georeferencing(format!(
            "{}: empty flight log",
            file
        )));
    };
    let columns = find_columns(file, header)?;
    let mut entries = Vec::new();
    for (idx, line) in lines {
        let fields: Vec<&str> = line.split(',').collect();
        match parse_row(&fields, &columns) {
            Ok(entry) => entries.push(entry),
            Err(reason) => warnings.push(PipelineWarning::MalformedLogRow {
                file: file.to_string(),
                line: idx + 1,
                reason,
            }),
        }
    }
    Ok(entries)
}

/// Merges every `*.csv` file in `dir` into one flight log.
pub fn load_flight_logs(dir: &Path, warnings: &mut Vec<PipelineWarning>) -> Result<FlightLog> {
    let pattern = format!("{}/*.csv", dir.display());
    let mut files: Vec<_> = glob(&pattern)
        .map_err(|e| MosaicError::Georeferencing(e.to_string()))?
        .filter_map(|p| p.ok())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(MosaicError::Georeferencing(format!(
            "no flight log (.csv) found in {}",
            dir.display()
        )));
    }
    let mut entries = Vec::new();
    for path in &files {
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        entries.extend(parse_flight_log_csv(&name, &text, warnings)?);
    }
    let log = FlightLog::from_unsorted(entries, warnings)?;
    info!(
        "flight log: {} entries from {} files, {:?} ms",
        log.len(),
        files.len(),
        log.time_range()
    );
    Ok(log)
}
