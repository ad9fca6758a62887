//! CSV export of the report tables.
//!
//! Column order is fixed by the row structs below. All four files are
//! written to a staging directory first and only moved into place once
//! every one of them succeeded.

use csv::WriterBuilder;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::report::types::{ReportTables, RoadRecord, SegmentRecord};

pub const ALL_SEGMENTS: &str = "all_segments.csv";
pub const SEGMENTS_OVER_THRESHOLD: &str = "all_segments_1_km_and_above.csv";
pub const ALL_ROADS: &str = "all_roads.csv";
pub const ROADS_OVER_THRESHOLD: &str = "all_roads_1_km_and_above.csv";

const PREVIOUS_DIR: &str = "previous";

pub const SEGMENT_COLUMNS: &[&str] = &[
    "road_segment_id",
    "road",
    "road_segment_name",
    "from_km",
    "from_name",
    "to_km",
    "to_name",
    "total_km",
    "severity_fatal_count",
    "severity_severe_count",
    "severity_light_count",
    "start_year",
    "end_year",
    "total_accidents_count",
    "killed_count",
    "severe_injured_count",
    "light_injured_count",
    "total_injured_count",
    "fatal_severe_accidents",
    "accidents_per_km",
    "fatal_severe_accidents_per_km",
    "fatal_accidents_per_km",
    "start_x",
    "start_y",
    "end_x",
    "end_y",
];

pub const ROAD_COLUMNS: &[&str] = &[
    "road",
    "from_name",
    "to_name",
    "segment_count",
    "total_km",
    "severity_fatal_count",
    "severity_severe_count",
    "severity_light_count",
    "total_accidents_count",
    "killed_count",
    "severe_injured_count",
    "light_injured_count",
    "total_injured_count",
    "fatal_severe_accidents",
    "accidents_per_km",
    "fatal_severe_accidents_per_km",
    "fatal_accidents_per_km",
];

#[derive(Debug, Serialize)]
struct SegmentCsvRow<'a> {
    road_segment_id: &'a str,
    road: &'a str,
    road_segment_name: &'a str,
    from_km: f64,
    from_name: &'a str,
    to_km: f64,
    to_name: &'a str,
    total_km: f64,
    severity_fatal_count: u64,
    severity_severe_count: u64,
    severity_light_count: u64,
    start_year: Option<i32>,
    end_year: Option<i32>,
    total_accidents_count: u64,
    killed_count: u64,
    severe_injured_count: u64,
    light_injured_count: u64,
    total_injured_count: u64,
    fatal_severe_accidents: u64,
    accidents_per_km: f64,
    fatal_severe_accidents_per_km: f64,
    fatal_accidents_per_km: f64,
    start_x: Option<f64>,
    start_y: Option<f64>,
    end_x: Option<f64>,
    end_y: Option<f64>,
}

impl<'a> From<&'a SegmentRecord> for SegmentCsvRow<'a> {
    fn from(r: &'a SegmentRecord) -> Self {
        Self {
            road_segment_id: &r.segment_id,
            road: &r.road,
            road_segment_name: &r.name,
            from_km: r.from_km,
            from_name: &r.from_name,
            to_km: r.to_km,
            to_name: &r.to_name,
            total_km: r.length_km,
            severity_fatal_count: r.accidents.fatal,
            severity_severe_count: r.accidents.severe,
            severity_light_count: r.accidents.light,
            start_year: r.start_year,
            end_year: r.end_year,
            total_accidents_count: r.metrics.total_accidents,
            killed_count: r.injuries.killed,
            severe_injured_count: r.injuries.severe,
            light_injured_count: r.injuries.light,
            total_injured_count: r.metrics.total_injuries,
            fatal_severe_accidents: r.metrics.fatal_severe_accidents,
            accidents_per_km: r.metrics.safety_rate,
            fatal_severe_accidents_per_km: r.metrics.fatal_severe_accidents_per_km,
            fatal_accidents_per_km: r.metrics.fatal_accidents_per_km,
            start_x: r.start.map(|c| c.x),
            start_y: r.start.map(|c| c.y),
            end_x: r.end.map(|c| c.x),
            end_y: r.end.map(|c| c.y),
        }
    }
}

#[derive(Debug, Serialize)]
struct RoadCsvRow<'a> {
    road: &'a str,
    from_name: &'a str,
    to_name: &'a str,
    segment_count: usize,
    total_km: f64,
    severity_fatal_count: u64,
    severity_severe_count: u64,
    severity_light_count: u64,
    total_accidents_count: u64,
    killed_count: u64,
    severe_injured_count: u64,
    light_injured_count: u64,
    total_injured_count: u64,
    fatal_severe_accidents: u64,
    accidents_per_km: f64,
    fatal_severe_accidents_per_km: f64,
    fatal_accidents_per_km: f64,
}

impl<'a> From<&'a RoadRecord> for RoadCsvRow<'a> {
    fn from(r: &'a RoadRecord) -> Self {
        Self {
            road: &r.road,
            from_name: &r.from_name,
            to_name: &r.to_name,
            segment_count: r.segment_count,
            total_km: r.length_km,
            severity_fatal_count: r.accidents.fatal,
            severity_severe_count: r.accidents.severe,
            severity_light_count: r.accidents.light,
            total_accidents_count: r.metrics.total_accidents,
            killed_count: r.injuries.killed,
            severe_injured_count: r.injuries.severe,
            light_injured_count: r.injuries.light,
            total_injured_count: r.metrics.total_injuries,
            fatal_severe_accidents: r.metrics.fatal_severe_accidents,
            accidents_per_km: r.metrics.safety_rate,
            fatal_severe_accidents_per_km: r.metrics.fatal_severe_accidents_per_km,
            fatal_accidents_per_km: r.metrics.fatal_accidents_per_km,
        }
    }
}

/// Writes the four tables into `dir` and returns their paths in the order
/// all segments, segments over threshold, all roads, roads over threshold.
///
/// Either all four files are replaced or none are.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn export_tables(tables: &ReportTables, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir).map_err(|e| ExportError::io(dir, e))?;

    let staging = dir.join(format!(".staging-{}", std::process::id()));
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| ExportError::io(&staging, e))?;
    }
    fs::create_dir_all(&staging).map_err(|e| ExportError::io(&staging, e))?;

    let result = write_staged(tables, &staging).and_then(|names| publish(&staging, dir, &names));

    if let Err(e) = fs::remove_dir_all(&staging) {
        warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
    }

    let paths = result?;
    info!(files = paths.len(), "Report tables exported");
    Ok(paths)
}

fn write_staged(tables: &ReportTables, staging: &Path) -> Result<[&'static str; 4], ExportError> {
    write_table(
        &staging.join(ALL_SEGMENTS),
        SEGMENT_COLUMNS,
        tables.all_segments.iter().map(SegmentCsvRow::from),
    )?;
    write_table(
        &staging.join(SEGMENTS_OVER_THRESHOLD),
        SEGMENT_COLUMNS,
        tables.segments_over_threshold.iter().map(SegmentCsvRow::from),
    )?;
    write_table(
        &staging.join(ALL_ROADS),
        ROAD_COLUMNS,
        tables.all_roads.iter().map(RoadCsvRow::from),
    )?;
    write_table(
        &staging.join(ROADS_OVER_THRESHOLD),
        ROAD_COLUMNS,
        tables.roads_over_threshold.iter().map(RoadCsvRow::from),
    )?;

    Ok([
        ALL_SEGMENTS,
        SEGMENTS_OVER_THRESHOLD,
        ALL_ROADS,
        ROADS_OVER_THRESHOLD,
    ])
}

/// Moves the staged tables into `dir`. Existing tables are set aside in
/// the staging directory first and restored if any move fails.
fn publish(staging: &Path, dir: &Path, names: &[&str]) -> Result<Vec<PathBuf>, ExportError> {
    // Every target must be free before anything moves.
    for name in names {
        let target = dir.join(name);
        if target.is_dir() {
            return Err(ExportError::io(
                &target,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target is a directory"),
            ));
        }
    }

    let previous = staging.join(PREVIOUS_DIR);
    fs::create_dir_all(&previous).map_err(|e| ExportError::io(&previous, e))?;

    let mut published = Vec::with_capacity(names.len());
    let mut set_aside = Vec::new();

    for name in names {
        let target = dir.join(name);
        if target.exists() {
            if let Err(e) = fs::rename(&target, previous.join(name)) {
                rollback(dir, &previous, &published, &set_aside);
                return Err(ExportError::io(&target, e));
            }
            set_aside.push(*name);
        }
        if let Err(e) = fs::rename(staging.join(name), &target) {
            rollback(dir, &previous, &published, &set_aside);
            return Err(ExportError::io(&target, e));
        }
        published.push(target);
    }

    Ok(published)
}

fn rollback(dir: &Path, previous: &Path, published: &[PathBuf], set_aside: &[&str]) {
    for path in published {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove partially published table");
        }
    }
    for name in set_aside {
        let target = dir.join(name);
        if let Err(e) = fs::rename(previous.join(name), &target) {
            warn!(path = %target.display(), error = %e, "Failed to restore previous table");
        }
    }
    warn!(restored = set_aside.len(), "Export rolled back");
}

/// Writes a header and the rows to `path`. The header is written even
/// for an empty table.
pub fn write_table<T, I>(path: &Path, columns: &[&str], rows: I) -> Result<usize, ExportError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let csv_error = |e: csv::Error| ExportError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;

    writer.write_record(columns).map_err(csv_error)?;

    let mut count = 0;
    for row in rows {
        writer.serialize(row).map_err(csv_error)?;
        count += 1;
    }
    writer
        .flush()
        .map_err(|e| ExportError::io(path, e))?;

    debug!(path = %path.display(), rows = count, "CSV table written");
    Ok(count)
}
