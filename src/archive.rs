//! Bundles exported tables into a single `.tar.gz` download.

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ExportError;
use crate::output::{ALL_ROADS, ALL_SEGMENTS, ROADS_OVER_THRESHOLD, SEGMENTS_OVER_THRESHOLD};
use crate::pipeline::RunSummary;
use crate::report::types::{ReportMetadata, ReportTables};

const ARCHIVE_STEM: &str = "road_segments_data";
const NOTE_NAME: &str = "metadata.json";

#[derive(Serialize)]
struct ArchiveNote<'a> {
    date_range: &'a [i32],
    last_update: Option<String>,
    rows: BTreeMap<&'static str, usize>,
    summary: &'a RunSummary,
}

/// `road_segments_data[_{first}-{last}][_{dd-mm-YYYY}].tar.gz`
pub fn archive_name(metadata: &ReportMetadata) -> String {
    let mut name = ARCHIVE_STEM.to_string();
    if let Some((first, last)) = metadata.year_span() {
        name.push_str(&format!("_{first}-{last}"));
    }
    if let Some(label) = metadata.last_update_label() {
        name.push('_');
        name.push_str(&label);
    }
    name.push_str(".tar.gz");
    name
}

/// Writes `files` plus a `metadata.json` note (report period, table sizes
/// and row accounting) into an archive in `dir`.
///
/// The archive is written under a temporary name and renamed once
/// complete.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn write_archive(
    tables: &ReportTables,
    summary: &RunSummary,
    files: &[PathBuf],
    dir: &Path,
) -> Result<PathBuf, ExportError> {
    let target = dir.join(archive_name(&tables.metadata));
    let tmp = target.with_extension("gz.tmp");

    let result = build_archive(tables, summary, files, &tmp)
        .and_then(|()| fs::rename(&tmp, &target).map_err(|e| ExportError::io(&target, e)));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    info!(path = %target.display(), files = files.len() + 1, "Archive written");
    Ok(target)
}

fn build_archive(
    tables: &ReportTables,
    summary: &RunSummary,
    files: &[PathBuf],
    tmp: &Path,
) -> Result<(), ExportError> {
    let file = File::create(tmp).map_err(|e| ExportError::io(tmp, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for path in files {
        let name = path.file_name().ok_or_else(|| {
            ExportError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;
        builder
            .append_path_with_name(path, name)
            .map_err(|e| ExportError::io(path, e))?;
    }

    let note = note_bytes(tables, summary)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(note.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(
        tables
            .metadata
            .last_update
            .map_or(0, |d| u64::try_from(d.timestamp()).unwrap_or(0)),
    );
    header.set_cksum();
    builder
        .append_data(&mut header, NOTE_NAME, note.as_slice())
        .map_err(|e| ExportError::io(tmp, e))?;

    let encoder = builder.into_inner().map_err(|e| ExportError::io(tmp, e))?;
    encoder.finish().map_err(|e| ExportError::io(tmp, e))?;
    Ok(())
}

fn note_bytes(tables: &ReportTables, summary: &RunSummary) -> Result<Vec<u8>, ExportError> {
    let rows = BTreeMap::from([
        (ALL_SEGMENTS, tables.all_segments.len()),
        (SEGMENTS_OVER_THRESHOLD, tables.segments_over_threshold.len()),
        (ALL_ROADS, tables.all_roads.len()),
        (ROADS_OVER_THRESHOLD, tables.roads_over_threshold.len()),
    ]);
    let note = ArchiveNote {
        date_range: &tables.metadata.date_range,
        last_update: tables.metadata.last_update_label(),
        rows,
        summary,
    };
    serde_json::to_vec_pretty(&note).map_err(|e| ExportError::Serialize {
        what: NOTE_NAME,
        source: e,
    })
}
