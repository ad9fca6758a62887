//! End-to-end report generation.
//!
//! [`run`] fetches both sources, builds the tables and writes them.
//! [`process`] is the synchronous core, usable on rows loaded elsewhere.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::write_archive;
use crate::config::Config;
use crate::error::PipelineError;
use crate::fetch::{HttpClient, RawRow, fetch_sources};
use crate::normalize::{extract_metadata, normalize_all, normalize_segment, normalize_stat};
use crate::output::export_tables;
use crate::report::aggregate::build_tables;
use crate::report::merge::merge;
use crate::report::types::ReportTables;

/// Row accounting for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub segment_rows: usize,
    pub stat_rows: usize,
    pub skipped_segments: usize,
    pub skipped_stats: usize,
    pub segments_without_stats: usize,
    pub unmatched_stats: usize,
    pub duplicate_segments: usize,
    pub duplicate_stats: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Processed {
    pub tables: ReportTables,
    pub summary: RunSummary,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub tables: ReportTables,
    pub summary: RunSummary,
    /// The four CSV files, in table order.
    pub files: Vec<PathBuf>,
    pub archive: Option<PathBuf>,
}

/// Normalizes, merges and aggregates raw source rows.
pub fn process(segment_rows: &[RawRow], stat_rows: &[RawRow], min_length_km: f64) -> Processed {
    let (segments, skipped_segments) = normalize_all(segment_rows, "segment", normalize_segment);
    let (stats, skipped_stats) = normalize_all(stat_rows, "stat", normalize_stat);
    if skipped_segments + skipped_stats > 0 {
        warn!(skipped_segments, skipped_stats, "Rows dropped during normalization");
    }

    let metadata = extract_metadata(stat_rows);
    let merged = merge(segments, stats);

    let summary = RunSummary {
        segment_rows: segment_rows.len(),
        stat_rows: stat_rows.len(),
        skipped_segments,
        skipped_stats,
        segments_without_stats: merged.segments_without_stats,
        unmatched_stats: merged.unmatched_stats,
        duplicate_segments: merged.duplicate_segments,
        duplicate_stats: merged.duplicate_stats,
    };

    Processed {
        tables: build_tables(merged.records, metadata, min_length_km),
        summary,
    }
}

/// Runs the whole pipeline. Nothing is written unless both sources were
/// fetched successfully.
#[tracing::instrument(skip_all, fields(output_dir = %config.output_dir.display()))]
pub async fn run<C: HttpClient>(config: &Config, client: &C) -> Result<RunReport, PipelineError> {
    let sources = fetch_sources(client, config).await?;
    info!(
        segments = sources.segments.len(),
        stats = sources.stats.len(),
        "Sources fetched"
    );

    let Processed { tables, summary } =
        process(&sources.segments, &sources.stats, config.min_length_km);

    let files = export_tables(&tables, &config.output_dir)?;
    let archive = if config.archive {
        Some(write_archive(&tables, &summary, &files, &config.output_dir)?)
    } else {
        None
    };

    Ok(RunReport {
        tables,
        summary,
        files,
        archive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn rows(value: Value) -> Vec<RawRow> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_process_reference_scenario() {
        let segments = rows(json!([
            {"id": 1, "road": "A", "length_km": 0.5},
            {"id": 2, "road": "A", "length_km": 0.8}
        ]));
        let stats = rows(json!([
            {"id": 1, "fatal": 1, "severe": 0, "light": 2},
            {"id": 2, "fatal": 0, "severe": 1, "light": 0}
        ]));

        let Processed { tables, summary } = process(&segments, &stats, 1.0);

        let seg1 = tables.all_segments.iter().find(|s| s.segment_id == "1").unwrap();
        let seg2 = tables.all_segments.iter().find(|s| s.segment_id == "2").unwrap();
        assert_eq!(seg1.metrics.total_accidents, 3);
        assert_eq!(seg1.metrics.safety_rate, 6.0);
        assert_eq!(seg2.metrics.total_accidents, 1);
        assert_eq!(seg2.metrics.safety_rate, 1.25);

        assert_eq!(tables.all_roads.len(), 1);
        let road = &tables.all_roads[0];
        assert!((road.length_km - 1.3).abs() < 1e-9);
        assert_eq!(road.metrics.total_accidents, 4);
        assert!((road.metrics.safety_rate - 4.0 / 1.3).abs() < 1e-9);

        assert!(tables.segments_over_threshold.is_empty());
        assert_eq!(tables.roads_over_threshold.len(), 1);
        assert_eq!(summary.skipped_segments, 0);
        assert_eq!(summary.unmatched_stats, 0);
    }

    #[test]
    fn test_process_counts_bad_rows() {
        let segments = rows(json!([
            {"segment_id": 1, "road": "A", "length_km": 1.0},
            {"road": "A", "length_km": 1.0}
        ]));
        let stats = rows(json!([
            {"road_segment_id": 1, "fatal": 1},
            {"road_segment_id": 42, "fatal": 1},
            {"fatal": 3}
        ]));

        let Processed { tables, summary } = process(&segments, &stats, 1.0);

        assert_eq!(tables.all_segments.len(), 1);
        assert_eq!(summary.skipped_segments, 1);
        assert_eq!(summary.skipped_stats, 1);
        assert_eq!(summary.unmatched_stats, 1);
        assert_eq!(tables.all_roads[0].metrics.total_accidents, 1);
    }

    #[test]
    fn test_process_custom_threshold() {
        let segments = rows(json!([
            {"segment_id": 1, "road": "A", "length_km": 0.3},
            {"segment_id": 2, "road": "B", "length_km": 0.6}
        ]));
        let Processed { tables, .. } = process(&segments, &[], 0.5);
        assert_eq!(tables.segments_over_threshold.len(), 1);
        assert_eq!(tables.segments_over_threshold[0].segment_id, "2");
    }

    #[test]
    fn test_process_huge_counts_saturate() {
        let segments = rows(json!([
            {"segment_id": 1, "road": "A", "length_km": 1.0},
            {"segment_id": 2, "road": "A", "length_km": 1.0}
        ]));
        let stats = rows(json!([
            {"segment_id": 1, "fatal": 1.0e19, "severe": 1.0e19},
            {"segment_id": 2, "fatal": 10000000000000000000u64}
        ]));

        let Processed { tables, .. } = process(&segments, &stats, 1.0);

        let seg1 = tables.all_segments.iter().find(|s| s.segment_id == "1").unwrap();
        assert_eq!(seg1.metrics.total_accidents, u64::MAX);
        assert_eq!(seg1.metrics.fatal_severe_accidents, u64::MAX);

        let road = &tables.all_roads[0];
        assert_eq!(road.accidents.fatal, u64::MAX);
        assert_eq!(road.metrics.total_accidents, u64::MAX);
    }
}
