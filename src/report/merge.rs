use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::metrics::SafetyMetrics;
use super::types::{SegmentRecord, SegmentRow, StatRow};

/// Result of joining statistics onto segments.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// One record per distinct segment id, in segment input order.
    pub records: Vec<SegmentRecord>,
    /// Segments that had no statistics row (kept with zero counts).
    pub segments_without_stats: usize,
    /// Statistics rows whose segment id matched no segment.
    pub unmatched_stats: usize,
    pub duplicate_segments: usize,
    pub duplicate_stats: usize,
}

/// Left-joins `stats` onto `segments` by exact segment id.
///
/// Every segment yields exactly one record. The first occurrence of a
/// repeated segment or statistics id wins, so nothing is counted twice.
#[tracing::instrument(skip_all, fields(segments = segments.len(), stats = stats.len()))]
pub fn merge(segments: Vec<SegmentRow>, stats: Vec<StatRow>) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    let mut stats_by_id: HashMap<String, StatRow> = HashMap::with_capacity(stats.len());
    for stat in stats {
        if stats_by_id.contains_key(&stat.segment_id) {
            outcome.duplicate_stats += 1;
            warn!(segment_id = %stat.segment_id, "Duplicate statistics row ignored");
            continue;
        }
        stats_by_id.insert(stat.segment_id.clone(), stat);
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(segments.len());
    for segment in segments {
        if !seen.insert(segment.segment_id.clone()) {
            outcome.duplicate_segments += 1;
            warn!(segment_id = %segment.segment_id, "Duplicate segment ignored");
            continue;
        }

        let stat = stats_by_id.remove(&segment.segment_id);
        if stat.is_none() {
            outcome.segments_without_stats += 1;
            debug!(segment_id = %segment.segment_id, "No statistics for segment");
        }
        outcome.records.push(segment_record(segment, stat.unwrap_or_default()));
    }

    outcome.unmatched_stats = stats_by_id.len();
    if outcome.unmatched_stats > 0 {
        let mut ids: Vec<&String> = stats_by_id.keys().collect();
        ids.sort();
        warn!(
            count = outcome.unmatched_stats,
            ids = ?ids,
            "Statistics rows without a matching segment discarded"
        );
    }

    info!(
        records = outcome.records.len(),
        without_stats = outcome.segments_without_stats,
        unmatched_stats = outcome.unmatched_stats,
        "Merge complete"
    );
    outcome
}

fn segment_record(segment: SegmentRow, stat: StatRow) -> SegmentRecord {
    let metrics = SafetyMetrics::compute(&stat.accidents, &stat.injuries, segment.length_km);
    let name = if segment.name.is_empty() {
        stat.segment_name
    } else {
        segment.name
    };

    SegmentRecord {
        segment_id: segment.segment_id,
        road: segment.road,
        name,
        from_km: segment.from_km,
        to_km: segment.to_km,
        from_name: segment.from_name,
        to_name: segment.to_name,
        length_km: segment.length_km,
        start: segment.start,
        end: segment.end,
        accidents: stat.accidents,
        injuries: stat.injuries,
        start_year: stat.start_year,
        end_year: stat.end_year,
        metrics,
    }
}
