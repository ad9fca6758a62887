use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::info;

use super::metrics::SafetyMetrics;
use super::types::{
    AccidentCounts, InjuryCounts, Measured, ReportMetadata, ReportTables, RoadRecord,
    SegmentRecord,
};

/// Rolls segments up into one record per road, in first-seen road order.
///
/// Length and counts are summed; rates are recomputed from the sums and
/// never averaged across segments.
pub fn rollup_roads(segments: &[SegmentRecord]) -> Vec<RoadRecord> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<RoadGroup<'_>> = Vec::new();

    for segment in segments {
        let slot = *index.entry(segment.road.as_str()).or_insert_with(|| {
            groups.push(RoadGroup::new(segment));
            groups.len() - 1
        });
        groups[slot].add(segment);
    }

    groups.into_iter().map(RoadGroup::finish).collect()
}

struct RoadGroup<'a> {
    road: &'a str,
    first: &'a SegmentRecord,
    last: &'a SegmentRecord,
    segment_count: usize,
    length_km: f64,
    accidents: AccidentCounts,
    injuries: InjuryCounts,
}

impl<'a> RoadGroup<'a> {
    fn new(segment: &'a SegmentRecord) -> Self {
        Self {
            road: &segment.road,
            first: segment,
            last: segment,
            segment_count: 0,
            length_km: 0.0,
            accidents: AccidentCounts::default(),
            injuries: InjuryCounts::default(),
        }
    }

    fn add(&mut self, segment: &'a SegmentRecord) {
        self.segment_count += 1;
        self.length_km += segment.length_km;
        self.accidents += segment.accidents;
        self.injuries += segment.injuries;

        if segment.from_km < self.first.from_km {
            self.first = segment;
        }
        if segment.to_km > self.last.to_km {
            self.last = segment;
        }
    }

    fn finish(self) -> RoadRecord {
        RoadRecord {
            road: self.road.to_string(),
            from_name: self.first.from_name.clone(),
            to_name: self.last.to_name.clone(),
            segment_count: self.segment_count,
            length_km: self.length_km,
            accidents: self.accidents,
            injuries: self.injuries,
            metrics: SafetyMetrics::compute(&self.accidents, &self.injuries, self.length_km),
        }
    }
}

/// Records at least `min_length_km` long, unchanged and in input order.
pub fn split_by_length<T: Measured + Clone>(records: &[T], min_length_km: f64) -> Vec<T> {
    records
        .iter()
        .filter(|r| r.length_km() >= min_length_km)
        .cloned()
        .collect()
}

/// Orders by fatal and severe accidents per km, highest first. The sort is
/// stable, so ties keep their input order.
pub fn rank<T: Measured>(records: &mut [T]) {
    records.sort_by(|a, b| {
        b.metrics()
            .fatal_severe_accidents_per_km
            .partial_cmp(&a.metrics().fatal_severe_accidents_per_km)
            .unwrap_or(Ordering::Equal)
    });
}

/// Builds the four report tables from merged segment records.
#[tracing::instrument(skip_all, fields(segments = segments.len(), min_length_km = min_length_km))]
pub fn build_tables(
    mut segments: Vec<SegmentRecord>,
    metadata: ReportMetadata,
    min_length_km: f64,
) -> ReportTables {
    let mut roads = rollup_roads(&segments);

    rank(&mut segments);
    rank(&mut roads);

    let segments_over_threshold = split_by_length(&segments, min_length_km);
    let roads_over_threshold = split_by_length(&roads, min_length_km);

    info!(
        segments = segments.len(),
        segments_over_threshold = segments_over_threshold.len(),
        roads = roads.len(),
        roads_over_threshold = roads_over_threshold.len(),
        "Report tables built"
    );

    ReportTables {
        all_segments: segments,
        segments_over_threshold,
        all_roads: roads,
        roads_over_threshold,
        metadata,
    }
}
