//! Typed records flowing through the report pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::AddAssign;

use super::metrics::SafetyMetrics;

/// A point as an `(x, y)` pair, longitude first when geographic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// Accident counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccidentCounts {
    pub fatal: u64,
    pub severe: u64,
    pub light: u64,
}

impl AccidentCounts {
    pub fn total(&self) -> u64 {
        self.fatal_severe().saturating_add(self.light)
    }

    pub fn fatal_severe(&self) -> u64 {
        self.fatal.saturating_add(self.severe)
    }
}

impl AddAssign for AccidentCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.fatal = self.fatal.saturating_add(rhs.fatal);
        self.severe = self.severe.saturating_add(rhs.severe);
        self.light = self.light.saturating_add(rhs.light);
    }
}

/// Injury counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InjuryCounts {
    pub killed: u64,
    pub severe: u64,
    pub light: u64,
}

impl InjuryCounts {
    pub fn total(&self) -> u64 {
        self.killed
            .saturating_add(self.severe)
            .saturating_add(self.light)
    }
}

impl AddAssign for InjuryCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.killed = self.killed.saturating_add(rhs.killed);
        self.severe = self.severe.saturating_add(rhs.severe);
        self.light = self.light.saturating_add(rhs.light);
    }
}

/// A normalized row from the road segments source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentRow {
    pub segment_id: String,
    pub road: String,
    pub name: String,
    pub from_km: f64,
    pub to_km: f64,
    pub from_name: String,
    pub to_name: String,
    /// Always finite and non-negative.
    pub length_km: f64,
    pub start: Option<Coordinates>,
    pub end: Option<Coordinates>,
}

/// A normalized row from the infographics source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatRow {
    pub segment_id: String,
    pub segment_name: String,
    pub accidents: AccidentCounts,
    pub injuries: InjuryCounts,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

/// Period covered by the statistics, as reported by the infographics source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub date_range: Vec<i32>,
    pub last_update: Option<DateTime<Utc>>,
}

impl ReportMetadata {
    /// First and last year of the range, when at least two are known.
    pub fn year_span(&self) -> Option<(i32, i32)> {
        match self.date_range.as_slice() {
            [first, .., last] => Some((*first, *last)),
            _ => None,
        }
    }

    /// `dd-mm-YYYY`, the format used in archive names.
    pub fn last_update_label(&self) -> Option<String> {
        self.last_update.map(|d| d.format("%d-%m-%Y").to_string())
    }
}

/// One segment with its statistics and derived metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub segment_id: String,
    pub road: String,
    pub name: String,
    pub from_km: f64,
    pub to_km: f64,
    pub from_name: String,
    pub to_name: String,
    pub length_km: f64,
    pub start: Option<Coordinates>,
    pub end: Option<Coordinates>,
    pub accidents: AccidentCounts,
    pub injuries: InjuryCounts,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub metrics: SafetyMetrics,
}

/// All segments of one road, summed.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadRecord {
    pub road: String,
    /// Junction at the start of the segment with the smallest `from_km`.
    pub from_name: String,
    /// Junction at the end of the segment with the largest `to_km`.
    pub to_name: String,
    pub segment_count: usize,
    pub length_km: f64,
    pub accidents: AccidentCounts,
    pub injuries: InjuryCounts,
    pub metrics: SafetyMetrics,
}

/// Anything with a length and safety metrics can be split and ranked.
pub trait Measured {
    fn length_km(&self) -> f64;
    fn metrics(&self) -> &SafetyMetrics;
}

impl Measured for SegmentRecord {
    fn length_km(&self) -> f64 {
        self.length_km
    }

    fn metrics(&self) -> &SafetyMetrics {
        &self.metrics
    }
}

impl Measured for RoadRecord {
    fn length_km(&self) -> f64 {
        self.length_km
    }

    fn metrics(&self) -> &SafetyMetrics {
        &self.metrics
    }
}

/// The four report tables of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTables {
    pub all_segments: Vec<SegmentRecord>,
    pub segments_over_threshold: Vec<SegmentRecord>,
    pub all_roads: Vec<RoadRecord>,
    pub roads_over_threshold: Vec<RoadRecord>,
    pub metadata: ReportMetadata,
}
