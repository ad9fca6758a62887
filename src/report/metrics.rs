//! Derived safety metrics.
//!
//! Every rate divides by length. A zero-length record gets a rate of 0
//! instead of a division fault.

use super::types::{AccidentCounts, InjuryCounts};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SafetyMetrics {
    pub total_accidents: u64,
    pub total_injuries: u64,
    pub fatal_severe_accidents: u64,
    /// Accidents of any severity per km.
    pub safety_rate: f64,
    pub fatal_severe_accidents_per_km: f64,
    pub fatal_accidents_per_km: f64,
}

impl SafetyMetrics {
    pub fn compute(accidents: &AccidentCounts, injuries: &InjuryCounts, length_km: f64) -> Self {
        let total_accidents = accidents.total();
        let fatal_severe_accidents = accidents.fatal_severe();

        Self {
            total_accidents,
            total_injuries: injuries.total(),
            fatal_severe_accidents,
            safety_rate: per_km(total_accidents, length_km),
            fatal_severe_accidents_per_km: per_km(fatal_severe_accidents, length_km),
            fatal_accidents_per_km: per_km(accidents.fatal, length_km),
        }
    }
}

/// `count / length_km`, or 0 when the length is not positive.
pub fn per_km(count: u64, length_km: f64) -> f64 {
    if length_km > 0.0 {
        count as f64 / length_km
    } else {
        0.0
    }
}
