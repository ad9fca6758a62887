//! Segment and road safety reporting.
//!
//! Normalized segment and statistics rows are joined per segment, rolled
//! up per road, ranked by fatal and severe accidents per km and split
//! at a length threshold into the four report tables.

pub mod aggregate;
pub mod merge;
pub mod metrics;
pub mod types;
