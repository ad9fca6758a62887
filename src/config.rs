//! Runtime configuration.
//!
//! Everything the pipeline needs is collected into a [`Config`] up front
//! so no stage reads the environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const ROAD_SEGMENTS_URL: &str = "ROAD_SEGMENTS_URL";
pub const INFOGRAPHICS_URL: &str = "INFOGRAPHICS_URL";
pub const OUTPUT_DIR: &str = "REPORT_OUTPUT_DIR";
pub const TIMEOUT_SECS: &str = "FETCH_TIMEOUT_SECS";
pub const RETRIES: &str = "FETCH_RETRIES";
pub const BACKOFF_MS: &str = "FETCH_BACKOFF_MS";
pub const MIN_LENGTH_KM: &str = "REPORT_MIN_LENGTH_KM";

const DEFAULT_OUTPUT_DIR: &str = "data/output_data";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 1;
const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MIN_LENGTH_KM: f64 = 1.0;

/// How a single source is requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchPolicy {
    /// Per-attempt timeout. Hitting it aborts the run.
    pub timeout: Duration,
    /// Extra attempts after the first for transient failures.
    pub retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// URL (or local path) of the road segments query result.
    pub segments_url: String,
    /// URL (or local path) of the infographics query result.
    pub infographics_url: String,
    pub output_dir: PathBuf,
    pub fetch: FetchPolicy,
    /// Records at least this long land in the "1 km and above" tables.
    pub min_length_km: f64,
    /// Bundle the tables into a `.tar.gz` after export.
    pub archive: bool,
}

impl Config {
    /// Builds a config with default tuning for the two source URLs.
    pub fn new(segments_url: impl Into<String>, infographics_url: impl Into<String>) -> Self {
        Self {
            segments_url: segments_url.into(),
            infographics_url: infographics_url.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            fetch: FetchPolicy::default(),
            min_length_km: DEFAULT_MIN_LENGTH_KM,
            archive: false,
        }
    }

    /// Reads the process environment. Call `dotenvy::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable lookup.
    ///
    /// # Errors
    ///
    /// Fails when either URL is missing or blank, or when an optional
    /// setting is present but unparsable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };

        let mut config = Config::new(required(ROAD_SEGMENTS_URL)?, required(INFOGRAPHICS_URL)?);

        if let Some(dir) = lookup(OUTPUT_DIR).filter(|v| !v.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir.trim());
        }
        if let Some(secs) = parse_optional::<u64, _>(&lookup, TIMEOUT_SECS)? {
            config.fetch.timeout = checked_timeout(TIMEOUT_SECS, secs)?;
        }
        if let Some(retries) = parse_optional::<u32, _>(&lookup, RETRIES)? {
            config.fetch.retries = retries;
        }
        if let Some(ms) = parse_optional::<u64, _>(&lookup, BACKOFF_MS)? {
            config.fetch.backoff = Duration::from_millis(ms);
        }
        if let Some(km) = parse_optional::<f64, _>(&lookup, MIN_LENGTH_KM)? {
            config.min_length_km = checked_threshold(MIN_LENGTH_KM, km)?;
        }

        Ok(config)
    }

    /// Overrides the per-attempt timeout from the command line.
    pub fn set_timeout_secs(&mut self, secs: u64) -> Result<(), ConfigError> {
        self.fetch.timeout = checked_timeout("--timeout-secs", secs)?;
        Ok(())
    }

    /// Overrides the length threshold from the command line.
    pub fn set_min_length_km(&mut self, km: f64) -> Result<(), ConfigError> {
        self.min_length_km = checked_threshold("--min-length-km", km)?;
        Ok(())
    }
}

fn checked_timeout(name: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidVar {
            name,
            value: secs.to_string(),
            reason: "timeout must be positive".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn checked_threshold(name: &'static str, km: f64) -> Result<f64, ConfigError> {
    if !km.is_finite() || km < 0.0 {
        return Err(ConfigError::InvalidVar {
            name,
            value: km.to_string(),
            reason: "threshold must be a non-negative number".to_string(),
        });
    }
    Ok(km)
}

fn parse_optional<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidVar {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_segments_url() {
        let err = Config::from_lookup(lookup_from(&[(INFOGRAPHICS_URL, "http://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ROAD_SEGMENTS_URL)));
    }

    #[test]
    fn test_blank_infographics_url_is_missing() {
        let err = Config::from_lookup(lookup_from(&[
            (ROAD_SEGMENTS_URL, "http://x"),
            (INFOGRAPHICS_URL, "   "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(INFOGRAPHICS_URL)));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            (ROAD_SEGMENTS_URL, "http://seg"),
            (INFOGRAPHICS_URL, "http://info"),
        ]))
        .unwrap();

        assert_eq!(config.segments_url, "http://seg");
        assert_eq!(config.infographics_url, "http://info");
        assert_eq!(config.output_dir, PathBuf::from("data/output_data"));
        assert_eq!(config.fetch, FetchPolicy::default());
        assert_eq!(config.min_length_km, 1.0);
        assert!(!config.archive);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            (ROAD_SEGMENTS_URL, "http://seg"),
            (INFOGRAPHICS_URL, "http://info"),
            (OUTPUT_DIR, "out"),
            (TIMEOUT_SECS, "5"),
            (RETRIES, "3"),
            (BACKOFF_MS, "10"),
            (MIN_LENGTH_KM, "2.5"),
        ]))
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.fetch.timeout, Duration::from_secs(5));
        assert_eq!(config.fetch.retries, 3);
        assert_eq!(config.fetch.backoff, Duration::from_millis(10));
        assert_eq!(config.min_length_km, 2.5);
    }

    #[test]
    fn test_invalid_retries() {
        let err = Config::from_lookup(lookup_from(&[
            (ROAD_SEGMENTS_URL, "http://seg"),
            (INFOGRAPHICS_URL, "http://info"),
            (RETRIES, "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: RETRIES, .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            (ROAD_SEGMENTS_URL, "http://seg"),
            (INFOGRAPHICS_URL, "http://info"),
            (TIMEOUT_SECS, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: TIMEOUT_SECS, .. }));
    }

    #[test]
    fn test_command_line_zero_timeout_rejected() {
        let mut config = Config::new("http://seg", "http://info");
        let err = config.set_timeout_secs(0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: "--timeout-secs", .. }));
        assert_eq!(config.fetch.timeout, FetchPolicy::default().timeout);

        config.set_timeout_secs(7).unwrap();
        assert_eq!(config.fetch.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_command_line_threshold_validated() {
        let mut config = Config::new("http://seg", "http://info");
        assert!(config.set_min_length_km(-1.0).is_err());
        assert!(config.set_min_length_km(f64::NAN).is_err());
        assert_eq!(config.min_length_km, 1.0);

        config.set_min_length_km(0.0).unwrap();
        assert_eq!(config.min_length_km, 0.0);
    }
}
