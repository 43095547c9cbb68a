use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::shared::paths::get_config_path;

/// Default cache ceiling: 50 MiB.
pub const DEFAULT_MAX_CACHE_BYTES: usize = 50 * 1024 * 1024;
/// Default snapshot lifetime: one hour.
pub const DEFAULT_MAX_CACHE_AGE_SECS: u64 = 3600;
/// Default spacing between GC passes: five minutes.
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 300;
/// Default memory warning threshold, in percent of total system memory.
pub const DEFAULT_WARNING_PERCENT: f64 = 80.0;
/// Default external task runner binary.
pub const DEFAULT_RUNNER: &str = "task";
pub const DEFAULT_LAUNCH_WORKERS: usize = 2;

/// Runtime knobs for the hub.
///
/// Defaults can be overridden through environment variables:
/// - `TASKHUB_CACHE_MAX_BYTES`
/// - `TASKHUB_CACHE_MAX_AGE_SECS`
/// - `TASKHUB_GC_INTERVAL_SECS`
/// - `TASKHUB_GC_WARNING_PERCENT`
/// - `TASKHUB_RUNNER`
/// - `TASKHUB_LAUNCH_WORKERS`
/// - `TASKHUB_CONFIG` (path of the YAML config document)
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub max_cache_bytes: usize,
    pub max_cache_age: Duration,
    pub gc_interval: Duration,
    pub warning_threshold_percent: f64,
    pub runner: String,
    pub launch_workers: usize,
    /// `None` keeps preferences in memory only.
    pub config_path: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_cache_age: Duration::from_secs(DEFAULT_MAX_CACHE_AGE_SECS),
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            warning_threshold_percent: DEFAULT_WARNING_PERCENT,
            runner: DEFAULT_RUNNER.to_string(),
            launch_workers: DEFAULT_LAUNCH_WORKERS,
            config_path: Some(get_config_path()),
        }
    }
}

impl HubConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_cache_bytes = parse_var(&lookup, "TASKHUB_CACHE_MAX_BYTES")
            .filter(|bytes: &usize| *bytes > 0)
            .unwrap_or(defaults.max_cache_bytes);

        let max_cache_age = parse_var(&lookup, "TASKHUB_CACHE_MAX_AGE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_cache_age);

        let gc_interval = parse_var(&lookup, "TASKHUB_GC_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.gc_interval);

        let warning_threshold_percent = parse_var(&lookup, "TASKHUB_GC_WARNING_PERCENT")
            .filter(|percent: &f64| (0.0..=100.0).contains(percent))
            .unwrap_or(defaults.warning_threshold_percent);

        let runner = lookup("TASKHUB_RUNNER")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.runner);

        let launch_workers = parse_var(&lookup, "TASKHUB_LAUNCH_WORKERS")
            .filter(|workers: &usize| *workers > 0)
            .unwrap_or(defaults.launch_workers);

        let config_path = match lookup("TASKHUB_CONFIG") {
            Some(path) if !path.trim().is_empty() => Some(PathBuf::from(path.trim())),
            _ => defaults.config_path,
        };

        Self {
            max_cache_bytes,
            max_cache_age,
            gc_interval,
            warning_threshold_percent,
            runner,
            launch_workers,
            config_path,
        }
    }

    /// Config that never touches the user's config directory.
    pub fn ephemeral() -> Self {
        Self {
            config_path: None,
            ..Self::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(target: "config", key, value = %raw, "Ignoring unparsable override");
            None
        }
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = HubConfig::from_lookup(|_| None);
        assert_eq!(config.max_cache_bytes, 50 * 1024 * 1024);
        assert_eq!(config.max_cache_age, Duration::from_secs(3600));
        assert_eq!(config.gc_interval, Duration::from_secs(300));
        assert_eq!(config.warning_threshold_percent, 80.0);
        assert_eq!(config.runner, "task");
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = HubConfig::from_lookup(lookup_from(&[
            ("TASKHUB_CACHE_MAX_BYTES", "1024"),
            ("TASKHUB_CACHE_MAX_AGE_SECS", "60"),
            ("TASKHUB_GC_INTERVAL_SECS", "5"),
            ("TASKHUB_GC_WARNING_PERCENT", "65.5"),
            ("TASKHUB_RUNNER", "go-task"),
            ("TASKHUB_LAUNCH_WORKERS", "4"),
            ("TASKHUB_CONFIG", "/tmp/hub.yaml"),
        ]));

        assert_eq!(config.max_cache_bytes, 1024);
        assert_eq!(config.max_cache_age, Duration::from_secs(60));
        assert_eq!(config.gc_interval, Duration::from_secs(5));
        assert_eq!(config.warning_threshold_percent, 65.5);
        assert_eq!(config.runner, "go-task");
        assert_eq!(config.launch_workers, 4);
        assert_eq!(config.config_path, Some(PathBuf::from("/tmp/hub.yaml")));
    }

    #[test]
    fn test_invalid_overrides_fall_back() {
        let config = HubConfig::from_lookup(lookup_from(&[
            ("TASKHUB_CACHE_MAX_BYTES", "lots"),
            ("TASKHUB_GC_WARNING_PERCENT", "140"),
            ("TASKHUB_LAUNCH_WORKERS", "0"),
            ("TASKHUB_RUNNER", "   "),
        ]));

        assert_eq!(config.max_cache_bytes, DEFAULT_MAX_CACHE_BYTES);
        assert_eq!(config.warning_threshold_percent, DEFAULT_WARNING_PERCENT);
        assert_eq!(config.launch_workers, DEFAULT_LAUNCH_WORKERS);
        assert_eq!(config.runner, DEFAULT_RUNNER);
    }
}
