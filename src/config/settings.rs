//! Settings sections of [`AppConfig`](super::AppConfig).
//!
//! - [`SchedulerSettings`] - batch fan-out width and worker pool capacity
//! - [`HostSettings`] - host loop rate
//! - [`LoggingSettings`] - tracing filter and optional log file

use serde::{Deserialize, Serialize};

/// Default host loop rate in Hz
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Default tracing filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,frameflow_rs=debug";

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Scheduler settings shared by every batch job in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Items drawn from a job's queue per tick.
    pub batch_size: usize,

    /// Threads a parallel batch may use.
    pub worker_count: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let workers = available_workers();
        Self {
            batch_size: workers,
            worker_count: workers,
        }
    }
}

/// Host loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Cycles per second. 0 runs unthrottled with a short idle wait.
    pub tick_rate_hz: u32,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Also write a daily rolling log into the app data directory
    pub log_to_file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_to_file: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults_match_parallelism() {
        let settings = SchedulerSettings::default();
        assert!(settings.worker_count >= 1);
        assert_eq!(settings.batch_size, settings.worker_count);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let host: HostSettings = toml::from_str("").unwrap();
        assert_eq!(host.tick_rate_hz, DEFAULT_TICK_RATE_HZ);

        let logging: LoggingSettings = toml::from_str("log_to_file = true").unwrap();
        assert!(logging.log_to_file);
        assert_eq!(logging.filter, DEFAULT_LOG_FILTER);
    }
}
