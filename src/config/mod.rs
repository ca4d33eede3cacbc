//! Configuration for frameflow-rs
//!
//! This module handles:
//! - Application configuration (`config.toml`): scheduler, host loop and logging
//! - Project files (`.ffproj`): a saved graph with its parameters and links
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.frameflow.frameflow-rs/`
//! - **macOS**: `~/Library/Application Support/dev.frameflow.frameflow-rs/`
//! - **Windows**: `%APPDATA%\dev.frameflow.frameflow-rs\`
//!
//! # Example
//!
//! ```ignore
//! use frameflow_rs::config::{AppConfig, ProjectFile};
//!
//! let config = AppConfig::load_or_default();
//! let project = ProjectFile::load("stack.ffproj")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{FrameFlowError, Result};
use crate::pipeline::snapshot::GraphSnapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.frameflow.frameflow-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Project file extension
pub const PROJECT_FILE_EXTENSION: &str = "ffproj";

/// Current project file format version
pub const PROJECT_VERSION: u32 = 1;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        FrameFlowError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            FrameFlowError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== App Config ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerSettings,
    pub host: HostSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load from the default location, or defaults if there is no file yet.
    pub fn load() -> Result<Self> {
        let path = config_path().ok_or_else(|| {
            FrameFlowError::Config("Could not determine config path".to_string())
        })?;

        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrameFlowError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            FrameFlowError::Config(format!("Failed to parse config {:?}: {}", path, e))
        })?;
        config.validate()
    }

    /// Load config, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(CONFIG_FILE))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FrameFlowError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| FrameFlowError::Config(format!("Failed to write config: {}", e)))
    }

    /// Reject zero sizes and clamp the batch size to the worker count.
    pub fn validate(mut self) -> Result<Self> {
        if self.scheduler.worker_count == 0 {
            return Err(FrameFlowError::Config(
                "scheduler.worker_count must be at least 1".to_string(),
            ));
        }
        if self.scheduler.batch_size == 0 {
            return Err(FrameFlowError::Config(
                "scheduler.batch_size must be at least 1".to_string(),
            ));
        }
        if self.scheduler.batch_size > self.scheduler.worker_count {
            warn!(
                "scheduler.batch_size {} exceeds worker_count {}, clamping",
                self.scheduler.batch_size, self.scheduler.worker_count
            );
            self.scheduler.batch_size = self.scheduler.worker_count;
        }
        Ok(self)
    }
}

// ==================== Project File ====================

/// A saved graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Project file format version for future compatibility
    #[serde(default = "default_project_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub graph: GraphSnapshot,
}

fn default_project_version() -> u32 {
    PROJECT_VERSION
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self {
            version: PROJECT_VERSION,
            name: "Untitled Project".to_string(),
            graph: GraphSnapshot::empty(),
        }
    }
}

impl ProjectFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_snapshot(name: impl Into<String>, graph: GraphSnapshot) -> Self {
        Self {
            version: PROJECT_VERSION,
            name: name.into(),
            graph,
        }
    }

    /// Load a project file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FrameFlowError::Config(format!("Failed to read project file {:?}: {}", path, e))
        })?;

        let project: ProjectFile = serde_json::from_str(&content).map_err(|e| {
            FrameFlowError::Config(format!("Failed to parse project file {:?}: {}", path, e))
        })?;
        if project.version > PROJECT_VERSION {
            return Err(FrameFlowError::Config(format!(
                "Project file {:?} has version {}, newest supported is {}",
                path, project.version, PROJECT_VERSION
            )));
        }
        Ok(project)
    }

    /// Load a project file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Save project file to disk as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FrameFlowError::Config(format!("Failed to create project directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FrameFlowError::Serialization(format!("Failed to serialize project: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            FrameFlowError::Config(format!("Failed to write project file {:?}: {}", path, e))
        })
    }

    /// `path` with the project extension, unless it already has one.
    pub fn with_extension(path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.extension().is_some() {
            path.to_path_buf()
        } else {
            path.with_extension(PROJECT_FILE_EXTENSION)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = AppConfig::default();
        config.scheduler = SchedulerSettings {
            batch_size: 2,
            worker_count: 3,
        };
        config.host.tick_rate_hz = 30;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_zero_and_clamps_batch() {
        let mut config = AppConfig::default();
        config.scheduler.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler = SchedulerSettings {
            batch_size: 16,
            worker_count: 4,
        };
        assert_eq!(config.validate().unwrap().scheduler.batch_size, 4);
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[host]\ntick_rate_hz = 0\n").unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.host.tick_rate_hz, 0);
        assert_eq!(loaded.scheduler, SchedulerSettings::default());
    }

    #[test]
    fn test_project_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("demo.ffproj");
        let project = ProjectFile::new("demo");
        project.save(&path).unwrap();

        let loaded = ProjectFile::load(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.version, PROJECT_VERSION);
        assert!(loaded.graph.nodes.is_empty());
    }

    #[test]
    fn test_project_load_or_default() {
        let loaded = ProjectFile::load_or_default("/nonexistent/missing.ffproj");
        assert_eq!(loaded.name, "Untitled Project");
        assert_eq!(
            ProjectFile::with_extension("demo"),
            PathBuf::from("demo.ffproj")
        );
    }
}
