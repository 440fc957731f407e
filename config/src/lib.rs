// SPDX-License-Identifier: MPL-2.0

//! Configuration for the animated background pipeline.

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const NAME: &str = "bg-animator";
pub const CONFIG_FILE: &str = "config.ron";

/// Errors raised while loading, saving or validating a [`Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no configuration directory available")]
    NoConfigDir,
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Pipeline configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Setters)]
#[serde(default, deny_unknown_fields)]
#[must_use]
pub struct Config {
    /// frames per second the background is animated at
    pub target_fps: u32,
    /// JPEG quality of archived frames (0-100)
    pub quality: u8,
    /// fraction of the display bound used for the frame resolution
    pub scale_factor: f32,
    /// drop source frames to approach `target_fps`
    pub frame_skipping: bool,
    /// capacity of the playback queue
    pub queue_capacity: usize,
    /// number of rotating staging slots
    pub staging_slots: usize,
    /// bounded wait of the playback queue, in milliseconds
    pub pop_timeout_ms: u64,
    /// overrides display discovery with a fixed `(width, height)`
    #[setters(strip_option)]
    pub display_bound: Option<(u32, u32)>,
    /// root of the frame archive
    #[setters(strip_option)]
    pub archive_dir: Option<PathBuf>,
    /// directory holding the staging slots
    #[setters(strip_option)]
    pub staging_dir: Option<PathBuf>,
    /// program and arguments used to paint the background,
    /// `{path}` and `{uri}` are substituted with the staging slot
    #[setters(strip_option)]
    pub sink_command: Option<Vec<String>>,
    /// pause before the pipeline is rebuilt, in milliseconds
    pub restart_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_fps: 15,
            quality: 80,
            scale_factor: 0.75,
            frame_skipping: true,
            queue_capacity: 1000,
            staging_slots: 25,
            pop_timeout_ms: 1000,
            display_bound: None,
            archive_dir: None,
            staging_dir: None,
            sink_command: None,
            restart_delay_ms: 1000,
        }
    }
}

impl Config {
    /// Path of the configuration file under the user's config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(NAME).join(CONFIG_FILE))
    }

    /// Load the configuration from the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load the configuration from `path`, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(why) if why.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails if the config cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first field found out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.target_fps == 0 {
            return invalid("target_fps", "must be greater than zero");
        }
        if self.quality > 100 {
            return invalid("quality", "must be within 0..=100");
        }
        if !(self.scale_factor > 0.0 && self.scale_factor <= 1.0) {
            return invalid("scale_factor", "must be within (0, 1]");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity", "must be at least 1");
        }
        if self.staging_slots < 2 {
            return invalid("staging_slots", "must be at least 2");
        }
        if self.pop_timeout_ms == 0 {
            return invalid("pop_timeout_ms", "must be greater than zero");
        }
        if let Some((width, height)) = self.display_bound {
            if width == 0 || height == 0 {
                return invalid("display_bound", "width and height must be positive");
            }
        }
        if let Some(command) = &self.sink_command {
            if command.is_empty() {
                return invalid("sink_command", "must name a program");
            }
        }

        Ok(())
    }

    /// Uniform display time of one frame at `target_fps`.
    #[must_use]
    pub fn frame_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }

    /// Bounded wait used by the playback queue.
    #[must_use]
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Root of the frame archive, defaulting to the local data directory.
    #[must_use]
    pub fn archive_root(&self) -> PathBuf {
        self.archive_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(NAME)
                .join("AnimationFrames")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_fps, 15);
        assert_eq!(config.staging_slots, 25);
        assert!(config.frame_skipping);
    }

    #[test]
    fn frame_delay_follows_target_fps() {
        let config = Config::default().target_fps(20u32);
        assert_eq!(config.frame_delay(), Duration::from_millis(50));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            Config::default().target_fps(0u32),
            Config::default().quality(101u8),
            Config::default().scale_factor(0.0f32),
            Config::default().scale_factor(1.5f32),
            Config::default().queue_capacity(0usize),
            Config::default().staging_slots(1usize),
            Config::default().display_bound((0u32, 1080u32)),
            Config::default().sink_command(Vec::<String>::new()),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "(target_fps: 30, frame_skipping: false)").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.target_fps, 30);
        assert!(!config.frame_skipping);
        assert_eq!(config.quality, 80);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config::default()
            .display_bound((2560u32, 1440u32))
            .sink_command(vec!["feh".to_string(), "{path}".to_string()]);

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "(fps: 30)").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
