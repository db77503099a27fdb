use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::db::queries::DEFAULT_TOP_LIMIT;

/// Application configuration loaded from TOML config file.
/// Every field has a default; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of render workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Size cap in bytes for uploads and rendered clips.
    pub max_media_bytes: u64,
    /// Where the console transport writes rendered clips (default: temp dir).
    pub output_dir: Option<PathBuf>,
    /// Dialogue session settings.
    pub session: SessionConfig,
    /// Leaderboard settings.
    pub leaderboard: LeaderboardConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            workers: 0,
            max_media_bytes: crate::MAX_MEDIA_BYTES,
            output_dir: None,
            session: SessionConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minutes without input before an unfinished session is dropped.
    pub idle_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { idle_minutes: 30 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Number of tracks shown by /top.
    pub top_limit: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            top_limit: DEFAULT_TOP_LIMIT,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/remixbot/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.idle_minutes * 60)
    }

    /// Output directory for rendered clips written by the console transport.
    pub fn resolve_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(crate::APP_NAME))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("remixbot.db")
    } else {
        // Fallback: current directory
        PathBuf::from("remixbot.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.max_media_bytes, 50 * 1024 * 1024);
        assert_eq!(config.session.idle_minutes, 30);
        assert_eq!(config.leaderboard.top_limit, 10);
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = AppConfig::parse(
            "workers = 3\n\n[session]\nidle_minutes = 5\n\n[leaderboard]\ntop_limit = 25\n",
        )
        .unwrap();
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.leaderboard.top_limit, 25);
        assert_eq!(config.max_media_bytes, crate::MAX_MEDIA_BYTES);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(AppConfig::parse("workers = \"many\"").is_err());
    }
}
