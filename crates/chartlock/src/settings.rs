//! Client settings
//!
//! Settings come from three layers, later ones winning: built-in defaults
//! rooted at the home directory, an optional `<home>/config.toml`, and
//! command-line flags applied by the caller.

use crate::provenance::VerifyPolicy;
use crate::repo::{RepoFile, RepoFileError, RepositoryRef, REPOSITORIES_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "CHARTLOCK_HOME";

/// Name of the optional configuration file inside the home directory
pub const CONFIG_FILE: &str = "config.toml";

/// Errors that can occur while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No home directory could be determined
    #[error("Could not determine home directory; set {}", HOME_ENV)]
    NoHome,

    /// IO error
    #[error("Failed to read {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse config.toml
    #[error("Failed to parse {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A zero timeout would fail every request
    #[error("Invalid {path}: timeout_secs must be at least 1")]
    InvalidTimeout { path: PathBuf },
}

/// Resolved client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of all client state
    pub home: PathBuf,
    /// Path of repositories.yaml
    pub repository_config: PathBuf,
    /// Directory holding cached repository indexes
    pub repository_cache: PathBuf,
    /// Trusted public keys for provenance verification
    pub keyring: PathBuf,
    /// When downloads are verified
    pub verify: VerifyPolicy,
    /// Per-request network timeout
    pub timeout: Duration,
    /// Skip refreshing repository caches before resolving
    pub skip_refresh: bool,
}

/// On-disk shape of config.toml; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    repository_config: Option<PathBuf>,
    repository_cache: Option<PathBuf>,
    keyring: Option<PathBuf>,
    verify: Option<VerifyPolicy>,
    timeout_secs: Option<u64>,
    skip_refresh: Option<bool>,
}

impl Settings {
    /// Defaults rooted at `home`, ignoring any config file
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let repository_dir = home.join("repository");
        Self {
            repository_config: repository_dir.join(REPOSITORIES_FILE),
            repository_cache: repository_dir.join("cache"),
            keyring: home.join("keyring.pem"),
            verify: VerifyPolicy::Never,
            timeout: crate::getter::REQUEST_TIMEOUT,
            skip_refresh: false,
            home,
        }
    }

    /// Load settings for `home`, or the default home when `None`
    ///
    /// The default home is `$CHARTLOCK_HOME`, falling back to `~/.chartlock`.
    pub fn load(home: Option<PathBuf>) -> Result<Self, SettingsError> {
        let home = match home {
            Some(home) => home,
            None => default_home()?,
        };
        let mut settings = Self::with_home(&home);

        let config_path = home.join(CONFIG_FILE);
        if config_path.is_file() {
            log::debug!("loading settings from {}", config_path.display());
            let content =
                std::fs::read_to_string(&config_path).map_err(|source| SettingsError::IoError {
                    path: config_path.clone(),
                    source,
                })?;
            let config: ConfigFile =
                toml::from_str(&content).map_err(|source| SettingsError::ParseError {
                    path: config_path.clone(),
                    source,
                })?;
            settings.apply(config, &config_path)?;
        }

        Ok(settings)
    }

    fn apply(&mut self, config: ConfigFile, config_path: &Path) -> Result<(), SettingsError> {
        if let Some(path) = config.repository_config {
            self.repository_config = self.under_home(path);
        }
        if let Some(path) = config.repository_cache {
            self.repository_cache = self.under_home(path);
        }
        if let Some(path) = config.keyring {
            self.keyring = self.under_home(path);
        }
        if let Some(verify) = config.verify {
            self.verify = verify;
        }
        match config.timeout_secs {
            Some(0) => {
                return Err(SettingsError::InvalidTimeout {
                    path: config_path.to_path_buf(),
                })
            }
            Some(secs) => self.timeout = Duration::from_secs(secs),
            None => {}
        }
        if let Some(skip) = config.skip_refresh {
            self.skip_refresh = skip;
        }
        Ok(())
    }

    /// Relative paths in config.toml are relative to the home directory
    fn under_home(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.home.join(path)
        }
    }

    /// Configured repositories with their cache file locations
    pub fn repositories(&self) -> Result<Vec<RepositoryRef>, RepoFileError> {
        Ok(RepoFile::load_or_default(&self.repository_config)?.references(&self.repository_cache))
    }
}

fn default_home() -> Result<PathBuf, SettingsError> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|dir| dir.join(".chartlock"))
        .ok_or(SettingsError::NoHome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::with_home("/tmp/h");
        assert_eq!(
            settings.repository_config,
            PathBuf::from("/tmp/h/repository/repositories.yaml")
        );
        assert_eq!(settings.repository_cache, PathBuf::from("/tmp/h/repository/cache"));
        assert_eq!(settings.keyring, PathBuf::from("/tmp/h/keyring.pem"));
        assert_eq!(settings.verify, VerifyPolicy::Never);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert!(!settings.skip_refresh);
    }

    #[test]
    fn test_config_file_overrides() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            r#"
repository_config = "repos.yaml"
keyring = "/etc/chartlock/keys.pem"
verify = "if-possible"
timeout_secs = 5
skip_refresh = true
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(temp.path().to_path_buf())).unwrap();
        assert_eq!(settings.repository_config, temp.path().join("repos.yaml"));
        assert_eq!(settings.repository_cache, temp.path().join("repository/cache"));
        assert_eq!(settings.keyring, PathBuf::from("/etc/chartlock/keys.pem"));
        assert_eq!(settings.verify, VerifyPolicy::IfPossible);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert!(settings.skip_refresh);
    }

    #[test]
    fn test_unknown_config_key() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "verfiy = \"always\"\n").unwrap();
        assert!(matches!(
            Settings::load(Some(temp.path().to_path_buf())),
            Err(SettingsError::ParseError { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "timeout_secs = 0\n").unwrap();
        assert!(matches!(
            Settings::load(Some(temp.path().to_path_buf())),
            Err(SettingsError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_repositories_without_config() {
        let temp = tempfile::tempdir().unwrap();
        let settings = Settings::with_home(temp.path());
        assert!(settings.repositories().unwrap().is_empty());
    }
}
