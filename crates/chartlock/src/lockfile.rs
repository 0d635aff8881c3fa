//! Lock file management (requirements.lock)
//!
//! Records the exact versions chosen for every declared dependency, together
//! with a digest of the declarations they were resolved from.

use crate::atomic::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Name of the lock file inside a chart directory
pub const LOCK_FILE: &str = "requirements.lock";

/// Errors that can occur during lock file operations
#[derive(Debug, Error)]
pub enum LockfileError {
    /// Failed to read or write the lock file
    #[error("Failed to read lockfile: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse lockfile: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Invalid lockfile: {0}")]
    ValidationError(String),
}

/// Lock file (requirements.lock)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Lockfile {
    /// `sha256:<hex>` of the normalized declarations
    pub digest: String,

    /// When the lock was generated
    pub generated: DateTime<Utc>,

    /// Pinned dependencies, in declaration order
    #[serde(default)]
    pub dependencies: Vec<LockedDependency>,
}

/// A dependency pinned to an exact version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LockedDependency {
    /// Chart name
    pub name: String,

    /// Exact version
    #[serde(deserialize_with = "crate::yaml::string_or_number")]
    pub version: String,

    /// Repository as declared
    pub repository: String,

    /// Resolved artifact URL (absent for local charts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Artifact digest advertised by the repository index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Lockfile {
    /// Create a lock for the given declarations digest
    pub fn new(digest: String, dependencies: Vec<LockedDependency>) -> Self {
        Self {
            digest,
            generated: Utc::now(),
            dependencies,
        }
    }

    /// Load the lock file of a chart, if there is one
    pub fn load(chart_path: &Path) -> Result<Option<Self>, LockfileError> {
        let path = chart_path.join(LOCK_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        Self::from_file(&path).map(Some)
    }

    /// Parse a lock file from disk
    pub fn from_file(path: &Path) -> Result<Self, LockfileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a lock file from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, LockfileError> {
        let lockfile: Lockfile = serde_yaml::from_str(content)?;
        lockfile.validate()?;
        Ok(lockfile)
    }

    /// Validate the lock file
    pub fn validate(&self) -> Result<(), LockfileError> {
        if !is_sha256_digest(&self.digest) {
            return Err(LockfileError::ValidationError(format!(
                "Invalid digest '{}' (expected sha256:<64 hex characters>)",
                self.digest
            )));
        }

        for dep in &self.dependencies {
            if dep.name.is_empty() {
                return Err(LockfileError::ValidationError(
                    "Dependency name cannot be empty".to_string(),
                ));
            }

            if dep.version.is_empty() {
                return Err(LockfileError::ValidationError(format!(
                    "Dependency '{}' has empty version",
                    dep.name
                )));
            }

            if let Some(digest) = &dep.digest {
                if !is_sha256_digest(digest) {
                    return Err(LockfileError::ValidationError(format!(
                        "Dependency '{}' has invalid digest '{}'",
                        dep.name, digest
                    )));
                }
            }
        }

        Ok(())
    }

    /// Atomically write the lock file into a chart directory
    pub fn save(&self, chart_path: &Path) -> Result<(), LockfileError> {
        self.to_file(&chart_path.join(LOCK_FILE))
    }

    /// Atomically write the lock file
    pub fn to_file(&self, path: &Path) -> Result<(), LockfileError> {
        let content = serde_yaml::to_string(self)?;
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Get a locked dependency by name
    pub fn get(&self, name: &str) -> Option<&LockedDependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

impl LockedDependency {
    /// Check if this dependency was packaged from a local chart directory
    pub fn is_local(&self) -> bool {
        self.repository.trim().starts_with("file://")
    }
}

/// Check for `sha256:` followed by 64 hex characters
pub(crate) fn is_sha256_digest(s: &str) -> bool {
    s.strip_prefix("sha256:").map(is_sha256_hex).unwrap_or(false)
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Bring an index digest into `sha256:<hex>` form
///
/// Indexes publish either the bare hex or the prefixed form. Anything else
/// is not a digest this crate can check and yields `None`.
pub fn normalize_digest(s: &str) -> Option<String> {
    let s = s.trim();
    if is_sha256_digest(s) {
        Some(s.to_ascii_lowercase())
    } else if is_sha256_hex(s) {
        Some(format!("sha256:{}", s.to_ascii_lowercase()))
    } else {
        None
    }
}
