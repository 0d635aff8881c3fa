//! Repository configuration file (repositories.yaml)

use super::RepositoryRef;
use crate::atomic::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default file name of the repository configuration
pub const REPOSITORIES_FILE: &str = "repositories.yaml";

/// Errors that can occur while reading the repository configuration
#[derive(Debug, Error)]
pub enum RepoFileError {
    /// IO error
    #[error("Failed to read repository configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse repository configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Invalid repository configuration: {0}")]
    ValidationError(String),
}

/// Parsed repositories.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoFile {
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

/// One configured repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryEntry {
    /// Local alias
    pub name: String,

    /// Base URL
    pub url: String,

    /// Index cache file; relative paths live in the repository cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
}

impl RepoFile {
    /// Load the configuration, treating a missing file as "no repositories"
    pub fn load_or_default(path: &Path) -> Result<Self, RepoFileError> {
        if !path.is_file() {
            log::debug!("no repository configuration at {}", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Parse the configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, RepoFileError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse the configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, RepoFileError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: RepoFile = serde_yaml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    /// Validate names and URLs
    pub fn validate(&self) -> Result<(), RepoFileError> {
        let mut names = std::collections::HashSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(RepoFileError::ValidationError(
                    "Repository name cannot be empty".to_string(),
                ));
            }
            if !names.insert(repo.name.as_str()) {
                return Err(RepoFileError::ValidationError(format!(
                    "Repository '{}' is configured more than once",
                    repo.name
                )));
            }
            url::Url::parse(&repo.url).map_err(|e| {
                RepoFileError::ValidationError(format!(
                    "Repository '{}' has invalid URL '{}': {}",
                    repo.name, repo.url, e
                ))
            })?;
        }
        Ok(())
    }

    /// Atomically write the configuration
    pub fn to_file(&self, path: &Path) -> Result<(), RepoFileError> {
        let content = serde_yaml::to_string(self)?;
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Add or replace a repository by name
    pub fn add(&mut self, entry: RepositoryEntry) {
        self.repositories.retain(|r| r.name != entry.name);
        self.repositories.push(entry);
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Resolve every entry against the cache directory
    pub fn references(&self, cache_dir: &Path) -> Vec<RepositoryRef> {
        self.repositories
            .iter()
            .map(|entry| entry.reference(cache_dir))
            .collect()
    }
}

impl RepositoryEntry {
    /// Create an entry whose cache file uses the default name
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            cache: None,
        }
    }

    /// Resolve the cache file location
    pub fn reference(&self, cache_dir: &Path) -> RepositoryRef {
        let cache_file = match &self.cache {
            Some(cache) => cache_dir.join(cache),
            None => cache_dir.join(format!("{}-index.yaml", self.name)),
        };
        RepositoryRef {
            name: self.name.clone(),
            url: self.url.clone(),
            cache_file,
        }
    }
}
