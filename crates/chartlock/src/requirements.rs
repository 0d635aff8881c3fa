//! Dependency declarations (requirements.yaml)
//!
//! A chart lists the charts it depends on in `requirements.yaml` next to its
//! `Chart.yaml`. Each entry names a chart, a version constraint and the
//! repository that serves it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the dependency declaration file inside a chart directory
pub const REQUIREMENTS_FILE: &str = "requirements.yaml";

/// Errors that can occur while loading declarations
#[derive(Debug, Error)]
pub enum RequirementsError {
    /// The chart has no requirements.yaml
    #[error("No {} found in {0}", REQUIREMENTS_FILE)]
    Missing(PathBuf),

    /// Failed to read the file
    #[error("Failed to read requirements: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse requirements: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Invalid requirements: {0}")]
    ValidationError(String),
}

/// Parsed requirements.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Requirements {
    /// Declared dependencies, in file order
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// One declared dependency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    /// Chart name as published in the repository index
    pub name: String,

    /// Version constraint; empty means "whatever the index lists first"
    #[serde(default, deserialize_with = "crate::yaml::string_or_number")]
    pub version: String,

    /// Repository URL, `@alias`/`alias:alias`, or `file://` path
    pub repository: String,

    /// Values path that enables or disables the dependency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Name the dependency is installed under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Tags used to enable groups of dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Where a dependency's repository field points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryTarget<'a> {
    /// A configured repository referenced by its local alias
    Alias(&'a str),
    /// A repository URL, matched against configured repositories
    Url(&'a str),
    /// A chart directory relative to the declaring chart
    Local(&'a str),
}

impl Requirements {
    /// Load requirements.yaml from a chart directory
    pub fn load(chart_path: &Path) -> Result<Self, RequirementsError> {
        let path = chart_path.join(REQUIREMENTS_FILE);
        if !path.is_file() {
            return Err(RequirementsError::Missing(chart_path.to_path_buf()));
        }
        Self::from_file(&path)
    }

    /// Parse requirements from a file
    pub fn from_file(path: &Path) -> Result<Self, RequirementsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse requirements from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, RequirementsError> {
        // An empty document is a chart without dependencies
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let requirements: Requirements = serde_yaml::from_str(content)?;
        requirements.validate()?;
        Ok(requirements)
    }

    /// Validate the declarations
    pub fn validate(&self) -> Result<(), RequirementsError> {
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err(RequirementsError::ValidationError(
                    "Dependency name cannot be empty".to_string(),
                ));
            }

            if dep.repository.trim().is_empty() {
                return Err(RequirementsError::ValidationError(format!(
                    "Dependency '{}' has no repository",
                    dep.name
                )));
            }

            if !seen.insert(dep.effective_name()) {
                return Err(RequirementsError::ValidationError(format!(
                    "Dependency '{}' is declared more than once",
                    dep.effective_name()
                )));
            }
        }

        Ok(())
    }
}

impl Dependency {
    /// Create a dependency with only name, constraint and repository set
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            repository: repository.into(),
            condition: None,
            alias: None,
            tags: Vec::new(),
        }
    }

    /// Name the dependency is installed under (alias if set)
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Classify the repository field
    pub fn target(&self) -> RepositoryTarget<'_> {
        let repo = self.repository.trim();
        if let Some(alias) = repo.strip_prefix('@') {
            RepositoryTarget::Alias(alias)
        } else if let Some(alias) = repo.strip_prefix("alias:") {
            RepositoryTarget::Alias(alias)
        } else if let Some(path) = repo.strip_prefix("file://") {
            RepositoryTarget::Local(path)
        } else {
            RepositoryTarget::Url(repo)
        }
    }

    /// Check if this dependency lives on the local filesystem
    pub fn is_local(&self) -> bool {
        matches!(self.target(), RepositoryTarget::Local(_))
    }

    /// Copy with whitespace trimmed and tags sorted, for digesting
    pub(crate) fn normalized(&self) -> Self {
        let mut tags: Vec<String> = self.tags.iter().map(|t| t.trim().to_string()).collect();
        tags.sort();
        Self {
            name: self.name.trim().to_string(),
            version: self.version.trim().to_string(),
            repository: self.repository.trim().to_string(),
            condition: self.condition.as_ref().map(|c| c.trim().to_string()),
            alias: self.alias.as_ref().map(|a| a.trim().to_string()),
            tags,
        }
    }
}
