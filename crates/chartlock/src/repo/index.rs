//! Repository index documents (index.yaml)
//!
//! Parses a repository's index into a [`VersionCatalog`]. Entry order is kept
//! exactly as the index lists it; repositories list the newest version first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of a repository index, relative to the repository URL
pub const INDEX_FILE: &str = "index.yaml";

/// Errors that can occur while loading a catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The cached index does not exist; the repository has not been synced
    #[error("No cached index at {0}; sync the repository first")]
    NotFound(PathBuf),

    /// The document is not a valid index
    #[error("Failed to parse repository index: {message}")]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    /// IO error
    #[error("Failed to read repository index: {0}")]
    IoError(#[from] std::io::Error),
}

/// One published version of a chart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartVersion {
    /// Chart name (filled from the index key when omitted)
    #[serde(default)]
    pub name: String,

    /// Version string, normally semver
    #[serde(deserialize_with = "crate::yaml::string_or_number")]
    pub version: String,

    /// Download URLs, absolute or relative to the repository URL
    #[serde(default)]
    pub urls: Vec<String>,

    /// `sha256` digest of the archive as published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Publication time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Whether the version has been withdrawn
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument {
    #[serde(default)]
    api_version: Option<String>,

    #[serde(default)]
    entries: BTreeMap<String, Vec<ChartVersion>>,
}

/// Queryable form of one repository index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionCatalog {
    api_version: String,
    entries: BTreeMap<String, Vec<ChartVersion>>,
}

impl VersionCatalog {
    /// Load a cached index file
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.is_file() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes).map_err(|e| match e {
            CatalogError::Parse { message, .. } => CatalogError::Parse {
                path: Some(path.to_path_buf()),
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    /// Parse an index document
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CatalogError> {
        let doc: IndexDocument = serde_yaml::from_slice(bytes).map_err(|e| CatalogError::Parse {
            path: None,
            message: e.to_string(),
        })?;

        let api_version = doc
            .api_version
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CatalogError::Parse {
                path: None,
                message: "no API version specified".to_string(),
            })?;

        let mut entries = doc.entries;
        for (name, versions) in entries.iter_mut() {
            for version in versions.iter_mut() {
                if version.name.is_empty() {
                    version.name = name.clone();
                }
            }
        }

        Ok(Self {
            api_version,
            entries,
        })
    }

    /// Every listed version of a chart, in index order (removed ones included)
    ///
    /// An unknown chart yields an empty slice.
    pub fn entries_for(&self, chart: &str) -> &[ChartVersion] {
        self.entries.get(chart).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of all charts in the catalog
    pub fn chart_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Index API version
    pub fn api_version(&self) -> &str {
        &self.api_version
    }
}
