//! Local chart directories
//!
//! Reads `Chart.yaml` metadata and packages a chart directory into the
//! `<name>-<version>.tgz` archive layout repositories serve.

use crate::atomic::write_atomic;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Chart metadata file name
pub const CHART_FILE: &str = "Chart.yaml";

/// Directory inside a chart that holds dependency archives
pub const CHARTS_DIR: &str = "charts";

/// Errors that can occur while reading or packaging a chart
#[derive(Debug, Error)]
pub enum ChartError {
    /// Directory has no Chart.yaml
    #[error("{} not found in {0}", CHART_FILE)]
    NotAChart(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse Chart.yaml
    #[error("Failed to parse {}: {0}", CHART_FILE)]
    ParseError(#[from] serde_yaml::Error),

    /// Required metadata missing
    #[error("Invalid chart metadata: {0}")]
    ValidationError(String),
}

/// The parts of Chart.yaml dependency handling cares about
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ChartMetadata {
    pub name: String,
    #[serde(deserialize_with = "crate::yaml::string_or_number")]
    pub version: String,
}

impl ChartMetadata {
    /// Load Chart.yaml from a chart directory
    pub fn load(chart_dir: &Path) -> Result<Self, ChartError> {
        let path = chart_dir.join(CHART_FILE);
        if !path.is_file() {
            return Err(ChartError::NotAChart(chart_dir.to_path_buf()));
        }
        let content = std::fs::read_to_string(&path)?;
        let metadata: ChartMetadata = serde_yaml::from_str(&content)?;

        if metadata.name.trim().is_empty() {
            return Err(ChartError::ValidationError("chart name is empty".to_string()));
        }
        if metadata.version.trim().is_empty() {
            return Err(ChartError::ValidationError(format!(
                "chart {} has no version",
                metadata.name
            )));
        }
        Ok(metadata)
    }

    /// Archive file name, `<name>-<version>.tgz`
    pub fn archive_name(&self) -> String {
        format!("{}-{}.tgz", self.name, self.version)
    }
}

/// Package `chart_dir` into `dest_dir/<name>-<version>.tgz`
///
/// Archive entries are rooted at `<name>/`, like published charts.
pub fn package(chart_dir: &Path, dest_dir: &Path) -> Result<PathBuf, ChartError> {
    let metadata = ChartMetadata::load(chart_dir)?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(&metadata.name, chart_dir)?;
    let bytes = builder.into_inner()?.finish()?;

    let dest = dest_dir.join(metadata.archive_name());
    write_atomic(&dest, &bytes)?;
    Ok(dest)
}
