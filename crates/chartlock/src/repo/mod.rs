//! Chart repositories
//!
//! A chart repository is an HTTP server that publishes an `index.yaml`
//! describing every chart version it serves. This module holds the locally
//! configured repositories, the parsed index documents and the synchronizer
//! that refreshes their on-disk caches.

mod file;
mod index;
mod sync;

pub use file::{RepoFile, RepoFileError, RepositoryEntry, REPOSITORIES_FILE};
pub use index::{CatalogError, ChartVersion, VersionCatalog, INDEX_FILE};
pub use sync::{sync_all, sync_one, SyncError, SyncOutcome, SyncReport};

use std::path::PathBuf;

/// A configured repository with the location of its cached index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Local alias
    pub name: String,
    /// Base URL
    pub url: String,
    /// Cached index document
    pub cache_file: PathBuf,
}

impl RepositoryRef {
    /// URL of the repository's index document
    pub fn index_url(&self) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), INDEX_FILE)
    }
}

/// Compare two repository URLs by scheme, host, port and cleaned path
///
/// `https://Charts.Example.com/stable/` and `https://charts.example.com/stable`
/// are the same repository. Strings that do not parse as URLs are compared
/// after trimming trailing slashes.
pub fn urls_equal(a: &str, b: &str) -> bool {
    match (url::Url::parse(a.trim()), url::Url::parse(b.trim())) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
                && a.port_or_known_default() == b.port_or_known_default()
                && a.username() == b.username()
                && clean_path(a.path()) == clean_path(b.path())
                && a.query() == b.query()
        }
        _ => a.trim().trim_end_matches('/') == b.trim().trim_end_matches('/'),
    }
}

/// Collapse empty and `.` segments so `/a//b/./` equals `/a/b`
fn clean_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments
}
