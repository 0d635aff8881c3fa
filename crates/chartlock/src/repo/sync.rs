//! Repository synchronization
//!
//! Refreshes the cached index of every configured repository. Each repository
//! is fetched on its own thread; results come back over one channel and are
//! reported from a single place once every thread has finished.

use super::{RepositoryRef, VersionCatalog};
use crate::atomic::write_atomic;
use crate::getter::{FetchError, Getter};
use crossbeam::channel;
use std::path::PathBuf;
use std::thread;
use thiserror::Error;

/// Errors that can occur while refreshing one repository
#[derive(Debug, Error)]
pub enum SyncError {
    /// Index download failed
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Downloaded document is not a valid index
    #[error("{url} is not a valid chart repository index: {source}")]
    InvalidIndex {
        url: String,
        #[source]
        source: super::CatalogError,
    },

    /// Cache file could not be written
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker thread died before reporting
    #[error("sync worker panicked")]
    Panicked,
}

/// Result of refreshing one repository
#[derive(Debug)]
pub struct SyncOutcome {
    /// Repository alias
    pub name: String,
    /// Repository URL
    pub url: String,
    /// Cache file written, or why it was not
    pub result: Result<PathBuf, SyncError>,
}

/// Per-repository outcomes of one synchronization, in configuration order
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    /// Repositories whose cache was refreshed
    pub fn succeeded(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    /// Repositories that could not be refreshed
    pub fn failed(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Check if every repository was refreshed
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Fetch one repository's index, validate it, and replace its cache file
pub fn sync_one(repo: &RepositoryRef, getter: &dyn Getter) -> Result<PathBuf, SyncError> {
    let url = repo.index_url();
    let bytes = getter.get(&url).map_err(|source| SyncError::Fetch {
        url: url.clone(),
        source,
    })?;

    // Never replace a good cache with something unparseable
    VersionCatalog::from_slice(&bytes).map_err(|source| SyncError::InvalidIndex {
        url: url.clone(),
        source,
    })?;

    write_atomic(&repo.cache_file, &bytes).map_err(|source| SyncError::Write {
        path: repo.cache_file.clone(),
        source,
    })?;

    Ok(repo.cache_file.clone())
}

/// Refresh every repository concurrently and wait for all of them
///
/// Individual failures are reported as warnings and in the returned report;
/// they never fail the call.
pub fn sync_all(repositories: &[RepositoryRef], getter: &dyn Getter) -> SyncReport {
    if repositories.is_empty() {
        return SyncReport::default();
    }

    log::info!("Hang tight while we grab the latest from your chart repositories...");

    let (tx, rx) = channel::unbounded();
    thread::scope(|scope| {
        let handles: Vec<_> = repositories
            .iter()
            .enumerate()
            .map(|(idx, repo)| {
                let tx = tx.clone();
                scope.spawn(move || {
                    let result = sync_one(repo, getter);
                    // The receiver outlives the scope, so this cannot fail
                    let _ = tx.send((idx, result));
                })
            })
            .collect();

        // Joining by hand keeps a panicking worker from tearing down the scope
        for handle in handles {
            if handle.join().is_err() {
                log::debug!("a repository sync worker panicked");
            }
        }
    });
    drop(tx);

    let mut results: Vec<Option<Result<PathBuf, SyncError>>> =
        (0..repositories.len()).map(|_| None).collect();
    for (idx, result) in rx.iter() {
        results[idx] = Some(result);
    }

    let outcomes: Vec<SyncOutcome> = repositories
        .iter()
        .zip(results)
        .map(|(repo, result)| SyncOutcome {
            name: repo.name.clone(),
            url: repo.url.clone(),
            result: result.unwrap_or(Err(SyncError::Panicked)),
        })
        .collect();

    for outcome in &outcomes {
        match &outcome.result {
            Ok(_) => log::info!(
                "...Successfully got an update from the \"{}\" chart repository",
                outcome.name
            ),
            Err(e) => log::warn!(
                "...Unable to get an update from the \"{}\" chart repository ({}):\n\t{}",
                outcome.name,
                outcome.url,
                e
            ),
        }
    }
    log::info!("Update Complete.");

    SyncReport { outcomes }
}
