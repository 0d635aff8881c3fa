//! Dependency resolution
//!
//! Turns a chart's declared dependencies into a [`Lockfile`] by matching
//! each declaration against the catalog of the repository it names. The
//! declarations are a flat list; nothing is resolved transitively.

use crate::chart::{ChartError, ChartMetadata};
use crate::lockfile::{normalize_digest, LockedDependency, Lockfile};
use crate::matcher::{self, MatchError};
use crate::repo::{urls_equal, CatalogError, RepositoryRef, VersionCatalog};
use crate::requirements::{Dependency, RepositoryTarget};
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during dependency resolution
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The repository field matches no configured repository
    #[error("no repository definition for {repository} (dependency {name})")]
    UnknownRepository { name: String, repository: String },

    /// Matching against the catalog failed
    #[error(transparent)]
    Match(#[from] MatchError),

    /// A repository's cached catalog could not be loaded
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A `file://` dependency is not a readable chart
    #[error("local dependency {name}: {source}")]
    LocalChart {
        name: String,
        #[source]
        source: ChartError,
    },

    /// Declarations could not be encoded for digesting
    #[error("failed to encode dependencies for digesting: {0}")]
    Digest(#[from] serde_json::Error),
}

/// Dependency resolver for one chart
pub struct Resolver {
    /// Chart directory `file://` paths are relative to
    chart_path: PathBuf,

    /// Configured repositories
    repositories: Vec<RepositoryRef>,

    /// Catalogs supplied up front instead of read from cache (for testing)
    catalogs: HashMap<String, VersionCatalog>,
}

impl Resolver {
    /// Create a resolver for the chart at `chart_path`
    pub fn new(chart_path: impl Into<PathBuf>, repositories: Vec<RepositoryRef>) -> Self {
        Self {
            chart_path: chart_path.into(),
            repositories,
            catalogs: HashMap::new(),
        }
    }

    /// Use `catalog` for `repository` instead of its cache file
    pub fn with_catalog(mut self, repository: RepositoryRef, catalog: VersionCatalog) -> Self {
        self.catalogs.insert(repository.name.clone(), catalog);
        if !self.repositories.iter().any(|r| r.name == repository.name) {
            self.repositories.push(repository);
        }
        self
    }

    /// Resolve every declaration or fail without producing a lock
    ///
    /// Catalogs are read from their cache files once per call and dropped
    /// afterwards.
    pub fn resolve(&self, dependencies: &[Dependency]) -> Result<Lockfile, ResolveError> {
        let mut catalogs = self.catalogs.clone();
        let mut locked = Vec::with_capacity(dependencies.len());

        for dep in dependencies {
            let pinned = match dep.target() {
                RepositoryTarget::Local(path) => self.resolve_local(dep, path)?,
                RepositoryTarget::Alias(alias) => {
                    let repo = self
                        .repositories
                        .iter()
                        .find(|r| r.name == alias)
                        .ok_or_else(|| unknown_repository(dep))?;
                    resolve_remote(dep, repo, &mut catalogs)?
                }
                RepositoryTarget::Url(url) => {
                    let repo = self
                        .repositories
                        .iter()
                        .find(|r| urls_equal(&r.url, url))
                        .ok_or_else(|| unknown_repository(dep))?;
                    resolve_remote(dep, repo, &mut catalogs)?
                }
            };
            log::debug!("{} {} resolved to {}", dep.name, dep.version, pinned.version);
            locked.push(pinned);
        }

        Ok(Lockfile::new(hash_requirements(dependencies)?, locked))
    }

    fn resolve_local(&self, dep: &Dependency, path: &str) -> Result<LockedDependency, ResolveError> {
        let dir = local_chart_dir(&self.chart_path, path);
        let metadata = ChartMetadata::load(&dir).map_err(|source| ResolveError::LocalChart {
            name: dep.name.clone(),
            source,
        })?;

        if !matcher::satisfies(&dep.name, &dep.version, &metadata.version)? {
            return Err(MatchError::NoMatchingVersion {
                name: dep.name.clone(),
                constraint: dep.version.clone(),
                repository: dep.repository.clone(),
            }
            .into());
        }

        Ok(LockedDependency {
            name: dep.name.clone(),
            version: metadata.version,
            repository: dep.repository.clone(),
            url: None,
            digest: None,
        })
    }
}

fn resolve_remote(
    dep: &Dependency,
    repo: &RepositoryRef,
    catalogs: &mut HashMap<String, VersionCatalog>,
) -> Result<LockedDependency, ResolveError> {
    let catalog = match catalogs.entry(repo.name.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(VersionCatalog::load(&repo.cache_file)?),
    };

    let found = matcher::find_match(catalog, &repo.url, &dep.name, &dep.version)?;
    Ok(LockedDependency {
        name: dep.name.clone(),
        version: found.entry.version.clone(),
        repository: dep.repository.clone(),
        url: Some(found.url),
        digest: found.entry.digest.as_deref().and_then(normalize_digest),
    })
}

fn unknown_repository(dep: &Dependency) -> ResolveError {
    ResolveError::UnknownRepository {
        name: dep.name.clone(),
        repository: dep.repository.clone(),
    }
}

/// Directory of a `file://` dependency declared by the chart at `chart_path`
pub fn local_chart_dir(chart_path: &Path, path: &str) -> PathBuf {
    chart_path.join(path)
}

/// Digest of the declarations, independent of their order in the file
pub fn hash_requirements(dependencies: &[Dependency]) -> Result<String, ResolveError> {
    let mut normalized: Vec<Dependency> = dependencies.iter().map(Dependency::normalized).collect();
    normalized.sort();

    let encoded = serde_json::to_vec(&normalized)?;
    Ok(format!("sha256:{}", hex::encode(Sha256::digest(&encoded))))
}
