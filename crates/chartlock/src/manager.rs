//! Dependency manager
//!
//! Ties the pieces together for a chart directory:
//!
//! - `update` resolves the declared dependencies afresh, downloads what it
//!   can and writes a new lock file.
//! - `build` re-downloads exactly what the existing lock file pins, and
//!   refuses to run when the declarations have changed since.

use crate::chart::{self, ChartError, ChartMetadata, CHARTS_DIR};
use crate::downloader::{ChartDownloader, DownloadError, PROVENANCE_SUFFIX};
use crate::getter::Getter;
use crate::lockfile::{LockedDependency, Lockfile, LockfileError};
use crate::matcher::{self, MatchError};
use crate::repo::{sync_all, urls_equal, RepoFileError, RepositoryRef, SyncReport, VersionCatalog};
use crate::requirements::{Dependency, RepositoryTarget, Requirements, RequirementsError};
use crate::resolver::{hash_requirements, local_chart_dir, ResolveError, Resolver};
use crate::semver::Version;
use crate::settings::Settings;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while managing a chart's dependencies
#[derive(Debug, Error)]
pub enum ManagerError {
    /// requirements.yaml missing or invalid
    #[error(transparent)]
    Requirements(#[from] RequirementsError),

    /// requirements.lock unreadable or unwritable
    #[error("Lockfile error: {0}")]
    Lockfile(#[from] LockfileError),

    /// Repository configuration unreadable
    #[error(transparent)]
    RepoFile(#[from] RepoFileError),

    /// Resolution failed; no lock was written
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Declared repositories that are not configured
    #[error(
        "no repository definition for {}. Please add the missing repos to the repository configuration",
        .0.join(", ")
    )]
    UnknownRepositories(Vec<String>),

    /// Declarations changed since the lock was generated
    #[error("the lock file ({expected}) is out of sync with the dependencies file ({actual}); run `chartlock dep update`")]
    LockOutOfSync { expected: String, actual: String },

    /// A pinned chart could not be downloaded
    #[error("failed to download {name} {version}: {source}")]
    Download {
        name: String,
        version: String,
        #[source]
        source: DownloadError,
    },

    /// A pinned chart has no URL and is no longer in its repository's catalog
    #[error("cannot locate {name} {version}: {source}")]
    Locate {
        name: String,
        version: String,
        #[source]
        source: MatchError,
    },

    /// A local dependency could not be packaged
    #[error("failed to package local dependency {name}: {source}")]
    Package {
        name: String,
        #[source]
        source: ChartError,
    },

    /// A local dependency no longer has the locked version
    #[error("local dependency {name} is at version {found}, but {locked} is locked")]
    LocalVersionChanged {
        name: String,
        locked: String,
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ManagerError {
    /// Provenance checking ran and rejected a chart
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            ManagerError::Download {
                source: DownloadError::Verification(_),
                ..
            }
        )
    }
}

/// A chart written into `charts/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedChart {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    /// Verified digest when provenance checking ran
    pub verification: Option<String>,
}

/// A chart that could not be downloaded during `update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChart {
    pub name: String,
    pub version: String,
    pub reason: String,
}

/// What happened to `charts/`
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub saved: Vec<SavedChart>,
    pub skipped: Vec<SkippedChart>,
    /// Outdated archives that were deleted
    pub removed: Vec<PathBuf>,
}

/// Outcome of `update` or `build`
#[derive(Debug)]
pub struct Report {
    /// Lock that was written (update) or followed (build)
    pub lock: Lockfile,
    /// Repository refresh, unless skipped
    pub sync: Option<SyncReport>,
    pub downloads: DownloadReport,
}

/// State of one declared dependency in `charts/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartStatus {
    /// An archive satisfying the constraint is present
    Ok,
    /// No archive for the chart is present
    Missing,
    /// Only archives with non-matching versions are present
    WrongVersion(String),
}

impl fmt::Display for ChartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartStatus::Ok => f.write_str("ok"),
            ChartStatus::Missing => f.write_str("missing"),
            ChartStatus::WrongVersion(found) => write!(f, "wrong version ({})", found),
        }
    }
}

/// One row of `dep list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    pub name: String,
    pub version: String,
    pub repository: String,
    /// Version pinned in the lock file, if any
    pub locked: Option<String>,
    pub status: ChartStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Report download failures and carry on, except failed verification
    Lenient,
    /// First download failure aborts
    Strict,
}

/// Dependency manager for one chart directory
pub struct Manager<'a> {
    chart_path: PathBuf,
    settings: &'a Settings,
    getter: &'a dyn Getter,
}

impl<'a> Manager<'a> {
    pub fn new(chart_path: impl Into<PathBuf>, settings: &'a Settings, getter: &'a dyn Getter) -> Self {
        Self {
            chart_path: chart_path.into(),
            settings,
            getter,
        }
    }

    /// Chart directory being managed
    pub fn chart_path(&self) -> &Path {
        &self.chart_path
    }

    /// Resolve the declarations, download the results and write the lock
    ///
    /// Download failures are reported and skipped; resolution failures abort
    /// before anything is downloaded or written. A verification failure aborts
    /// the run and leaves the existing lock file untouched.
    pub fn update(&self) -> Result<Report, ManagerError> {
        let requirements = Requirements::load(&self.chart_path)?;
        let repositories = self.settings.repositories()?;
        ensure_repositories(&requirements.dependencies, &repositories)?;

        let sync = self.refresh(&repositories, &requirements.dependencies);

        let lock = Resolver::new(&self.chart_path, repositories.clone())
            .resolve(&requirements.dependencies)?;

        let downloads = self.download_all(&lock.dependencies, &repositories, Mode::Lenient)?;
        lock.save(&self.chart_path)?;

        Ok(Report {
            lock,
            sync,
            downloads,
        })
    }

    /// Download exactly what the lock file pins
    ///
    /// Falls back to `update` when there is no lock file. Never rewrites an
    /// existing lock file.
    pub fn build(&self) -> Result<Report, ManagerError> {
        let requirements = Requirements::load(&self.chart_path)?;
        let lock = match Lockfile::load(&self.chart_path)? {
            Some(lock) => lock,
            None => {
                log::info!("No requirements.lock file found, updating dependencies instead");
                return self.update();
            }
        };

        let actual = hash_requirements(&requirements.dependencies)?;
        if actual != lock.digest {
            return Err(ManagerError::LockOutOfSync {
                expected: lock.digest,
                actual,
            });
        }

        let repositories = self.settings.repositories()?;
        ensure_repositories(&requirements.dependencies, &repositories)?;
        let sync = self.refresh(&repositories, &requirements.dependencies);

        let downloads = self.download_all(&lock.dependencies, &repositories, Mode::Strict)?;

        Ok(Report {
            lock,
            sync,
            downloads,
        })
    }

    /// Status of every declared dependency in `charts/`
    pub fn list(&self) -> Result<Vec<DependencyStatus>, ManagerError> {
        list(&self.chart_path)
    }

    fn refresh(&self, repositories: &[RepositoryRef], dependencies: &[Dependency]) -> Option<SyncReport> {
        if self.settings.skip_refresh {
            log::info!("Skipping repository refresh");
            return None;
        }
        if dependencies.iter().all(Dependency::is_local) {
            return None;
        }
        Some(sync_all(repositories, self.getter))
    }

    fn download_all(
        &self,
        locked: &[LockedDependency],
        repositories: &[RepositoryRef],
        mode: Mode,
    ) -> Result<DownloadReport, ManagerError> {
        let charts_dir = self.chart_path.join(CHARTS_DIR);
        fs::create_dir_all(&charts_dir)?;
        log::info!("Saving {} charts", locked.len());

        let downloader = ChartDownloader::new(self.getter, self.settings);
        let mut report = DownloadReport::default();

        for dep in locked {
            let result = if dep.is_local() {
                self.package_local(dep, &charts_dir)
            } else {
                log::info!("Downloading {} from repo {}", dep.name, dep.repository);
                download_remote(&downloader, dep, repositories, &charts_dir)
            };

            match result {
                Ok(saved) => report.saved.push(saved),
                Err(e) if mode == Mode::Strict || e.is_verification_failure() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Unable to get dependency {} {}: {}. Skipping",
                        dep.name,
                        dep.version,
                        e
                    );
                    report.skipped.push(SkippedChart {
                        name: dep.name.clone(),
                        version: dep.version.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.removed = prune(&charts_dir, locked, &report)?;
        Ok(report)
    }

    fn package_local(&self, dep: &LockedDependency, charts_dir: &Path) -> Result<SavedChart, ManagerError> {
        let relative = dep.repository.trim().trim_start_matches("file://");
        let dir = local_chart_dir(&self.chart_path, relative);
        let package_error = |source| ManagerError::Package {
            name: dep.name.clone(),
            source,
        };

        let metadata = ChartMetadata::load(&dir).map_err(package_error)?;
        if metadata.version != dep.version {
            return Err(ManagerError::LocalVersionChanged {
                name: dep.name.clone(),
                locked: dep.version.clone(),
                found: metadata.version,
            });
        }

        log::info!("Packaging {} from {}", dep.name, dir.display());
        let path = chart::package(&dir, charts_dir).map_err(package_error)?;
        Ok(SavedChart {
            name: dep.name.clone(),
            version: dep.version.clone(),
            path,
            verification: None,
        })
    }
}

/// Status of every declared dependency of the chart at `chart_path`
///
/// Reads only the chart directory; no repository or network access.
pub fn list(chart_path: &Path) -> Result<Vec<DependencyStatus>, ManagerError> {
    let requirements = Requirements::load(chart_path)?;
    let lock = Lockfile::load(chart_path)?;
    let archives = archive_names(&chart_path.join(CHARTS_DIR))?;

    requirements
        .dependencies
        .iter()
        .map(|dep| {
            let locked = lock
                .as_ref()
                .and_then(|l| l.get(&dep.name))
                .map(|l| l.version.clone());
            let status = chart_status(dep, &archives)?;
            Ok(DependencyStatus {
                name: dep.name.clone(),
                version: dep.version.clone(),
                repository: dep.repository.clone(),
                locked,
                status,
            })
        })
        .collect()
}

/// Fail unless every non-local repository field names a configured repository
///
/// All missing repositories are reported at once.
pub fn ensure_repositories(
    dependencies: &[Dependency],
    repositories: &[RepositoryRef],
) -> Result<(), ManagerError> {
    let mut missing: Vec<String> = Vec::new();
    for dep in dependencies {
        let known = match dep.target() {
            RepositoryTarget::Local(_) => true,
            RepositoryTarget::Alias(alias) => repositories.iter().any(|r| r.name == alias),
            RepositoryTarget::Url(url) => repositories.iter().any(|r| urls_equal(&r.url, url)),
        };
        if !known && !missing.contains(&dep.repository) {
            missing.push(dep.repository.clone());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ManagerError::UnknownRepositories(missing))
    }
}

fn download_remote(
    downloader: &ChartDownloader<'_>,
    dep: &LockedDependency,
    repositories: &[RepositoryRef],
    charts_dir: &Path,
) -> Result<SavedChart, ManagerError> {
    let url = match &dep.url {
        Some(url) => url.clone(),
        None => locate(dep, repositories)?,
    };

    let fetched = downloader
        .fetch_url(&url, dep.digest.as_deref(), charts_dir)
        .map_err(|source| ManagerError::Download {
            name: dep.name.clone(),
            version: dep.version.clone(),
            source,
        })?;

    Ok(SavedChart {
        name: dep.name.clone(),
        version: dep.version.clone(),
        path: fetched.path,
        verification: fetched.verification,
    })
}

/// Find the download URL of a pinned version in its repository's cached catalog
fn locate(dep: &LockedDependency, repositories: &[RepositoryRef]) -> Result<String, ManagerError> {
    let declared = Dependency::new(dep.name.as_str(), dep.version.as_str(), dep.repository.as_str());
    let repo = repositories
        .iter()
        .find(|r| match declared.target() {
            RepositoryTarget::Alias(alias) => r.name == alias,
            RepositoryTarget::Url(url) => urls_equal(&r.url, url),
            RepositoryTarget::Local(_) => false,
        })
        .ok_or_else(|| ManagerError::UnknownRepositories(vec![dep.repository.clone()]))?;

    let catalog = VersionCatalog::load(&repo.cache_file).map_err(ResolveError::from)?;
    let locate_error = |source| ManagerError::Locate {
        name: dep.name.clone(),
        version: dep.version.clone(),
        source,
    };
    let entry = matcher::find_chart_version(&catalog, &repo.url, &dep.name, &dep.version)
        .map_err(locate_error)?;
    matcher::source_url(&repo.url, entry).map_err(locate_error)
}

/// Version encoded in an archive name `<chart>-<semver>.tgz`
fn archive_version<'n>(file_name: &'n str, chart: &str) -> Option<&'n str> {
    let version = file_name
        .strip_suffix(".tgz")?
        .strip_prefix(chart)?
        .strip_prefix('-')?;
    Version::parse(version).ok().map(|_| version)
}

fn archive_names(charts_dir: &Path) -> Result<Vec<String>, std::io::Error> {
    if !charts_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(charts_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn chart_status(dep: &Dependency, archives: &[String]) -> Result<ChartStatus, ManagerError> {
    let versions: Vec<&str> = archives
        .iter()
        .filter_map(|file| archive_version(file, &dep.name))
        .collect();
    if versions.is_empty() {
        return Ok(ChartStatus::Missing);
    }
    for version in &versions {
        if matcher::satisfies(&dep.name, &dep.version, version).map_err(ResolveError::from)? {
            return Ok(ChartStatus::Ok);
        }
    }
    Ok(ChartStatus::WrongVersion(versions.join(", ")))
}

/// Delete archives of locked charts that this run did not write
///
/// Archives of charts whose download was skipped are kept.
fn prune(
    charts_dir: &Path,
    locked: &[LockedDependency],
    report: &DownloadReport,
) -> Result<Vec<PathBuf>, ManagerError> {
    let written: HashSet<&Path> = report.saved.iter().map(|s| s.path.as_path()).collect();
    let skipped: HashSet<&str> = report.skipped.iter().map(|s| s.name.as_str()).collect();

    let mut removed = Vec::new();
    for file_name in archive_names(charts_dir)? {
        let path = charts_dir.join(&file_name);
        if written.contains(path.as_path()) {
            continue;
        }
        let outdated = locked.iter().any(|dep| {
            !skipped.contains(dep.name.as_str()) && archive_version(&file_name, &dep.name).is_some()
        });
        if !outdated {
            continue;
        }

        if removed.is_empty() {
            log::info!("Deleting outdated charts");
        }
        log::debug!("removing {}", path.display());
        fs::remove_file(&path)?;
        let prov = charts_dir.join(format!("{}{}", file_name, PROVENANCE_SUFFIX));
        if prov.is_file() {
            fs::remove_file(&prov)?;
        }
        removed.push(path);
    }

    Ok(removed)
}
