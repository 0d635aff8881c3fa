//! Chart dependency management
//!
//! This crate resolves and fetches the dependencies of a chart directory:
//! - Repository configuration and cached index documents (repositories.yaml, index.yaml)
//! - Concurrent repository index synchronization
//! - Semver constraint matching against repository catalogs
//! - Dependency resolution into a reproducible lock (requirements.lock)
//! - Artifact download with digest and provenance verification
//! - `update` and `build` workflows over a chart's charts/ directory

pub mod atomic;
pub mod chart;
pub mod downloader;
pub mod getter;
pub mod lockfile;
pub mod manager;
pub mod matcher;
pub mod provenance;
pub mod repo;
pub mod requirements;
pub mod resolver;
pub mod semver;
pub mod settings;
mod yaml;

pub use chart::{ChartError, ChartMetadata};
pub use downloader::{ChartDownloader, DownloadError, Fetched, ResolvedReference};
pub use getter::{FetchError, Getter, HttpGetter};
pub use lockfile::{LockedDependency, Lockfile, LockfileError};
pub use manager::{
    ChartStatus, DependencyStatus, DownloadReport, Manager, ManagerError, Report, SavedChart,
    SkippedChart,
};
pub use matcher::{Match, MatchError};
pub use provenance::{Keyring, Provenance, VerificationError, VerifyPolicy};
pub use repo::{
    CatalogError, ChartVersion, RepoFile, RepositoryEntry, RepositoryRef, SyncReport,
    VersionCatalog,
};
pub use requirements::{Dependency, Requirements, RequirementsError};
pub use resolver::{hash_requirements, ResolveError, Resolver};
pub use semver::{Constraint, SemverError, Version};
pub use settings::{Settings, SettingsError};
