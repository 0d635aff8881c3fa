//! Chart downloader
//!
//! Fetches one chart archive, checks it against the digest the index
//! published, optionally verifies its provenance file, and writes it into a
//! destination directory under the archive's remote file name.

use crate::atomic::write_atomic;
use crate::getter::{check_scheme, FetchError, Getter};
use crate::lockfile::normalize_digest;
use crate::matcher::{self, MatchError};
use crate::provenance::{self, Keyring, Provenance, VerificationError, VerifyPolicy};
use crate::repo::{CatalogError, RepoFileError, VersionCatalog};
use crate::settings::Settings;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Suffix of provenance files, appended to the archive URL
pub const PROVENANCE_SUFFIX: &str = ".prov";

/// Errors that can occur while downloading a chart
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network fetch failed or the URL was rejected
    #[error("failed to download {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Reference is neither a URL nor `repo/chart`
    #[error("invalid chart reference \"{0}\"; expected a URL or repo/chart")]
    InvalidReference(String),

    /// `repo/chart` names a repository that is not configured
    #[error("no repository named \"{0}\" is configured")]
    UnknownRepository(String),

    /// Archive bytes differ from the digest the index published
    #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// Provenance verification failed
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Reference resolution failed in the matcher
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Cached catalog could not be loaded
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Repository configuration could not be loaded
    #[error(transparent)]
    RepoFile(#[from] RepoFileError),

    /// Archive could not be written
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A chart reference resolved to a download location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub url: String,
    /// Digest the index published for the archive, if any
    pub digest: Option<String>,
}

/// A downloaded archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Where the archive was written
    pub path: PathBuf,
    /// `sha256:<hex>` of the archive when its provenance verified
    pub verification: Option<String>,
}

/// Downloads chart archives through a [`Getter`]
pub struct ChartDownloader<'a> {
    getter: &'a dyn Getter,
    settings: &'a Settings,
}

impl<'a> ChartDownloader<'a> {
    pub fn new(getter: &'a dyn Getter, settings: &'a Settings) -> Self {
        Self { getter, settings }
    }

    /// Download a chart reference into `dest`
    ///
    /// `reference` is an absolute http(s) URL or `repo/chart`; the latter is
    /// looked up in the cached catalog of the named repository using
    /// `version` as the constraint.
    pub fn fetch(
        &self,
        reference: &str,
        version: Option<&str>,
        dest: &Path,
    ) -> Result<Fetched, DownloadError> {
        let resolved = self.resolve_reference(reference, version)?;
        self.fetch_url(&resolved.url, resolved.digest.as_deref(), dest)
    }

    /// Turn a chart reference into a download URL
    pub fn resolve_reference(
        &self,
        reference: &str,
        version: Option<&str>,
    ) -> Result<ResolvedReference, DownloadError> {
        let reference = reference.trim();
        if url::Url::parse(reference).is_ok() {
            check_scheme(reference).map_err(|source| DownloadError::Fetch {
                url: reference.to_string(),
                source,
            })?;
            return Ok(ResolvedReference {
                url: reference.to_string(),
                digest: None,
            });
        }

        let (repo_name, chart) = reference
            .split_once('/')
            .filter(|(repo, chart)| !repo.is_empty() && !chart.is_empty() && !chart.contains('/'))
            .ok_or_else(|| DownloadError::InvalidReference(reference.to_string()))?;

        let repositories = self.settings.repositories()?;
        let repo = repositories
            .iter()
            .find(|r| r.name == repo_name)
            .ok_or_else(|| DownloadError::UnknownRepository(repo_name.to_string()))?;

        let catalog = VersionCatalog::load(&repo.cache_file)?;
        let found = matcher::find_match(&catalog, &repo.url, chart, version.unwrap_or(""))?;
        log::debug!("{} resolved to {} {}", reference, found.entry.version, found.url);

        Ok(ResolvedReference {
            url: found.url,
            digest: found.entry.digest.as_deref().and_then(normalize_digest),
        })
    }

    /// Download an absolute URL into `dest`
    ///
    /// When `expected_digest` is given the archive must hash to it. Nothing is
    /// written unless every check passes.
    pub fn fetch_url(
        &self,
        url: &str,
        expected_digest: Option<&str>,
        dest: &Path,
    ) -> Result<Fetched, DownloadError> {
        let parsed = check_scheme(url).map_err(|source| DownloadError::Fetch {
            url: url.to_string(),
            source,
        })?;
        let file_name = parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DownloadError::InvalidReference(url.to_string()))?;

        let archive = self.getter.get(url).map_err(|source| DownloadError::Fetch {
            url: url.to_string(),
            source,
        })?;

        if let Some(expected) = expected_digest {
            let actual = provenance::digest(&archive);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(DownloadError::DigestMismatch {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let verified = self.verify(url, &file_name, &archive)?;

        let path = dest.join(&file_name);
        write_atomic(&path, &archive).map_err(|source| DownloadError::Write {
            path: path.clone(),
            source,
        })?;

        let verification = match verified {
            Some((digest, prov)) => {
                let prov_path = dest.join(format!("{}{}", file_name, PROVENANCE_SUFFIX));
                write_atomic(&prov_path, &prov).map_err(|source| DownloadError::Write {
                    path: prov_path.clone(),
                    source,
                })?;
                Some(digest)
            }
            None => None,
        };

        Ok(Fetched { path, verification })
    }

    /// Apply the verification policy; returns the digest and provenance bytes
    fn verify(
        &self,
        url: &str,
        file_name: &str,
        archive: &[u8],
    ) -> Result<Option<(String, Vec<u8>)>, DownloadError> {
        let policy = self.settings.verify;
        if policy == VerifyPolicy::Never {
            return Ok(None);
        }

        let prov_url = format!("{}{}", url, PROVENANCE_SUFFIX);
        let prov = match self.getter.get(&prov_url) {
            Ok(bytes) => bytes,
            Err(FetchError::NotFound { .. }) if policy == VerifyPolicy::Always => {
                return Err(VerificationError::MissingProvenance { url: prov_url }.into());
            }
            Err(source) if policy == VerifyPolicy::Always => {
                return Err(DownloadError::Fetch {
                    url: prov_url,
                    source,
                });
            }
            Err(e) => {
                log::warn!("continuing without verification for {}: {}", url, e);
                return Ok(None);
            }
        };

        let text = std::str::from_utf8(&prov)
            .map_err(|e| VerificationError::Malformed(format!("not UTF-8: {}", e)))?;
        let keyring = Keyring::load(&self.settings.keyring)?;
        let digest = Provenance::parse(text)?.verify(&keyring, file_name, archive)?;
        log::debug!("verified {} ({})", file_name, digest);

        Ok(Some((digest, prov)))
    }
}
