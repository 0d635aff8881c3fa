//! Constraint matching against a version catalog
//!
//! Picks the one catalog entry a dependency resolves to. Entries are walked in
//! the order the index lists them and the first acceptable one wins; the
//! matcher never re-sorts.

use crate::repo::{ChartVersion, VersionCatalog};
use crate::semver::{Constraint, SemverError, Version};
use thiserror::Error;

/// Errors that can occur while matching a dependency
#[derive(Debug, Error)]
pub enum MatchError {
    /// The catalog has no (non-removed) entry for the chart
    #[error("chart \"{name}\" not found in {repository}")]
    DependencyNotFound { name: String, repository: String },

    /// The constraint expression does not parse
    #[error("invalid version constraint \"{constraint}\" for {name}: {source}")]
    InvalidConstraint {
        name: String,
        constraint: String,
        #[source]
        source: SemverError,
    },

    /// No entry satisfies the constraint
    #[error("can't get a valid version for {name} (constraint \"{constraint}\") from {repository}")]
    NoMatchingVersion {
        name: String,
        constraint: String,
        repository: String,
    },

    /// The matched entry has no download URL
    #[error("chart {name} {version} has no downloadable URLs")]
    NoSourceUrl { name: String, version: String },

    /// A URL in the index or the repository URL is malformed
    #[error("invalid URL \"{url}\": {message}")]
    InvalidUrl { url: String, message: String },
}

/// A catalog entry selected for a dependency, with its absolute source URL
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'c> {
    pub entry: &'c ChartVersion,
    pub url: String,
}

/// Parsed form of a declared constraint
enum Requested<'a> {
    /// No constraint: first listed entry
    First,
    Range(Constraint, &'a str),
}

fn parse_requested<'a>(name: &str, constraint: &'a str) -> Result<Requested<'a>, MatchError> {
    let trimmed = constraint.trim();
    if trimmed.is_empty() {
        return Ok(Requested::First);
    }
    Constraint::parse(trimmed)
        .map(|c| Requested::Range(c, trimmed))
        .map_err(|source| MatchError::InvalidConstraint {
            name: name.to_string(),
            constraint: constraint.to_string(),
            source,
        })
}

/// Check one version string against a parsed constraint
///
/// Version strings that are not semver can only match a constraint spelled
/// exactly the same way; this is equality, not range matching.
fn accepts(requested: &Requested<'_>, version: &str) -> bool {
    match requested {
        Requested::First => true,
        Requested::Range(constraint, raw) => match Version::parse(version) {
            Ok(v) => constraint.matches(&v),
            Err(_) => version.trim() == *raw,
        },
    }
}

/// Check whether `version` satisfies the declared `constraint`
pub fn satisfies(name: &str, constraint: &str, version: &str) -> Result<bool, MatchError> {
    let requested = parse_requested(name, constraint)?;
    Ok(accepts(&requested, version))
}

/// Select the entry for `name` that satisfies `constraint`
///
/// An empty constraint selects the first listed entry. Removed entries are
/// never selected. `repository` is only used in error messages.
pub fn find_chart_version<'c>(
    catalog: &'c VersionCatalog,
    repository: &str,
    name: &str,
    constraint: &str,
) -> Result<&'c ChartVersion, MatchError> {
    let mut candidates = catalog
        .entries_for(name)
        .iter()
        .filter(|entry| !entry.removed)
        .peekable();

    if candidates.peek().is_none() {
        return Err(MatchError::DependencyNotFound {
            name: name.to_string(),
            repository: repository.to_string(),
        });
    }

    let requested = parse_requested(name, constraint)?;
    candidates
        .find(|entry| accepts(&requested, &entry.version))
        .ok_or_else(|| MatchError::NoMatchingVersion {
            name: name.to_string(),
            constraint: constraint.to_string(),
            repository: repository.to_string(),
        })
}

/// Select an entry and resolve its first URL against the repository URL
pub fn find_match<'c>(
    catalog: &'c VersionCatalog,
    repository_url: &str,
    name: &str,
    constraint: &str,
) -> Result<Match<'c>, MatchError> {
    let entry = find_chart_version(catalog, repository_url, name, constraint)?;
    let url = source_url(repository_url, entry)?;
    Ok(Match { entry, url })
}

/// Absolute URL of an entry's first listed download
pub fn source_url(repository_url: &str, entry: &ChartVersion) -> Result<String, MatchError> {
    let first = entry.urls.first().ok_or_else(|| MatchError::NoSourceUrl {
        name: entry.name.clone(),
        version: entry.version.clone(),
    })?;
    resolve_reference_url(repository_url, first)
}

/// Join a possibly relative reference onto a repository base URL
///
/// The base is treated as a directory: `https://x/charts` + `a-1.0.0.tgz`
/// gives `https://x/charts/a-1.0.0.tgz`. Absolute references pass through.
pub fn resolve_reference_url(base: &str, reference: &str) -> Result<String, MatchError> {
    if let Ok(absolute) = url::Url::parse(reference) {
        return Ok(absolute.to_string());
    }

    let mut base_url = url::Url::parse(base).map_err(|e| MatchError::InvalidUrl {
        url: base.to_string(),
        message: e.to_string(),
    })?;
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }

    base_url
        .join(reference)
        .map(|u| u.to_string())
        .map_err(|e| MatchError::InvalidUrl {
            url: reference.to_string(),
            message: e.to_string(),
        })
}
