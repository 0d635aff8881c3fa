//! Semantic versions and constraint expressions
//!
//! Versions follow `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]` with an optional
//! leading `v`. Constraints are `||`-separated groups of comparators joined by
//! commas or whitespace, e.g. `>=1.2.0, <2.0.0 || ^3.1`.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during semver parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SemverError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid constraint format
    #[error("Invalid constraint format: {0}")]
    InvalidConstraint(String),
}

/// Semantic version (MAJOR.MINOR.PATCH)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let partial = Partial::parse(s)?;
        match (partial.major, partial.minor, partial.patch) {
            (Some(major), Some(minor), Some(patch)) => Ok(Version {
                major,
                minor,
                patch,
                prerelease: partial.prerelease,
                build: partial.build,
            }),
            _ => Err(SemverError::InvalidVersion(format!(
                "Expected MAJOR.MINOR.PATCH, got '{}'",
                s.trim()
            ))),
        }
    }

    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn bump_major(&self) -> Result<Self, SemverError> {
        Ok(Version::new(bump(self.major, self)?, 0, 0))
    }

    fn bump_minor(&self) -> Result<Self, SemverError> {
        Ok(Version::new(self.major, bump(self.minor, self)?, 0))
    }

    fn bump_patch(&self) -> Result<Self, SemverError> {
        Ok(Version::new(self.major, self.minor, bump(self.patch, self)?))
    }
}

/// Next value of a version component; the largest component has no successor
fn bump(component: u64, version: &Version) -> Result<u64, SemverError> {
    component.checked_add(1).ok_or_else(|| {
        SemverError::InvalidConstraint(format!("no upper bound above {}", version))
    })
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// Precedence order; build metadata is ignored.
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

/// Compare dot-separated prerelease identifiers: numeric identifiers compare
/// numerically and sort before alphanumeric ones.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// A possibly incomplete version as written in a constraint (`1`, `1.2`, `1.2.x`).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    prerelease: Option<String>,
    build: Option<String>,
}

impl Partial {
    fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        if s.is_empty() {
            return Err(SemverError::InvalidVersion("empty version".to_string()));
        }

        let (version_part, build) = match s.split_once('+') {
            Some((v, b)) => (v, Some(b.to_string())),
            None => (s, None),
        };
        let (core, prerelease) = match version_part.split_once('-') {
            Some((v, p)) => (v, Some(p.to_string())),
            None => (version_part, None),
        };
        if prerelease.as_deref() == Some("") || build.as_deref() == Some("") {
            return Err(SemverError::InvalidVersion(s.to_string()));
        }

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(SemverError::InvalidVersion(s.to_string()));
        }

        let mut numbers = [None; 3];
        let mut wildcard_seen = false;
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if matches!(*part, "x" | "X" | "*") {
                wildcard_seen = true;
                continue;
            }
            if wildcard_seen {
                // 1.x.3 is not meaningful
                return Err(SemverError::InvalidVersion(s.to_string()));
            }
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(SemverError::InvalidVersion(s.to_string()));
            }
            *slot = Some(
                part.parse()
                    .map_err(|_| SemverError::InvalidVersion(s.to_string()))?,
            );
        }

        let partial = Partial {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            prerelease,
            build,
        };
        if partial.prerelease.is_some() && partial.patch.is_none() {
            return Err(SemverError::InvalidVersion(s.to_string()));
        }
        Ok(partial)
    }

    /// Lowest version covered by the partial (missing parts are zero).
    fn floor(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            prerelease: self.prerelease.clone(),
            build: None,
        }
    }

    /// First version past the range covered by the partial, if it is bounded.
    fn ceiling(&self) -> Result<Option<Version>, SemverError> {
        let floor = self.floor();
        match (self.major, self.minor, self.patch) {
            (None, _, _) => Ok(None),
            (Some(_), None, _) => floor.bump_major().map(Some),
            (Some(_), Some(_), None) => floor.bump_minor().map(Some),
            (Some(_), Some(_), Some(_)) => Ok(None),
        }
    }

    fn is_exact(&self) -> bool {
        self.patch.is_some()
    }
}

/// A single comparison against a version
#[derive(Debug, Clone, PartialEq, Eq)]
enum Comparator {
    Eq(Version),
    Gt(Version),
    Ge(Version),
    Lt(Version),
    Le(Version),
    /// Version lies outside `[low, high)`; produced by `!=` with a partial version
    Outside(Version, Version),
    Ne(Version),
}

impl Comparator {
    fn matches(&self, v: &Version) -> bool {
        match self {
            Comparator::Eq(c) => v.cmp(c) == Ordering::Equal,
            Comparator::Ne(c) => v.cmp(c) != Ordering::Equal,
            Comparator::Gt(c) => v > c,
            Comparator::Ge(c) => v >= c,
            Comparator::Lt(c) => v < c,
            Comparator::Le(c) => v <= c,
            Comparator::Outside(low, high) => v < low || v >= high,
        }
    }

    fn mentions_prerelease(&self) -> bool {
        match self {
            Comparator::Eq(c)
            | Comparator::Ne(c)
            | Comparator::Gt(c)
            | Comparator::Ge(c)
            | Comparator::Lt(c)
            | Comparator::Le(c) => c.is_prerelease(),
            Comparator::Outside(low, _) => low.is_prerelease(),
        }
    }
}

/// Version constraint expression
///
/// A constraint is satisfied when every comparator of at least one
/// `||`-separated group is satisfied. An empty group matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    source: String,
    groups: Vec<Vec<Comparator>>,
}

impl Constraint {
    /// Parse a constraint string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let source = s.trim();
        if source.is_empty() {
            return Err(SemverError::InvalidConstraint("empty constraint".to_string()));
        }

        let mut groups = Vec::new();
        for group in source.split("||") {
            groups.push(parse_group(group).map_err(|e| match e {
                SemverError::InvalidVersion(msg) => {
                    SemverError::InvalidConstraint(format!("{} in '{}'", msg, source))
                }
                other => other,
            })?);
        }

        Ok(Constraint {
            source: source.to_string(),
            groups,
        })
    }

    /// Constraint that matches any release version
    pub fn any() -> Self {
        Constraint {
            source: "*".to_string(),
            groups: vec![Vec::new()],
        }
    }

    /// Check if a version satisfies this constraint
    ///
    /// Prerelease versions only satisfy a group that itself names a
    /// prerelease.
    pub fn matches(&self, version: &Version) -> bool {
        self.groups.iter().any(|group| {
            if version.is_prerelease() && !group.iter().any(Comparator::mentions_prerelease) {
                return false;
            }
            group.iter().all(|c| c.matches(version))
        })
    }

    /// The expression this constraint was parsed from
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

const OPERATORS: [&str; 8] = [">=", "<=", "!=", ">", "<", "=", "^", "~"];

fn split_operator(token: &str) -> (&str, &str) {
    for op in OPERATORS {
        if let Some(rest) = token.strip_prefix(op) {
            // `~>` is an old spelling of `~`
            let rest = if op == "~" { rest.strip_prefix('>').unwrap_or(rest) } else { rest };
            return (op, rest.trim());
        }
    }
    ("", token)
}

fn parse_group(group: &str) -> Result<Vec<Comparator>, SemverError> {
    let tokens: Vec<&str> = group
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(SemverError::InvalidConstraint("empty '||' group".to_string()));
    }

    // Glue bare operators to their operand: ">= 1.2" -> (">=", "1.2")
    let mut terms: Vec<(String, String)> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if token == "-" {
            let low = terms.pop();
            let high = tokens.get(i + 1);
            match (low, high) {
                (Some((op, low)), Some(high)) if op.is_empty() => {
                    terms.push(("-".to_string(), format!("{} {}", low, high)));
                    i += 2;
                    continue;
                }
                _ => {
                    return Err(SemverError::InvalidConstraint(format!(
                        "dangling hyphen range in '{}'",
                        group.trim()
                    )))
                }
            }
        }

        let (op, operand) = split_operator(token);
        if operand.is_empty() {
            let next = tokens.get(i + 1).ok_or_else(|| {
                SemverError::InvalidConstraint(format!("operator '{}' without version", op))
            })?;
            terms.push((op.to_string(), next.to_string()));
            i += 2;
        } else {
            terms.push((op.to_string(), operand.to_string()));
            i += 1;
        }
    }

    let mut comparators = Vec::new();
    for (op, operand) in terms {
        expand_term(&op, &operand, &mut comparators)?;
    }
    Ok(comparators)
}

fn expand_term(op: &str, operand: &str, out: &mut Vec<Comparator>) -> Result<(), SemverError> {
    if op == "-" {
        let (low, high) = operand
            .split_once(' ')
            .ok_or_else(|| SemverError::InvalidConstraint(operand.to_string()))?;
        let low = Partial::parse(low)?;
        let high = Partial::parse(high)?;
        out.push(Comparator::Ge(low.floor()));
        match high.ceiling()? {
            Some(ceiling) => out.push(Comparator::Lt(ceiling)),
            None if high.major.is_none() => {}
            None => out.push(Comparator::Le(high.floor())),
        }
        return Ok(());
    }

    let partial = Partial::parse(operand)?;
    if partial.major.is_none() {
        // `*`, `x`, `>=*` all collapse to "anything"; `<*`/`>*`/`!=*` match nothing
        return match op {
            "" | "=" | ">=" | "<=" | "^" | "~" => Ok(()),
            _ => Err(SemverError::InvalidConstraint(format!("{}{}", op, operand))),
        };
    }

    let floor = partial.floor();
    match op {
        "" | "=" => match partial.ceiling()? {
            Some(ceiling) => {
                out.push(Comparator::Ge(floor));
                out.push(Comparator::Lt(ceiling));
            }
            None => out.push(Comparator::Eq(floor)),
        },
        "!=" => match partial.ceiling()? {
            Some(ceiling) => out.push(Comparator::Outside(floor, ceiling)),
            None => out.push(Comparator::Ne(floor)),
        },
        ">" => match partial.ceiling()? {
            Some(ceiling) => out.push(Comparator::Ge(ceiling)),
            None => out.push(Comparator::Gt(floor)),
        },
        ">=" => out.push(Comparator::Ge(floor)),
        "<" => out.push(Comparator::Lt(floor)),
        "<=" => match partial.ceiling()? {
            Some(ceiling) => out.push(Comparator::Lt(ceiling)),
            None => out.push(Comparator::Le(floor)),
        },
        "~" => {
            let upper = if partial.minor.is_some() {
                floor.bump_minor()?
            } else {
                floor.bump_major()?
            };
            out.push(Comparator::Ge(floor));
            out.push(Comparator::Lt(upper));
        }
        "^" => {
            // ^1.2.3 := <2.0.0, ^0.2.3 := <0.3.0, ^0.0.3 := <0.0.4
            let upper = if floor.major > 0 || partial.minor.is_none() {
                floor.bump_major()?
            } else if floor.minor > 0 || !partial.is_exact() {
                floor.bump_minor()?
            } else {
                floor.bump_patch()?
            };
            out.push(Comparator::Ge(floor));
            out.push(Comparator::Lt(upper));
        }
        _ => return Err(SemverError::InvalidConstraint(format!("{}{}", op, operand))),
    }
    Ok(())
}
