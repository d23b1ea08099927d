//! Module identities, requested versions and resolved revisions.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{ModError, Result};

/// Length of the commit hash prefix embedded in a generated version.
pub const GENERATED_HASH_PREFIX_LEN: usize = 12;

/// Version string as written by the user: empty (omitted), a tag, or a generated version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestedVersion(String);

impl RequestedVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The "latest" sentinel.
    pub fn omitted() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_omitted(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` when the string has the `v0.0.0-<timestamp>-<hash>` shape.
    pub fn is_generated(&self) -> bool {
        generated_version_regex().is_match(&self.0)
    }

    pub fn parse_generated(&self) -> Result<GeneratedVersion> {
        GeneratedVersion::parse(&self.0)
    }

    /// Whether a recorded (lockfile or installed) version satisfies this request.
    ///
    /// An omitted request accepts any recorded version.
    pub fn is_satisfied_by(&self, recorded: &str) -> bool {
        self.is_omitted() || self.0 == recorded
    }
}

impl fmt::Display for RequestedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_omitted() {
            f.write_str("latest")
        } else {
            f.write_str(&self.0)
        }
    }
}

fn generated_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v0\.0\.0-(\d{14})-([0-9a-f]{12})$").expect("valid regex"))
}

/// A pseudo-version pinning an untagged commit: `v0.0.0-YYYYMMDDHHmmss-<12 hex>`.
///
/// The timestamp is the commit's committer time in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedVersion {
    pub datetime: PrimitiveDateTime,
    pub commit_hash_prefix: String,
}

impl GeneratedVersion {
    pub fn new(committed_at: OffsetDateTime, commit_hash: &str) -> Self {
        let utc = committed_at.to_offset(time::UtcOffset::UTC);
        let prefix_len = commit_hash.len().min(GENERATED_HASH_PREFIX_LEN);
        Self {
            datetime: PrimitiveDateTime::new(utc.date(), utc.time()),
            commit_hash_prefix: commit_hash[..prefix_len].to_ascii_lowercase(),
        }
    }

    pub fn parse(version: &str) -> Result<Self> {
        let not_generated = || ModError::RequestedVersionNotGenerated {
            version: version.to_string(),
        };
        let caps = generated_version_regex()
            .captures(version)
            .ok_or_else(not_generated)?;
        let datetime = PrimitiveDateTime::parse(
            &caps[1],
            format_description!("[year][month][day][hour][minute][second]"),
        )
        .map_err(|_| not_generated())?;
        Ok(Self {
            datetime,
            commit_hash_prefix: caps[2].to_string(),
        })
    }
}

impl fmt::Display for GeneratedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self
            .datetime
            .format(format_description!(
                "[year][month][day][hour][minute][second]"
            ))
            .map_err(|_| fmt::Error)?;
        write!(f, "v0.0.0-{timestamp}-{}", self.commit_hash_prefix)
    }
}

/// A concrete, resolved version of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    /// Full commit hash.
    pub commit_hash: String,
    /// Tag name or generated version.
    pub version: String,
}

/// A named remote module together with the version the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Module {
    pub name: String,
    pub version: RequestedVersion,
}

impl Module {
    pub fn new(name: impl Into<String>, version: RequestedVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn latest(name: impl Into<String>) -> Self {
        Self::new(name, RequestedVersion::omitted())
    }
}

impl From<easyp_config::ModuleRef> for Module {
    fn from(reference: easyp_config::ModuleRef) -> Self {
        Self::new(reference.name, RequestedVersion::new(reference.version))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_omitted() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version.as_str())
        }
    }
}

/// Replaces `/` in a version so it can be used as a single path component.
///
/// Applied to every version before it becomes part of a cache or install path.
pub fn sanitize(version: &str) -> String {
    version.replace('/', "-")
}
