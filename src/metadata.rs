//! Upstream metadata model - the per-package JSON document
//!
//! The index publishes one JSON document per package containing the info
//! block, trove classifiers, raw requirement specs and the release map
//! (version -> distribution files). Only the fields the mirror acts on are
//! modeled; everything else in the document is ignored during
//! deserialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full upstream metadata document for one package.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamMetadata {
    pub info: PackageInfo,
    pub last_serial: i64,
    #[serde(default)]
    pub releases: BTreeMap<String, Vec<UpstreamFile>>,
}

/// The `info` block of the metadata document.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    /// The currently-installable version as published upstream.
    pub version: Option<String>,
    pub summary: Option<String>,
    pub home_page: Option<String>,
    pub requires_python: Option<String>,
    #[serde(default)]
    pub classifiers: Vec<String>,
    /// Raw dependency-spec strings, in publication order.
    #[serde(default)]
    pub requires_dist: Option<Vec<String>>,
}

/// One distribution file of a release, as described upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFile {
    pub filename: String,
    pub url: String,
    pub size: u64,
    pub packagetype: String,
    pub python_version: Option<String>,
    pub requires_python: Option<String>,
    #[serde(default)]
    pub digests: Option<Digests>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Digests {
    pub sha256: Option<String>,
}

/// A stored distribution file. Identified by URL, immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    pub url: String,
    pub size: u64,
    pub packagetype: String,
    pub python_version: Option<String>,
    pub requires_python: Option<String>,
    pub sha256: Option<String>,
}

impl From<UpstreamFile> for FileDescriptor {
    fn from(f: UpstreamFile) -> Self {
        let sha256 = f.digests.and_then(|d| d.sha256);
        FileDescriptor {
            filename: f.filename,
            url: f.url,
            size: f.size,
            packagetype: f.packagetype,
            python_version: f.python_version,
            requires_python: f.requires_python,
            sha256,
        }
    }
}

/// A package's release map in catalog order: version -> files.
pub type ReleaseMap = Vec<(String, Vec<FileDescriptor>)>;

/// Normalize a package name: lowercase, underscores and dots to hyphens.
///
/// Names act as case/separator-insensitive keys; every lookup that crosses
/// an operator-supplied boundary (whitelist entries, CLI arguments) goes
/// through this first.
pub fn normalize(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}
