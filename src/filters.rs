//! Release selection pipeline
//!
//! Two filters applied in sequence to a package's release map, each
//! receiving the previous filter's output and reporting exactly what it
//! removed so disk reclamation can act on it:
//!
//! 1. Latest-N: keep the K newest versions, plus any version an exact
//!    dependency pin demands, plus the currently-installable version.
//! 2. Platform exclusion: drop individual files built for an excluded
//!    platform or a deprecated interpreter; source distributions are
//!    never dropped.
//!
//! Both filters build new collections rather than mutating in place, and
//! re-applying the pipeline to its own output is a no-op.

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::config::SelectionConfig;
use crate::metadata::{FileDescriptor, ReleaseMap};
use crate::pep440::Version;

/// ABI/interpreter tags of long-dead Python versions. Wheels carrying
/// one of these are unusable by any supported interpreter.
const DEPRECATED_PYTHON: &[&str] = &[
    "3.0", "3.1", "3.2", "3.3", "3.4", "2.3", "2.4", "2.5", "2.6", "cp25", "cp26", "cp31", "cp32",
    "cp33", "cp34", "py31", "py32", "py33", "py34",
];

/// One pruned file, identified by its version and descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedFile {
    pub version: String,
    pub file: FileDescriptor,
}

/// Pipeline output: the surviving release map and everything pruned.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub kept: ReleaseMap,
    pub removed: Vec<RemovedFile>,
}

/// Extract the exact-version pins from raw constraint strings.
///
/// Only unambiguous `==x.y.z` clauses (no wildcard) pin a version that
/// recency pruning must preserve; range constraints are satisfiable by
/// whatever recent versions survive.
pub fn exact_pins(constraints: &BTreeSet<String>) -> HashSet<String> {
    let mut pins = HashSet::new();
    for constraint in constraints {
        for clause in constraint.split(',') {
            let clause: String = clause
                .trim()
                .chars()
                .filter(|c| *c != '\'' && *c != '"')
                .collect();
            if let Some(version) = clause.strip_prefix("==") {
                let version = version.trim();
                if !version.is_empty() && !version.contains('*') {
                    pins.insert(version.to_string());
                    break;
                }
            }
        }
    }
    pins
}

/// The release selection pipeline for one policy configuration.
pub struct ReleasePipeline {
    keep: i64,
    patterns: Vec<&'static str>,
    packagetypes: Vec<&'static str>,
}

impl ReleasePipeline {
    pub fn new(selection: &SelectionConfig) -> Self {
        let mut patterns: Vec<&'static str> = Vec::new();
        let mut packagetypes: Vec<&'static str> = Vec::new();

        for platform in &selection.exclude_platforms {
            match platform.to_lowercase().as_str() {
                "windows" | "win" => {
                    patterns.extend([".win32", "-win32", "win_amd64", "win-amd64"]);
                    packagetypes.extend(["bdist_msi", "bdist_wininst"]);
                }
                "macos" | "macosx" => {
                    patterns.extend(["macosx_", "macosx-"]);
                    packagetypes.push("bdist_dmg");
                }
                "freebsd" => {
                    patterns.extend([".freebsd", "-freebsd"]);
                }
                "linux" => {
                    patterns.extend([
                        "linux-i686",
                        "linux-x86_64",
                        "linux_armv7l",
                        "linux_armv6l",
                        "manylinux1_",
                        "manylinux2010_",
                    ]);
                    packagetypes.push("bdist_rpm");
                }
                // unknown tags were already reported by config validation
                _ => {}
            }
        }

        Self {
            keep: selection.keep_latest,
            patterns,
            packagetypes,
        }
    }

    /// Run both filters over a release map.
    pub fn select(
        &self,
        releases: ReleaseMap,
        conditions: Option<&BTreeSet<String>>,
        current_version: Option<&str>,
    ) -> Selection {
        let mut selection = Selection {
            kept: releases,
            removed: Vec::new(),
        };

        self.filter_latest(&mut selection, conditions, current_version);
        self.filter_platforms(&mut selection);
        selection
    }

    /// Keep the K newest versions plus pinned versions plus the current
    /// version. The current version, when present in the map but outside
    /// the top K, replaces the oldest of the kept top-K slots so the
    /// result never exceeds its budget.
    fn filter_latest(
        &self,
        selection: &mut Selection,
        conditions: Option<&BTreeSet<String>>,
        current_version: Option<&str>,
    ) {
        if self.keep <= 0 {
            return;
        }
        let keep = self.keep as usize;
        if selection.kept.len() <= keep {
            return;
        }

        let pins = conditions.map(|c| exact_pins(c)).unwrap_or_default();

        // Newest first; the sort is stable so equal-parsing versions
        // keep their original catalog order.
        let mut ordered: Vec<&str> = selection.kept.iter().map(|(v, _)| v.as_str()).collect();
        ordered.sort_by_key(|v| std::cmp::Reverse(Version::parse(v)));

        let mut top: Vec<&str> = Vec::with_capacity(keep);
        let mut pinned: HashSet<&str> = HashSet::new();
        for (i, version) in ordered.iter().enumerate() {
            if i < keep {
                top.push(version);
            } else if pins.contains(*version) {
                pinned.insert(version);
            }
        }

        if let Some(current) = current_version {
            let in_map = selection.kept.iter().any(|(v, _)| v == current);
            if in_map && !top.contains(&current) && !pinned.contains(current) {
                // never prune the currently-installable version
                if let Some(oldest) = top.last_mut() {
                    *oldest = current;
                }
            }
        }

        let keep_set: HashSet<&str> = top.iter().chain(pinned.iter()).copied().collect();
        let keep_set: HashSet<String> = keep_set.into_iter().map(String::from).collect();

        let before = selection.kept.len();
        let mut kept = ReleaseMap::new();
        for (version, files) in selection.kept.drain(..) {
            if keep_set.contains(&version) {
                kept.push((version, files));
            } else {
                selection
                    .removed
                    .extend(files.into_iter().map(|file| RemovedFile {
                        version: version.clone(),
                        file,
                    }));
            }
        }
        selection.kept = kept;

        debug!(
            "latest filter: {} versions -> {}",
            before,
            selection.kept.len()
        );
    }

    /// Drop files built for an excluded platform. Versions whose file
    /// list empties out are dropped entirely.
    fn filter_platforms(&self, selection: &mut Selection) {
        let mut kept = ReleaseMap::new();
        for (version, files) in selection.kept.drain(..) {
            let mut surviving = Vec::new();
            for file in files {
                if self.excluded(&file) {
                    selection.removed.push(RemovedFile {
                        version: version.clone(),
                        file,
                    });
                } else {
                    surviving.push(file);
                }
            }
            if !surviving.is_empty() {
                kept.push((version, surviving));
            }
        }
        selection.kept = kept;
    }

    fn excluded(&self, file: &FileDescriptor) -> bool {
        // Source distributions are kept no matter what they are named.
        if file.packagetype == "sdist" {
            return false;
        }

        if let Some(python_version) = &file.python_version {
            if DEPRECATED_PYTHON.contains(&python_version.as_str()) {
                return true;
            }
        }

        if self.packagetypes.iter().any(|pt| *pt == file.packagetype) {
            return true;
        }

        self.patterns.iter().any(|p| file.filename.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(filename: &str, packagetype: &str, python_version: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            filename: filename.to_string(),
            url: format!("https://files.example.org/{}", filename),
            size: 10,
            packagetype: packagetype.to_string(),
            python_version: python_version.map(String::from),
            requires_python: None,
            sha256: None,
        }
    }

    fn release_map(versions: &[&str]) -> ReleaseMap {
        versions
            .iter()
            .map(|v| {
                (
                    v.to_string(),
                    vec![file(&format!("pkg-{}.tar.gz", v), "sdist", None)],
                )
            })
            .collect()
    }

    fn pipeline(keep: i64, platforms: &[&str]) -> ReleasePipeline {
        ReleasePipeline::new(&SelectionConfig {
            keep_latest: keep,
            exclude_platforms: platforms.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn kept_versions(selection: &Selection) -> Vec<&str> {
        selection.kept.iter().map(|(v, _)| v.as_str()).collect()
    }

    #[test]
    fn test_latest_keeps_newest_k() {
        let releases = release_map(&["1.0", "1.1", "1.2", "1.3", "1.4"]);
        let selection = pipeline(3, &[]).select(releases, None, None);

        let mut kept = kept_versions(&selection);
        kept.sort();
        assert_eq!(kept, vec!["1.2", "1.3", "1.4"]);
        assert_eq!(selection.removed.len(), 2);
    }

    #[test]
    fn test_current_version_replaces_oldest_kept() {
        let releases = release_map(&["1.0", "1.1", "1.2", "1.3", "1.4"]);
        let selection = pipeline(3, &[]).select(releases, None, Some("1.0"));

        let mut kept = kept_versions(&selection);
        kept.sort();
        assert_eq!(kept, vec!["1.0", "1.3", "1.4"]);
    }

    #[test]
    fn test_current_version_absent_from_map_is_not_invented() {
        let releases = release_map(&["1.0", "1.1", "1.2", "1.3"]);
        let selection = pipeline(2, &[]).select(releases, None, Some("9.9"));

        let mut kept = kept_versions(&selection);
        kept.sort();
        assert_eq!(kept, vec!["1.2", "1.3"]);
    }

    #[test]
    fn test_exact_pin_survives_pruning() {
        let releases = release_map(&["1.0", "1.1", "1.2", "1.3", "1.4"]);
        let conditions: BTreeSet<String> = ["==1.0".to_string()].into_iter().collect();
        let selection = pipeline(2, &[]).select(releases, Some(&conditions), None);

        let mut kept = kept_versions(&selection);
        kept.sort();
        assert_eq!(kept, vec!["1.0", "1.3", "1.4"]);
    }

    #[test]
    fn test_range_constraints_do_not_pin() {
        let conditions: BTreeSet<String> =
            [">=1.0,<2.0".to_string(), "==1.*".to_string()].into_iter().collect();
        assert!(exact_pins(&conditions).is_empty());

        let pinned: BTreeSet<String> = ["==\"2.1\", >=1.0".to_string()].into_iter().collect();
        assert!(exact_pins(&pinned).contains("2.1"));
    }

    #[test]
    fn test_keep_zero_disables_filter() {
        let releases = release_map(&["1.0", "1.1", "1.2", "1.3"]);
        let selection = pipeline(0, &[]).select(releases, None, None);
        assert_eq!(selection.kept.len(), 4);
        assert!(selection.removed.is_empty());
    }

    #[test]
    fn test_small_map_is_untouched() {
        let releases = release_map(&["1.0", "1.1"]);
        let selection = pipeline(3, &[]).select(releases, None, None);
        assert_eq!(selection.kept.len(), 2);
        assert!(selection.removed.is_empty());
    }

    #[test]
    fn test_windows_files_removed_sdist_retained() {
        let releases: ReleaseMap = vec![(
            "1.0".to_string(),
            vec![
                file("pkg-1.0.tar.gz", "sdist", None),
                file("pkg-1.0.win32.exe", "bdist_wininst", None),
                file("pkg-1.0-cp39-win_amd64.whl", "bdist_wheel", Some("cp39")),
            ],
        )];

        let selection = pipeline(0, &["windows"]).select(releases, None, None);
        assert_eq!(selection.kept[0].1.len(), 1);
        assert_eq!(selection.kept[0].1[0].packagetype, "sdist");
        assert_eq!(selection.removed.len(), 2);
    }

    #[test]
    fn test_sdist_immune_even_with_platform_name() {
        let releases: ReleaseMap = vec![(
            "1.0".to_string(),
            vec![file("pkg-1.0.win32.zip", "sdist", None)],
        )];

        let selection = pipeline(0, &["windows"]).select(releases, None, None);
        assert_eq!(selection.kept[0].1.len(), 1);
        assert!(selection.removed.is_empty());
    }

    #[test]
    fn test_deprecated_interpreter_removed_without_platform_config() {
        let releases: ReleaseMap = vec![(
            "1.0".to_string(),
            vec![
                file("pkg-1.0-cp33-none-any.whl", "bdist_wheel", Some("cp33")),
                file("pkg-1.0-cp39-none-any.whl", "bdist_wheel", Some("cp39")),
            ],
        )];

        let selection = pipeline(0, &[]).select(releases, None, None);
        assert_eq!(selection.kept[0].1.len(), 1);
        assert_eq!(selection.removed.len(), 1);
        assert_eq!(selection.removed[0].file.python_version.as_deref(), Some("cp33"));
    }

    #[test]
    fn test_version_emptied_by_platform_filter_is_dropped() {
        let releases: ReleaseMap = vec![
            (
                "1.0".to_string(),
                vec![file("pkg-1.0.win32.exe", "bdist_wininst", None)],
            ),
            (
                "1.1".to_string(),
                vec![file("pkg-1.1.tar.gz", "sdist", None)],
            ),
        ];

        let selection = pipeline(0, &["win"]).select(releases, None, None);
        assert_eq!(kept_versions(&selection), vec!["1.1"]);
    }

    #[test]
    fn test_pipeline_is_idempotent() {
        let mut releases = release_map(&["0.9", "1.0", "1.1", "1.2", "1.3", "1.4"]);
        releases[1].1.push(file("pkg-1.0-win_amd64.whl", "bdist_wheel", None));
        let conditions: BTreeSet<String> = ["==0.9".to_string()].into_iter().collect();

        let pipeline = pipeline(3, &["windows"]);
        let first = pipeline.select(releases, Some(&conditions), Some("1.0"));
        let second = pipeline.select(first.kept.clone(), Some(&conditions), Some("1.0"));

        assert_eq!(first.kept, second.kept);
        assert!(second.removed.is_empty());
    }
}
