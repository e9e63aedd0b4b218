//! Artifact download driver
//!
//! Walks every stored package that survives the exclusion policy, runs
//! the release selection pipeline, and downloads each kept file whose
//! on-disk copy is missing or has the wrong size. Files land under the
//! mirror root at the same relative path they carry upstream, so the
//! tree can be served as-is.
//!
//! An operator whitelist overrides policy: whitelisted names are pulled
//! off the blacklist and their version constraints merge into the
//! computed conditions. In whitelist-only mode everything else is
//! skipped entirely.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::closure::ExclusionPolicy;
use crate::config::Config;
use crate::filters::ReleasePipeline;
use crate::metadata::normalize;
use crate::store::Store;
use crate::transport::ArtifactFetcher;

/// Caller switches for one download pass.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Count and report without writing anything.
    pub dry_run: bool,
    /// Operator whitelist entries, `name` or `name==1.2.3`.
    pub whitelist: Vec<String>,
    /// Mirror only whitelisted names; the blacklist is not consulted.
    pub only_whitelist: bool,
}

/// Counters of one download pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorSummary {
    /// Packages whose releases were considered.
    pub packages: usize,
    /// Files the pipeline kept.
    pub files_kept: usize,
    /// Kept files already on disk with the right size.
    pub existing: usize,
    /// Files fetched (or, in dry-run, that would be fetched).
    pub downloaded: usize,
    /// Fetches or writes that failed.
    pub failed: usize,
    /// Bytes fetched (recorded sizes).
    pub bytes: u64,
    pub cancelled: bool,
}

/// The on-disk location of an upstream file: its URL path relative to
/// the files host, rooted at the mirror directory. Foreign URLs yield
/// `None`.
pub fn local_path(mirror_root: &Path, files_url: &str, url: &str) -> Option<PathBuf> {
    let base = format!("{}/", files_url.trim_end_matches('/'));
    let relative = url.strip_prefix(&base)?;
    if relative.is_empty() || relative.contains("..") {
        return None;
    }
    Some(mirror_root.join(relative))
}

/// Resolve operator whitelist entries against the catalog.
///
/// Each entry is a package name with an optional trailing constraint
/// (`requests==2.28.0`). Names are matched through normalization;
/// entries naming no catalog package are reported and dropped.
pub fn resolve_whitelist(
    store: &Store,
    entries: &[String],
) -> Result<HashMap<String, BTreeSet<String>>> {
    if entries.is_empty() {
        return Ok(HashMap::new());
    }

    let pattern = Regex::new(r"^([^=<>~!]+)(.*)$").context("whitelist pattern")?;
    let catalog_names = store.normalized_name_map()?;

    let mut whitelist: HashMap<String, BTreeSet<String>> = HashMap::new();
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some(captures) = pattern.captures(entry) else {
            warn!("whitelist: unparseable entry {:?}", entry);
            continue;
        };
        let raw_name = captures[1].trim();
        let constraint = captures[2].trim();

        match catalog_names.get(&normalize(raw_name)) {
            Some(name) => {
                let conditions = whitelist.entry(name.clone()).or_default();
                if !constraint.is_empty() {
                    conditions.insert(constraint.to_string());
                }
                info!("whitelist: {} {:?}", name, conditions);
            }
            None => warn!("whitelist: {} is not in the catalog", raw_name),
        }
    }
    Ok(whitelist)
}

/// Run one download pass.
pub async fn mirror(
    fetcher: &dyn ArtifactFetcher,
    store: &Store,
    config: &Config,
    policy: &mut ExclusionPolicy,
    options: &MirrorOptions,
    cancel: &CancelToken,
) -> Result<MirrorSummary> {
    let mirror_root = PathBuf::from(&config.mirror_root);
    let whitelist = resolve_whitelist(store, &options.whitelist)?;

    let (mut blacklist, mut conditions) = if options.only_whitelist {
        (HashSet::new(), HashMap::new())
    } else {
        let closure = policy.closure(store)?;
        (closure.blacklist.clone(), closure.conditions.clone())
    };

    // The whitelist wins over the blacklist and adds its constraints.
    for (name, conds) in &whitelist {
        blacklist.remove(name);
        conditions.entry(name.clone()).or_default().extend(conds.iter().cloned());
    }

    let pipeline = ReleasePipeline::new(&config.selection);
    let mut summary = MirrorSummary::default();

    for name in store.package_names()? {
        if cancel.is_requested() {
            summary.cancelled = true;
            break;
        }

        if options.only_whitelist {
            if !whitelist.contains_key(&name) {
                continue;
            }
        } else if blacklist.contains(&name) {
            continue;
        }

        debug!("process {}", name);
        let releases = store.release_map(&name)?;
        if releases.is_empty() {
            continue;
        }
        let current_version = store.current_version(&name)?;
        let selection = pipeline.select(
            releases,
            conditions.get(&name),
            current_version.as_deref(),
        );
        summary.packages += 1;

        for (_, files) in &selection.kept {
            for file in files {
                summary.files_kept += 1;

                let Some(path) = local_path(&mirror_root, &config.files_url, &file.url) else {
                    warn!("{}: foreign url {}", name, file.url);
                    continue;
                };

                let on_disk = tokio::fs::metadata(&path).await.ok();
                if on_disk.map(|m| m.len()) == Some(file.size) {
                    summary.existing += 1;
                    continue;
                }

                summary.downloaded += 1;
                summary.bytes += file.size;
                info!("download {}  {}  {} bytes", name, file.filename, file.size);

                if options.dry_run {
                    continue;
                }
                if let Err(err) = fetch_to_disk(fetcher, &file.url, &path).await {
                    warn!("{}: {:#}", file.filename, err);
                    summary.downloaded -= 1;
                    summary.bytes -= file.size;
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        "mirror pass: {} packages, {} kept, {} existing, {} downloaded, {} failed, {} bytes",
        summary.packages,
        summary.files_kept,
        summary.existing,
        summary.downloaded,
        summary.failed,
        summary.bytes
    );
    Ok(summary)
}

async fn fetch_to_disk(fetcher: &dyn ArtifactFetcher, url: &str, path: &Path) -> Result<()> {
    let body = fetcher
        .fetch_file(url)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if let Some(parent) = path.parent() {
        // A stray file where the directory belongs blocks creation.
        if parent.is_file() {
            tokio::fs::remove_file(parent).await.ok();
        }
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_metadata;
    use crate::transport::FetchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FILES_URL: &str = "https://files.example.org";

    struct StubFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactFetcher for StubFetcher {
        async fn fetch_file(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0u8; 100])
        }
    }

    fn fetcher() -> StubFetcher {
        StubFetcher {
            calls: AtomicUsize::new(0),
        }
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.mirror_root = root.display().to_string();
        config.files_url = FILES_URL.to_string();
        config.rules.oversized.clear();
        config.rules.threats.clear();
        config.rules.low_value.clear();
        config.rules.frameworks.clear();
        config
    }

    fn seeded_store(names: &[&str]) -> Store {
        let mut store = Store::open_in_memory().unwrap();
        let catalog: Vec<(String, i64)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_string(), i as i64 + 1))
            .collect();
        store.replace_catalog(100, &catalog).unwrap();
        for (i, name) in names.iter().enumerate() {
            store
                .insert_package(&sample_metadata(name, i as i64 + 1, &["1.0"]))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_local_path_from_url() {
        let path = local_path(
            Path::new("/srv/mirror"),
            FILES_URL,
            "https://files.example.org/packages/pkg/pkg-1.0.tar.gz",
        )
        .unwrap();
        assert_eq!(
            path,
            Path::new("/srv/mirror/packages/pkg/pkg-1.0.tar.gz")
        );

        assert!(local_path(Path::new("/srv"), FILES_URL, "https://elsewhere.org/x").is_none());
    }

    #[test]
    fn test_whitelist_resolution_normalizes_names() {
        let store = seeded_store(&["My_Package", "other"]);
        let whitelist = resolve_whitelist(
            &store,
            &["my.package==1.0".to_string(), "ghost".to_string()],
        )
        .unwrap();

        assert_eq!(whitelist.len(), 1);
        let conds = whitelist.get("My_Package").unwrap();
        assert!(conds.contains("==1.0"));
    }

    #[tokio::test]
    async fn test_download_then_skip_existing() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let store = seeded_store(&["alpha"]);
        let stub = fetcher();
        let mut policy = ExclusionPolicy::new(config.rules.clone());

        let summary = mirror(
            &stub,
            &store,
            &config,
            &mut policy,
            &MirrorOptions::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.bytes, 100);
        assert!(root
            .path()
            .join("packages/alpha/alpha-1.0.tar.gz")
            .is_file());

        // Second pass: the file exists at the recorded size.
        let summary = mirror(
            &stub,
            &store,
            &config,
            &mut policy,
            &MirrorOptions::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.existing, 1);
        assert_eq!(summary.downloaded, 0);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let store = seeded_store(&["alpha"]);
        let stub = fetcher();
        let mut policy = ExclusionPolicy::new(config.rules.clone());

        let options = MirrorOptions {
            dry_run: true,
            ..Default::default()
        };
        let summary = mirror(
            &stub,
            &store,
            &config,
            &mut policy,
            &options,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.downloaded, 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(!root.path().join("packages/alpha/alpha-1.0.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_only_whitelist_skips_everything_else() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let store = seeded_store(&["alpha", "beta"]);
        let stub = fetcher();
        let mut policy = ExclusionPolicy::new(config.rules.clone());

        let options = MirrorOptions {
            whitelist: vec!["beta".to_string()],
            only_whitelist: true,
            ..Default::default()
        };
        let summary = mirror(
            &stub,
            &store,
            &config,
            &mut policy,
            &options,
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.packages, 1);
        assert!(root.path().join("packages/beta/beta-1.0.tar.gz").is_file());
        assert!(!root.path().join("packages/alpha/alpha-1.0.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_whitelist_overrides_blacklist() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path());
        config.rules.threats = vec!["alpha".to_string()];
        let store = seeded_store(&["alpha"]);
        let stub = fetcher();
        let mut policy = ExclusionPolicy::new(config.rules.clone());

        // Blacklisted by the threats rule: nothing mirrored.
        let summary = mirror(
            &stub,
            &store,
            &config,
            &mut policy,
            &MirrorOptions::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.packages, 0);

        // Whitelisted: mirrored despite the rule.
        let options = MirrorOptions {
            whitelist: vec!["alpha".to_string()],
            ..Default::default()
        };
        let summary = mirror(
            &stub,
            &store,
            &config,
            &mut policy,
            &options,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.packages, 1);
        assert_eq!(summary.downloaded, 1);
    }
}
