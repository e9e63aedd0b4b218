//! Catalog/metadata store - SQLite persistence for the mirror
//!
//! Three families of tables:
//! - `catalog`: every upstream package name with its change serial and the
//!   per-package ignore flag (set on fetch failure, never by policy)
//! - `package` / `classifier` / `requirement` / `release_file`: decoded
//!   metadata for fetched packages, replaced wholesale on re-fetch
//! - `mirror_serial`: the upstream global serial at the last catalog sync
//!
//! All mutations that touch more than one row run inside a transaction so
//! a crash mid-package never leaves a half-written record visible.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::metadata::{normalize, FileDescriptor, ReleaseMap, UpstreamMetadata};

/// Result of an atomic catalog replace.
#[derive(Debug, Clone, Copy)]
pub struct CatalogStats {
    /// Entries in the new catalog.
    pub listed: usize,
    /// Entries whose serial advanced past the previous high-water mark.
    pub advanced: usize,
}

/// Aggregate store counters for status reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCounts {
    pub catalog_entries: u64,
    pub ignored: u64,
    pub packages: u64,
    pub files: u64,
    pub total_bytes: u64,
    pub last_serial: Option<i64>,
}

/// Store handle. Single connection, sequential use only.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the store at a specific path.
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let store = Self { conn };
        store.initialize()?;

        info!("Store opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                -- Upstream global serial at the last catalog sync
                CREATE TABLE IF NOT EXISTS mirror_serial (
                    last_serial INTEGER NOT NULL,
                    fetched_at TEXT NOT NULL
                );

                -- Full upstream catalog: name -> change serial, ignore flag
                CREATE TABLE IF NOT EXISTS catalog (
                    name TEXT NOT NULL PRIMARY KEY,
                    serial INTEGER NOT NULL,
                    ignored INTEGER NOT NULL DEFAULT 0
                );

                -- Decoded metadata of fetched packages
                CREATE TABLE IF NOT EXISTS package (
                    name TEXT NOT NULL PRIMARY KEY,
                    serial INTEGER NOT NULL,
                    version TEXT,
                    summary TEXT,
                    home_page TEXT,
                    requires_python TEXT
                );

                CREATE TABLE IF NOT EXISTS classifier (
                    name TEXT NOT NULL,
                    classifier TEXT NOT NULL
                );

                -- Raw requirement specs, publication order preserved
                CREATE TABLE IF NOT EXISTS requirement (
                    name TEXT NOT NULL,
                    pos INTEGER NOT NULL,
                    spec TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS release_file (
                    name TEXT NOT NULL,
                    version TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    url TEXT NOT NULL UNIQUE,
                    size INTEGER NOT NULL,
                    packagetype TEXT NOT NULL,
                    python_version TEXT,
                    requires_python TEXT,
                    sha256 TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_catalog_ignored ON catalog(ignored);
                CREATE INDEX IF NOT EXISTS idx_classifier_name ON classifier(name);
                CREATE INDEX IF NOT EXISTS idx_classifier_value ON classifier(classifier);
                CREATE INDEX IF NOT EXISTS idx_requirement_name ON requirement(name);
                CREATE INDEX IF NOT EXISTS idx_release_file_name ON release_file(name);
                "#,
            )
            .context("Failed to initialize store schema")?;

        debug!("Store schema initialized");
        Ok(())
    }

    // =========================================================================
    // Catalog operations
    // =========================================================================

    /// The upstream global serial recorded at the last sync, if any.
    pub fn last_serial(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT last_serial FROM mirror_serial", [], |row| row.get(0))
            .optional()
            .context("Failed to query mirror serial")
    }

    /// The highest per-package serial in the current catalog (0 when empty).
    pub fn max_catalog_serial(&self) -> Result<i64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(serial) FROM catalog", [], |row| row.get(0))
            .context("Failed to query max catalog serial")?;
        Ok(max.unwrap_or(0))
    }

    /// Atomically replace the catalog with a fresh upstream listing.
    ///
    /// The ignore flag of an existing entry is carried forward unless its
    /// serial advanced past the previous high-water mark; advanced and new
    /// entries always start un-ignored so a changed package never inherits
    /// a stale ignore.
    pub fn replace_catalog(
        &mut self,
        server_serial: i64,
        entries: &[(String, i64)],
    ) -> Result<CatalogStats> {
        let tx = self.conn.transaction()?;

        let old_max: i64 = tx
            .query_row("SELECT MAX(serial) FROM catalog", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?
            .unwrap_or(0);

        let mut carried: HashMap<String, bool> = HashMap::new();
        {
            let mut stmt = tx.prepare("SELECT name, ignored FROM catalog WHERE ignored = 1")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
            })?;
            for row in rows {
                let (name, ignored) = row?;
                carried.insert(name, ignored);
            }
        }

        tx.execute("DELETE FROM catalog", [])?;

        let mut advanced = 0usize;
        {
            let mut stmt =
                tx.prepare("INSERT INTO catalog (name, serial, ignored) VALUES (?1, ?2, ?3)")?;
            for (name, serial) in entries {
                let ignored = if *serial > old_max {
                    advanced += 1;
                    false
                } else {
                    carried.get(name).copied().unwrap_or(false)
                };
                stmt.execute(params![name, serial, ignored as i64])?;
            }
        }

        tx.execute("DELETE FROM mirror_serial", [])?;
        tx.execute(
            "INSERT INTO mirror_serial (last_serial, fetched_at) VALUES (?1, ?2)",
            params![server_serial, Utc::now().to_rfc3339()],
        )?;

        tx.commit().context("Failed to commit catalog replace")?;

        debug!(
            "Catalog replaced: {} entries, {} advanced past serial {}",
            entries.len(),
            advanced,
            old_max
        );

        Ok(CatalogStats {
            listed: entries.len(),
            advanced,
        })
    }

    /// Mark or clear the ignore flag of a catalog entry.
    pub fn set_ignored(&self, name: &str, ignored: bool) -> Result<()> {
        self.conn
            .execute(
                "UPDATE catalog SET ignored = ?2 WHERE name = ?1",
                params![name, ignored as i64],
            )
            .context("Failed to update ignore flag")?;
        Ok(())
    }

    /// Whether a catalog entry is flagged ignored.
    pub fn is_ignored(&self, name: &str) -> Result<bool> {
        let flag: Option<i64> = self
            .conn
            .query_row(
                "SELECT ignored FROM catalog WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query ignore flag")?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// Candidates needing a metadata fetch: not ignored, and either never
    /// fetched or fetched at an older serial. Ordered by catalog serial so
    /// an interrupted run resumes with the most stale entries.
    pub fn stale_candidates(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT c.name
            FROM catalog c
            LEFT JOIN package p ON c.name = p.name
            WHERE c.ignored = 0
              AND (p.name IS NULL OR p.serial < c.serial)
            ORDER BY c.serial
            "#,
        )?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect stale candidates")?;
        Ok(names)
    }

    /// Packages with stored metadata that are absent from the catalog.
    pub fn orphaned_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM package WHERE name NOT IN (SELECT name FROM catalog)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect orphaned names")?;
        Ok(names)
    }

    // =========================================================================
    // Metadata operations
    // =========================================================================

    /// Replace the stored metadata of a package in a single transaction
    /// (delete-then-insert, so a partial update is never visible).
    pub fn insert_package(&mut self, meta: &UpstreamMetadata) -> Result<()> {
        let name = meta.info.name.clone();
        let tx = self.conn.transaction()?;

        Self::delete_package_rows(&tx, &name)?;

        tx.execute(
            r#"
            INSERT INTO package (name, serial, version, summary, home_page, requires_python)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                name,
                meta.last_serial,
                meta.info.version,
                meta.info.summary,
                meta.info.home_page,
                meta.info.requires_python,
            ],
        )?;

        {
            let mut stmt =
                tx.prepare("INSERT INTO classifier (name, classifier) VALUES (?1, ?2)")?;
            for classifier in &meta.info.classifiers {
                stmt.execute(params![name, classifier])?;
            }
        }

        if let Some(requires) = &meta.info.requires_dist {
            let mut stmt =
                tx.prepare("INSERT INTO requirement (name, pos, spec) VALUES (?1, ?2, ?3)")?;
            for (pos, spec) in requires.iter().enumerate() {
                stmt.execute(params![name, pos as i64, spec])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO release_file
                    (name, version, filename, url, size, packagetype,
                     python_version, requires_python, sha256)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (version, files) in &meta.releases {
                for file in files {
                    let sha256 = file.digests.as_ref().and_then(|d| d.sha256.clone());
                    stmt.execute(params![
                        name,
                        version,
                        file.filename,
                        file.url,
                        file.size as i64,
                        file.packagetype,
                        file.python_version,
                        file.requires_python,
                        sha256,
                    ])?;
                }
            }
        }

        tx.commit().context("Failed to commit package insert")?;
        debug!("Package stored: {} serial {}", name, meta.last_serial);
        Ok(())
    }

    /// Delete a package from all metadata tables.
    pub fn delete_package(&mut self, name: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        Self::delete_package_rows(&tx, name)?;
        tx.commit().context("Failed to commit package delete")?;
        Ok(())
    }

    fn delete_package_rows(tx: &rusqlite::Transaction<'_>, name: &str) -> Result<()> {
        tx.execute("DELETE FROM release_file WHERE name = ?1", params![name])?;
        tx.execute("DELETE FROM requirement WHERE name = ?1", params![name])?;
        tx.execute("DELETE FROM classifier WHERE name = ?1", params![name])?;
        tx.execute("DELETE FROM package WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// The serial at which a package's metadata was last fetched.
    pub fn fetched_serial(&self, name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT serial FROM package WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query fetched serial")
    }

    /// All packages with stored metadata, in insertion order.
    pub fn package_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM package ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect package names")?;
        Ok(names)
    }

    /// The stored currently-installable version of a package.
    pub fn current_version(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT version FROM package WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query current version")
            .map(|v: Option<Option<String>>| v.flatten())
    }

    /// The stored release map of a package, grouped by version in store
    /// order. Empty when the package has no files.
    pub fn release_map(&self, name: &str) -> Result<ReleaseMap> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT version, filename, url, size, packagetype,
                   python_version, requires_python, sha256
            FROM release_file
            WHERE name = ?1
            ORDER BY rowid
            "#,
        )?;

        let mut map: ReleaseMap = Vec::new();
        let rows = stmt.query_map(params![name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                FileDescriptor {
                    filename: row.get(1)?,
                    url: row.get(2)?,
                    size: row.get::<_, i64>(3)? as u64,
                    packagetype: row.get(4)?,
                    python_version: row.get(5)?,
                    requires_python: row.get(6)?,
                    sha256: row.get(7)?,
                },
            ))
        })?;

        for row in rows {
            let (version, file) = row?;
            match map.last_mut() {
                Some((v, files)) if *v == version => files.push(file),
                _ => map.push((version, vec![file])),
            }
        }
        Ok(map)
    }

    /// Whether a file URL is referenced by any release record.
    pub fn has_file_url(&self, url: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM release_file WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query file registry")?;
        Ok(found.is_some())
    }

    /// All recorded requirement edges as (name, raw spec), in publication
    /// order per package.
    pub fn requirement_edges(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, spec FROM requirement ORDER BY name, pos")?;
        let edges = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect requirement edges")?;
        Ok(edges)
    }

    // =========================================================================
    // Blacklist rule queries
    // =========================================================================

    /// Catalog entries currently flagged ignored.
    pub fn ignored_names(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM catalog WHERE ignored = 1")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()
            .context("Failed to collect ignored names")?;
        Ok(names)
    }

    /// Catalog names matching any of the SQL LIKE patterns (`%` wildcard).
    pub fn catalog_names_like(&self, patterns: &[String]) -> Result<HashSet<String>> {
        let mut matched = HashSet::new();
        let mut stmt = self.conn.prepare("SELECT name FROM catalog WHERE name LIKE ?1")?;
        for pattern in patterns {
            let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
            for row in rows {
                matched.insert(row?);
            }
        }
        Ok(matched)
    }

    /// Catalog names exactly matching any of the given names.
    pub fn catalog_names_in(&self, names: &[String]) -> Result<HashSet<String>> {
        let mut matched = HashSet::new();
        let mut stmt = self.conn.prepare("SELECT name FROM catalog WHERE name = ?1")?;
        for name in names {
            let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
            for row in rows {
                matched.insert(row?);
            }
        }
        Ok(matched)
    }

    /// Names of packages carrying a classifier matching the LIKE pattern.
    pub fn classifier_names_like(&self, pattern: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT name FROM classifier WHERE classifier LIKE ?1")?;
        let names = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()
            .context("Failed to collect classifier matches")?;
        Ok(names)
    }

    /// Fetched packages with zero associated files.
    pub fn names_without_files(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM package WHERE name NOT IN (SELECT DISTINCT name FROM release_file)",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()
            .context("Failed to collect file-less packages")?;
        Ok(names)
    }

    /// Map from normalized catalog name to the exact catalog spelling.
    pub fn normalized_name_map(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM catalog")?;
        let mut map = HashMap::new();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            let name = row?;
            map.insert(normalize(&name), name);
        }
        Ok(map)
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn counts(&self) -> Result<StoreCounts> {
        let one = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        let total_bytes: Option<i64> = self
            .conn
            .query_row("SELECT SUM(size) FROM release_file", [], |row| row.get(0))?;

        Ok(StoreCounts {
            catalog_entries: one("SELECT COUNT(*) FROM catalog")?,
            ignored: one("SELECT COUNT(*) FROM catalog WHERE ignored = 1")?,
            packages: one("SELECT COUNT(*) FROM package")?,
            files: one("SELECT COUNT(*) FROM release_file")?,
            total_bytes: total_bytes.unwrap_or(0) as u64,
            last_serial: self.last_serial()?,
        })
    }
}
