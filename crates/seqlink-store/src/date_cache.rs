// SPDX-License-Identifier: Apache-2.0

//! The BP/BS date cache.
//!
//! A per-run snapshot of `(accession -> dateCreated, dateModified,
//! datePublished)` pulled from the archive's relational database, one
//! table per family. The cache is authoritative for one pipeline run:
//! emitters must refuse a cache built for an older date.

use crate::{StoreError, StoreErrorCode};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use seqlink_core::Config;
use std::collections::{BTreeMap, HashSet};
use std::fs;

const LOAD_TX_SIZE: usize = 50_000;
const SQLITE_IN_BATCH: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFamily {
    Bioproject,
    Biosample,
}

impl DateFamily {
    const fn table(self) -> &'static str {
        match self {
            Self::Bioproject => "bp_date",
            Self::Biosample => "bs_date",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRow {
    pub accession: String,
    pub date_created: Option<String>,
    pub date_modified: Option<String>,
    pub date_published: Option<String>,
}

pub struct DateCacheWriter {
    conn: Connection,
}

impl DateCacheWriter {
    pub fn init(config: &Config) -> Result<Self, StoreError> {
        let tmp = config.date_cache_tmp_path();
        if let Some(parent) = tmp.parent() {
            fs::create_dir_all(parent)?;
        }
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }
        let conn = Connection::open(&tmp)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=OFF;
            CREATE TABLE bp_date (
              accession TEXT PRIMARY KEY,
              date_created TEXT,
              date_modified TEXT,
              date_published TEXT
            ) WITHOUT ROWID;
            CREATE TABLE bs_date (
              accession TEXT PRIMARY KEY,
              date_created TEXT,
              date_modified TEXT,
              date_published TEXT
            ) WITHOUT ROWID;
            CREATE TABLE meta (k TEXT PRIMARY KEY, v TEXT NOT NULL) WITHOUT ROWID;
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn insert(
        &mut self,
        family: DateFamily,
        rows: impl Iterator<Item = DateRow>,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (accession, date_created, date_modified, date_published)
             VALUES (?1, ?2, ?3, ?4)",
            family.table()
        );
        let mut total = 0u64;
        let mut rows = rows.peekable();
        while rows.peek().is_some() {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for row in rows.by_ref().take(LOAD_TX_SIZE) {
                    stmt.execute(params![
                        row.accession,
                        row.date_created,
                        row.date_modified,
                        row.date_published,
                    ])?;
                    total += 1;
                }
            }
            tx.commit()?;
        }
        Ok(total)
    }

    /// Stamp the build date and rename tmp -> final.
    pub fn finalize(self, config: &Config) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (k, v) VALUES ('built_for', ?1)",
            params![config.today_str()],
        )?;
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        drop(self.conn);
        let final_path = config.date_cache_path();
        if final_path.exists() {
            fs::remove_file(&final_path)?;
        }
        fs::rename(config.date_cache_tmp_path(), final_path)?;
        Ok(())
    }
}

pub struct DateCache {
    conn: Connection,
}

impl DateCache {
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        let path = config.date_cache_path();
        if !path.exists() {
            return Err(StoreError::new(
                StoreErrorCode::NotFound,
                format!("date cache not found: {}", path.display()),
            ));
        }
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    pub fn built_for(&self) -> Result<Option<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT v FROM meta WHERE k = 'built_for'")?;
        let mut rows = stmt.query([])?;
        Ok(match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        })
    }

    /// BP/BS emission is gated on a cache built for the current run date.
    pub fn ensure_fresh(&self, today_str: &str) -> Result<(), StoreError> {
        match self.built_for()? {
            Some(built) if built.as_str() >= today_str => Ok(()),
            Some(built) => Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("date cache is stale: built for {built}, run date is {today_str}"),
            )),
            None => Err(StoreError::new(
                StoreErrorCode::Validation,
                "date cache has no build stamp",
            )),
        }
    }

    pub fn get_bulk(
        &self,
        family: DateFamily,
        accessions: &[String],
    ) -> Result<BTreeMap<String, DateRow>, StoreError> {
        let mut result = BTreeMap::new();
        for chunk in accessions.chunks(SQLITE_IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT accession, date_created, date_modified, date_published
                 FROM {} WHERE accession IN ({placeholders})",
                family.table()
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let entry = DateRow {
                    accession: row.get(0)?,
                    date_created: row.get(1)?,
                    date_modified: row.get(2)?,
                    date_published: row.get(3)?,
                };
                result.insert(entry.accession.clone(), entry);
            }
        }
        Ok(result)
    }

    /// Accessions whose modification timestamp is at or after the
    /// cutoff. Drives the DDBJ side of incremental emission.
    pub fn modified_since(
        &self,
        family: DateFamily,
        cutoff: &str,
    ) -> Result<HashSet<String>, StoreError> {
        let sql = format!(
            "SELECT accession FROM {} WHERE date_modified >= ?1",
            family.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            result_dir: root.join("results"),
            const_dir: root.join("const"),
            dblink_files_dir: root.join("dblink_files"),
            postgres_url: None,
            es_url: "http://localhost:9200".to_string(),
            today: NaiveDate::from_ymd_opt(2026, 1, 30).expect("date"),
            parallel_num: 2,
            margin_days: 30,
            assembly_summary_url: None,
        }
    }

    fn row(acc: &str, modified: &str) -> DateRow {
        DateRow {
            accession: acc.to_string(),
            date_created: Some("2020-01-01T00:00:00Z".to_string()),
            date_modified: Some(modified.to_string()),
            date_published: None,
        }
    }

    #[test]
    fn build_query_and_freshness() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let mut writer = DateCacheWriter::init(&config).expect("init");
        writer
            .insert(
                DateFamily::Bioproject,
                vec![
                    row("PRJDB1", "2026-01-15T00:00:00Z"),
                    row("PRJDB2", "2025-06-01T00:00:00Z"),
                ]
                .into_iter(),
            )
            .expect("insert bp");
        writer
            .insert(DateFamily::Biosample, vec![row("SAMD1", "2026-01-02T00:00:00Z")].into_iter())
            .expect("insert bs");
        writer.finalize(&config).expect("finalize");

        let cache = DateCache::open(&config).expect("open");
        cache.ensure_fresh("20260130").expect("fresh");
        assert!(cache.ensure_fresh("20260131").is_err());

        let dates = cache
            .get_bulk(DateFamily::Bioproject, &["PRJDB1".to_string()])
            .expect("get");
        assert_eq!(
            dates.get("PRJDB1").and_then(|r| r.date_modified.as_deref()),
            Some("2026-01-15T00:00:00Z")
        );

        let modified = cache
            .modified_since(DateFamily::Bioproject, "2026-01-01T00:00:00Z")
            .expect("since");
        assert!(modified.contains("PRJDB1"));
        assert!(!modified.contains("PRJDB2"));
    }
}
