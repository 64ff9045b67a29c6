// SPDX-License-Identifier: Apache-2.0

//! The SRA/DRA accessions store.
//!
//! `SRA_Accessions.tab` / `DRA_Accessions.tab` loaded into one sqlite
//! table per source, with the tab's 13 columns as TEXT (timestamps
//! normalized to UTC ISO on the way in, `-` and empty as NULL). Built in
//! a `.tmp` file and renamed on success; indexed on Accession,
//! Submission, BioProject and BioSample at finalize.

use crate::{StoreError, StoreErrorCode};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use seqlink_core::time::normalize_timestamp;
use seqlink_core::Config;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

const LOAD_TX_SIZE: usize = 50_000;
const SQLITE_IN_BATCH: usize = 800;

const COLUMNS: [&str; 13] = [
    "Accession",
    "Submission",
    "BioSample",
    "BioProject",
    "Study",
    "Experiment",
    "Sample",
    "Type",
    "Status",
    "Visibility",
    "Updated",
    "Published",
    "Received",
];

const TIMESTAMP_COLUMNS: [&str; 3] = ["Updated", "Published", "Received"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSource {
    Sra,
    Dra,
}

impl ArchiveSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sra => "sra",
            Self::Dra => "dra",
        }
    }

    /// Shard-file prefix for JSONL output.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Sra => "ncbi",
            Self::Dra => "dra",
        }
    }
}

/// Load one accessions tab file into its store. The header row is
/// mandatory; rows shorter than the header are dropped. Collisions on
/// `(Type, Accession)` are last-writer-wins by load order.
pub fn build_accessions_db(
    config: &Config,
    source: ArchiveSource,
    tab_path: &Path,
) -> Result<(PathBuf, u64), StoreError> {
    let tmp = config.accessions_tmp_db_path(source.as_str());
    let final_path = config.accessions_db_path(source.as_str());
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent)?;
    }
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    let mut conn = Connection::open(&tmp)?;
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=OFF;
        PRAGMA temp_store=MEMORY;
        CREATE TABLE accessions ({});
        ",
        COLUMNS
            .iter()
            .map(|c| format!("{c} TEXT"))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;

    let reader = open_maybe_gzip(tab_path)?;
    let mut lines = reader.lines();
    let header = lines
        .next()
        .ok_or_else(|| {
            StoreError::new(
                StoreErrorCode::Validation,
                format!("accessions tab is empty: {}", tab_path.display()),
            )
        })?
        .map_err(StoreError::from)?;
    let positions = header_positions(&header, tab_path)?;

    let placeholders = vec!["?"; COLUMNS.len()].join(", ");
    let insert_sql = format!(
        "INSERT INTO accessions ({}) VALUES ({placeholders})",
        COLUMNS.join(", ")
    );

    let mut total = 0u64;
    let mut batch: Vec<Vec<Option<String>>> = Vec::with_capacity(LOAD_TX_SIZE);
    for line in lines {
        let line = line.map_err(StoreError::from)?;
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        let mut row: Vec<Option<String>> = Vec::with_capacity(COLUMNS.len());
        for (name, pos) in COLUMNS.iter().zip(positions.iter()) {
            let raw = pos.and_then(|p| cols.get(p)).copied().unwrap_or("");
            row.push(normalize_cell(name, raw));
        }
        batch.push(row);
        if batch.len() >= LOAD_TX_SIZE {
            total += flush_batch(&mut conn, &insert_sql, &batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        total += flush_batch(&mut conn, &insert_sql, &batch)?;
    }

    conn.execute_batch(
        "
        CREATE INDEX idx_acc ON accessions (Accession);
        CREATE INDEX idx_sub ON accessions (Submission);
        CREATE INDEX idx_bp ON accessions (BioProject);
        CREATE INDEX idx_bs ON accessions (BioSample);
        PRAGMA wal_checkpoint(TRUNCATE);
        ",
    )?;
    drop(conn);

    if final_path.exists() {
        fs::remove_file(&final_path)?;
    }
    fs::rename(&tmp, &final_path)?;
    Ok((final_path, total))
}

fn open_maybe_gzip(path: &Path) -> Result<BufReader<Box<dyn Read>>, StoreError> {
    let file = fs::File::open(path).map_err(|e| {
        StoreError::new(
            StoreErrorCode::NotFound,
            format!("{}: {e}", path.display()),
        )
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(BufReader::new(reader))
}

fn header_positions(header: &str, path: &Path) -> Result<Vec<Option<usize>>, StoreError> {
    let names: Vec<&str> = header.split('\t').map(str::trim).collect();
    let mut positions = Vec::with_capacity(COLUMNS.len());
    for column in COLUMNS {
        positions.push(names.iter().position(|n| *n == column));
    }
    // Accession and Submission are the join keys; a tab without them is
    // not an accessions tab.
    if positions[0].is_none() || positions[1].is_none() {
        return Err(StoreError::new(
            StoreErrorCode::Validation,
            format!(
                "accessions tab header lacks Accession/Submission: {}",
                path.display()
            ),
        ));
    }
    Ok(positions)
}

fn normalize_cell(name: &str, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    if TIMESTAMP_COLUMNS.contains(&name) {
        return normalize_timestamp(trimmed);
    }
    Some(trimmed.to_string())
}

fn flush_batch(
    conn: &mut Connection,
    insert_sql: &str,
    batch: &[Vec<Option<String>>],
) -> Result<u64, StoreError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(insert_sql)?;
        for row in batch {
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }
    tx.commit()?;
    Ok(batch.len() as u64)
}

/// The internal and cross-archive relation projections the DBLink
/// extractor pulls out of one accessions store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SraRelationKind {
    BioprojectBiosample,
    SubmissionStudy,
    StudyExperiment,
    StudyAnalysis,
    SubmissionAnalysis,
    ExperimentRun,
    ExperimentSample,
    RunSample,
    BioprojectStudy,
    BioprojectExperiment,
    BioprojectRun,
    BioprojectAnalysis,
    BiosampleSample,
    BiosampleExperiment,
    BiosampleRun,
    BiosampleAnalysis,
}

impl SraRelationKind {
    const fn sql(self) -> &'static str {
        match self {
            Self::BioprojectBiosample => {
                "SELECT DISTINCT BioProject, BioSample FROM accessions
                 WHERE BioProject IS NOT NULL AND BioSample IS NOT NULL"
            }
            Self::SubmissionStudy => {
                "SELECT DISTINCT Submission, Accession FROM accessions
                 WHERE Type = 'STUDY' AND Submission IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::StudyExperiment => {
                "SELECT DISTINCT Study, Accession FROM accessions
                 WHERE Type = 'EXPERIMENT' AND Study IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::StudyAnalysis => {
                "SELECT DISTINCT Study, Accession FROM accessions
                 WHERE Type = 'ANALYSIS' AND Study IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::SubmissionAnalysis => {
                "SELECT DISTINCT Submission, Accession FROM accessions
                 WHERE Type = 'ANALYSIS' AND Submission IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::ExperimentRun => {
                "SELECT DISTINCT Experiment, Accession FROM accessions
                 WHERE Type = 'RUN' AND Experiment IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::ExperimentSample => {
                "SELECT DISTINCT Accession, Sample FROM accessions
                 WHERE Type = 'EXPERIMENT' AND Accession IS NOT NULL AND Sample IS NOT NULL"
            }
            Self::RunSample => {
                "SELECT DISTINCT Accession, Sample FROM accessions
                 WHERE Type = 'RUN' AND Accession IS NOT NULL AND Sample IS NOT NULL"
            }
            Self::BioprojectStudy => {
                "SELECT DISTINCT BioProject, Accession FROM accessions
                 WHERE Type = 'STUDY' AND BioProject IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BioprojectExperiment => {
                "SELECT DISTINCT BioProject, Accession FROM accessions
                 WHERE Type = 'EXPERIMENT' AND BioProject IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BioprojectRun => {
                "SELECT DISTINCT BioProject, Accession FROM accessions
                 WHERE Type = 'RUN' AND BioProject IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BioprojectAnalysis => {
                "SELECT DISTINCT BioProject, Accession FROM accessions
                 WHERE Type = 'ANALYSIS' AND BioProject IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BiosampleSample => {
                "SELECT DISTINCT BioSample, Accession FROM accessions
                 WHERE Type = 'SAMPLE' AND BioSample IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BiosampleExperiment => {
                "SELECT DISTINCT BioSample, Accession FROM accessions
                 WHERE Type = 'EXPERIMENT' AND BioSample IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BiosampleRun => {
                "SELECT DISTINCT BioSample, Accession FROM accessions
                 WHERE Type = 'RUN' AND BioSample IS NOT NULL AND Accession IS NOT NULL"
            }
            Self::BiosampleAnalysis => {
                "SELECT DISTINCT BioSample, Accession FROM accessions
                 WHERE Type = 'ANALYSIS' AND BioSample IS NOT NULL AND Accession IS NOT NULL"
            }
        }
    }
}

/// Per-accession status/visibility/date projection used during JSONL
/// emission.
#[derive(Debug, Clone, Default)]
pub struct AccessionInfo {
    pub status: Option<String>,
    pub visibility: Option<String>,
    pub received: Option<String>,
    pub updated: Option<String>,
    pub published: Option<String>,
    pub type_: Option<String>,
}

pub struct AccessionsDb {
    conn: Connection,
    source: ArchiveSource,
}

impl AccessionsDb {
    pub fn open(config: &Config, source: ArchiveSource) -> Result<Self, StoreError> {
        let path = config.accessions_db_path(source.as_str());
        if !path.exists() {
            return Err(StoreError::new(
                StoreErrorCode::NotFound,
                format!("accessions store not found: {}", path.display()),
            ));
        }
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn, source })
    }

    #[must_use]
    pub fn source(&self) -> ArchiveSource {
        self.source
    }

    pub fn relation_pairs(
        &self,
        kind: SraRelationKind,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self.conn.prepare(kind.sql())?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn accession_info_bulk(
        &self,
        accessions: &[String],
    ) -> Result<BTreeMap<String, AccessionInfo>, StoreError> {
        let mut result = BTreeMap::new();
        for chunk in accessions.chunks(SQLITE_IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT Accession, Status, Visibility, Received, Updated, Published, Type
                 FROM accessions WHERE Accession IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let accession: String = row.get(0)?;
                result.insert(
                    accession,
                    AccessionInfo {
                        status: row.get(1)?,
                        visibility: row.get(2)?,
                        received: row.get(3)?,
                        updated: row.get(4)?,
                        published: row.get(5)?,
                        type_: row.get(6)?,
                    },
                );
            }
        }
        Ok(result)
    }

    pub fn all_submissions(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT Accession FROM accessions
             WHERE Type = 'SUBMISSION' ORDER BY Accession",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Submissions with any row updated at or after the cutoff. ISO
    /// timestamps compare lexicographically, so a bare `YYYY-MM-DD`
    /// cutoff works too.
    pub fn updated_submissions_since(&self, cutoff: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT Submission FROM accessions
             WHERE Submission IS NOT NULL AND Updated >= ?1 ORDER BY Submission",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn submissions_for_accessions(
        &self,
        accessions: &[String],
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let mut result = BTreeMap::new();
        for chunk in accessions.chunks(SQLITE_IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT DISTINCT Accession, Submission FROM accessions
                 WHERE Accession IN ({placeholders}) AND Submission IS NOT NULL"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                result.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
            }
        }
        Ok(result)
    }

    /// Every accession belonging to each submission, submission-sorted.
    pub fn accessions_for_submissions(
        &self,
        submissions: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let mut result: BTreeMap<String, Vec<String>> =
            submissions.iter().map(|s| (s.clone(), Vec::new())).collect();
        let list: Vec<String> = submissions.iter().cloned().collect();
        for chunk in list.chunks(SQLITE_IN_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT Submission, Accession FROM accessions
                 WHERE Submission IN ({placeholders})
                 ORDER BY Submission, Accession"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let submission: String = row.get(0)?;
                let accession: String = row.get(1)?;
                if let Some(bucket) = result.get_mut(&submission) {
                    bucket.push(accession);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> Config {
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

    const HEADER: &str = "Accession\tSubmission\tStatus\tUpdated\tPublished\tReceived\tType\tCenter\tVisibility\tAlias\tExperiment\tSample\tStudy\tLoaded\tSpots\tBases\tMd5sum\tBioSample\tBioProject\tReplacedBy";

    fn row(cols: &[(&str, &str)]) -> String {
        let names: Vec<&str> = HEADER.split('\t').collect();
        names
            .iter()
            .map(|n| cols.iter().find(|(k, _)| k == n).map_or("-", |(_, v)| v))
            .collect::<Vec<_>>()
            .join("\t")
    }

    fn build_fixture(config: &Config) -> AccessionsDb {
        let tab = config.const_dir.join("DRA_Accessions.tab");
        fs::create_dir_all(tab.parent().expect("parent")).expect("mkdir");
        let lines = vec![
            HEADER.to_string(),
            row(&[
                ("Accession", "DRA000001"),
                ("Submission", "DRA000001"),
                ("Type", "SUBMISSION"),
                ("Updated", "2026-01-10 00:00:00"),
                ("Status", "live"),
            ]),
            row(&[
                ("Accession", "DRP000001"),
                ("Submission", "DRA000001"),
                ("Type", "STUDY"),
                ("BioProject", "PRJDB1"),
                ("Updated", "2026-01-10 00:00:00"),
            ]),
            row(&[
                ("Accession", "DRX000001"),
                ("Submission", "DRA000001"),
                ("Type", "EXPERIMENT"),
                ("Study", "DRP000001"),
                ("Sample", "DRS000001"),
                ("BioSample", "SAMD1"),
                ("BioProject", "PRJDB1"),
            ]),
            row(&[
                ("Accession", "DRR000001"),
                ("Submission", "DRA000001"),
                ("Type", "RUN"),
                ("Experiment", "DRX000001"),
                ("Sample", "DRS000001"),
                ("Updated", "2025-11-01 00:00:00"),
            ]),
            row(&[
                ("Accession", "DRS000001"),
                ("Submission", "DRA000001"),
                ("Type", "SAMPLE"),
                ("BioSample", "SAMD1"),
            ]),
        ];
        fs::write(&tab, lines.join("\n") + "\n").expect("write tab");
        let (_, total) = build_accessions_db(config, ArchiveSource::Dra, &tab).expect("build");
        assert_eq!(total, 5);
        AccessionsDb::open(config, ArchiveSource::Dra).expect("open")
    }

    #[test]
    fn relations_and_lookups_cover_the_fixture() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let db = build_fixture(&config);

        let bp_bs = db
            .relation_pairs(SraRelationKind::BioprojectBiosample)
            .expect("bp_bs");
        assert!(bp_bs.contains(&("PRJDB1".to_string(), "SAMD1".to_string())));

        let exp_run = db
            .relation_pairs(SraRelationKind::ExperimentRun)
            .expect("exp_run");
        assert_eq!(
            exp_run,
            vec![("DRX000001".to_string(), "DRR000001".to_string())]
        );

        let subs = db.all_submissions().expect("subs");
        assert_eq!(subs, vec!["DRA000001".to_string()]);

        let updated = db
            .updated_submissions_since("2026-01-01")
            .expect("updated");
        assert_eq!(updated, vec!["DRA000001".to_string()]);
        let none = db.updated_submissions_since("2026-02-01").expect("none");
        assert!(none.is_empty());

        let back = db
            .submissions_for_accessions(&["DRR000001".to_string()])
            .expect("reverse");
        assert_eq!(back.get("DRR000001").map(String::as_str), Some("DRA000001"));

        let info = db
            .accession_info_bulk(&["DRA000001".to_string(), "DRR000001".to_string()])
            .expect("info");
        assert_eq!(
            info.get("DRA000001").and_then(|i| i.updated.as_deref()),
            Some("2026-01-10T00:00:00Z")
        );
        assert_eq!(
            info.get("DRR000001").and_then(|i| i.type_.as_deref()),
            Some("RUN")
        );
    }

    #[test]
    fn header_is_mandatory() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let tab = config.const_dir.join("bad.tab");
        fs::create_dir_all(tab.parent().expect("parent")).expect("mkdir");
        fs::write(&tab, "DRR1\tDRA1\n").expect("write");
        let err = build_accessions_db(&config, ArchiveSource::Dra, &tab)
            .expect_err("headerless tab must fail");
        assert_eq!(err.code, StoreErrorCode::Validation);
    }
}
