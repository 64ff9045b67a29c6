// SPDX-License-Identifier: Apache-2.0

//! Structured per-run logging.
//!
//! Each pipeline step runs under a [`RunLogger`]: records append to
//! `{RESULT_DIR}/logs/{run_id}.log.jsonl`, mirror into the `log.sqlite`
//! summary store, and echo through `tracing` for the operator. A start
//! record is written on construction; the end record is written by
//! [`RunLogger::finish`], or with FAILED status from `Drop` if the step
//! never finished.
//!
//! DEBUG records carry a closed-set `debug_category`; ERROR records carry
//! an `error` string.

use crate::config::Config;
use crate::error::PipelineError;
use crate::time::now_utc_string;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

/// Closed set of categories for record-level skips and normalizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum DebugCategory {
    InvalidAccessionId,
    InvalidBiosampleId,
    InvalidBioprojectId,
    PrivateUmbrellaParent,
    XmlAccessionCollectFailed,
    MissingIdentifier,
    DuplicateAccession,
    NormalizeOwnerName,
    NormalizeModel,
    NormalizeOrganizationName,
    NormalizeGrantAgency,
    NormalizeLocusTagPrefix,
    NormalizeBiosampleSetId,
    NormalizeLocalId,
}

impl DebugCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidAccessionId => "INVALID_ACCESSION_ID",
            Self::InvalidBiosampleId => "INVALID_BIOSAMPLE_ID",
            Self::InvalidBioprojectId => "INVALID_BIOPROJECT_ID",
            Self::PrivateUmbrellaParent => "PRIVATE_UMBRELLA_PARENT",
            Self::XmlAccessionCollectFailed => "XML_ACCESSION_COLLECT_FAILED",
            Self::MissingIdentifier => "MISSING_IDENTIFIER",
            Self::DuplicateAccession => "DUPLICATE_ACCESSION",
            Self::NormalizeOwnerName => "NORMALIZE_OWNER_NAME",
            Self::NormalizeModel => "NORMALIZE_MODEL",
            Self::NormalizeOrganizationName => "NORMALIZE_ORGANIZATION_NAME",
            Self::NormalizeGrantAgency => "NORMALIZE_GRANT_AGENCY",
            Self::NormalizeLocusTagPrefix => "NORMALIZE_LOCUS_TAG_PREFIX",
            Self::NormalizeBiosampleSetId => "NORMALIZE_BIOSAMPLE_SET_ID",
            Self::NormalizeLocalId => "NORMALIZE_LOCAL_ID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Success,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// Optional context attached to a record.
#[derive(Debug, Clone, Default)]
pub struct LogTarget {
    pub file: Option<String>,
    pub accession: Option<String>,
    pub source: Option<String>,
    pub index: Option<String>,
}

impl LogTarget {
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            file: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn accession(accession: impl Into<String>) -> Self {
        Self {
            accession: Some(accession.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_accession(mut self, accession: impl Into<String>) -> Self {
        self.accession = Some(accession.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: String,
    pub level: LogLevel,
    pub run_id: String,
    pub run_name: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_category: Option<DebugCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Inner {
    file: std::io::BufWriter<fs::File>,
    db: Connection,
    level_counts: BTreeMap<&'static str, u64>,
}

pub struct RunLogger {
    run_id: String,
    run_name: String,
    started_at: String,
    inner: Mutex<Inner>,
    cancel: Arc<AtomicBool>,
    finished: AtomicBool,
}

impl RunLogger {
    pub fn start(config: &Config, run_name: &str) -> Result<Self, PipelineError> {
        let started_at = now_utc_string();
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let run_id = format!("{run_name}_{stamp}");

        let logs_dir = config.logs_dir();
        fs::create_dir_all(&logs_dir)?;
        let log_path = logs_dir.join(format!("{run_id}.log.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let db = Connection::open(config.log_db_path())?;
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
              run_id TEXT PRIMARY KEY,
              run_name TEXT NOT NULL,
              started_at TEXT NOT NULL,
              ended_at TEXT,
              status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS records (
              run_id TEXT NOT NULL,
              ts TEXT NOT NULL,
              level TEXT NOT NULL,
              msg TEXT,
              file TEXT,
              accession TEXT,
              source TEXT,
              es_index TEXT,
              debug_category TEXT,
              error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_records_run ON records(run_id);
            ",
        )?;
        db.execute(
            "INSERT INTO runs (run_id, run_name, started_at, status) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, run_name, started_at, RunStatus::InProgress.as_str()],
        )?;

        let logger = Self {
            run_id,
            run_name: run_name.to_string(),
            started_at,
            inner: Mutex::new(Inner {
                file: std::io::BufWriter::new(file),
                db,
                level_counts: BTreeMap::new(),
            }),
            cancel: Arc::new(AtomicBool::new(false)),
            finished: AtomicBool::new(false),
        };
        logger.info(&format!("run started: {run_name}"), LogTarget::default());
        Ok(logger)
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Timestamp of run start; becomes the family's `last_run.json` entry
    /// on success.
    #[must_use]
    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Cooperative cancellation flag shared with worker threads.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn info(&self, msg: &str, target: LogTarget) {
        self.write(LogLevel::Info, msg, target, None, None);
    }

    pub fn warning(&self, msg: &str, target: LogTarget) {
        self.write(LogLevel::Warning, msg, target, None, None);
    }

    pub fn debug(&self, msg: &str, category: DebugCategory, target: LogTarget) {
        self.write(LogLevel::Debug, msg, target, Some(category), None);
    }

    pub fn error(&self, msg: &str, error: &str, target: LogTarget) {
        self.write(LogLevel::Error, msg, target, None, Some(error.to_string()));
    }

    /// CRITICAL also raises the cancellation flag so in-flight workers
    /// drain and exit.
    pub fn critical(&self, msg: &str, error: &str, target: LogTarget) {
        self.request_cancel();
        self.write(
            LogLevel::Critical,
            msg,
            target,
            None,
            Some(error.to_string()),
        );
    }

    fn write(
        &self,
        level: LogLevel,
        msg: &str,
        target: LogTarget,
        debug_category: Option<DebugCategory>,
        error: Option<String>,
    ) {
        let record = LogRecord {
            ts: now_utc_string(),
            level,
            run_id: self.run_id.clone(),
            run_name: self.run_name.clone(),
            msg: msg.to_string(),
            file: target.file,
            accession: target.accession,
            source: target.source,
            index: target.index,
            debug_category,
            error,
        };
        emit_tracing(&record);

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        *inner.level_counts.entry(level.as_str()).or_insert(0) += 1;
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = writeln!(inner.file, "{line}");
            let _ = inner.file.flush();
        }
        let _ = inner.db.execute(
            "INSERT INTO records (run_id, ts, level, msg, file, accession, source, es_index, debug_category, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.run_id,
                record.ts,
                record.level.as_str(),
                record.msg,
                record.file,
                record.accession,
                record.source,
                record.index,
                record.debug_category.map(DebugCategory::as_str),
                record.error,
            ],
        );
    }

    #[must_use]
    pub fn level_counts(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .level_counts
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), *v))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn finish(&self, status: RunStatus) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let counts = self.level_counts();
        let summary = counts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        match status {
            RunStatus::Success => {
                self.write(
                    LogLevel::Info,
                    &format!("run ended: status={} {summary}", status.as_str()),
                    LogTarget::default(),
                    None,
                    None,
                );
            }
            _ => {
                self.write(
                    LogLevel::Error,
                    &format!("run ended: status={} {summary}", status.as_str()),
                    LogTarget::default(),
                    None,
                    Some("run did not complete successfully".to_string()),
                );
            }
        }
        if let Ok(inner) = self.inner.lock() {
            let _ = inner.db.execute(
                "UPDATE runs SET ended_at = ?1, status = ?2 WHERE run_id = ?3",
                params![now_utc_string(), status.as_str(), self.run_id],
            );
        }
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            self.finish(RunStatus::Failed);
        }
    }
}

fn emit_tracing(record: &LogRecord) {
    match record.level {
        LogLevel::Critical | LogLevel::Error => {
            tracing::error!(
                run_id = %record.run_id,
                file = record.file.as_deref(),
                accession = record.accession.as_deref(),
                error = record.error.as_deref(),
                "{}",
                record.msg
            );
        }
        LogLevel::Warning => {
            tracing::warn!(
                run_id = %record.run_id,
                file = record.file.as_deref(),
                accession = record.accession.as_deref(),
                "{}",
                record.msg
            );
        }
        LogLevel::Info => {
            tracing::info!(run_id = %record.run_id, "{}", record.msg);
        }
        LogLevel::Debug => {
            tracing::debug!(
                run_id = %record.run_id,
                category = record.debug_category.map(DebugCategory::as_str),
                accession = record.accession.as_deref(),
                "{}",
                record.msg
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            result_dir: root.to_path_buf(),
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

    #[test]
    fn start_and_finish_write_bracketing_records() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let logger = RunLogger::start(&config, "init_dblink_db").expect("start");
        let run_id = logger.run_id().to_string();
        logger.info("doing work", LogTarget::file("/x/y.xml"));
        logger.debug(
            "skipping invalid biosample: X",
            DebugCategory::InvalidBiosampleId,
            LogTarget::accession("X"),
        );
        logger.finish(RunStatus::Success);

        let log_path: PathBuf = config.logs_dir().join(format!("{run_id}.log.jsonl"));
        let raw = std::fs::read_to_string(log_path).expect("log file");
        let lines: Vec<&str> = raw.lines().collect();
        assert!(lines.len() >= 4);
        assert!(lines[0].contains("run started"));
        assert!(lines.last().expect("end line").contains("SUCCESS"));

        let db = Connection::open(config.log_db_path()).expect("db");
        let status: String = db
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .expect("status row");
        assert_eq!(status, "SUCCESS");
        let debug_count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM records WHERE run_id = ?1 AND level = 'DEBUG'",
                params![run_id],
                |r| r.get(0),
            )
            .expect("debug count");
        assert_eq!(debug_count, 1);
    }

    #[test]
    fn drop_without_finish_records_failure() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let run_id;
        {
            let logger = RunLogger::start(&config, "adhoc").expect("start");
            run_id = logger.run_id().to_string();
        }
        let db = Connection::open(config.log_db_path()).expect("db");
        let status: String = db
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .expect("status row");
        assert_eq!(status, "FAILED");
    }

    #[test]
    fn critical_sets_cancellation() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let logger = RunLogger::start(&config, "adhoc").expect("start");
        assert!(!logger.cancelled());
        logger.critical("db gone", "connection refused", LogTarget::default());
        assert!(logger.cancelled());
        logger.finish(RunStatus::Failed);
    }
}
