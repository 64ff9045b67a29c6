// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration from environment variables.
//!
//! Everything the pipeline reads or writes hangs off two roots:
//! `RESULT_DIR` for per-run outputs and `CONST_DIR` for the daily input
//! resources and long-lived stores. `DATE` overrides today's date for
//! reproducible reruns.

use crate::error::{PipelineError, PipelineErrorCode};
use chrono::{NaiveDate, Utc};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_MARGIN_DAYS: i64 = 30;
pub const DEFAULT_PARALLEL_NUM: usize = 4;
pub const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone)]
pub struct Config {
    pub result_dir: PathBuf,
    pub const_dir: PathBuf,
    pub dblink_files_dir: PathBuf,
    pub postgres_url: Option<String>,
    pub es_url: String,
    pub today: NaiveDate,
    pub parallel_num: usize,
    pub margin_days: i64,
    pub assembly_summary_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, PipelineError> {
        let result_dir = env_path("RESULT_DIR", "seqlink_results");
        let const_dir = env_path("CONST_DIR", "seqlink_const");
        let dblink_files_dir = match env::var("DBLINK_PATH") {
            Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
            _ => result_dir.join("dblink_files"),
        };

        let today = match env::var("DATE") {
            Ok(raw) if !raw.trim().is_empty() => {
                NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| {
                    PipelineError::new(
                        PipelineErrorCode::Config,
                        format!("DATE must be YYYYMMDD: {e}"),
                    )
                })?
            }
            _ => Utc::now().date_naive(),
        };

        Ok(Self {
            result_dir,
            const_dir,
            dblink_files_dir,
            postgres_url: env::var("POSTGRES_URL").ok().filter(|v| !v.is_empty()),
            es_url: env::var("ES_URL").unwrap_or_else(|_| "http://localhost:9200".to_string()),
            today,
            parallel_num: env_usize("SEQLINK_PARALLEL_NUM", DEFAULT_PARALLEL_NUM),
            margin_days: env_i64("SEQLINK_MARGIN_DAYS", DEFAULT_MARGIN_DAYS),
            assembly_summary_url: env::var("ASSEMBLY_SUMMARY_URL")
                .ok()
                .filter(|v| !v.is_empty()),
        })
    }

    #[must_use]
    pub fn today_str(&self) -> String {
        self.today.format(DATE_FORMAT).to_string()
    }

    // --- RESULT_DIR layout ---

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.result_dir.join("logs")
    }

    #[must_use]
    pub fn log_db_path(&self) -> PathBuf {
        self.result_dir.join("log.sqlite")
    }

    #[must_use]
    pub fn last_run_path(&self) -> PathBuf {
        self.result_dir.join("last_run.json")
    }

    /// Shard directory for a family's split XML (`bp` or `bs`).
    #[must_use]
    pub fn tmp_xml_dir(&self, short: &str) -> PathBuf {
        self.result_dir.join("tmp_xml").join(short)
    }

    /// JSONL output directory for one family and this run's date.
    #[must_use]
    pub fn jsonl_dir(&self, family: &str) -> PathBuf {
        self.result_dir
            .join(family)
            .join("jsonl")
            .join(self.today_str())
    }

    #[must_use]
    pub fn regenerate_dir(&self) -> PathBuf {
        self.result_dir.join("regenerate").join(self.today_str())
    }

    // --- CONST_DIR layout: stores ---

    #[must_use]
    pub fn dblink_dir(&self) -> PathBuf {
        self.const_dir.join("dblink")
    }

    #[must_use]
    pub fn dblink_tmp_db_path(&self) -> PathBuf {
        self.dblink_dir().join("dblink.tmp.sqlite")
    }

    #[must_use]
    pub fn dblink_db_path(&self) -> PathBuf {
        self.dblink_dir().join("dblink.sqlite")
    }

    #[must_use]
    pub fn dblink_write_lock_path(&self) -> PathBuf {
        self.dblink_dir().join(".write.lock")
    }

    #[must_use]
    pub fn accessions_db_path(&self, source: &str) -> PathBuf {
        self.const_dir.join("sra").join(format!("{source}_accessions.sqlite"))
    }

    #[must_use]
    pub fn accessions_tmp_db_path(&self, source: &str) -> PathBuf {
        self.const_dir
            .join("sra")
            .join(format!("{source}_accessions.tmp.sqlite"))
    }

    #[must_use]
    pub fn date_cache_path(&self) -> PathBuf {
        self.const_dir.join("bp_bs_date.sqlite")
    }

    #[must_use]
    pub fn date_cache_tmp_path(&self) -> PathBuf {
        self.const_dir.join("bp_bs_date.tmp.sqlite")
    }

    #[must_use]
    pub fn ncbi_tar_path(&self) -> PathBuf {
        self.const_dir.join("sra").join("NCBI_SRA.tar")
    }

    #[must_use]
    pub fn dra_tar_path(&self) -> PathBuf {
        self.const_dir.join("sra").join("DRA.tar")
    }

    // --- CONST_DIR layout: blacklists & preserved edges ---

    #[must_use]
    pub fn blacklist_path(&self, short: &str) -> PathBuf {
        self.const_dir.join(short).join("blacklist.txt")
    }

    #[must_use]
    pub fn bp_bs_preserved_path(&self) -> PathBuf {
        self.dblink_dir().join("bpbs_preserved.tsv")
    }

    #[must_use]
    pub fn mtb_bp_preserved_path(&self) -> PathBuf {
        self.dblink_dir().join("mtb_bp_preserved.tsv")
    }

    #[must_use]
    pub fn mtb_bs_preserved_path(&self) -> PathBuf {
        self.dblink_dir().join("mtb_bs_preserved.tsv")
    }

    // --- CONST_DIR layout: daily input resources ---

    #[must_use]
    pub fn bioproject_xml_path(&self, source: &str) -> PathBuf {
        self.const_dir
            .join("bioproject")
            .join(format!("{source}_bioproject.xml"))
    }

    #[must_use]
    pub fn biosample_xml_path(&self, source: &str) -> PathBuf {
        self.const_dir
            .join("biosample")
            .join(format!("{source}_biosample_set.xml.gz"))
    }

    #[must_use]
    pub fn jga_dir(&self) -> PathBuf {
        self.const_dir.join("jga")
    }

    #[must_use]
    pub fn gea_dir(&self) -> PathBuf {
        self.const_dir.join("gea")
    }

    #[must_use]
    pub fn metabobank_dir(&self) -> PathBuf {
        self.const_dir.join("metabobank")
    }

    #[must_use]
    pub fn trad_dir(&self) -> PathBuf {
        self.const_dir.join("trad")
    }

    #[must_use]
    pub fn assembly_summary_path(&self) -> PathBuf {
        self.const_dir
            .join("assembly")
            .join("assembly_summary_genbank.txt")
    }
}

fn env_path(name: &str, default_rel: &str) -> PathBuf {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v),
        _ => Path::new(".").join(default_rel),
    }
}

pub fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

pub fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}
