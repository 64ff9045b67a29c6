// SPDX-License-Identifier: Apache-2.0

//! `last_run.json`: the per-family incremental high-water marks.
//!
//! The file holds one UTC timestamp (or null) per family. An incremental
//! emitter subtracts `margin_days` from its entry to get the effective
//! cutoff, and only rewrites the entry with the run's start timestamp
//! after both the JSONL materialization and the sink ingest succeeded.
//! The rewrite is atomic: write a `.tmp` sibling, fsync, rename.

use chrono::{DateTime, Utc};
use seqlink_core::error::{PipelineError, PipelineErrorCode};
use seqlink_core::time::apply_margin;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Bioproject,
    Biosample,
    Sra,
    Jga,
}

impl Family {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bioproject => "bioproject",
            Self::Biosample => "biosample",
            Self::Sra => "sra",
            Self::Jga => "jga",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "bioproject" => Some(Self::Bioproject),
            "biosample" => Some(Self::Biosample),
            "sra" => Some(Self::Sra),
            "jga" => Some(Self::Jga),
            _ => None,
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LastRun {
    pub bioproject: Option<String>,
    pub biosample: Option<String>,
    pub sra: Option<String>,
    pub jga: Option<String>,
}

impl LastRun {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::new(
                PipelineErrorCode::Parse,
                format!("invalid last_run.json: {e}"),
            )
        })
    }

    #[must_use]
    pub fn get(&self, family: Family) -> Option<&str> {
        match family {
            Family::Bioproject => self.bioproject.as_deref(),
            Family::Biosample => self.biosample.as_deref(),
            Family::Sra => self.sra.as_deref(),
            Family::Jga => self.jga.as_deref(),
        }
    }

    pub fn set(&mut self, family: Family, value: String) {
        let slot = match family {
            Family::Bioproject => &mut self.bioproject,
            Family::Biosample => &mut self.biosample,
            Family::Sra => &mut self.sra,
            Family::Jga => &mut self.jga,
        };
        *slot = Some(value);
    }

    /// The effective incremental cutoff for a family, or `None` when the
    /// family has never completed a run (full mode).
    #[must_use]
    pub fn cutoff(&self, family: Family, margin_days: i64) -> Option<DateTime<Utc>> {
        let since = seqlink_core::time::parse_flexible(self.get(family)?)?;
        Some(apply_margin(since, margin_days))
    }

    pub fn store(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(self).map_err(|e| {
            PipelineError::new(PipelineErrorCode::Io, format!("serialize last_run: {e}"))
        })?.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Record a successful family run: reload-modify-store so concurrent
    /// families never clobber each other's entries.
    pub fn record_success(
        path: &Path,
        family: Family,
        started_at: &str,
    ) -> Result<(), PipelineError> {
        let mut state = Self::load(path)?;
        state.set(family, started_at.to_string());
        state.store(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlink_core::time::format_utc;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_all_null() {
        let tmp = tempdir().expect("tempdir");
        let state = LastRun::load(&tmp.path().join("last_run.json")).expect("load");
        assert_eq!(state, LastRun::default());
        assert!(state.cutoff(Family::Bioproject, 30).is_none());
    }

    #[test]
    fn cutoff_subtracts_margin() {
        let state = LastRun {
            bioproject: Some("2026-01-30T00:00:00Z".to_string()),
            ..LastRun::default()
        };
        let cutoff = state.cutoff(Family::Bioproject, 30).expect("cutoff");
        assert_eq!(format_utc(cutoff), "2025-12-31T00:00:00Z");
    }

    #[test]
    fn record_success_updates_only_one_family() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("last_run.json");
        let seed = LastRun {
            sra: Some("2026-01-01T00:00:00Z".to_string()),
            ..LastRun::default()
        };
        seed.store(&path).expect("store");

        LastRun::record_success(&path, Family::Bioproject, "2026-02-01T12:00:00Z")
            .expect("record");
        let state = LastRun::load(&path).expect("reload");
        assert_eq!(state.bioproject.as_deref(), Some("2026-02-01T12:00:00Z"));
        assert_eq!(state.sra.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert!(state.jga.is_none());
    }

    #[test]
    fn store_is_byte_stable() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("last_run.json");
        let state = LastRun {
            bioproject: Some("2026-01-30T00:00:00Z".to_string()),
            ..LastRun::default()
        };
        state.store(&path).expect("store once");
        let first = std::fs::read(&path).expect("read once");
        state.store(&path).expect("store twice");
        let second = std::fs::read(&path).expect("read twice");
        assert_eq!(first, second);
    }
}
