// SPDX-License-Identifier: Apache-2.0

//! External resource checks and archive syncs.
//!
//! `check_external_resources` is the pipeline's first step: it verifies
//! that every on-disk input the day's run will need is present, and
//! reports the full list rather than stopping at the first hole.
//! `sync_*_tar` refreshes the local SRA/DRA archives from their staged
//! copies and rebuilds the member index so emitters can seek.

use crate::IngestError;
use chrono::Duration;
use seqlink_core::{Config, LogTarget, RunLogger};
use seqlink_store::tar_index;
use std::fs;
use std::path::{Path, PathBuf};

const TAB_LOOKBACK_DAYS: i64 = 180;

/// Newest `SRA_Accessions.tab.YYYYMMDD` under `{const}/sra/ncbi/{YYYY}/{MM}/`,
/// scanning back from the run date.
#[must_use]
pub fn find_latest_sra_tab(config: &Config) -> Option<PathBuf> {
    let base = config.const_dir.join("sra").join("ncbi");
    for days in 0..TAB_LOOKBACK_DAYS {
        let date = config.today - Duration::days(days);
        let path = base
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(format!("SRA_Accessions.tab.{}", date.format("%Y%m%d")));
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Newest `{YYYYMMDD}.DRA_Accessions.tab` under `{const}/sra/dra/`.
#[must_use]
pub fn find_latest_dra_tab(config: &Config) -> Option<PathBuf> {
    let base = config.const_dir.join("sra").join("dra");
    for days in 0..TAB_LOOKBACK_DAYS {
        let date = config.today - Duration::days(days);
        let path = base.join(format!("{}.DRA_Accessions.tab", date.format("%Y%m%d")));
        if path.exists() {
            return Some(path);
        }
    }
    None
}

pub const JGA_RELATION_CSVS: [&str; 7] = [
    "analysis-study-relation.csv",
    "data-experiment-relation.csv",
    "dataset-analysis-relation.csv",
    "dataset-data-relation.csv",
    "dataset-policy-relation.csv",
    "experiment-study-relation.csv",
    "policy-dac-relation.csv",
];

pub const TRAD_ORGANISM_LISTS: [&str; 6] = [
    "wgs/WGS_ORGANISM_LIST.txt",
    "tls/TLS_ORGANISM_LIST.txt",
    "tsa/TSA_ORGANISM_LIST.txt",
    "tpa/wgs/TPA_WGS_ORGANISM_LIST.txt",
    "tpa/tsa/TPA_TSA_ORGANISM_LIST.txt",
    "tpa/tls/TPA_TLS_ORGANISM_LIST.txt",
];

/// Check every input resource the pipeline reads. Returns the missing
/// paths; empty means the run can proceed.
pub fn check_external_resources(config: &Config, log: &RunLogger) -> Vec<PathBuf> {
    let mut required: Vec<PathBuf> = vec![
        config.bioproject_xml_path("ncbi"),
        config.bioproject_xml_path("ddbj"),
        config.biosample_xml_path("ncbi"),
        config.biosample_xml_path("ddbj"),
    ];
    for name in ["jga-study.xml", "jga-dataset.xml", "jga-dac.xml", "jga-policy.xml"] {
        required.push(config.jga_dir().join(name));
    }
    for name in ["study.date.csv", "dataset.date.csv", "dac.date.csv", "policy.date.csv"] {
        required.push(config.jga_dir().join(name));
    }
    for name in JGA_RELATION_CSVS {
        required.push(config.jga_dir().join(name));
    }
    for rel in TRAD_ORGANISM_LISTS {
        required.push(config.trad_dir().join(rel));
    }
    if config.assembly_summary_url.is_none() {
        required.push(config.assembly_summary_path());
    }

    let mut missing: Vec<PathBuf> = required
        .into_iter()
        .filter(|path| !path.exists())
        .collect();

    if find_latest_sra_tab(config).is_none() {
        missing.push(config.const_dir.join("sra").join("ncbi").join("SRA_Accessions.tab.*"));
    }
    if find_latest_dra_tab(config).is_none() {
        missing.push(config.const_dir.join("sra").join("dra").join("*.DRA_Accessions.tab"));
    }

    // GEA and MetaboBank trees are allowed to be absent (their
    // extractors then contribute nothing), but note it.
    for optional in [config.gea_dir(), config.metabobank_dir()] {
        if !optional.exists() {
            log.warning(
                &format!("optional resource tree not found: {}", optional.display()),
                LogTarget::file(optional.display().to_string()),
            );
        }
    }

    for path in &missing {
        log.error(
            "required external resource not found",
            "resource missing",
            LogTarget::file(path.display().to_string()),
        );
    }
    if missing.is_empty() {
        log.info("all external resources present", LogTarget::default());
    }
    missing
}

/// Copy a freshly staged archive over the local tar and rebuild the
/// member index. The copy goes to a `.tmp` sibling first so a failed
/// sync never clobbers the working archive.
pub fn sync_tar(staged: &Path, local: &Path, log: &RunLogger) -> Result<u64, IngestError> {
    if !staged.exists() {
        return Err(IngestError(format!(
            "staged archive not found: {}",
            staged.display()
        )));
    }
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = local.with_extension("tar.tmp");
    let bytes = fs::copy(staged, &tmp)?;
    fs::rename(&tmp, local)?;
    log.info(
        &format!("synced archive ({bytes} bytes)"),
        LogTarget::file(local.display().to_string()),
    );

    let index = tar_index::load_or_build_index(local)?;
    log.info(
        &format!("indexed {} archive members", index.members.len()),
        LogTarget::file(local.display().to_string()),
    );
    Ok(bytes)
}
