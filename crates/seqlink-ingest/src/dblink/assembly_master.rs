// SPDX-License-Identifier: Apache-2.0

//! Assembly / WGS-master relation extraction.
//!
//! `assembly_summary_genbank.txt` (local file, or streamed from the
//! configured URL) yields six edge families per data row; the TRAD
//! organism lists add master <-> bioproject/biosample pairs. Master
//! accessions collapse onto their series master before classification.

use crate::dblink::{checked_pair, run_extractor, EdgeSink};
use crate::resources::TRAD_ORGANISM_LISTS;
use crate::IngestError;
use seqlink_core::accession::normalize_master_id;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const SUMMARY_ABSENT: &str = "na";

pub fn create_assembly_and_master_relations(
    config: &Config,
    log: &RunLogger,
) -> Result<u64, IngestError> {
    let written = run_extractor(config, |sender| {
        let mut sink = sender.sink();
        process_assembly_summary(config, log, &mut sink)?;
        process_trad_lists(config, log, &mut sink)?;
        sink.finish()
    })?;
    log.info(
        &format!("loaded {written} assembly/master edges"),
        LogTarget::default(),
    );
    Ok(written)
}

fn summary_reader(config: &Config, log: &RunLogger) -> Result<Box<dyn Read>, IngestError> {
    if let Some(url) = &config.assembly_summary_url {
        log.info(
            &format!("streaming assembly summary from {url}"),
            LogTarget::file(url.clone()),
        );
        let response = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| IngestError(e.to_string()))?
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| IngestError(format!("assembly summary fetch failed: {e}")))?;
        return Ok(Box::new(response));
    }
    let path = config.assembly_summary_path();
    log.info(
        "reading assembly summary",
        LogTarget::file(path.display().to_string()),
    );
    let file = std::fs::File::open(&path)
        .map_err(|e| IngestError(format!("{}: {e}", path.display())))?;
    Ok(Box::new(file))
}

/// Data columns: [0] assembly accession, [1] bioproject, [2] biosample,
/// [3] wgs master. `na` marks an absent value.
fn process_assembly_summary(
    config: &Config,
    log: &RunLogger,
    sink: &mut EdgeSink,
) -> Result<(), IngestError> {
    let reader = BufReader::new(summary_reader(config, log)?);
    let file = "assembly_summary_genbank.txt";
    let mut rows = 0u64;

    for line in reader.lines() {
        let line = line.map_err(|e| IngestError(e.to_string()))?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 4 {
            continue;
        }
        let assembly = cols[0].trim();
        let bioproject = cols[1].trim();
        let biosample = cols[2].trim();
        let master = normalize_master_id(cols[3].trim());

        let pairs: [(AccessionType, &str, AccessionType, &str); 6] = [
            (AccessionType::InsdcAssembly, assembly, AccessionType::Bioproject, bioproject),
            (AccessionType::InsdcAssembly, assembly, AccessionType::Biosample, biosample),
            (AccessionType::InsdcAssembly, assembly, AccessionType::InsdcMaster, &master),
            (AccessionType::InsdcMaster, &master, AccessionType::Bioproject, bioproject),
            (AccessionType::InsdcMaster, &master, AccessionType::Biosample, biosample),
            (AccessionType::Biosample, biosample, AccessionType::Bioproject, bioproject),
        ];
        for (left_type, left, right_type, right) in pairs {
            if left == SUMMARY_ABSENT || right == SUMMARY_ABSENT {
                continue;
            }
            if let Some((left, right)) =
                checked_pair(log, "assembly", file, left, left_type, right, right_type)
            {
                sink.push_pair(left_type, left, right_type, right)?;
            }
        }
        rows += 1;
    }
    log.info(
        &format!("processed {rows} assembly summary rows"),
        LogTarget::file(file),
    );
    Ok(())
}

/// TRAD organism lists are fixed-layout reports: data rows only, with
/// [3] master, [9] bioproject, [10] biosample.
fn process_trad_lists(
    config: &Config,
    log: &RunLogger,
    sink: &mut EdgeSink,
) -> Result<(), IngestError> {
    for rel in TRAD_ORGANISM_LISTS {
        let path = config.trad_dir().join(rel);
        process_trad_file(&path, log, sink)?;
    }
    Ok(())
}

fn process_trad_file(
    path: &Path,
    log: &RunLogger,
    sink: &mut EdgeSink,
) -> Result<(), IngestError> {
    let file = path.display().to_string();
    let handle = std::fs::File::open(path)
        .map_err(|e| IngestError(format!("{}: {e}", path.display())))?;
    log.info("processing trad organism list", LogTarget::file(file.clone()));

    let mut count = 0u64;
    for line in BufReader::new(handle).lines() {
        let line = line.map_err(|e| IngestError(e.to_string()))?;
        // Continuation and separator rows start with whitespace or '-'.
        if line.starts_with([' ', '\t', '-']) {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 11 {
            continue;
        }
        let master = normalize_master_id(cols[3].trim());
        let bioproject = cols[9].trim();
        let biosample = cols[10].trim();

        if !bioproject.is_empty() {
            if let Some((master, bp)) = checked_pair(
                log,
                "trad",
                &file,
                &master,
                AccessionType::InsdcMaster,
                bioproject,
                AccessionType::Bioproject,
            ) {
                sink.push_pair(
                    AccessionType::InsdcMaster,
                    master,
                    AccessionType::Bioproject,
                    bp,
                )?;
                count += 1;
            }
        }
        if !biosample.is_empty() {
            if let Some((master, bs)) = checked_pair(
                log,
                "trad",
                &file,
                &master,
                AccessionType::InsdcMaster,
                biosample,
                AccessionType::Biosample,
            ) {
                sink.push_pair(
                    AccessionType::InsdcMaster,
                    master,
                    AccessionType::Biosample,
                    bs,
                )?;
                count += 1;
            }
        }
    }
    log.info(
        &format!("extracted {count} trad master relations"),
        LogTarget::file(file),
    );
    Ok(())
}
