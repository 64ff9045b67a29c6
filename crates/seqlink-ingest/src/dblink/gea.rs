// SPDX-License-Identifier: Apache-2.0

//! GEA (Gene Expression Archive) relation extraction.
//!
//! The archive tree is two-level: bucket directories (`E-GEAD-1000/`)
//! holding the experiment directories (`E-GEAD-1012/`). Each experiment
//! yields gea -> bioproject from its IDF and gea -> biosample from its
//! SDRF.

use crate::dblink::{checked_pair, run_extractor};
use crate::dblink::idf_sdrf::process_study_dir;
use crate::IngestError;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use std::fs;
use std::path::{Path, PathBuf};

pub fn create_gea_relations(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let base = config.gea_dir();
    if !base.exists() {
        log.warning(
            "gea tree not found, extracting nothing",
            LogTarget::file(base.display().to_string()),
        );
        return Ok(0);
    }

    let written = run_extractor(config, |sender| {
        let mut sink = sender.sink();
        let mut dirs = 0u64;
        for dir in experiment_dirs(&base)? {
            let file = dir.display().to_string();
            let (gea_id, bioproject, biosamples) = match process_study_dir(&dir) {
                Ok(parts) => parts,
                Err(e) => {
                    log.error(
                        &format!("failed to process gea directory {}", dir.display()),
                        &e.0,
                        LogTarget::file(file),
                    );
                    continue;
                }
            };
            dirs += 1;

            if let Some(bp) = bioproject {
                if let Some((gea, bp)) = checked_pair(
                    log,
                    "gea",
                    &file,
                    &gea_id,
                    AccessionType::Gea,
                    &bp,
                    AccessionType::Bioproject,
                ) {
                    sink.push_pair(AccessionType::Gea, gea, AccessionType::Bioproject, bp)?;
                }
            }
            for bs in biosamples {
                if let Some((gea, bs)) = checked_pair(
                    log,
                    "gea",
                    &file,
                    &gea_id,
                    AccessionType::Gea,
                    &bs,
                    AccessionType::Biosample,
                ) {
                    sink.push_pair(AccessionType::Gea, gea, AccessionType::Biosample, bs)?;
                }
            }
        }
        log.info(
            &format!("processed {dirs} gea experiment directories"),
            LogTarget::default(),
        );
        sink.finish()
    })?;

    log.info(&format!("loaded {written} gea edges"), LogTarget::default());
    Ok(written)
}

/// `E-GEAD-*` experiment directories under the `E-GEAD-*` bucket
/// directories, sorted for deterministic output.
fn experiment_dirs(base: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut out = Vec::new();
    for bucket in sorted_dirs(base)? {
        if !bucket
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("E-GEAD-"))
        {
            continue;
        }
        for dir in sorted_dirs(&bucket)? {
            if dir
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("E-GEAD-"))
            {
                out.push(dir);
            }
        }
    }
    Ok(out)
}

fn sorted_dirs(base: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(base)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}
