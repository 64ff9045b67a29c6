// SPDX-License-Identifier: Apache-2.0

//! MetaboBank relation extraction.
//!
//! Unlike GEA the tree is flat: `MTBKS*` study directories sit directly
//! under the base. IDF/SDRF yield metabobank -> bioproject/biosample;
//! the two curated preserved TSVs are appended on top.

use crate::dblink::idf_sdrf::process_study_dir;
use crate::dblink::{checked_pair, load_preserved, run_extractor};
use crate::IngestError;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use std::fs;
use std::path::{Path, PathBuf};

pub fn create_metabobank_relations(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let base = config.metabobank_dir();

    let written = run_extractor(config, |sender| {
        let mut sink = sender.sink();

        if base.exists() {
            let mut dirs = 0u64;
            for dir in study_dirs(&base)? {
                let file = dir.display().to_string();
                let (mtb_id, bioproject, biosamples) = match process_study_dir(&dir) {
                    Ok(parts) => parts,
                    Err(e) => {
                        log.error(
                            &format!("failed to process metabobank directory {}", dir.display()),
                            &e.0,
                            LogTarget::file(file),
                        );
                        continue;
                    }
                };
                dirs += 1;

                if let Some(bp) = bioproject {
                    if let Some((mtb, bp)) = checked_pair(
                        log,
                        "metabobank",
                        &file,
                        &mtb_id,
                        AccessionType::Metabobank,
                        &bp,
                        AccessionType::Bioproject,
                    ) {
                        sink.push_pair(
                            AccessionType::Metabobank,
                            mtb,
                            AccessionType::Bioproject,
                            bp,
                        )?;
                    }
                }
                for bs in biosamples {
                    if let Some((mtb, bs)) = checked_pair(
                        log,
                        "metabobank",
                        &file,
                        &mtb_id,
                        AccessionType::Metabobank,
                        &bs,
                        AccessionType::Biosample,
                    ) {
                        sink.push_pair(
                            AccessionType::Metabobank,
                            mtb,
                            AccessionType::Biosample,
                            bs,
                        )?;
                    }
                }
            }
            log.info(
                &format!("processed {dirs} metabobank study directories"),
                LogTarget::default(),
            );
        } else {
            log.warning(
                "metabobank tree not found, using preserved files only",
                LogTarget::file(base.display().to_string()),
            );
        }

        let bp_preserved = load_preserved(
            log,
            &config.mtb_bp_preserved_path(),
            AccessionType::Metabobank,
            AccessionType::Bioproject,
        )?;
        for (mtb, bp) in bp_preserved {
            sink.push_pair(AccessionType::Metabobank, mtb, AccessionType::Bioproject, bp)?;
        }
        let bs_preserved = load_preserved(
            log,
            &config.mtb_bs_preserved_path(),
            AccessionType::Metabobank,
            AccessionType::Biosample,
        )?;
        for (mtb, bs) in bs_preserved {
            sink.push_pair(AccessionType::Metabobank, mtb, AccessionType::Biosample, bs)?;
        }

        sink.finish()
    })?;

    log.info(
        &format!("loaded {written} metabobank edges"),
        LogTarget::default(),
    );
    Ok(written)
}

fn study_dirs(base: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(base)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with("MTBKS"))
        })
        .collect();
    dirs.sort();
    Ok(dirs)
}
