// SPDX-License-Identifier: Apache-2.0

//! Targeted JSONL regeneration (hotfix path).
//!
//! Materializes exactly the caller-supplied accessions into a dedicated
//! output directory. Runs outside the incremental bookkeeping: it never
//! reads a cutoff and never touches `last_run.json`.

use crate::jsonl::sra::{process_submission, SraKind, SRA_KINDS};
use crate::jsonl::{write_jsonl, xrefs_for};
use crate::split::list_shards;
use crate::xml::{iterate_records, parse_record};
use crate::IngestError;
use seqlink_core::{accession, AccessionType, Config, LogTarget, RunLogger};
use seqlink_model::last_run::Family;
use seqlink_model::{BioProjectDoc, BioSampleDoc, SraDoc};
use seqlink_store::accessions::{AccessionsDb, ArchiveSource};
use seqlink_store::date_cache::{DateCache, DateFamily};
use seqlink_store::{Blacklists, DblinkReader, TarXmlReader};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Accession kinds accepted per family.
#[must_use]
pub fn accepted_types(family: Family) -> &'static [AccessionType] {
    match family {
        Family::Bioproject => &[AccessionType::Bioproject, AccessionType::UmbrellaBioproject],
        Family::Biosample => &[AccessionType::Biosample],
        Family::Sra => &[
            AccessionType::SraSubmission,
            AccessionType::SraStudy,
            AccessionType::SraExperiment,
            AccessionType::SraRun,
            AccessionType::SraSample,
            AccessionType::SraAnalysis,
        ],
        Family::Jga => &[
            AccessionType::JgaStudy,
            AccessionType::JgaDataset,
            AccessionType::JgaDac,
            AccessionType::JgaPolicy,
        ],
    }
}

/// Drop accessions that do not belong to the family, with a warning per
/// reject. Processing continues on the remainder.
pub fn validate_accessions(
    family: Family,
    accessions: &BTreeSet<String>,
    log: &RunLogger,
) -> BTreeSet<String> {
    let accepted = accepted_types(family);
    accessions
        .iter()
        .filter(|acc| {
            let matched = accepted.iter().any(|ty| accession::is_valid(acc, *ty));
            if !matched {
                log.warning(
                    &format!(
                        "accession '{acc}' does not match expected patterns for type '{family}', skipping"
                    ),
                    LogTarget::accession(acc.to_string()),
                );
            }
            matched
        })
        .cloned()
        .collect()
}

pub fn regenerate(
    config: &Config,
    log: &RunLogger,
    family: Family,
    accessions: &BTreeSet<String>,
    output_dir: &Path,
) -> Result<u64, IngestError> {
    std::fs::create_dir_all(output_dir)?;
    let targets = validate_accessions(family, accessions, log);
    if targets.is_empty() {
        log.warning("no valid accessions to process", LogTarget::default());
        return Ok(0);
    }
    log.info(
        &format!("regenerating {} {family} accession(s)", targets.len()),
        LogTarget::default(),
    );

    match family {
        Family::Bioproject => regenerate_bp(config, log, &targets, output_dir),
        Family::Biosample => regenerate_bs(config, log, &targets, output_dir),
        Family::Sra => regenerate_sra(config, log, &targets, output_dir),
        Family::Jga => regenerate_jga(config, log, &targets, output_dir),
    }
}

fn shard_files(config: &Config, short: &str) -> Result<Vec<PathBuf>, IngestError> {
    let dir = config.tmp_xml_dir(short);
    let mut shards = list_shards(&dir, "ddbj")?;
    shards.extend(list_shards(&dir, "ncbi")?);
    if shards.is_empty() {
        return Err(IngestError(format!("no shards found in {}", dir.display())));
    }
    Ok(shards)
}

fn regenerate_bp(
    config: &Config,
    log: &RunLogger,
    targets: &BTreeSet<String>,
    output_dir: &Path,
) -> Result<u64, IngestError> {
    let blacklists = Blacklists::load(config)?;
    let dblink = DblinkReader::open(config)?;
    let dates = DateCache::open(config)?;

    let mut docs: Vec<BioProjectDoc> = Vec::new();
    let mut found: HashSet<String> = HashSet::new();

    for shard in shard_files(config, "bp")? {
        let is_ddbj = shard
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("ddbj_"));
        for record in iterate_records(&shard, "Package")? {
            let Ok(node) = parse_record(&record?) else {
                continue;
            };
            let mut value = node.to_value();
            let Some(accession) = super::bp::package_accession(&value) else {
                continue;
            };
            if !targets.contains(&accession) || found.contains(&accession) {
                continue;
            }
            if blacklists.bioproject.contains(&accession) {
                log.warning(
                    &format!("accession {accession} is in blacklist, skipping"),
                    LogTarget::accession(accession.clone()),
                );
                continue;
            }
            found.insert(accession.clone());
            docs.push(super::bp::build_doc(&mut value, &accession, is_ddbj, log));
        }
    }
    warn_not_found(log, targets, &found);
    if docs.is_empty() {
        log.info("no entries found, skipping output", LogTarget::default());
        return Ok(0);
    }

    let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
    let xref_map = xrefs_for(&dblink, AccessionType::Bioproject, &accessions)?;
    let date_map = dates.get_bulk(DateFamily::Bioproject, &accessions)?;
    for doc in &mut docs {
        if let Some(xrefs) = xref_map.get(&doc.identifier) {
            doc.db_xrefs = xrefs.clone();
        }
        if let Some(row) = date_map.get(&doc.identifier) {
            if row.date_created.is_some() {
                doc.date_created = row.date_created.clone();
            }
            if row.date_modified.is_some() {
                doc.date_modified = row.date_modified.clone();
            }
            if row.date_published.is_some() {
                doc.date_published = row.date_published.clone();
            }
        }
    }

    let out_path = output_dir.join("bioproject.jsonl");
    write_jsonl(&out_path, &docs)?;
    log.info(
        &format!("wrote {} bioproject entries", docs.len()),
        LogTarget::file(out_path.display().to_string()),
    );
    Ok(docs.len() as u64)
}

fn regenerate_bs(
    config: &Config,
    log: &RunLogger,
    targets: &BTreeSet<String>,
    output_dir: &Path,
) -> Result<u64, IngestError> {
    let blacklists = Blacklists::load(config)?;
    let dblink = DblinkReader::open(config)?;
    let dates = DateCache::open(config)?;

    let mut docs: Vec<BioSampleDoc> = Vec::new();
    let mut found: HashSet<String> = HashSet::new();

    for shard in shard_files(config, "bs")? {
        let is_ddbj = shard
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("ddbj_"));
        for record in iterate_records(&shard, "BioSample")? {
            let Ok(node) = parse_record(&record?) else {
                continue;
            };
            let mut value = node.to_value();
            let Some(accession) = super::bs::sample_accession(&value, is_ddbj) else {
                continue;
            };
            if !targets.contains(&accession) || found.contains(&accession) {
                continue;
            }
            if blacklists.biosample.contains(&accession) {
                log.warning(
                    &format!("accession {accession} is in blacklist, skipping"),
                    LogTarget::accession(accession.clone()),
                );
                continue;
            }
            found.insert(accession.clone());
            docs.push(super::bs::build_doc(&mut value, &accession, is_ddbj, log));
        }
    }
    warn_not_found(log, targets, &found);
    if docs.is_empty() {
        log.info("no entries found, skipping output", LogTarget::default());
        return Ok(0);
    }

    let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
    let xref_map = xrefs_for(&dblink, AccessionType::Biosample, &accessions)?;
    let date_map = dates.get_bulk(DateFamily::Biosample, &accessions)?;
    for doc in &mut docs {
        if let Some(xrefs) = xref_map.get(&doc.identifier) {
            doc.db_xrefs = xrefs.clone();
        }
        if let Some(row) = date_map.get(&doc.identifier) {
            if row.date_created.is_some() {
                doc.date_created = row.date_created.clone();
            }
            if row.date_modified.is_some() {
                doc.date_modified = row.date_modified.clone();
            }
            if row.date_published.is_some() {
                doc.date_published = row.date_published.clone();
            }
        }
    }

    let out_path = output_dir.join("biosample.jsonl");
    write_jsonl(&out_path, &docs)?;
    log.info(
        &format!("wrote {} biosample entries", docs.len()),
        LogTarget::file(out_path.display().to_string()),
    );
    Ok(docs.len() as u64)
}

/// `D*` accessions live in the DRA archive, `S*`/`E*` in NCBI SRA.
fn classify_sra_source(accession: &str) -> Option<ArchiveSource> {
    match accession.chars().next() {
        Some('D') => Some(ArchiveSource::Dra),
        Some('S') | Some('E') => Some(ArchiveSource::Sra),
        _ => None,
    }
}

fn regenerate_sra(
    config: &Config,
    log: &RunLogger,
    targets: &BTreeSet<String>,
    output_dir: &Path,
) -> Result<u64, IngestError> {
    let blacklists = Blacklists::load(config)?;
    let dblink = DblinkReader::open(config)?;

    let mut by_source: BTreeMap<&'static str, (ArchiveSource, Vec<String>)> = BTreeMap::new();
    for acc in targets {
        match classify_sra_source(acc) {
            Some(source) => {
                by_source
                    .entry(source.as_str())
                    .or_insert_with(|| (source, Vec::new()))
                    .1
                    .push(acc.clone());
            }
            None => log.warning(
                &format!("cannot determine source for accession '{acc}', skipping"),
                LogTarget::accession(acc.clone()),
            ),
        }
    }

    let mut all: BTreeMap<SraKind, Vec<SraDoc>> = BTreeMap::new();
    for (_, (source, accs)) in by_source {
        let accessions_db = AccessionsDb::open(config, source)?;
        let acc_to_sub = accessions_db.submissions_for_accessions(&accs)?;
        let not_found: Vec<&String> =
            accs.iter().filter(|a| !acc_to_sub.contains_key(*a)).collect();
        if !not_found.is_empty() {
            log.warning(
                &format!(
                    "{} accession(s) not found in {} accessions store",
                    not_found.len(),
                    source.as_str().to_uppercase()
                ),
                LogTarget::default(),
            );
        }
        if acc_to_sub.is_empty() {
            continue;
        }
        let submissions: BTreeSet<String> = acc_to_sub.values().cloned().collect();
        log.info(
            &format!(
                "resolved to {} unique {} submission(s)",
                submissions.len(),
                source.as_str()
            ),
            LogTarget::default(),
        );

        let tar_path = match source {
            ArchiveSource::Sra => config.ncbi_tar_path(),
            ArchiveSource::Dra => config.dra_tar_path(),
        };
        let mut tar = TarXmlReader::open(&tar_path)?;

        for submission in submissions {
            let mut payloads = BTreeMap::new();
            let mut sub_accessions: Vec<String> = vec![submission.clone()];
            for kind in SRA_KINDS {
                if let Some(bytes) = tar.read_xml(&submission, kind.as_str())? {
                    if kind != SraKind::Submission {
                        if let Ok(entries) = crate::xml::parse_record(&bytes) {
                            for entry in entries.children_named(kind.entry_key()) {
                                if let Some(acc) = entry.attr("accession") {
                                    sub_accessions.push(acc.to_string());
                                }
                            }
                        }
                    }
                    payloads.insert(kind, bytes);
                }
            }
            let info = accessions_db.accession_info_bulk(&sub_accessions)?;
            let docs =
                process_submission(&submission, &payloads, source, &blacklists.sra, &info, log);
            for (kind, entries) in docs {
                let bucket = all.entry(kind).or_default();
                for entry in entries {
                    if targets.contains(&entry.identifier) {
                        bucket.push(entry);
                    }
                }
            }
        }
    }

    let mut total = 0u64;
    for kind in SRA_KINDS {
        let Some(docs) = all.get_mut(&kind) else {
            continue;
        };
        if docs.is_empty() {
            continue;
        }
        let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
        let xref_map = xrefs_for(&dblink, kind.accession_type(), &accessions)?;
        for doc in docs.iter_mut() {
            if let Some(xrefs) = xref_map.get(&doc.identifier) {
                doc.db_xrefs = xrefs.clone();
            }
        }
        let out_path = output_dir.join(format!("{}.jsonl", kind.as_str()));
        write_jsonl(&out_path, docs)?;
        log.info(
            &format!("wrote {} {} entries", docs.len(), kind.as_str()),
            LogTarget::file(out_path.display().to_string()),
        );
        total += docs.len() as u64;
    }
    if total == 0 {
        log.info("no sra entries found, no files written", LogTarget::default());
    }
    Ok(total)
}

fn regenerate_jga(
    config: &Config,
    log: &RunLogger,
    targets: &BTreeSet<String>,
    output_dir: &Path,
) -> Result<u64, IngestError> {
    let blacklists = Blacklists::load(config)?;
    let dblink = DblinkReader::open(config)?;

    let mut total = 0u64;
    for ty in super::jga::JGA_TYPES {
        let wanted: BTreeSet<&String> = targets
            .iter()
            .filter(|acc| accession::is_valid(acc, ty))
            .collect();
        if wanted.is_empty() {
            continue;
        }
        let xml_path = config.jga_dir().join(format!("{}.xml", ty.as_str()));
        if !xml_path.exists() {
            log.warning(
                &format!("jga xml not found, skipping {}", ty.as_str()),
                LogTarget::file(xml_path.display().to_string()),
            );
            continue;
        }
        let mut docs =
            super::jga::parse_documents(&std::fs::read(&xml_path)?, ty, &blacklists.jga)?;
        docs.retain(|doc| wanted.contains(&doc.identifier));
        let found: HashSet<String> = docs.iter().map(|d| d.identifier.clone()).collect();
        for missing in wanted.iter().filter(|acc| !found.contains(acc.as_str())) {
            log.warning(
                &format!("accession {missing} not found in {} xml", ty.as_str()),
                LogTarget::accession((*missing).clone()),
            );
        }
        if docs.is_empty() {
            continue;
        }

        let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
        let xref_map = xrefs_for(&dblink, ty, &accessions)?;
        let date_map = super::jga::load_date_map(config, ty, log)?;
        for doc in &mut docs {
            if let Some(xrefs) = xref_map.get(&doc.identifier) {
                doc.db_xrefs = xrefs.clone();
            }
            if let Some((created, published, modified)) = date_map.get(&doc.identifier) {
                doc.date_created = Some(created.clone());
                doc.date_published = Some(published.clone());
                doc.date_modified = Some(modified.clone());
            }
        }

        let out_path = output_dir.join(format!("{}.jsonl", ty.as_str()));
        write_jsonl(&out_path, &docs)?;
        log.info(
            &format!("wrote {} {} entries", docs.len(), ty.as_str()),
            LogTarget::file(out_path.display().to_string()),
        );
        total += docs.len() as u64;
    }
    Ok(total)
}

fn warn_not_found(log: &RunLogger, targets: &BTreeSet<String>, found: &HashSet<String>) {
    let missing: Vec<&String> = targets.iter().filter(|t| !found.contains(*t)).collect();
    if !missing.is_empty() {
        log.warning(
            &format!("{} accession(s) not found in shard xml", missing.len()),
            LogTarget::default(),
        );
    }
}

/// Accession list file: one per line, `#` comments and blanks ignored.
pub fn load_accessions_file(path: &Path) -> Result<BTreeSet<String>, IngestError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| IngestError(format!("{}: {e}", path.display())))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonl::bp::tests::test_config;
    use tempfile::tempdir;

    #[test]
    fn validation_rejects_cross_family_accessions() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        std::fs::create_dir_all(&config.result_dir).expect("mkdir");
        let log = RunLogger::start(&config, "regenerate_jsonl").expect("log");

        let input: BTreeSet<String> = ["DRR000001", "PRJDB1", "JGAD000001"]
            .into_iter()
            .map(ToString::to_string)
            .collect();
        let valid = validate_accessions(Family::Sra, &input, &log);
        assert_eq!(valid.len(), 1);
        assert!(valid.contains("DRR000001"));
        log.finish(seqlink_core::RunStatus::Success);
    }

    #[test]
    fn sra_sources_classify_by_prefix() {
        assert_eq!(classify_sra_source("DRR000001"), Some(ArchiveSource::Dra));
        assert_eq!(classify_sra_source("SRR000001"), Some(ArchiveSource::Sra));
        assert_eq!(classify_sra_source("ERR000001"), Some(ArchiveSource::Sra));
        assert_eq!(classify_sra_source("X"), None);
    }

    #[test]
    fn accession_file_skips_comments() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("accs.txt");
        std::fs::write(&path, "# fix batch\nDRR000001\n\nDRR000002\n").expect("write");
        let accs = load_accessions_file(&path).expect("load");
        assert_eq!(accs.len(), 2);
    }
}
