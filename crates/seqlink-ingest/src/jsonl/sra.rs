// SPDX-License-Identifier: Apache-2.0

//! SRA/DRA JSONL emission.
//!
//! Submissions expand into six document streams (submission, study,
//! experiment, run, sample, analysis). The tar is read sequentially by
//! a single producer in submission-offset order; worker threads take
//! whole batches, parse, join, and write one shard file per entity
//! type. A submission is emitted atomically: all six of a batch's
//! output files land together or the batch fails.

use crate::jsonl::{write_jsonl, xrefs_for};
use crate::xml::{parse_record, XmlNode};
use crate::IngestError;
use crossbeam_channel::bounded;
use seqlink_core::time::format_utc;
use seqlink_core::{AccessionType, Config, DebugCategory, LogTarget, RunLogger};
use seqlink_model::last_run::{Family, LastRun};
use seqlink_model::{
    Accessibility, Distribution, Organism, SraDoc, Status, SEARCH_BASE_URL,
};
use seqlink_store::accessions::{AccessionInfo, AccessionsDb, ArchiveSource};
use seqlink_store::{Blacklists, DblinkReader, TarXmlReader};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const BATCH_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SraKind {
    Submission,
    Study,
    Experiment,
    Run,
    Sample,
    Analysis,
}

pub const SRA_KINDS: [SraKind; 6] = [
    SraKind::Submission,
    SraKind::Study,
    SraKind::Experiment,
    SraKind::Run,
    SraKind::Sample,
    SraKind::Analysis,
];

impl SraKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Study => "study",
            Self::Experiment => "experiment",
            Self::Run => "run",
            Self::Sample => "sample",
            Self::Analysis => "analysis",
        }
    }

    #[must_use]
    pub const fn set_key(self) -> &'static str {
        match self {
            Self::Submission => "SUBMISSION",
            Self::Study => "STUDY_SET",
            Self::Experiment => "EXPERIMENT_SET",
            Self::Run => "RUN_SET",
            Self::Sample => "SAMPLE_SET",
            Self::Analysis => "ANALYSIS_SET",
        }
    }

    #[must_use]
    pub const fn entry_key(self) -> &'static str {
        match self {
            Self::Submission => "SUBMISSION",
            Self::Study => "STUDY",
            Self::Experiment => "EXPERIMENT",
            Self::Run => "RUN",
            Self::Sample => "SAMPLE",
            Self::Analysis => "ANALYSIS",
        }
    }

    #[must_use]
    pub const fn accession_type(self) -> AccessionType {
        match self {
            Self::Submission => AccessionType::SraSubmission,
            Self::Study => AccessionType::SraStudy,
            Self::Experiment => AccessionType::SraExperiment,
            Self::Run => AccessionType::SraRun,
            Self::Sample => AccessionType::SraSample,
            Self::Analysis => AccessionType::SraAnalysis,
        }
    }
}

/// One submission's XML payloads, read off the tar by the producer.
pub type SubmissionXml = (String, BTreeMap<SraKind, Vec<u8>>);

pub fn generate_sra_jsonl(
    config: &Config,
    log: &RunLogger,
    full: bool,
) -> Result<u64, IngestError> {
    generate_sra_jsonl_opts(config, log, full, false)
}

pub fn generate_sra_jsonl_opts(
    config: &Config,
    log: &RunLogger,
    full: bool,
    resume: bool,
) -> Result<u64, IngestError> {
    let out_dir = config.jsonl_dir("sra");
    std::fs::create_dir_all(&out_dir)?;

    let blacklists = Blacklists::load(config)?;
    log.info(
        &format!("loaded {} blacklisted sra accessions", blacklists.sra.len()),
        LogTarget::default(),
    );

    let cutoff = if full {
        log.info("full update mode: --full specified", LogTarget::default());
        None
    } else {
        let state =
            LastRun::load(&config.last_run_path()).map_err(|e| IngestError(e.to_string()))?;
        match state.cutoff(Family::Sra, config.margin_days) {
            Some(cutoff) => {
                let cutoff = format_utc(cutoff);
                log.info(
                    &format!("incremental update mode: cutoff={cutoff}"),
                    LogTarget::default(),
                );
                Some(cutoff)
            }
            None => {
                log.info("full update mode: no previous run found", LogTarget::default());
                None
            }
        }
    };

    let mut total = 0u64;
    for source in [ArchiveSource::Dra, ArchiveSource::Sra] {
        total += process_source(
            config,
            log,
            source,
            &out_dir,
            &blacklists.sra,
            cutoff.as_deref(),
            resume,
        )?;
    }

    log.info(&format!("wrote {total} sra documents"), LogTarget::default());
    LastRun::record_success(&config.last_run_path(), Family::Sra, log.started_at())
        .map_err(|e| IngestError(e.to_string()))?;
    Ok(total)
}

fn tar_path(config: &Config, source: ArchiveSource) -> PathBuf {
    match source {
        ArchiveSource::Sra => config.ncbi_tar_path(),
        ArchiveSource::Dra => config.dra_tar_path(),
    }
}

#[allow(clippy::too_many_arguments)]
fn process_source(
    config: &Config,
    log: &RunLogger,
    source: ArchiveSource,
    out_dir: &Path,
    blacklist: &HashSet<String>,
    cutoff: Option<&str>,
    resume: bool,
) -> Result<u64, IngestError> {
    log.info(
        &format!("processing {}", source.as_str().to_uppercase()),
        LogTarget::default(),
    );
    let accessions_db = AccessionsDb::open(config, source)?;
    let submissions = match cutoff {
        None => accessions_db.all_submissions()?,
        Some(cutoff) => accessions_db.updated_submissions_since(cutoff)?,
    };
    drop(accessions_db);
    log.info(
        &format!("{} submissions to process", submissions.len()),
        LogTarget::default(),
    );
    if submissions.is_empty() {
        return Ok(0);
    }

    let mut tar = TarXmlReader::open(&tar_path(config, source))?;

    // Sequential tar reads: order submissions by their member offsets.
    let mut ordered = submissions;
    ordered.sort_by_key(|sub| tar.index().submission_offset(sub).unwrap_or(u64::MAX));
    let total_batches = ordered.len().div_ceil(BATCH_SIZE);

    let (tx, rx) = bounded::<(usize, Vec<SubmissionXml>)>(config.parallel_num.max(1) + 1);
    let failed = AtomicUsize::new(0);
    let counts = Mutex::new(0u64);

    std::thread::scope(|scope| -> Result<(), IngestError> {
        for _ in 0..config.parallel_num.max(1) {
            let rx = rx.clone();
            let failed = &failed;
            let counts = &counts;
            scope.spawn(move || {
                let mut ctx = match WorkerCtx::open(config, source) {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        log.critical("sra worker init failed", &e.0, LogTarget::default());
                        return;
                    }
                };
                for (batch_num, batch) in rx.iter() {
                    if log.cancelled() {
                        break;
                    }
                    match process_batch(&mut ctx, source, batch_num, &batch, blacklist, out_dir, log)
                    {
                        Ok(count) => {
                            if let Ok(mut guard) = counts.lock() {
                                *guard += count;
                            }
                            log.info(
                                &format!("completed batch {batch_num}/{total_batches}"),
                                LogTarget::default(),
                            );
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            log.error(
                                &format!("batch {batch_num} failed"),
                                &e.0,
                                LogTarget::default(),
                            );
                        }
                    }
                }
            });
        }
        drop(rx);

        for (index, chunk) in ordered.chunks(BATCH_SIZE).enumerate() {
            if log.cancelled() {
                break;
            }
            if resume && batch_outputs_exist(out_dir, source, index + 1) {
                log.info(
                    &format!("resume: batch {} outputs already present, skipping", index + 1),
                    LogTarget::default(),
                );
                continue;
            }
            let mut batch: Vec<SubmissionXml> = Vec::with_capacity(chunk.len());
            for submission in chunk {
                let mut payloads = BTreeMap::new();
                for kind in SRA_KINDS {
                    if let Some(bytes) = tar.read_xml(submission, kind.as_str())? {
                        payloads.insert(kind, bytes);
                    }
                }
                batch.push((submission.clone(), payloads));
            }
            if tx.send((index + 1, batch)).is_err() {
                break;
            }
        }
        drop(tx);
        Ok(())
    })?;

    if log.cancelled() {
        return Err(IngestError(format!(
            "{} processing cancelled",
            source.as_str()
        )));
    }
    let failed = failed.into_inner();
    if failed > 0 {
        return Err(IngestError(format!(
            "{failed} {} batch(es) failed",
            source.as_str()
        )));
    }
    Ok(counts.into_inner().unwrap_or(0))
}

fn batch_outputs_exist(out_dir: &Path, source: ArchiveSource, batch_num: usize) -> bool {
    SRA_KINDS.iter().all(|kind| {
        out_dir
            .join(format!(
                "{}_{}_{batch_num:04}.jsonl",
                source.prefix(),
                kind.as_str()
            ))
            .exists()
    })
}

struct WorkerCtx {
    accessions: AccessionsDb,
    dblink: DblinkReader,
}

impl WorkerCtx {
    fn open(config: &Config, source: ArchiveSource) -> Result<Self, IngestError> {
        Ok(Self {
            accessions: AccessionsDb::open(config, source)?,
            dblink: DblinkReader::open(config)?,
        })
    }
}

fn process_batch(
    ctx: &mut WorkerCtx,
    source: ArchiveSource,
    batch_num: usize,
    batch: &[SubmissionXml],
    blacklist: &HashSet<String>,
    out_dir: &Path,
    log: &RunLogger,
) -> Result<u64, IngestError> {
    // Every accession the batch mentions, for one bulk info query.
    let mut all_accessions: Vec<String> = Vec::new();
    for (submission, payloads) in batch {
        all_accessions.push(submission.clone());
        for (kind, bytes) in payloads {
            if *kind == SraKind::Submission {
                continue;
            }
            match collect_accessions(bytes, *kind) {
                Ok(mut accs) => all_accessions.append(&mut accs),
                Err(e) => log.debug(
                    &format!("failed to collect accessions from {} xml: {e}", kind.as_str()),
                    DebugCategory::XmlAccessionCollectFailed,
                    LogTarget::accession(submission.clone()).with_source(source.as_str()),
                ),
            }
        }
    }
    let info = ctx.accessions.accession_info_bulk(&all_accessions)?;

    let mut per_kind: BTreeMap<SraKind, Vec<SraDoc>> =
        SRA_KINDS.iter().map(|k| (*k, Vec::new())).collect();
    let mut seen: BTreeMap<SraKind, HashSet<String>> =
        SRA_KINDS.iter().map(|k| (*k, HashSet::new())).collect();

    for (submission, payloads) in batch {
        let docs = process_submission(submission, payloads, source, blacklist, &info, log);
        for (kind, entries) in docs {
            let seen_kind = seen.entry(kind).or_default();
            let bucket = per_kind.entry(kind).or_default();
            for entry in entries {
                if seen_kind.insert(entry.identifier.clone()) {
                    bucket.push(entry);
                }
            }
        }
    }

    for (kind, docs) in &mut per_kind {
        let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
        if accessions.is_empty() {
            continue;
        }
        let xref_map = xrefs_for(&ctx.dblink, kind.accession_type(), &accessions)?;
        for doc in docs.iter_mut() {
            if let Some(xrefs) = xref_map.get(&doc.identifier) {
                doc.db_xrefs = xrefs.clone();
            }
        }
    }

    // All six files land together: stage then rename, undo on error.
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut total = 0u64;
    for kind in SRA_KINDS {
        let docs = per_kind.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let final_path = out_dir.join(format!(
            "{}_{}_{batch_num:04}.jsonl",
            source.prefix(),
            kind.as_str()
        ));
        let tmp_path = final_path.with_extension("jsonl.tmp");
        if let Err(e) = write_jsonl(&tmp_path, docs) {
            for (tmp, _) in &staged {
                let _ = std::fs::remove_file(tmp);
            }
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        staged.push((tmp_path, final_path));
        total += docs.len() as u64;
    }
    for (tmp, final_path) in staged {
        std::fs::rename(&tmp, &final_path)?;
    }
    Ok(total)
}

pub fn process_submission(
    submission: &str,
    payloads: &BTreeMap<SraKind, Vec<u8>>,
    source: ArchiveSource,
    blacklist: &HashSet<String>,
    info: &BTreeMap<String, AccessionInfo>,
    log: &RunLogger,
) -> BTreeMap<SraKind, Vec<SraDoc>> {
    let is_dra = source == ArchiveSource::Dra;
    let mut out: BTreeMap<SraKind, Vec<SraDoc>> = BTreeMap::new();

    // DRA submissions carry the authoritative creation date in the
    // submission XML; it applies to every entity of the submission.
    let submission_date = payloads
        .get(&SraKind::Submission)
        .and_then(|bytes| parse_record(bytes).ok())
        .and_then(|node| node.attr("submission_date").map(ToString::to_string));

    for kind in SRA_KINDS {
        let Some(bytes) = payloads.get(&kind) else {
            continue;
        };
        let entries = match parse_entries(bytes, kind) {
            Ok(entries) => entries,
            Err(e) => {
                log.warning(
                    &format!("failed to parse {} xml: {e}", kind.as_str()),
                    LogTarget::accession(submission),
                );
                continue;
            }
        };
        let bucket = out.entry(kind).or_default();
        for entry in entries {
            let Some(accession) = entry.attr("accession").map(ToString::to_string) else {
                continue;
            };
            if blacklist.contains(&accession) {
                continue;
            }
            let entry_info = info.get(&accession);
            let date_created = if is_dra {
                submission_date.clone()
            } else {
                entry_info.and_then(|i| i.received.clone())
            };
            bucket.push(build_doc(kind, &entry, &accession, entry_info, date_created));
        }
    }
    out
}

/// The entries of one XML payload: the sets wrap repeated entries; the
/// submission document is its own root.
fn parse_entries(bytes: &[u8], kind: SraKind) -> Result<Vec<XmlNode>, IngestError> {
    let root = parse_record(bytes)?;
    if kind == SraKind::Submission {
        if root.name == kind.entry_key() {
            return Ok(vec![root]);
        }
        return Ok(Vec::new());
    }
    if root.name != kind.set_key() {
        return Ok(Vec::new());
    }
    Ok(root
        .children_named(kind.entry_key())
        .cloned()
        .collect())
}

fn collect_accessions(bytes: &[u8], kind: SraKind) -> Result<Vec<String>, IngestError> {
    Ok(parse_entries(bytes, kind)?
        .iter()
        .filter_map(|entry| entry.attr("accession").map(ToString::to_string))
        .collect())
}

fn build_doc(
    kind: SraKind,
    entry: &XmlNode,
    accession: &str,
    info: Option<&AccessionInfo>,
    date_created: Option<String>,
) -> SraDoc {
    let entry_type = kind.accession_type();
    let alias = entry.attr("alias");
    let name = match alias {
        Some(alias) if alias != accession => Some(alias.to_string()),
        _ => None,
    };

    let (title, description) = title_and_description(kind, entry);
    let organism = (kind == SraKind::Sample)
        .then(|| sample_organism(entry))
        .flatten();

    let properties = match kind {
        SraKind::Submission => serde_json::json!({ "SUBMISSION": entry.to_value() }),
        _ => serde_json::json!({ kind.set_key(): { kind.entry_key(): entry.to_value() } }),
    };

    SraDoc {
        identifier: accession.to_string(),
        properties,
        distribution: Distribution::data_download(entry_type.as_str(), accession),
        is_part_of: "sra".to_string(),
        type_: entry_type,
        name,
        url: format!("{SEARCH_BASE_URL}/search/entries/{}/{accession}", entry_type.as_str()),
        organism,
        title,
        description,
        db_xrefs: Vec::new(),
        same_as: Vec::new(),
        status: Status::normalize(info.and_then(|i| i.status.as_deref())),
        accessibility: Accessibility::normalize(info.and_then(|i| i.visibility.as_deref())),
        date_created,
        date_modified: info.and_then(|i| i.updated.clone()),
        date_published: info.and_then(|i| i.published.clone()),
    }
}

fn title_and_description(kind: SraKind, entry: &XmlNode) -> (Option<String>, Option<String>) {
    let text = |node: Option<&XmlNode>| node.and_then(XmlNode::text_trim).map(ToString::to_string);
    match kind {
        SraKind::Submission => (
            text(entry.child("TITLE")),
            entry.attr("submission_comment").map(ToString::to_string),
        ),
        SraKind::Study => {
            let descriptor = entry.child("DESCRIPTOR");
            (
                text(descriptor.and_then(|d| d.child("STUDY_TITLE"))),
                text(descriptor.and_then(|d| d.child("STUDY_ABSTRACT")))
                    .or_else(|| text(descriptor.and_then(|d| d.child("STUDY_DESCRIPTION")))),
            )
        }
        SraKind::Experiment => (
            text(entry.child("TITLE")),
            text(entry.child("DESIGN").and_then(|d| d.child("DESIGN_DESCRIPTION"))),
        ),
        SraKind::Run => (text(entry.child("TITLE")), None),
        SraKind::Sample | SraKind::Analysis => (
            text(entry.child("TITLE")),
            text(entry.child("DESCRIPTION")),
        ),
    }
}

fn sample_organism(entry: &XmlNode) -> Option<Organism> {
    let sample_name = entry.child("SAMPLE_NAME")?;
    let tax_id = sample_name
        .child("TAXON_ID")
        .and_then(XmlNode::text_trim)
        .map(ToString::to_string);
    let name = sample_name
        .child("SCIENTIFIC_NAME")
        .and_then(XmlNode::text_trim)
        .map(ToString::to_string);
    if tax_id.is_none() && name.is_none() {
        return None;
    }
    Some(Organism {
        identifier: tax_id,
        name,
    })
}
