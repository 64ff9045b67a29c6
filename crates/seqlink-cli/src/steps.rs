// SPDX-License-Identifier: Apache-2.0

//! Step runners: each wraps one pipeline operation in a run record and
//! maps its outcome to an exit code. Steps that write the DBLink tmp
//! store additionally take the store's write lock for their duration.

use seqlink_core::{AccessionType, Config, ExitCode, LogTarget, RunLogger, RunStatus};
use seqlink_ingest::split::SplitSpec;
use seqlink_ingest::IngestError;
use seqlink_model::last_run::Family;
use seqlink_store::accessions::{build_accessions_db, ArchiveSource};
use seqlink_store::{Blacklists, DblinkReader, DblinkWriter};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// The relation pairs dumped as TSV, in the orientation of the file.
const DUMP_PAIRS: [(AccessionType, AccessionType); 16] = [
    (AccessionType::Bioproject, AccessionType::UmbrellaBioproject),
    (AccessionType::Bioproject, AccessionType::Biosample),
    (AccessionType::Bioproject, AccessionType::SraStudy),
    (AccessionType::Bioproject, AccessionType::SraExperiment),
    (AccessionType::Bioproject, AccessionType::SraRun),
    (AccessionType::Bioproject, AccessionType::SraAnalysis),
    (AccessionType::Bioproject, AccessionType::Gea),
    (AccessionType::Bioproject, AccessionType::InsdcAssembly),
    (AccessionType::Bioproject, AccessionType::InsdcMaster),
    (AccessionType::Bioproject, AccessionType::Metabobank),
    (AccessionType::Bioproject, AccessionType::HumId),
    (AccessionType::Biosample, AccessionType::SraSample),
    (AccessionType::Biosample, AccessionType::Gea),
    (AccessionType::Biosample, AccessionType::InsdcAssembly),
    (AccessionType::Biosample, AccessionType::InsdcMaster),
    (AccessionType::Biosample, AccessionType::Metabobank),
];

/// Guard file preventing two steps from writing the DBLink tmp store at
/// once. Removed on drop.
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    fn acquire(config: &Config) -> Result<Self, IngestError> {
        let path = config.dblink_write_lock_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                IngestError(format!(
                    "failed to acquire dblink write lock ({}): {e}",
                    path.display()
                ))
            })?;
        Ok(Self { path })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn run_step<F>(config: &Config, run_name: &str, f: F) -> ExitCode
where
    F: FnOnce(&RunLogger) -> Result<(), IngestError>,
{
    let log = match RunLogger::start(config, run_name) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("failed to start run logger: {err}");
            return ExitCode::Internal;
        }
    };
    match f(&log) {
        Ok(()) => {
            log.finish(RunStatus::Success);
            ExitCode::Success
        }
        Err(err) => {
            log.critical("step failed", &err.0, LogTarget::default());
            log.finish(RunStatus::Failed);
            ExitCode::StepFailed
        }
    }
}

pub fn check_external_resources(config: &Config) -> ExitCode {
    run_step(config, "check_external_resources", |log| {
        let missing = seqlink_ingest::resources::check_external_resources(config, log);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IngestError(format!(
                "{} external resource(s) missing",
                missing.len()
            )))
        }
    })
}

pub fn prepare_bioproject_xml(
    config: &Config,
    ncbi_xml: Option<PathBuf>,
    ddbj_xml: Option<PathBuf>,
    records_per_shard: usize,
) -> ExitCode {
    run_step(config, "prepare_bioproject_xml", |log| {
        let inputs = vec![
            (
                ncbi_xml.unwrap_or_else(|| config.bioproject_xml_path("ncbi")),
                SplitSpec::new("Package", "PackageSet", "ncbi")
                    .with_records_per_shard(records_per_shard),
            ),
            (
                ddbj_xml.unwrap_or_else(|| config.bioproject_xml_path("ddbj")),
                SplitSpec::new("Package", "PackageSet", "ddbj")
                    .with_records_per_shard(records_per_shard),
            ),
        ];
        let shards =
            seqlink_ingest::split::split_all_atomically(&inputs, &config.tmp_xml_dir("bp"))?;
        log.info(
            &format!("wrote {} bioproject shards", shards.len()),
            LogTarget::file(config.tmp_xml_dir("bp").display().to_string()),
        );
        Ok(())
    })
}

pub fn prepare_biosample_xml(
    config: &Config,
    ncbi_xml: Option<PathBuf>,
    ddbj_xml: Option<PathBuf>,
    records_per_shard: usize,
) -> ExitCode {
    run_step(config, "prepare_biosample_xml", |log| {
        let inputs = vec![
            (
                ncbi_xml.unwrap_or_else(|| config.biosample_xml_path("ncbi")),
                SplitSpec::new("BioSample", "BioSampleSet", "ncbi")
                    .with_records_per_shard(records_per_shard),
            ),
            (
                ddbj_xml.unwrap_or_else(|| config.biosample_xml_path("ddbj")),
                SplitSpec::new("BioSample", "BioSampleSet", "ddbj")
                    .with_records_per_shard(records_per_shard),
            ),
        ];
        let shards =
            seqlink_ingest::split::split_all_atomically(&inputs, &config.tmp_xml_dir("bs"))?;
        log.info(
            &format!("wrote {} biosample shards", shards.len()),
            LogTarget::file(config.tmp_xml_dir("bs").display().to_string()),
        );
        Ok(())
    })
}

pub fn build_accessions_dbs(config: &Config) -> ExitCode {
    run_step(config, "build_sra_and_dra_accessions_db", |log| {
        let sra_tab = seqlink_ingest::resources::find_latest_sra_tab(config)
            .ok_or_else(|| IngestError("no SRA accessions tab found in lookback window".into()))?;
        let (path, rows) = build_accessions_db(config, ArchiveSource::Sra, &sra_tab)?;
        log.info(
            &format!("loaded {rows} sra accession rows"),
            LogTarget::file(path.display().to_string()),
        );

        let dra_tab = seqlink_ingest::resources::find_latest_dra_tab(config)
            .ok_or_else(|| IngestError("no DRA accessions tab found in lookback window".into()))?;
        let (path, rows) = build_accessions_db(config, ArchiveSource::Dra, &dra_tab)?;
        log.info(
            &format!("loaded {rows} dra accession rows"),
            LogTarget::file(path.display().to_string()),
        );
        Ok(())
    })
}

pub fn init_dblink_db(config: &Config) -> ExitCode {
    run_step(config, "init_dblink_db", |log| {
        let _lock = WriteLock::acquire(config)?;
        DblinkWriter::init(config)?;
        log.info(
            "initialized tmp relation store",
            LogTarget::file(config.dblink_tmp_db_path().display().to_string()),
        );
        Ok(())
    })
}

pub fn create_relations<F>(config: &Config, run_name: &str, extractor: F) -> ExitCode
where
    F: FnOnce(&Config, &RunLogger) -> Result<u64, IngestError>,
{
    run_step(config, run_name, |log| {
        let _lock = WriteLock::acquire(config)?;
        extractor(config, log)?;
        Ok(())
    })
}

pub fn finalize_dblink_db(config: &Config) -> ExitCode {
    run_step(config, "finalize_dblink_db", |log| {
        let _lock = WriteLock::acquire(config)?;
        let blacklists = Blacklists::load(config)?;
        log.info(
            &format!("applying {} blacklisted accessions", blacklists.total_len()),
            LogTarget::default(),
        );
        let total = seqlink_store::dblink::finalize(config, &blacklists)?;
        log.info(
            &format!("finalized relation store with {total} edges"),
            LogTarget::file(config.dblink_db_path().display().to_string()),
        );
        Ok(())
    })
}

pub fn dump_dblink_files(config: &Config) -> ExitCode {
    run_step(config, "dump_dblink_files", |log| {
        let reader = DblinkReader::open(config)?;
        for (type_a, type_b) in DUMP_PAIRS {
            let out = config
                .dblink_files_dir
                .join(format!("{}_to_{}.tsv", type_a.as_str(), type_b.as_str()));
            let rows = reader.export_pair(type_a, type_b, &out)?;
            log.info(
                &format!("dumped {rows} rows"),
                LogTarget::file(out.display().to_string()),
            );
        }
        Ok(())
    })
}

pub fn build_bp_bs_date_cache(config: &Config) -> ExitCode {
    run_step(config, "build_bp_bs_date_cache", |log| {
        seqlink_ingest::date_cache::build_bp_bs_date_cache(config, log)
    })
}

pub fn sync_ncbi_tar(config: &Config, staged: Option<PathBuf>) -> ExitCode {
    run_step(config, "sync_ncbi_tar", |log| {
        let staged = staged.unwrap_or_else(|| config.const_dir.join("staging").join("NCBI_SRA.tar"));
        seqlink_ingest::resources::sync_tar(&staged, &config.ncbi_tar_path(), log)?;
        Ok(())
    })
}

pub fn sync_dra_tar(config: &Config, staged: Option<PathBuf>) -> ExitCode {
    run_step(config, "sync_dra_tar", |log| {
        let staged = staged.unwrap_or_else(|| config.const_dir.join("staging").join("DRA.tar"));
        seqlink_ingest::resources::sync_tar(&staged, &config.dra_tar_path(), log)?;
        Ok(())
    })
}

pub fn generate_bp_jsonl(config: &Config, full: bool, resume: bool) -> ExitCode {
    run_step(config, "generate_bp_jsonl", |log| {
        seqlink_ingest::jsonl::bp::generate_bp_jsonl_opts(config, log, full, resume)
            .map(|_| ())
    })
}

pub fn generate_bs_jsonl(config: &Config, full: bool, resume: bool) -> ExitCode {
    run_step(config, "generate_bs_jsonl", |log| {
        seqlink_ingest::jsonl::bs::generate_bs_jsonl_opts(config, log, full, resume)
            .map(|_| ())
    })
}

pub fn generate_sra_jsonl(config: &Config, full: bool, resume: bool) -> ExitCode {
    run_step(config, "generate_sra_jsonl", |log| {
        seqlink_ingest::jsonl::sra::generate_sra_jsonl_opts(config, log, full, resume)
            .map(|_| ())
    })
}

pub fn generate_jga_jsonl(config: &Config, fatal: bool) -> ExitCode {
    let exit = run_step(config, "generate_jga_jsonl", |log| {
        seqlink_ingest::jsonl::jga::generate_jga_jsonl(config, log).map(|_| ())
    });
    if exit != ExitCode::Success && !fatal {
        // Non-fatal by default: the failure is recorded in the run log
        // but does not abort the pipeline sequence.
        return ExitCode::Success;
    }
    exit
}

pub fn regenerate_jsonl(
    config: &Config,
    type_: &str,
    accessions: Option<Vec<String>>,
    accession_file: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> ExitCode {
    run_step(config, "regenerate_jsonl", |log| {
        let family = Family::parse(type_)
            .ok_or_else(|| IngestError(format!("unknown type: {type_}")))?;
        let mut targets: BTreeSet<String> = accessions.unwrap_or_default().into_iter().collect();
        if let Some(file) = accession_file {
            targets.extend(seqlink_ingest::jsonl::regenerate::load_accessions_file(&file)?);
        }
        if targets.is_empty() {
            return Err(IngestError(
                "at least one of --accessions or --accession-file is required".into(),
            ));
        }
        let output_dir = output_dir.unwrap_or_else(|| config.regenerate_dir());
        seqlink_ingest::jsonl::regenerate::regenerate(config, log, family, &targets, &output_dir)
            .map(|_| ())
    })
}

fn family_jsonl_dir(config: &Config, family: Family) -> PathBuf {
    config.jsonl_dir(family.as_str())
}

/// Index name for a shard file, derived from its `{src}_{type}_{n}` or
/// `{type}` name.
fn index_for_shard(family: Family, path: &std::path::Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy().to_string();
    match family {
        Family::Bioproject => Some("bioproject".to_string()),
        Family::Biosample => Some("biosample".to_string()),
        Family::Jga => Some(stem),
        Family::Sra => {
            let mut parts = stem.split('_');
            let _source = parts.next()?;
            let kind = parts.next()?;
            Some(format!("sra-{kind}"))
        }
    }
}

pub fn es_insert(config: &Config, family: &str, pattern: &str) -> ExitCode {
    run_step(config, "es_insert", |log| {
        let family = Family::parse(family)
            .ok_or_else(|| IngestError(format!("unknown family: {family}")))?;
        let client =
            seqlink_sink::EsClient::new(config).map_err(|e| IngestError(e.to_string()))?;
        let dir = family_jsonl_dir(config, family);
        let shards = seqlink_sink::matching_shards(&dir, pattern)
            .map_err(|e| IngestError(e.to_string()))?;
        if shards.is_empty() {
            log.warning(
                "no jsonl shards matched",
                LogTarget::file(dir.display().to_string()),
            );
            return Ok(());
        }

        let mut totals = seqlink_sink::BatchResult::default();
        let mut by_index: std::collections::BTreeMap<String, Vec<PathBuf>> =
            std::collections::BTreeMap::new();
        for shard in shards {
            let Some(index) = index_for_shard(family, &shard) else {
                continue;
            };
            by_index.entry(index).or_default().push(shard);
        }
        for (index, files) in by_index {
            let result = seqlink_sink::insert_jsonl_files(&client, &files, &index, log)
                .map_err(|e| IngestError(e.to_string()))?;
            log.info(
                &format!(
                    "ingested into {index}: {} ok, {} errors",
                    result.success, result.errors
                ),
                LogTarget::default().with_source(index.clone()),
            );
            totals = seqlink_sink::BatchResult {
                success: totals.success + result.success,
                errors: totals.errors + result.errors,
                not_found: totals.not_found + result.not_found,
            };
        }
        log.info(
            &format!("ingest complete: {} ok, {} errors", totals.success, totals.errors),
            LogTarget::default(),
        );
        Ok(())
    })
}

pub fn es_delete_blacklisted(config: &Config, family: &str) -> ExitCode {
    run_step(config, "es_delete_blacklisted", |log| {
        let family = Family::parse(family)
            .ok_or_else(|| IngestError(format!("unknown family: {family}")))?;
        let blacklists = Blacklists::load(config)?;
        let accessions: Vec<String> = match family {
            Family::Bioproject => blacklists.bioproject.iter().cloned().collect(),
            Family::Biosample => blacklists.biosample.iter().cloned().collect(),
            Family::Sra => blacklists.sra.iter().cloned().collect(),
            Family::Jga => blacklists.jga.iter().cloned().collect(),
        };
        if accessions.is_empty() {
            log.info("blacklist is empty, nothing to delete", LogTarget::default());
            return Ok(());
        }
        let client =
            seqlink_sink::EsClient::new(config).map_err(|e| IngestError(e.to_string()))?;

        // Route each accession to its index by classification.
        let mut by_index: std::collections::BTreeMap<String, Vec<String>> =
            std::collections::BTreeMap::new();
        for acc in accessions {
            match seqlink_core::accession::classify(&acc) {
                Some((ty, normalized)) => {
                    let index = match ty {
                        AccessionType::UmbrellaBioproject => "bioproject".to_string(),
                        other => other.as_str().to_string(),
                    };
                    by_index.entry(index).or_default().push(normalized);
                }
                None => log.warning(
                    &format!("cannot classify blacklisted accession '{acc}', skipping delete"),
                    LogTarget::accession(acc.clone()),
                ),
            }
        }
        for (index, ids) in by_index {
            for chunk in ids.chunks(seqlink_sink::BATCH_SIZE) {
                let result = client
                    .delete_batch(&index, chunk)
                    .map_err(|e| IngestError(e.to_string()))?;
                log.info(
                    &format!(
                        "deleted from {index}: {} ok, {} not_found, {} errors",
                        result.success, result.not_found, result.errors
                    ),
                    LogTarget::default().with_source(index.clone()),
                );
            }
        }
        Ok(())
    })
}
