// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod inspect;
mod steps;

use clap::{Parser, Subcommand};
use seqlink_core::{Config, ExitCode};
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "seqlink")]
#[command(about = "DBLink relation graph and search document pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Verify every external input resource for today's run.
    CheckExternalResources,
    /// Split the BioProject XML inputs into worker shards.
    PrepareBioprojectXml {
        #[arg(long)]
        ncbi_xml: Option<PathBuf>,
        #[arg(long)]
        ddbj_xml: Option<PathBuf>,
        #[arg(long, default_value_t = seqlink_ingest::split::DEFAULT_RECORDS_PER_SHARD)]
        records_per_shard: usize,
    },
    /// Split the BioSample XML inputs into worker shards.
    PrepareBiosampleXml {
        #[arg(long)]
        ncbi_xml: Option<PathBuf>,
        #[arg(long)]
        ddbj_xml: Option<PathBuf>,
        #[arg(long, default_value_t = seqlink_ingest::split::DEFAULT_RECORDS_PER_SHARD)]
        records_per_shard: usize,
    },
    /// Load the daily SRA/DRA accessions tabs into their stores.
    BuildSraAndDraAccessionsDb,
    /// Create an empty tmp relation store.
    InitDblinkDb,
    CreateDblinkBpBsRelations,
    CreateDblinkBpInternalRelations,
    CreateDblinkAssemblyAndMasterRelations,
    CreateDblinkGeaRelations,
    CreateDblinkMetabobankRelations,
    CreateDblinkJgaRelations,
    CreateDblinkSraInternalRelations,
    /// Canonicalize, blacklist, dedup, index, and publish the store.
    FinalizeDblinkDb,
    /// Export the configured relation pairs as sorted TSV files.
    DumpDblinkFiles,
    /// Snapshot BP/BS dates from the archive database.
    BuildBpBsDateCache,
    SyncNcbiTar {
        #[arg(long)]
        staged: Option<PathBuf>,
    },
    SyncDraTar {
        #[arg(long)]
        staged: Option<PathBuf>,
    },
    GenerateBpJsonl {
        #[arg(long, default_value_t = false)]
        full: bool,
        #[arg(long)]
        parallel_num: Option<usize>,
        /// Skip shards whose output files already exist.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    GenerateBsJsonl {
        #[arg(long, default_value_t = false)]
        full: bool,
        #[arg(long)]
        parallel_num: Option<usize>,
        /// Skip shards whose output files already exist.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    GenerateSraJsonl {
        #[arg(long, default_value_t = false)]
        full: bool,
        #[arg(long)]
        parallel_num: Option<usize>,
        /// Skip shards whose output files already exist.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    GenerateJgaJsonl {
        /// JGA emission is non-fatal in the pipeline sequence; pass
        /// --fatal to propagate failure as a non-zero exit.
        #[arg(long, default_value_t = false)]
        fatal: bool,
    },
    /// Rebuild JSONL for specific accessions (hotfix path).
    RegenerateJsonl {
        #[arg(long = "type")]
        type_: String,
        #[arg(long, num_args = 1..)]
        accessions: Option<Vec<String>>,
        #[arg(long)]
        accession_file: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Bulk insert a family's JSONL shards into the search backend.
    EsInsert {
        #[arg(long)]
        family: String,
        /// Shard file-name prefix filter, e.g. `dra_run_`.
        #[arg(long, default_value = "")]
        pattern: String,
    },
    /// Delete blacklisted accessions from a family's indexes.
    EsDeleteBlacklisted {
        #[arg(long)]
        family: String,
    },
    ShowLog {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        level: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    ShowLogSummary {
        #[arg(long)]
        run_id: Option<String>,
    },
    ShowDblinkCounts,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

fn main() -> ProcessExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ProcessExitCode::from(ExitCode::Usage as u8);
        }
    };
    let mut parallel_override: Option<usize> = None;
    if let Commands::GenerateBpJsonl { parallel_num, .. }
    | Commands::GenerateBsJsonl { parallel_num, .. }
    | Commands::GenerateSraJsonl { parallel_num, .. } = &cli.command
    {
        parallel_override = *parallel_num;
    }
    let config = Config {
        parallel_num: parallel_override.unwrap_or(config.parallel_num),
        ..config
    };

    let exit = match cli.command {
        Commands::CheckExternalResources => steps::check_external_resources(&config),
        Commands::PrepareBioprojectXml {
            ncbi_xml,
            ddbj_xml,
            records_per_shard,
        } => steps::prepare_bioproject_xml(&config, ncbi_xml, ddbj_xml, records_per_shard),
        Commands::PrepareBiosampleXml {
            ncbi_xml,
            ddbj_xml,
            records_per_shard,
        } => steps::prepare_biosample_xml(&config, ncbi_xml, ddbj_xml, records_per_shard),
        Commands::BuildSraAndDraAccessionsDb => steps::build_accessions_dbs(&config),
        Commands::InitDblinkDb => steps::init_dblink_db(&config),
        Commands::CreateDblinkBpBsRelations => steps::create_relations(
            &config,
            "create_dblink_bp_bs_relations",
            seqlink_ingest::dblink::bp_bs::create_bp_bs_relations,
        ),
        Commands::CreateDblinkBpInternalRelations => steps::create_relations(
            &config,
            "create_dblink_bp_internal_relations",
            seqlink_ingest::dblink::bp_internal::create_bp_internal_relations,
        ),
        Commands::CreateDblinkAssemblyAndMasterRelations => steps::create_relations(
            &config,
            "create_dblink_assembly_and_master_relations",
            seqlink_ingest::dblink::assembly_master::create_assembly_and_master_relations,
        ),
        Commands::CreateDblinkGeaRelations => steps::create_relations(
            &config,
            "create_dblink_gea_relations",
            seqlink_ingest::dblink::gea::create_gea_relations,
        ),
        Commands::CreateDblinkMetabobankRelations => steps::create_relations(
            &config,
            "create_dblink_metabobank_relations",
            seqlink_ingest::dblink::metabobank::create_metabobank_relations,
        ),
        Commands::CreateDblinkJgaRelations => steps::create_relations(
            &config,
            "create_dblink_jga_relations",
            seqlink_ingest::dblink::jga::create_jga_relations,
        ),
        Commands::CreateDblinkSraInternalRelations => steps::create_relations(
            &config,
            "create_dblink_sra_internal_relations",
            seqlink_ingest::dblink::sra_internal::create_sra_internal_relations,
        ),
        Commands::FinalizeDblinkDb => steps::finalize_dblink_db(&config),
        Commands::DumpDblinkFiles => steps::dump_dblink_files(&config),
        Commands::BuildBpBsDateCache => steps::build_bp_bs_date_cache(&config),
        Commands::SyncNcbiTar { staged } => steps::sync_ncbi_tar(&config, staged),
        Commands::SyncDraTar { staged } => steps::sync_dra_tar(&config, staged),
        Commands::GenerateBpJsonl { full, resume, .. } => {
            steps::generate_bp_jsonl(&config, full, resume)
        }
        Commands::GenerateBsJsonl { full, resume, .. } => {
            steps::generate_bs_jsonl(&config, full, resume)
        }
        Commands::GenerateSraJsonl { full, resume, .. } => {
            steps::generate_sra_jsonl(&config, full, resume)
        }
        Commands::GenerateJgaJsonl { fatal } => steps::generate_jga_jsonl(&config, fatal),
        Commands::RegenerateJsonl {
            type_,
            accessions,
            accession_file,
            output_dir,
        } => steps::regenerate_jsonl(&config, &type_, accessions, accession_file, output_dir),
        Commands::EsInsert { family, pattern } => steps::es_insert(&config, &family, &pattern),
        Commands::EsDeleteBlacklisted { family } => {
            steps::es_delete_blacklisted(&config, &family)
        }
        Commands::ShowLog {
            run_id,
            level,
            limit,
        } => inspect::show_log(&config, run_id.as_deref(), level.as_deref(), limit),
        Commands::ShowLogSummary { run_id } => {
            inspect::show_log_summary(&config, run_id.as_deref())
        }
        Commands::ShowDblinkCounts => inspect::show_dblink_counts(&config),
    };

    ProcessExitCode::from(exit as u8)
}
