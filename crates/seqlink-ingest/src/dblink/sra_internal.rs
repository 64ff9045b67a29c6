// SPDX-License-Identifier: Apache-2.0

//! SRA-internal and BioProject/BioSample <-> SRA relation extraction.
//!
//! Both accessions stores (NCBI SRA, then DDBJ DRA) contribute the seven
//! internal pairs and the eight cross-archive pairs. Every endpoint must
//! classify for its expected kind; rows carrying the tab's numeric
//! internal ids drop out here with a DEBUG record.

use crate::dblink::{checked_pair, run_extractor, EdgeSink};
use crate::IngestError;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use seqlink_store::accessions::{AccessionsDb, ArchiveSource, SraRelationKind};

const RELATIONS: [(SraRelationKind, AccessionType, AccessionType); 15] = [
    (
        SraRelationKind::SubmissionStudy,
        AccessionType::SraSubmission,
        AccessionType::SraStudy,
    ),
    (
        SraRelationKind::StudyExperiment,
        AccessionType::SraStudy,
        AccessionType::SraExperiment,
    ),
    (
        SraRelationKind::StudyAnalysis,
        AccessionType::SraStudy,
        AccessionType::SraAnalysis,
    ),
    (
        SraRelationKind::SubmissionAnalysis,
        AccessionType::SraSubmission,
        AccessionType::SraAnalysis,
    ),
    (
        SraRelationKind::ExperimentRun,
        AccessionType::SraExperiment,
        AccessionType::SraRun,
    ),
    (
        SraRelationKind::ExperimentSample,
        AccessionType::SraExperiment,
        AccessionType::SraSample,
    ),
    (
        SraRelationKind::RunSample,
        AccessionType::SraRun,
        AccessionType::SraSample,
    ),
    (
        SraRelationKind::BioprojectStudy,
        AccessionType::Bioproject,
        AccessionType::SraStudy,
    ),
    (
        SraRelationKind::BioprojectExperiment,
        AccessionType::Bioproject,
        AccessionType::SraExperiment,
    ),
    (
        SraRelationKind::BioprojectRun,
        AccessionType::Bioproject,
        AccessionType::SraRun,
    ),
    (
        SraRelationKind::BioprojectAnalysis,
        AccessionType::Bioproject,
        AccessionType::SraAnalysis,
    ),
    (
        SraRelationKind::BiosampleSample,
        AccessionType::Biosample,
        AccessionType::SraSample,
    ),
    (
        SraRelationKind::BiosampleExperiment,
        AccessionType::Biosample,
        AccessionType::SraExperiment,
    ),
    (
        SraRelationKind::BiosampleRun,
        AccessionType::Biosample,
        AccessionType::SraRun,
    ),
    (
        SraRelationKind::BiosampleAnalysis,
        AccessionType::Biosample,
        AccessionType::SraAnalysis,
    ),
];

pub fn create_sra_internal_relations(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let written = run_extractor(config, |sender| {
        for source in [ArchiveSource::Sra, ArchiveSource::Dra] {
            log.info(
                &format!("processing {} internal relations", source.as_str().to_uppercase()),
                LogTarget::default(),
            );
            let db = AccessionsDb::open(config, source)?;
            let file = config
                .accessions_db_path(source.as_str())
                .display()
                .to_string();
            let mut sink = sender.sink();
            process_source(&db, source, &file, log, &mut sink)?;
            sink.finish()?;
        }
        Ok(())
    })?;

    log.info(
        &format!("loaded {written} sra edges"),
        LogTarget::default(),
    );
    Ok(written)
}

fn process_source(
    db: &AccessionsDb,
    source: ArchiveSource,
    file: &str,
    log: &RunLogger,
    sink: &mut EdgeSink,
) -> Result<(), IngestError> {
    for (kind, left_type, right_type) in RELATIONS {
        let mut count = 0u64;
        for (left, right) in db.relation_pairs(kind)? {
            if let Some((left, right)) = checked_pair(
                log,
                source.as_str(),
                file,
                &left,
                left_type,
                &right,
                right_type,
            ) {
                sink.push_pair(left_type, left, right_type, right)?;
                count += 1;
            }
        }
        log.info(
            &format!(
                "extracted {count} {} {} <-> {} relations",
                source.as_str().to_uppercase(),
                left_type.as_str(),
                right_type.as_str()
            ),
            LogTarget::default(),
        );
    }
    Ok(())
}
