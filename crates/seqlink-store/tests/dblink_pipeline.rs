// SPDX-License-Identifier: Apache-2.0

//! Relation-store lifecycle: append from several producers, finalize,
//! read back through both orientations, export sorted TSVs.

use chrono::NaiveDate;
use seqlink_core::{AccessionType, Config, RelationEdge};
use seqlink_store::dblink::{finalize, DblinkReader, DblinkWriter};
use seqlink_store::Blacklists;
use std::collections::HashSet;
use std::path::Path;
use tempfile::tempdir;

fn test_config(root: &Path) -> Config {
    Config {
        result_dir: root.join("results"),
        const_dir: root.join("const"),
        dblink_files_dir: root.join("dblink_files"),
        postgres_url: None,
        es_url: "http://localhost:9200".to_string(),
        today: NaiveDate::from_ymd_opt(2026, 1, 30).expect("date"),
        parallel_num: 2,
        margin_days: 30,
        assembly_summary_url: None,
    }
}

fn edge(a: AccessionType, a_id: &str, b: AccessionType, b_id: &str) -> RelationEdge {
    RelationEdge::new(a, a_id, b, b_id)
}

#[test]
fn multi_extractor_build_finalize_and_export() {
    let tmp = tempdir().expect("tempdir");
    let config = test_config(tmp.path());

    // First extractor step creates the store; later ones append to it.
    let mut writer = DblinkWriter::init(&config).expect("init");
    writer
        .append(&[
            edge(AccessionType::Biosample, "SAMN0001", AccessionType::Bioproject, "PRJNA001"),
            edge(AccessionType::Bioproject, "PRJNA001", AccessionType::Biosample, "SAMN0001"),
            edge(AccessionType::Bioproject, "PRJDB1", AccessionType::Biosample, "SAMD1"),
        ])
        .expect("append bp_bs");
    drop(writer);

    let mut writer = DblinkWriter::open_tmp(&config).expect("reopen");
    writer
        .append(&[
            edge(AccessionType::Bioproject, "PRJNA9616", AccessionType::UmbrellaBioproject, "PRJNA46297"),
            edge(AccessionType::SraRun, "DRR000001", AccessionType::SraExperiment, "DRX000001"),
            edge(AccessionType::Bioproject, "PRJDB9", AccessionType::Biosample, "SAMD1"),
        ])
        .expect("append second step");
    drop(writer);

    let blacklists = Blacklists {
        bioproject: HashSet::from(["PRJDB9".to_string()]),
        ..Blacklists::default()
    };
    let total = finalize(&config, &blacklists).expect("finalize");
    // Duplicate orientations collapsed, one blacklisted edge removed.
    assert_eq!(total, 3);
    assert!(config.dblink_db_path().exists());
    assert!(!config.dblink_tmp_db_path().exists());

    let reader = DblinkReader::open(&config).expect("open");

    // Lookup works from either endpoint of the canonical row.
    let by_sample = reader
        .related_bulk(AccessionType::Biosample, &["SAMN0001".to_string()])
        .expect("by sample");
    assert_eq!(
        by_sample.get("SAMN0001"),
        Some(&vec![(AccessionType::Bioproject, "PRJNA001".to_string())])
    );
    let by_project = reader
        .related_bulk(AccessionType::Bioproject, &["PRJNA001".to_string()])
        .expect("by project");
    assert_eq!(
        by_project.get("PRJNA001"),
        Some(&vec![(AccessionType::Biosample, "SAMN0001".to_string())])
    );

    // The umbrella edge round-trips with its declared orientation.
    let umbrella = reader
        .related_bulk(AccessionType::Bioproject, &["PRJNA9616".to_string()])
        .expect("umbrella");
    assert_eq!(
        umbrella.get("PRJNA9616"),
        Some(&vec![(AccessionType::UmbrellaBioproject, "PRJNA46297".to_string())])
    );

    // Export is strictly sorted and covers exactly the finalized edges
    // for the pair.
    let out = config.dblink_files_dir.join("bioproject_to_biosample.tsv");
    let rows = reader
        .export_pair(AccessionType::Bioproject, AccessionType::Biosample, &out)
        .expect("export");
    assert_eq!(rows, 2);
    let raw = std::fs::read_to_string(&out).expect("tsv");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines, vec!["PRJDB1\tSAMD1", "PRJNA001\tSAMN0001"]);
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(lines, sorted);

    let counts = reader.counts().expect("counts");
    let total_count: u64 = counts.iter().map(|(_, _, c)| c).sum();
    assert_eq!(total_count, 3);
}

#[test]
fn blacklisted_endpoints_never_survive_finalize() {
    let tmp = tempdir().expect("tempdir");
    let config = test_config(tmp.path());

    let mut writer = DblinkWriter::init(&config).expect("init");
    writer
        .append(&[
            edge(AccessionType::Bioproject, "PRJDB1", AccessionType::Biosample, "SAMD1"),
            edge(AccessionType::Bioproject, "PRJDB2", AccessionType::Biosample, "SAMD1"),
            edge(AccessionType::SraRun, "DRR000009", AccessionType::Biosample, "SAMD2"),
        ])
        .expect("append");
    drop(writer);

    let blacklists = Blacklists {
        bioproject: HashSet::from(["PRJDB1".to_string()]),
        sra: HashSet::from(["DRR000009".to_string()]),
        ..Blacklists::default()
    };
    finalize(&config, &blacklists).expect("finalize");

    let reader = DblinkReader::open(&config).expect("open");
    for (src_type, dst_type, _) in reader.counts().expect("counts") {
        assert_ne!(src_type, "sra-run", "blacklisted run edge must be gone");
        let _ = dst_type;
    }
    let related = reader
        .related_bulk(AccessionType::Biosample, &["SAMD1".to_string()])
        .expect("related");
    assert_eq!(
        related.get("SAMD1"),
        Some(&vec![(AccessionType::Bioproject, "PRJDB2".to_string())])
    );
}
