// SPDX-License-Identifier: Apache-2.0

//! SRA emission end to end: accessions store + tar archive + relation
//! store in, six JSONL streams out; then the targeted regenerate path
//! on top of the same fixtures.

use chrono::NaiveDate;
use seqlink_core::{AccessionType, Config, RelationEdge, RunLogger, RunStatus};
use seqlink_ingest::jsonl::regenerate::regenerate;
use seqlink_ingest::jsonl::sra::generate_sra_jsonl;
use seqlink_model::last_run::Family;
use seqlink_store::accessions::{build_accessions_db, ArchiveSource};
use seqlink_store::dblink::{finalize, DblinkWriter};
use seqlink_store::Blacklists;
use std::collections::BTreeSet;
use std::fs;
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

const TAB_HEADER: &str = "Accession\tSubmission\tStatus\tUpdated\tPublished\tReceived\tType\tCenter\tVisibility\tAlias\tExperiment\tSample\tStudy\tLoaded\tSpots\tBases\tMd5sum\tBioSample\tBioProject\tReplacedBy";

fn tab_row(cols: &[(&str, &str)]) -> String {
    TAB_HEADER
        .split('\t')
        .map(|name| cols.iter().find(|(k, _)| *k == name).map_or("-", |(_, v)| v))
        .collect::<Vec<_>>()
        .join("\t")
}

fn dra_rows() -> Vec<String> {
    let mut rows = vec![tab_row(&[
        ("Accession", "DRA000001"),
        ("Submission", "DRA000001"),
        ("Type", "SUBMISSION"),
        ("Status", "live"),
        ("Updated", "2026-01-10 00:00:00"),
    ])];
    for study in ["DRP000001", "DRP000002"] {
        rows.push(tab_row(&[
            ("Accession", study),
            ("Submission", "DRA000001"),
            ("Type", "STUDY"),
            ("Updated", "2026-01-10 00:00:00"),
        ]));
    }
    for experiment in ["DRX000001", "DRX000002"] {
        rows.push(tab_row(&[
            ("Accession", experiment),
            ("Submission", "DRA000001"),
            ("Type", "EXPERIMENT"),
            ("Study", "DRP000001"),
        ]));
    }
    for run in ["DRR000001", "DRR000002", "DRR000003", "DRR000004"] {
        rows.push(tab_row(&[
            ("Accession", run),
            ("Submission", "DRA000001"),
            ("Type", "RUN"),
            ("Experiment", "DRX000001"),
            ("Updated", "2026-01-11 00:00:00"),
        ]));
    }
    for sample in ["DRS000001", "DRS000002"] {
        rows.push(tab_row(&[
            ("Accession", sample),
            ("Submission", "DRA000001"),
            ("Type", "SAMPLE"),
        ]));
    }
    rows
}

fn write_tar(config: &Config) {
    let tar_path = config.dra_tar_path();
    fs::create_dir_all(tar_path.parent().expect("parent")).expect("mkdir");
    let file = fs::File::create(&tar_path).expect("create tar");
    let mut builder = tar::Builder::new(file);

    let members: Vec<(String, String)> = vec![
        (
            "DRA000001/DRA000001.submission.xml".to_string(),
            "<SUBMISSION accession=\"DRA000001\" submission_date=\"2011-03-01\"/>".to_string(),
        ),
        (
            "DRA000001/DRA000001.study.xml".to_string(),
            "<STUDY_SET><STUDY accession=\"DRP000001\"><DESCRIPTOR><STUDY_TITLE>t1</STUDY_TITLE></DESCRIPTOR></STUDY>\
             <STUDY accession=\"DRP000002\"/></STUDY_SET>".to_string(),
        ),
        (
            "DRA000001/DRA000001.experiment.xml".to_string(),
            "<EXPERIMENT_SET><EXPERIMENT accession=\"DRX000001\"/><EXPERIMENT accession=\"DRX000002\"/></EXPERIMENT_SET>"
                .to_string(),
        ),
        (
            "DRA000001/DRA000001.run.xml".to_string(),
            "<RUN_SET><RUN accession=\"DRR000001\"/><RUN accession=\"DRR000002\"/>\
             <RUN accession=\"DRR000003\"/><RUN accession=\"DRR000004\"/></RUN_SET>"
                .to_string(),
        ),
        (
            "DRA000001/DRA000001.sample.xml".to_string(),
            "<SAMPLE_SET><SAMPLE accession=\"DRS000001\"/><SAMPLE accession=\"DRS000002\"/></SAMPLE_SET>".to_string(),
        ),
    ];
    for (name, body) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name.as_str(), body.as_bytes())
            .expect("append member");
    }
    builder.finish().expect("finish tar");
}

fn build_fixture(config: &Config) {
    fs::create_dir_all(&config.result_dir).expect("mkdir results");

    // DRA store with the full fan-out, SRA store empty.
    let dra_tab = config.const_dir.join("dra_fixture.tab");
    fs::create_dir_all(dra_tab.parent().expect("parent")).expect("mkdir");
    let mut content = vec![TAB_HEADER.to_string()];
    content.extend(dra_rows());
    fs::write(&dra_tab, content.join("\n") + "\n").expect("write dra tab");
    build_accessions_db(config, ArchiveSource::Dra, &dra_tab).expect("dra store");

    let sra_tab = config.const_dir.join("sra_fixture.tab");
    fs::write(&sra_tab, format!("{TAB_HEADER}\n")).expect("write sra tab");
    build_accessions_db(config, ArchiveSource::Sra, &sra_tab).expect("sra store");

    write_tar(config);

    // Relation store: the submission's expansions.
    let mut writer = DblinkWriter::init(config).expect("init dblink");
    let mut edges = Vec::new();
    for (ty, acc) in [
        (AccessionType::SraStudy, "DRP000001"),
        (AccessionType::SraStudy, "DRP000002"),
        (AccessionType::SraExperiment, "DRX000001"),
        (AccessionType::SraExperiment, "DRX000002"),
        (AccessionType::SraRun, "DRR000001"),
        (AccessionType::SraRun, "DRR000002"),
        (AccessionType::SraRun, "DRR000003"),
        (AccessionType::SraRun, "DRR000004"),
        (AccessionType::SraSample, "DRS000001"),
        (AccessionType::SraSample, "DRS000002"),
    ] {
        edges.push(RelationEdge::new(
            AccessionType::SraSubmission,
            "DRA000001",
            ty,
            acc,
        ));
    }
    writer.append(&edges).expect("append");
    drop(writer);
    finalize(config, &Blacklists::default()).expect("finalize");
}

fn read_jsonl_lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn full_emission_fans_out_eleven_documents() {
    let tmp = tempdir().expect("tempdir");
    let config = test_config(tmp.path());
    build_fixture(&config);

    let log = RunLogger::start(&config, "generate_sra_jsonl").expect("logger");
    let total = generate_sra_jsonl(&config, &log, true).expect("emit");
    log.finish(RunStatus::Success);
    assert_eq!(total, 11);

    let out_dir = config.jsonl_dir("sra");
    let expectations = [
        ("dra_submission_0001.jsonl", 1),
        ("dra_study_0001.jsonl", 2),
        ("dra_experiment_0001.jsonl", 2),
        ("dra_run_0001.jsonl", 4),
        ("dra_sample_0001.jsonl", 2),
        ("dra_analysis_0001.jsonl", 0),
    ];
    for (name, count) in expectations {
        let lines = read_jsonl_lines(&out_dir.join(name));
        assert_eq!(lines.len(), count, "{name}");
    }

    // The submission document references every expansion.
    let submission = &read_jsonl_lines(&out_dir.join("dra_submission_0001.jsonl"))[0];
    assert_eq!(submission["identifier"], "DRA000001");
    assert_eq!(submission["type"], "sra-submission");
    let xrefs = submission["dbXrefs"].as_array().expect("xrefs");
    assert_eq!(xrefs.len(), 10);

    // DRA dates come from the submission XML; modification from the tab.
    let runs = read_jsonl_lines(&out_dir.join("dra_run_0001.jsonl"));
    let drr1 = runs
        .iter()
        .find(|d| d["identifier"] == "DRR000001")
        .expect("DRR000001");
    assert_eq!(drr1["dateCreated"], "2011-03-01");
    assert_eq!(drr1["dateModified"], "2026-01-11T00:00:00Z");

    // Success recorded the family's high-water mark.
    let last_run = fs::read_to_string(config.last_run_path()).expect("last_run");
    let state: serde_json::Value = serde_json::from_str(&last_run).expect("json");
    assert_eq!(state["sra"].as_str(), Some(log.started_at()));
    assert!(state["bioproject"].is_null());
}

#[test]
fn regenerate_materializes_exactly_the_requested_accession() {
    let tmp = tempdir().expect("tempdir");
    let config = test_config(tmp.path());
    build_fixture(&config);

    // Seed last_run.json and snapshot it; regenerate must not touch it.
    let seeded = seqlink_model::LastRun {
        sra: Some("2026-01-01T00:00:00Z".to_string()),
        ..seqlink_model::LastRun::default()
    };
    seeded.store(&config.last_run_path()).expect("seed last_run");
    let before = fs::read(config.last_run_path()).expect("snapshot");

    let log = RunLogger::start(&config, "regenerate_jsonl").expect("logger");
    let output_dir = config.regenerate_dir();
    let targets: BTreeSet<String> = BTreeSet::from(["DRR000001".to_string()]);
    let total = regenerate(&config, &log, Family::Sra, &targets, &output_dir).expect("regenerate");
    log.finish(RunStatus::Success);
    assert_eq!(total, 1);

    let runs = read_jsonl_lines(&output_dir.join("run.jsonl"));
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["identifier"], "DRR000001");
    // Only the run stream was materialized.
    assert!(!output_dir.join("study.jsonl").exists());
    assert!(!output_dir.join("submission.jsonl").exists());

    let after = fs::read(config.last_run_path()).expect("snapshot after");
    assert_eq!(before, after, "last_run.json must be byte-identical");
}
