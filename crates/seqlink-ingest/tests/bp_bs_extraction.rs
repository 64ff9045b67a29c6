// SPDX-License-Identifier: Apache-2.0

//! End-to-end BioSample <-> BioProject extraction: raw XML through the
//! splitter, both accessions stores, the preserved file, and the
//! relation store finalize.

use chrono::NaiveDate;
use seqlink_core::{AccessionType, Config, RunLogger, RunStatus};
use seqlink_ingest::dblink::bp_bs::create_bp_bs_relations;
use seqlink_ingest::split::{split_all_atomically, SplitSpec};
use seqlink_store::accessions::{build_accessions_db, ArchiveSource};
use seqlink_store::dblink::{finalize, DblinkReader, DblinkWriter};
use seqlink_store::Blacklists;
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

fn write_accessions_store(config: &Config, source: ArchiveSource, rows: &[String]) {
    let tab = config
        .const_dir
        .join(format!("{}_fixture.tab", source.as_str()));
    fs::create_dir_all(tab.parent().expect("parent")).expect("mkdir");
    let mut content = vec![TAB_HEADER.to_string()];
    content.extend_from_slice(rows);
    fs::write(&tab, content.join("\n") + "\n").expect("write tab");
    build_accessions_db(config, source, &tab).expect("build store");
}

#[test]
fn relations_flow_from_every_source_into_the_store() {
    let tmp = tempdir().expect("tempdir");
    let config = test_config(tmp.path());
    fs::create_dir_all(&config.result_dir).expect("mkdir");

    // NCBI-dialect BioSample input (one sample referencing PRJNA001).
    let ncbi_xml = tmp.path().join("ncbi_biosample_set.xml");
    fs::write(
        &ncbi_xml,
        "<BioSampleSet>\n\
         <BioSample accession=\"SAMN0001\">\n\
           <Links><Link target=\"bioproject\" label=\"PRJNA001\">1</Link></Links>\n\
         </BioSample>\n\
         <BioSample accession=\"bogus\">\n\
           <Links><Link target=\"bioproject\" label=\"PRJNA002\">2</Link></Links>\n\
         </BioSample>\n\
         </BioSampleSet>\n",
    )
    .expect("write ncbi xml");

    // DDBJ-dialect input (Ids + bioproject_id attribute).
    let ddbj_xml = tmp.path().join("ddbj_biosample_set.xml");
    fs::write(
        &ddbj_xml,
        "<BioSampleSet>\n\
         <BioSample>\n\
           <Ids><Id namespace=\"BioSample\">SAMD1</Id></Ids>\n\
           <Attributes><Attribute attribute_name=\"bioproject_id\">PRJDB1</Attribute></Attributes>\n\
         </BioSample>\n\
         </BioSampleSet>\n",
    )
    .expect("write ddbj xml");

    split_all_atomically(
        &[
            (ncbi_xml, SplitSpec::new("BioSample", "BioSampleSet", "ncbi")),
            (ddbj_xml, SplitSpec::new("BioSample", "BioSampleSet", "ddbj")),
        ],
        &config.tmp_xml_dir("bs"),
    )
    .expect("split");

    // Both accessions stores contribute one pair each; the SRA store's
    // numeric BioSample id must be skipped.
    write_accessions_store(
        &config,
        ArchiveSource::Sra,
        &[
            tab_row(&[
                ("Accession", "SRR000001"),
                ("Submission", "SRA000001"),
                ("Type", "RUN"),
                ("BioSample", "SAMN0002"),
                ("BioProject", "PRJNA002"),
            ]),
            tab_row(&[
                ("Accession", "SRR000002"),
                ("Submission", "SRA000001"),
                ("Type", "RUN"),
                ("BioSample", "12345"),
                ("BioProject", "PRJNA003"),
            ]),
        ],
    );
    write_accessions_store(
        &config,
        ArchiveSource::Dra,
        &[tab_row(&[
            ("Accession", "DRR000001"),
            ("Submission", "DRA000001"),
            ("Type", "RUN"),
            ("BioSample", "SAMD2"),
            ("BioProject", "PRJDB2"),
        ])],
    );

    // Preserved file: header row plus one curated pair.
    let preserved = config.bp_bs_preserved_path();
    fs::create_dir_all(preserved.parent().expect("parent")).expect("mkdir");
    fs::write(&preserved, "from_id\tto_id\nSAMD3\tPRJDB3\n").expect("write preserved");

    DblinkWriter::init(&config).expect("init store");
    let log = RunLogger::start(&config, "create_dblink_bp_bs_relations").expect("logger");
    let written = create_bp_bs_relations(&config, &log).expect("extract");
    log.finish(RunStatus::Success);
    assert_eq!(written, 5, "xml(2) + sra(1) + dra(1) + preserved(1)");

    finalize(&config, &Blacklists::default()).expect("finalize");
    let reader = DblinkReader::open(&config).expect("open");

    for (sample, project) in [
        ("SAMN0001", "PRJNA001"),
        ("SAMD1", "PRJDB1"),
        ("SAMN0002", "PRJNA002"),
        ("SAMD2", "PRJDB2"),
        ("SAMD3", "PRJDB3"),
    ] {
        let related = reader
            .related_bulk(AccessionType::Biosample, &[sample.to_string()])
            .expect("related");
        assert_eq!(
            related.get(sample),
            Some(&vec![(AccessionType::Bioproject, project.to_string())]),
            "{sample} must link to {project}"
        );
    }

    // The invalid NCBI sample and the numeric SRA id contributed nothing.
    let counts = reader.counts().expect("counts");
    let total: u64 = counts.iter().map(|(_, _, c)| c).sum();
    assert_eq!(total, 5);
}
