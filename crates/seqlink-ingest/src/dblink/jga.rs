// SPDX-License-Identifier: Apache-2.0

//! JGA relation extraction.
//!
//! `jga-study.xml` yields study -> hum-id (the `NBDC Number` study
//! attribute) and study -> pubmed-id (PUBMED publications). The seven
//! relation CSVs yield the internal graph:
//!
//!   dataset -> study = (dataset⋈analysis⋈study) ∪ (dataset⋈data⋈experiment⋈study)
//!   dataset -> policy, policy -> dac directly.
//!
//! CSV rows are `id,from_id,to_id` with a header; the first column is
//! ignored.

use crate::dblink::{checked_pair, run_extractor};
use crate::xml::{parse_record, XmlNode};
use crate::IngestError;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

type IdPairs = BTreeSet<(String, String)>;

pub fn create_jga_relations(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let jga_dir = config.jga_dir();

    let written = run_extractor(config, |sender| {
        let mut sink = sender.sink();

        let (study_hum, study_pubmed) = process_study_xml(&jga_dir.join("jga-study.xml"), log)?;
        log.info(
            &format!("extracted {} study -> hum-id relations", study_hum.len()),
            LogTarget::default(),
        );
        log.info(
            &format!("extracted {} study -> pubmed-id relations", study_pubmed.len()),
            LogTarget::default(),
        );
        for (study, hum) in study_hum {
            // NBDC numbers occasionally carry a version suffix; classify
            // normalizes it away.
            match seqlink_core::accession::classify(&hum) {
                Some((AccessionType::HumId, normalized)) => {
                    sink.push_pair(
                        AccessionType::JgaStudy,
                        study,
                        AccessionType::HumId,
                        normalized,
                    )?;
                }
                _ => {
                    crate::dblink::log_invalid(log, "jga", "jga-study.xml", &hum, AccessionType::HumId);
                }
            }
        }
        for (study, pubmed) in study_pubmed {
            if let Some((study, pubmed)) = checked_pair(
                log,
                "jga",
                "jga-study.xml",
                &study,
                AccessionType::JgaStudy,
                &pubmed,
                AccessionType::PubmedId,
            ) {
                sink.push_pair(AccessionType::JgaStudy, study, AccessionType::PubmedId, pubmed)?;
            }
        }

        let study_dataset = build_study_dataset(&jga_dir, log)?;
        log.info(
            &format!("built {} study -> dataset relations", study_dataset.len()),
            LogTarget::default(),
        );
        for (study, dataset) in study_dataset {
            if let Some((study, dataset)) = checked_pair(
                log,
                "jga",
                "relation csvs",
                &study,
                AccessionType::JgaStudy,
                &dataset,
                AccessionType::JgaDataset,
            ) {
                sink.push_pair(
                    AccessionType::JgaStudy,
                    study,
                    AccessionType::JgaDataset,
                    dataset,
                )?;
            }
        }

        for (csv, from_type, to_type) in [
            (
                "dataset-policy-relation.csv",
                AccessionType::JgaDataset,
                AccessionType::JgaPolicy,
            ),
            (
                "policy-dac-relation.csv",
                AccessionType::JgaPolicy,
                AccessionType::JgaDac,
            ),
        ] {
            let path = jga_dir.join(csv);
            let pairs = read_relation_csv(&path, log)?;
            log.info(
                &format!("loaded {} pairs from {csv}", pairs.len()),
                LogTarget::file(path.display().to_string()),
            );
            for (from, to) in pairs {
                if let Some((from, to)) =
                    checked_pair(log, "jga", csv, &from, from_type, &to, to_type)
                {
                    sink.push_pair(from_type, from, to_type, to)?;
                }
            }
        }

        sink.finish()
    })?;

    log.info(&format!("loaded {written} jga edges"), LogTarget::default());
    Ok(written)
}

fn process_study_xml(
    path: &Path,
    log: &RunLogger,
) -> Result<(IdPairs, IdPairs), IngestError> {
    let mut study_hum = IdPairs::new();
    let mut study_pubmed = IdPairs::new();
    if !path.exists() {
        log.warning(
            "jga-study.xml not found, skipping study attributes",
            LogTarget::file(path.display().to_string()),
        );
        return Ok((study_hum, study_pubmed));
    }

    let bytes = fs::read(path)?;
    let root = parse_record(&bytes)?;
    for study in root.children_named("STUDY") {
        let Some(accession) = study.attr("accession") else {
            continue;
        };
        if let Some(hum) = extract_hum_id(study) {
            study_hum.insert((accession.to_string(), hum));
        }
        for pubmed in extract_pubmed_ids(study) {
            study_pubmed.insert((accession.to_string(), pubmed));
        }
    }
    Ok((study_hum, study_pubmed))
}

fn extract_hum_id(study: &XmlNode) -> Option<String> {
    study
        .child("STUDY_ATTRIBUTES")?
        .children_named("STUDY_ATTRIBUTE")
        .find(|attr| {
            attr.child("TAG").and_then(XmlNode::text_trim) == Some("NBDC Number")
        })
        .and_then(|attr| attr.child("VALUE"))
        .and_then(XmlNode::text_trim)
        .map(ToString::to_string)
}

fn extract_pubmed_ids(study: &XmlNode) -> Vec<String> {
    let Some(pubs) = study.child("PUBLICATIONS") else {
        return Vec::new();
    };
    pubs.children_named("PUBLICATION")
        .filter(|publication| {
            publication.child("DB_TYPE").and_then(XmlNode::text_trim) == Some("PUBMED")
                || publication.attr("DB_TYPE") == Some("PUBMED")
        })
        .filter_map(|publication| publication.attr("id"))
        .map(ToString::to_string)
        .collect()
}

fn read_relation_csv(path: &Path, log: &RunLogger) -> Result<IdPairs, IngestError> {
    let mut out = IdPairs::new();
    if !path.exists() {
        log.warning(
            "relation csv not found",
            LogTarget::file(path.display().to_string()),
        );
        return Ok(out);
    }
    let file = fs::File::open(path)?;
    let mut lines = BufReader::new(file).lines();
    lines.next(); // header
    for line in lines {
        let line = line?;
        let cols: Vec<&str> = line.trim_end().split(',').collect();
        if cols.len() < 3 {
            continue;
        }
        let from = cols[1].trim();
        let to = cols[2].trim();
        if !from.is_empty() && !to.is_empty() {
            out.insert((from.to_string(), to.to_string()));
        }
    }
    Ok(out)
}

/// `(a, b) ⋈ (b, c) -> (a, c)`.
fn join_pairs(ab: &IdPairs, bc: &IdPairs) -> IdPairs {
    let mut by_b: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (b, c) in bc {
        by_b.entry(b.as_str()).or_default().push(c.as_str());
    }
    let mut out = IdPairs::new();
    for (a, b) in ab {
        if let Some(cs) = by_b.get(b.as_str()) {
            for c in cs {
                out.insert((a.clone(), (*c).to_string()));
            }
        }
    }
    out
}

fn build_study_dataset(jga_dir: &Path, log: &RunLogger) -> Result<IdPairs, IngestError> {
    let dataset_analysis = read_relation_csv(&jga_dir.join("dataset-analysis-relation.csv"), log)?;
    let analysis_study = read_relation_csv(&jga_dir.join("analysis-study-relation.csv"), log)?;
    let dataset_data = read_relation_csv(&jga_dir.join("dataset-data-relation.csv"), log)?;
    let data_experiment = read_relation_csv(&jga_dir.join("data-experiment-relation.csv"), log)?;
    let experiment_study = read_relation_csv(&jga_dir.join("experiment-study-relation.csv"), log)?;

    let path1 = join_pairs(&dataset_analysis, &analysis_study);
    let data_study = join_pairs(&data_experiment, &experiment_study);
    let path2 = join_pairs(&dataset_data, &data_study);

    let mut dataset_study = path1;
    dataset_study.extend(path2);

    Ok(dataset_study
        .into_iter()
        .map(|(dataset, study)| (study, dataset))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_follows_shared_middles() {
        let ab: IdPairs = [("d1", "a1"), ("d2", "a2")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let bc: IdPairs = [("a1", "s1"), ("a1", "s2"), ("a9", "s9")]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let joined = join_pairs(&ab, &bc);
        assert_eq!(joined.len(), 2);
        assert!(joined.contains(&("d1".to_string(), "s1".to_string())));
        assert!(joined.contains(&("d1".to_string(), "s2".to_string())));
    }

    #[test]
    fn study_attributes_yield_hum_and_pubmed() {
        let root = parse_record(
            b"<STUDY_SET><STUDY accession=\"JGAS000001\" alias=\"s\">\
                <STUDY_ATTRIBUTES>\
                  <STUDY_ATTRIBUTE><TAG>NBDC Number</TAG><VALUE>hum0001</VALUE></STUDY_ATTRIBUTE>\
                  <STUDY_ATTRIBUTE><TAG>other</TAG><VALUE>x</VALUE></STUDY_ATTRIBUTE>\
                </STUDY_ATTRIBUTES>\
                <PUBLICATIONS>\
                  <PUBLICATION id=\"12345678\"><DB_TYPE>PUBMED</DB_TYPE></PUBLICATION>\
                  <PUBLICATION id=\"x\"><DB_TYPE>DOI</DB_TYPE></PUBLICATION>\
                </PUBLICATIONS>\
              </STUDY></STUDY_SET>",
        )
        .expect("parse");
        let study = root.children_named("STUDY").next().expect("study");
        assert_eq!(extract_hum_id(study).as_deref(), Some("hum0001"));
        assert_eq!(extract_pubmed_ids(study), vec!["12345678"]);
    }
}
