// SPDX-License-Identifier: Apache-2.0

//! JGA JSONL emission.
//!
//! Four per-type XML documents, each small enough to hold at once, so
//! this emitter is single-shot per type: parse, join with DBLink, apply
//! the per-type `date.csv`, write one JSONL file. JGA carries no
//! modification timestamps, so the family always runs in full mode and
//! its `last_run.json` entry stays informational. The emission step is
//! non-fatal by default in the pipeline sequence.

use crate::jsonl::{write_jsonl, xrefs_for};
use crate::xml::{parse_record, XmlNode};
use crate::IngestError;
use seqlink_core::time::normalize_timestamp;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use seqlink_model::last_run::{Family, LastRun};
use seqlink_model::{Accessibility, Distribution, JgaDoc, Status, SEARCH_BASE_URL};
use seqlink_store::{Blacklists, DblinkReader};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const JGA_TYPES: [AccessionType; 4] = [
    AccessionType::JgaStudy,
    AccessionType::JgaDataset,
    AccessionType::JgaDac,
    AccessionType::JgaPolicy,
];

#[must_use]
pub fn xml_keys(ty: AccessionType) -> (&'static str, &'static str) {
    match ty {
        AccessionType::JgaStudy => ("STUDY_SET", "STUDY"),
        AccessionType::JgaDataset => ("DATASETS", "DATASET"),
        AccessionType::JgaDac => ("DAC_SET", "DAC"),
        _ => ("POLICY_SET", "POLICY"),
    }
}

/// `study` from `jga-study`, used for file names under the jga tree.
#[must_use]
pub fn short_name(ty: AccessionType) -> &'static str {
    match ty {
        AccessionType::JgaStudy => "study",
        AccessionType::JgaDataset => "dataset",
        AccessionType::JgaDac => "dac",
        _ => "policy",
    }
}

pub fn generate_jga_jsonl(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let out_dir = config.jsonl_dir("jga");
    fs::create_dir_all(&out_dir)?;

    let blacklists = Blacklists::load(config)?;
    let dblink = DblinkReader::open(config)?;

    let mut total = 0u64;
    for ty in JGA_TYPES {
        total += emit_type(config, log, &dblink, &blacklists.jga, ty, &out_dir)?;
    }

    log.info(&format!("wrote {total} jga documents"), LogTarget::default());
    LastRun::record_success(&config.last_run_path(), Family::Jga, log.started_at())
        .map_err(|e| IngestError(e.to_string()))?;
    Ok(total)
}

fn emit_type(
    config: &Config,
    log: &RunLogger,
    dblink: &DblinkReader,
    blacklist: &HashSet<String>,
    ty: AccessionType,
    out_dir: &Path,
) -> Result<u64, IngestError> {
    let xml_path = config.jga_dir().join(format!("{}.xml", ty.as_str()));
    if !xml_path.exists() {
        return Err(IngestError(format!(
            "jga xml not found: {}",
            xml_path.display()
        )));
    }
    log.info(
        "loading jga xml",
        LogTarget::file(xml_path.display().to_string()),
    );

    let mut docs = parse_documents(&fs::read(&xml_path)?, ty, blacklist)?;
    log.info(
        &format!("parsed {} {} entries", docs.len(), ty.as_str()),
        LogTarget::file(xml_path.display().to_string()),
    );

    let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
    let xref_map = xrefs_for(dblink, ty, &accessions)?;
    for doc in &mut docs {
        if let Some(xrefs) = xref_map.get(&doc.identifier) {
            doc.db_xrefs = xrefs.clone();
        }
    }

    let date_map = load_date_map(config, ty, log)?;
    for doc in &mut docs {
        if let Some((created, published, modified)) = date_map.get(&doc.identifier) {
            doc.date_created = Some(created.clone());
            doc.date_published = Some(published.clone());
            doc.date_modified = Some(modified.clone());
        }
    }

    let out_path = out_dir.join(format!("{}.jsonl", ty.as_str()));
    write_jsonl(&out_path, &docs)?;
    log.info(
        &format!("wrote {} documents", docs.len()),
        LogTarget::file(out_path.display().to_string()),
    );
    Ok(docs.len() as u64)
}

pub fn parse_documents(
    bytes: &[u8],
    ty: AccessionType,
    blacklist: &HashSet<String>,
) -> Result<Vec<JgaDoc>, IngestError> {
    let (set_key, entry_key) = xml_keys(ty);
    let root = parse_record(bytes)?;
    if root.name != set_key {
        return Err(IngestError(format!(
            "expected {set_key} root, found {}",
            root.name
        )));
    }
    Ok(root
        .children_named(entry_key)
        .filter_map(|entry| build_doc(entry, ty, blacklist))
        .collect())
}

fn build_doc(entry: &XmlNode, ty: AccessionType, blacklist: &HashSet<String>) -> Option<JgaDoc> {
    let accession = entry.attr("accession")?.to_string();
    if blacklist.contains(&accession) {
        return None;
    }
    let name = entry
        .attr("alias")
        .map_or_else(|| accession.clone(), ToString::to_string);

    Some(JgaDoc {
        identifier: accession.clone(),
        properties: entry.to_value(),
        distribution: Distribution::data_download(ty.as_str(), &accession),
        is_part_of: "jga".to_string(),
        type_: ty,
        name: Some(name),
        url: format!("{SEARCH_BASE_URL}/search/entries/{}/{accession}", ty.as_str()),
        organism: Some(JgaDoc::organism_homo_sapiens()),
        title: extract_title(entry, ty),
        description: extract_description(entry, ty),
        db_xrefs: Vec::new(),
        same_as: Vec::new(),
        status: Status::Live,
        accessibility: Accessibility::ControlledAccess,
        date_created: None,
        date_modified: None,
        date_published: None,
    })
}

fn extract_title(entry: &XmlNode, ty: AccessionType) -> Option<String> {
    match ty {
        AccessionType::JgaStudy => entry
            .child("DESCRIPTOR")
            .and_then(|d| d.child("STUDY_TITLE"))
            .and_then(XmlNode::text_trim)
            .map(ToString::to_string),
        AccessionType::JgaDataset | AccessionType::JgaPolicy => entry
            .child("TITLE")
            .and_then(XmlNode::text_trim)
            .map(ToString::to_string),
        _ => None,
    }
}

fn extract_description(entry: &XmlNode, ty: AccessionType) -> Option<String> {
    match ty {
        AccessionType::JgaStudy => entry
            .child("DESCRIPTOR")
            .and_then(|d| d.child("STUDY_ABSTRACT"))
            .and_then(XmlNode::text_trim)
            .map(ToString::to_string),
        AccessionType::JgaDataset => entry
            .child("DESCRIPTION")
            .and_then(XmlNode::text_trim)
            .map(ToString::to_string),
        _ => None,
    }
}

/// `{type}.date.csv`: `accession,dateCreated,datePublished,dateModified`
/// with a header, timestamps in the archive's PostgreSQL export style.
pub fn load_date_map(
    config: &Config,
    ty: AccessionType,
    log: &RunLogger,
) -> Result<BTreeMap<String, (String, String, String)>, IngestError> {
    let path = config
        .jga_dir()
        .join(format!("{}.date.csv", short_name(ty)));
    if !path.exists() {
        return Err(IngestError(format!(
            "jga date csv not found: {}",
            path.display()
        )));
    }
    let file = fs::File::open(&path)?;
    let mut lines = BufReader::new(file).lines();
    lines.next(); // header

    let mut out = BTreeMap::new();
    for line in lines {
        let line = line?;
        let cols: Vec<&str> = line.trim_end().split(',').collect();
        if cols.len() != 4 {
            log.error(
                "invalid row in jga date csv",
                &format!("expected 4 columns, found {}", cols.len()),
                LogTarget::file(path.display().to_string()),
            );
            continue;
        }
        let (Some(created), Some(published), Some(modified)) = (
            normalize_timestamp(cols[1]),
            normalize_timestamp(cols[2]),
            normalize_timestamp(cols[3]),
        ) else {
            log.error(
                "unparseable timestamp in jga date csv",
                &format!("row for {}", cols[0]),
                LogTarget::file(path.display().to_string()),
            );
            continue;
        };
        out.insert(cols[0].to_string(), (created, published, modified));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_documents_are_controlled_access_human() {
        let docs = parse_documents(
            b"<DATASETS><DATASET accession=\"JGAD000001\" alias=\"ds1\">\
                <TITLE>dataset title</TITLE><DESCRIPTION>desc</DESCRIPTION>\
              </DATASET></DATASETS>",
            AccessionType::JgaDataset,
            &HashSet::new(),
        )
        .expect("parse");
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.identifier, "JGAD000001");
        assert_eq!(doc.title.as_deref(), Some("dataset title"));
        assert_eq!(doc.accessibility, Accessibility::ControlledAccess);
        assert_eq!(
            doc.organism.as_ref().and_then(|o| o.identifier.as_deref()),
            Some("9606")
        );
    }

    #[test]
    fn blacklisted_jga_entries_are_skipped() {
        let blacklist = HashSet::from(["JGAD000001".to_string()]);
        let docs = parse_documents(
            b"<DATASETS><DATASET accession=\"JGAD000001\"/><DATASET accession=\"JGAD000002\"/></DATASETS>",
            AccessionType::JgaDataset,
            &blacklist,
        )
        .expect("parse");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].identifier, "JGAD000002");
    }

    #[test]
    fn single_dac_root_yields_one_document() {
        let docs = parse_documents(
            b"<DAC_SET><DAC accession=\"JGAC000001\" alias=\"dac\"/></DAC_SET>",
            AccessionType::JgaDac,
            &HashSet::new(),
        )
        .expect("parse");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name.as_deref(), Some("dac"));
    }
}
