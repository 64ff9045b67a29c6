// SPDX-License-Identifier: Apache-2.0

//! BioSample <-> BioProject relation extraction.
//!
//! Sources, in load order: the split NCBI and DDBJ BioSample shards,
//! the SRA and DRA accessions stores, and the curated preserved TSV.
//! The two XML dialects reference their BioProject differently: NCBI
//! uses `<Link target="bioproject">` and the `bioproject_accession`
//! attribute, DDBJ carries its accession under `<Ids>` and uses the
//! `bioproject_id` attribute.

use crate::dblink::{checked_pair, log_invalid, map_shards, run_extractor, EdgeSender};
use crate::split::list_shards;
use crate::xml::{iterate_records, parse_record, XmlNode};
use crate::IngestError;
use seqlink_core::{AccessionType, Config, LogTarget, RunLogger};
use seqlink_store::accessions::{AccessionsDb, ArchiveSource, SraRelationKind};
use std::path::Path;

pub fn create_bp_bs_relations(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let shard_dir = config.tmp_xml_dir("bs");

    let written = run_extractor(config, |sender| {
        for (prefix, is_ddbj) in [("ncbi", false), ("ddbj", true)] {
            let shards = list_shards(&shard_dir, prefix)?;
            if shards.is_empty() {
                return Err(IngestError(format!(
                    "no {prefix} biosample shards found in {}",
                    shard_dir.display()
                )));
            }
            log.info(
                &format!("processing {} {prefix} biosample shards", shards.len()),
                LogTarget::file(shard_dir.display().to_string()),
            );
            let (counts, failed) = map_shards(&shards, config.parallel_num, log, |shard| {
                let mut sink = sender.sink();
                let count = extract_shard(shard, is_ddbj, prefix, log, &mut |bs, bp| {
                    sink.push_pair(
                        AccessionType::Biosample,
                        bs,
                        AccessionType::Bioproject,
                        bp,
                    )
                })?;
                sink.finish()?;
                Ok(count)
            });
            if failed > 0 {
                log.warning(
                    &format!("{failed} {prefix} biosample shard(s) failed"),
                    LogTarget::default(),
                );
            }
            let total: usize = counts.iter().sum();
            log.info(
                &format!("extracted {total} {prefix} BioSample -> BioProject relations"),
                LogTarget::default(),
            );
        }

        extract_from_accessions(config, log, sender)?;
        extract_preserved(config, log, sender)?;
        Ok(())
    })?;

    log.info(
        &format!("loaded {written} BioSample <-> BioProject edges"),
        LogTarget::default(),
    );
    Ok(written)
}

fn extract_shard(
    shard: &Path,
    is_ddbj: bool,
    source: &str,
    log: &RunLogger,
    emit: &mut dyn FnMut(&str, &str) -> Result<(), IngestError>,
) -> Result<usize, IngestError> {
    let file = shard.display().to_string();
    let mut count = 0usize;
    for record in iterate_records(shard, "BioSample")? {
        let node = match parse_record(&record?) {
            Ok(node) => node,
            Err(e) => {
                log.warning(
                    &format!("failed to parse biosample record: {e}"),
                    LogTarget::file(file.clone()),
                );
                continue;
            }
        };
        let Some(accession) = sample_accession(&node, is_ddbj) else {
            continue;
        };
        if !seqlink_core::accession::is_valid(&accession, AccessionType::Biosample) {
            log_invalid(log, source, &file, &accession, AccessionType::Biosample);
            continue;
        }
        for bp in referenced_bioprojects(&node, is_ddbj) {
            if let Some((bs, bp)) = checked_pair(
                log,
                source,
                &file,
                &accession,
                AccessionType::Biosample,
                &bp,
                AccessionType::Bioproject,
            ) {
                emit(&bs, &bp)?;
                count += 1;
            }
        }
    }
    Ok(count)
}

/// NCBI carries the accession as an attribute; DDBJ under
/// `<Ids><Id namespace="BioSample">`.
fn sample_accession(node: &XmlNode, is_ddbj: bool) -> Option<String> {
    if !is_ddbj {
        return node.attr("accession").map(ToString::to_string);
    }
    node.child("Ids")?
        .children_named("Id")
        .find(|id| id.attr("namespace") == Some("BioSample"))
        .and_then(XmlNode::text_trim)
        .map(ToString::to_string)
}

fn referenced_bioprojects(node: &XmlNode, is_ddbj: bool) -> Vec<String> {
    let mut out = Vec::new();
    node.walk(&mut |elem| {
        if !is_ddbj && elem.name == "Link" && elem.attr("target") == Some("bioproject") {
            let raw = elem
                .attr("label")
                .map(ToString::to_string)
                .or_else(|| elem.text_trim().map(ToString::to_string));
            if let Some(raw) = raw {
                // Some NCBI links carry the bare numeric project id.
                let bp = if raw.starts_with("PRJ") {
                    raw
                } else {
                    format!("PRJNA{raw}")
                };
                out.push(bp);
            }
        }
        if elem.name == "Attribute" {
            let attr_name = elem.attr("attribute_name");
            let wanted = if is_ddbj {
                matches!(attr_name, Some("bioproject_id") | Some("bioproject_accession"))
            } else {
                attr_name == Some("bioproject_accession")
            };
            if wanted {
                if let Some(text) = elem.text_trim() {
                    out.push(text.to_string());
                }
            }
        }
    });
    out
}

fn extract_from_accessions(
    config: &Config,
    log: &RunLogger,
    sender: &EdgeSender,
) -> Result<(), IngestError> {
    for source in [ArchiveSource::Sra, ArchiveSource::Dra] {
        let db = AccessionsDb::open(config, source)?;
        let db_path = config.accessions_db_path(source.as_str());
        let file = db_path.display().to_string();
        log.info(
            &format!("processing {} accessions store", source.as_str()),
            LogTarget::file(file.clone()),
        );
        let mut sink = sender.sink();
        let mut count = 0usize;
        for (bp, bs) in db.relation_pairs(SraRelationKind::BioprojectBiosample)? {
            // The tab carries numeric internal ids in these columns for
            // some rows; validation weeds them out.
            if let Some((bs, bp)) = checked_pair(
                log,
                source.as_str(),
                &file,
                &bs,
                AccessionType::Biosample,
                &bp,
                AccessionType::Bioproject,
            ) {
                sink.push_pair(AccessionType::Biosample, bs, AccessionType::Bioproject, bp)?;
                count += 1;
            }
        }
        sink.finish()?;
        log.info(
            &format!("extracted {count} {} BioSample -> BioProject relations", source.as_str()),
            LogTarget::default(),
        );
    }
    Ok(())
}

fn extract_preserved(
    config: &Config,
    log: &RunLogger,
    sender: &EdgeSender,
) -> Result<(), IngestError> {
    let path = config.bp_bs_preserved_path();
    let pairs = crate::dblink::load_preserved(
        log,
        &path,
        AccessionType::Biosample,
        AccessionType::Bioproject,
    )?;
    log.info(
        &format!("loaded {} preserved BioSample -> BioProject pairs", pairs.len()),
        LogTarget::file(path.display().to_string()),
    );
    let mut sink = sender.sink();
    for (bs, bp) in pairs {
        sink.push_pair(AccessionType::Biosample, bs, AccessionType::Bioproject, bp)?;
    }
    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_record;

    #[test]
    fn ncbi_record_links_and_attributes_are_both_read() {
        let node = parse_record(
            b"<BioSample accession=\"SAMN0001\">\
                <Links><Link target=\"bioproject\" label=\"PRJNA001\">1</Link>\
                       <Link target=\"bioproject\">12345</Link></Links>\
                <Attributes><Attribute attribute_name=\"bioproject_accession\">PRJNA002</Attribute></Attributes>\
              </BioSample>",
        )
        .expect("parse");
        assert_eq!(sample_accession(&node, false).as_deref(), Some("SAMN0001"));
        let bps = referenced_bioprojects(&node, false);
        assert_eq!(bps, vec!["PRJNA001", "PRJNA12345", "PRJNA002"]);
    }

    #[test]
    fn ddbj_record_uses_ids_and_bioproject_id() {
        let node = parse_record(
            b"<BioSample>\
                <Ids><Id namespace=\"BioSample\">SAMD00000001</Id></Ids>\
                <Attributes><Attribute attribute_name=\"bioproject_id\">PRJDB1</Attribute></Attributes>\
              </BioSample>",
        )
        .expect("parse");
        assert_eq!(
            sample_accession(&node, true).as_deref(),
            Some("SAMD00000001")
        );
        assert_eq!(referenced_bioprojects(&node, true), vec!["PRJDB1"]);
        // NCBI-mode parsing must not find a DDBJ accession.
        assert_eq!(sample_accession(&node, false), None);
    }
}
