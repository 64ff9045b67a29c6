// SPDX-License-Identifier: Apache-2.0

//! BioProject-internal relations: umbrella links, hum-ids, GEO series.
//!
//! Umbrella edges come from `<Link><Hierarchical type="TopAdmin">`; the
//! link's `ProjectIDRef` is the child (primary) and `MemberID` the
//! umbrella parent. `TopSingle` links are alternate ids of the same
//! project, not hierarchy, and are ignored. A parent accession that is
//! never seen as a primary accession in any shard belongs to a private
//! umbrella project and the edge is dropped.
//!
//! hum-ids come from `<LocalID submission_id="hum...">` (version
//! suffixes stripped), GEO series from `<CenterID center="GEO">`.

use crate::dblink::{map_shards, run_extractor};
use crate::split::list_shards;
use crate::xml::{iterate_records, parse_record, XmlNode};
use crate::IngestError;
use seqlink_core::{accession, AccessionType, Config, DebugCategory, LogTarget, RunLogger};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Default)]
struct ShardRelations {
    /// Accessions declared by the shard's packages.
    primaries: HashSet<String>,
    /// (child primary, umbrella parent) candidates.
    umbrella: Vec<(String, String)>,
    hum_id: Vec<(String, String)>,
    geo: Vec<(String, String)>,
}

pub fn create_bp_internal_relations(config: &Config, log: &RunLogger) -> Result<u64, IngestError> {
    let shard_dir = config.tmp_xml_dir("bp");
    let mut shards = list_shards(&shard_dir, "ncbi")?;
    shards.extend(list_shards(&shard_dir, "ddbj")?);
    if shards.is_empty() {
        return Err(IngestError(format!(
            "no bioproject shards found in {}",
            shard_dir.display()
        )));
    }
    log.info(
        &format!("processing {} bioproject shards", shards.len()),
        LogTarget::file(shard_dir.display().to_string()),
    );

    let (per_shard, failed) = map_shards(&shards, config.parallel_num, log, |shard| {
        extract_shard(shard, log)
    });
    if failed > 0 {
        log.warning(
            &format!("{failed} bioproject shard(s) failed"),
            LogTarget::default(),
        );
    }

    let mut primaries: HashSet<String> = HashSet::new();
    let mut merged = ShardRelations::default();
    for shard in per_shard {
        primaries.extend(shard.primaries);
        merged.umbrella.extend(shard.umbrella);
        merged.hum_id.extend(shard.hum_id);
        merged.geo.extend(shard.geo);
    }

    let written = run_extractor(config, |sender| {
        let mut sink = sender.sink();

        let mut kept = 0usize;
        for (child, parent) in &merged.umbrella {
            // A parent never declared as a primary is private.
            if !primaries.contains(parent) {
                log.debug(
                    &format!("umbrella parent not public, dropping edge to {parent}"),
                    DebugCategory::PrivateUmbrellaParent,
                    LogTarget::accession(parent.clone()).with_source("bioproject"),
                );
                continue;
            }
            sink.push_pair(
                AccessionType::Bioproject,
                child.clone(),
                AccessionType::UmbrellaBioproject,
                parent.clone(),
            )?;
            kept += 1;
        }
        log.info(
            &format!(
                "extracted {kept} umbrella relations ({} dropped as private)",
                merged.umbrella.len() - kept
            ),
            LogTarget::default(),
        );

        for (bp, hum) in &merged.hum_id {
            sink.push_pair(
                AccessionType::Bioproject,
                bp.clone(),
                AccessionType::HumId,
                hum.clone(),
            )?;
        }
        log.info(
            &format!("extracted {} hum-id relations", merged.hum_id.len()),
            LogTarget::default(),
        );

        for (bp, gse) in &merged.geo {
            sink.push_pair(
                AccessionType::Bioproject,
                bp.clone(),
                AccessionType::Geo,
                gse.clone(),
            )?;
        }
        log.info(
            &format!("extracted {} geo relations", merged.geo.len()),
            LogTarget::default(),
        );

        sink.finish()
    })?;

    log.info(
        &format!("loaded {written} bioproject-internal edges"),
        LogTarget::default(),
    );
    Ok(written)
}

fn extract_shard(shard: &Path, log: &RunLogger) -> Result<ShardRelations, IngestError> {
    let file = shard.display().to_string();
    let mut out = ShardRelations::default();

    for record in iterate_records(shard, "Package")? {
        let node = match parse_record(&record?) {
            Ok(node) => node,
            Err(e) => {
                log.warning(
                    &format!("failed to parse bioproject package: {e}"),
                    LogTarget::file(file.clone()),
                );
                continue;
            }
        };

        let project_id = node.find(&["Project", "Project", "ProjectID"]);
        let accession = project_id
            .and_then(|pid| pid.child("ArchiveID"))
            .and_then(|archive| archive.attr("accession"))
            .map(ToString::to_string);

        if let Some(ref acc) = accession {
            if accession::is_valid(acc, AccessionType::Bioproject) {
                out.primaries.insert(acc.clone());
                if let Some(pid) = project_id {
                    collect_local_ids(pid, acc, &mut out);
                }
            } else {
                crate::dblink::log_invalid(log, "bioproject", &file, acc, AccessionType::Bioproject);
            }
        }

        collect_umbrella_links(&node, log, &file, &mut out);
    }
    Ok(out)
}

fn collect_local_ids(project_id: &XmlNode, accession: &str, out: &mut ShardRelations) {
    for local in project_id.children_named("LocalID") {
        if let Some(submission_id) = local.attr("submission_id") {
            if submission_id.to_ascii_lowercase().starts_with("hum") {
                if let Some((AccessionType::HumId, normalized)) =
                    accession::classify(submission_id)
                {
                    out.hum_id.push((accession.to_string(), normalized));
                }
            }
        }
    }
    for center in project_id.children_named("CenterID") {
        if center.attr("center") == Some("GEO") {
            if let Some(gse) = center.text_trim() {
                if accession::is_valid(gse, AccessionType::Geo) {
                    out.geo.push((accession.to_string(), gse.to_string()));
                }
            }
        }
    }
}

fn collect_umbrella_links(node: &XmlNode, log: &RunLogger, file: &str, out: &mut ShardRelations) {
    node.walk(&mut |elem| {
        if elem.name != "Link" {
            return;
        }
        let Some(hierarchical) = elem.child("Hierarchical") else {
            return;
        };
        if hierarchical.attr("type") != Some("TopAdmin") {
            return;
        }
        let child = elem
            .child("ProjectIDRef")
            .and_then(|r| r.attr("accession"))
            .unwrap_or_default();
        let parent = hierarchical
            .child("MemberID")
            .or_else(|| elem.child("MemberID"))
            .and_then(|m| m.attr("accession"))
            .unwrap_or_default();
        if child.is_empty() || parent.is_empty() {
            return;
        }
        if let Some((child, parent)) = crate::dblink::checked_pair(
            log,
            "bioproject",
            file,
            child,
            AccessionType::Bioproject,
            parent,
            AccessionType::UmbrellaBioproject,
        ) {
            out.umbrella.push((child, parent));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_record;
    use chrono::NaiveDate;
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

    fn package(accession: &str, link: &str) -> String {
        format!(
            "<Package>\n<Project><Project><ProjectID>\
             <ArchiveID accession=\"{accession}\"/>\
             <LocalID submission_id=\"hum0009.v2\"/>\
             </ProjectID></Project></Project>\n{link}\n</Package>\n"
        )
    }

    #[test]
    fn top_admin_links_produce_child_parent_candidates() {
        let xml = package(
            "PRJNA9616",
            "<Link><Hierarchical type=\"TopAdmin\"><MemberID accession=\"PRJNA46297\"/></Hierarchical>\
             <ProjectIDRef accession=\"PRJNA9616\"/></Link>",
        );
        let node = parse_record(xml.as_bytes()).expect("parse");
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        std::fs::create_dir_all(&config.result_dir).expect("mkdir");
        let log = RunLogger::start(&config, "adhoc").expect("log");
        let mut out = ShardRelations::default();
        collect_umbrella_links(&node, &log, "test.xml", &mut out);
        assert_eq!(
            out.umbrella,
            vec![("PRJNA9616".to_string(), "PRJNA46297".to_string())]
        );
        log.finish(seqlink_core::RunStatus::Success);
    }

    #[test]
    fn top_single_links_are_ignored() {
        let xml = package(
            "PRJNA1",
            "<Link><Hierarchical type=\"TopSingle\"><MemberID accession=\"PRJNA2\"/></Hierarchical>\
             <ProjectIDRef accession=\"PRJNA1\"/></Link>",
        );
        let node = parse_record(xml.as_bytes()).expect("parse");
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        std::fs::create_dir_all(&config.result_dir).expect("mkdir");
        let log = RunLogger::start(&config, "adhoc").expect("log");
        let mut out = ShardRelations::default();
        collect_umbrella_links(&node, &log, "test.xml", &mut out);
        assert!(out.umbrella.is_empty());
        log.finish(seqlink_core::RunStatus::Success);
    }

    #[test]
    fn hum_ids_are_version_stripped() {
        let node = parse_record(package("PRJDB1", "").as_bytes()).expect("parse");
        let pid = node
            .find(&["Project", "Project", "ProjectID"])
            .expect("project id");
        let mut out = ShardRelations::default();
        collect_local_ids(pid, "PRJDB1", &mut out);
        assert_eq!(out.hum_id, vec![("PRJDB1".to_string(), "hum0009".to_string())]);
    }
}
