// SPDX-License-Identifier: Apache-2.0

//! BioSample JSONL emission.
//!
//! Same worker shape as the BioProject emitter; the per-record parsing
//! follows the BioSample schema (attributes, models, package, SRA
//! sameAs links). DDBJ samples identify themselves through `<Ids>` and
//! take their package from the first model.

use crate::jsonl::{pooled_map, shard_number, write_jsonl, xrefs_for};
use crate::split::list_shards;
use crate::xml::{iterate_records, parse_record, v_get, v_list, v_str};
use crate::IngestError;
use seqlink_core::time::format_utc;
use seqlink_core::{accession, AccessionType, Config, DebugCategory, LogTarget, RunLogger};
use seqlink_model::last_run::{Family, LastRun};
use seqlink_model::{
    Accessibility, Attribute, BioSampleDoc, Distribution, Organism, SampleModel, SamplePackage,
    Status, Xref, SEARCH_BASE_URL,
};
use seqlink_store::date_cache::{DateCache, DateFamily};
use seqlink_store::{Blacklists, DblinkReader};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

struct WorkerCtx {
    dblink: DblinkReader,
    dates: DateCache,
}

pub fn generate_bs_jsonl(
    config: &Config,
    log: &RunLogger,
    full: bool,
) -> Result<u64, IngestError> {
    generate_bs_jsonl_opts(config, log, full, false)
}

pub fn generate_bs_jsonl_opts(
    config: &Config,
    log: &RunLogger,
    full: bool,
    resume: bool,
) -> Result<u64, IngestError> {
    let out_dir = config.jsonl_dir("biosample");
    std::fs::create_dir_all(&out_dir)?;

    let blacklists = Blacklists::load(config)?;
    log.info(
        &format!("loaded {} blacklisted biosample accessions", blacklists.biosample.len()),
        LogTarget::default(),
    );

    let dates = DateCache::open(config)?;
    dates
        .ensure_fresh(&config.today_str())
        .map_err(|e| IngestError(e.to_string()))?;

    let cutoff = incremental_cutoff(config, log, full)?;
    let ddbj_targets: Option<HashSet<String>> = match &cutoff {
        Some(cutoff) => Some(dates.modified_since(DateFamily::Biosample, cutoff)?),
        None => None,
    };
    drop(dates);

    let shard_dir = config.tmp_xml_dir("bs");
    let mut shards = list_shards(&shard_dir, "ncbi")?;
    shards.extend(list_shards(&shard_dir, "ddbj")?);
    if shards.is_empty() {
        return Err(IngestError(format!(
            "no biosample shards found in {}",
            shard_dir.display()
        )));
    }
    log.info(
        &format!("emitting {} biosample shards", shards.len()),
        LogTarget::file(shard_dir.display().to_string()),
    );

    let (counts, failed) = pooled_map(
        &shards,
        config.parallel_num,
        log,
        || {
            Ok(WorkerCtx {
                dblink: DblinkReader::open(config)?,
                dates: DateCache::open(config)?,
            })
        },
        |ctx, shard| {
            emit_shard(
                ctx,
                shard,
                &out_dir,
                &blacklists.biosample,
                ddbj_targets.as_ref(),
                cutoff.as_deref(),
                resume,
                log,
            )
        },
    );
    if failed > 0 || log.cancelled() {
        return Err(IngestError(format!("{failed} biosample shard(s) failed")));
    }

    let total: u64 = counts.iter().sum();
    log.info(
        &format!("wrote {total} biosample documents"),
        LogTarget::default(),
    );
    LastRun::record_success(&config.last_run_path(), Family::Biosample, log.started_at())
        .map_err(|e| IngestError(e.to_string()))?;
    Ok(total)
}

fn incremental_cutoff(
    config: &Config,
    log: &RunLogger,
    full: bool,
) -> Result<Option<String>, IngestError> {
    if full {
        log.info("full update mode: --full specified", LogTarget::default());
        return Ok(None);
    }
    let state = LastRun::load(&config.last_run_path()).map_err(|e| IngestError(e.to_string()))?;
    match state.cutoff(Family::Biosample, config.margin_days) {
        Some(cutoff) => {
            let cutoff = format_utc(cutoff);
            log.info(
                &format!("incremental update mode: cutoff={cutoff}"),
                LogTarget::default(),
            );
            Ok(Some(cutoff))
        }
        None => {
            log.info("full update mode: no previous run found", LogTarget::default());
            Ok(None)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_shard(
    ctx: &mut WorkerCtx,
    shard: &Path,
    out_dir: &Path,
    blacklist: &HashSet<String>,
    ddbj_targets: Option<&HashSet<String>>,
    cutoff: Option<&str>,
    resume: bool,
    log: &RunLogger,
) -> Result<u64, IngestError> {
    let file = shard.display().to_string();
    let is_ddbj = file_is_ddbj(shard);
    let source = if is_ddbj { "ddbj" } else { "ncbi" };

    let out_path = out_dir.join(format!(
        "{source}_biosample_{:04}.jsonl",
        shard_number(shard)
    ));
    if resume && out_path.exists() {
        log.info(
            "resume: output already present, skipping shard",
            LogTarget::file(out_path.display().to_string()),
        );
        return Ok(0);
    }

    let mut docs: Vec<BioSampleDoc> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for record in iterate_records(shard, "BioSample")? {
        let node = match parse_record(&record?) {
            Ok(node) => node,
            Err(e) => {
                log.warning(
                    &format!("failed to parse biosample: {e}"),
                    LogTarget::file(file.clone()),
                );
                continue;
            }
        };
        let mut value = node.to_value();
        let Some(accession) = sample_accession(&value, is_ddbj) else {
            log.debug(
                "biosample without accession",
                DebugCategory::MissingIdentifier,
                LogTarget::file(file.clone()).with_source(source),
            );
            continue;
        };
        if !accession::is_valid(&accession, AccessionType::Biosample) {
            crate::dblink::log_invalid(log, source, &file, &accession, AccessionType::Biosample);
            continue;
        }
        if blacklist.contains(&accession) {
            continue;
        }
        if let Some(targets) = ddbj_targets {
            if is_ddbj && !targets.contains(&accession) {
                continue;
            }
        }
        if !seen.insert(accession.clone()) {
            log.debug(
                &format!("duplicate biosample record: {accession}"),
                DebugCategory::DuplicateAccession,
                LogTarget::file(file.clone()).with_accession(accession.clone()),
            );
            continue;
        }
        docs.push(build_doc(&mut value, &accession, is_ddbj, log));
    }

    let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
    let xref_map = xrefs_for(&ctx.dblink, AccessionType::Biosample, &accessions)?;
    for doc in &mut docs {
        if let Some(xrefs) = xref_map.get(&doc.identifier) {
            doc.db_xrefs = xrefs.clone();
        }
    }
    let date_map = ctx.dates.get_bulk(DateFamily::Biosample, &accessions)?;
    for doc in &mut docs {
        if let Some(row) = date_map.get(&doc.identifier) {
            if row.date_created.is_some() {
                doc.date_created = row.date_created.clone();
            }
            if row.date_modified.is_some() {
                doc.date_modified = row.date_modified.clone();
            }
            if row.date_published.is_some() {
                doc.date_published = row.date_published.clone();
            }
        }
    }

    if let Some(cutoff) = cutoff {
        if !is_ddbj {
            docs.retain(|doc| {
                doc.date_modified
                    .as_deref()
                    .and_then(seqlink_core::time::normalize_timestamp)
                    .is_some_and(|modified| modified.as_str() >= cutoff)
            });
        }
    }

    write_jsonl(&out_path, &docs)?;
    log.info(
        &format!("wrote {} documents", docs.len()),
        LogTarget::file(out_path.display().to_string()),
    );
    Ok(docs.len() as u64)
}

fn file_is_ddbj(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with("ddbj_"))
}

pub(crate) fn sample_accession(value: &Value, is_ddbj: bool) -> Option<String> {
    let sample = value;
    if !is_ddbj {
        return sample.get("accession").and_then(v_str);
    }
    let ids = v_get(sample, &["Ids", "Id"])?;
    v_list(ids).into_iter().find_map(|id| {
        if id.get("namespace").and_then(Value::as_str) == Some("BioSample") {
            id.get("content").and_then(Value::as_str).map(String::from)
        } else {
            None
        }
    })
}

pub(crate) fn build_doc(value: &mut Value, accession: &str, is_ddbj: bool, log: &RunLogger) -> BioSampleDoc {
    normalize_properties(value, accession, log);
    let sample = value.clone();
    let model = parse_model(&sample);

    BioSampleDoc {
        identifier: accession.to_string(),
        distribution: Distribution::data_download("biosample", accession),
        is_part_of: "BioSample".to_string(),
        type_: "biosample".to_string(),
        name: v_get(&sample, &["Description", "SampleName"]).and_then(v_str),
        url: format!("{SEARCH_BASE_URL}/search/entries/biosample/{accession}"),
        organism: parse_organism(&sample, is_ddbj),
        title: v_get(&sample, &["Description", "Title"]).and_then(v_str),
        description: parse_description(&sample),
        attributes: parse_attributes(&sample),
        package: parse_package(&sample, &model, is_ddbj),
        model,
        db_xrefs: Vec::new(),
        same_as: parse_same_as(&sample),
        status: parse_status(&sample),
        accessibility: parse_accessibility(&sample),
        date_created: sample.get("submission_date").and_then(v_str),
        date_modified: sample.get("last_update").and_then(v_str),
        date_published: sample.get("publication_date").and_then(v_str),
        properties: serde_json::json!({ "BioSample": sample }),
    }
}

fn parse_organism(sample: &Value, is_ddbj: bool) -> Option<Organism> {
    let organism = v_get(sample, &["Description", "Organism"])?;
    let name = if is_ddbj {
        organism.get("OrganismName").and_then(v_str)
    } else {
        organism
            .get("taxonomy_name")
            .and_then(v_str)
            .or_else(|| organism.get("OrganismName").and_then(v_str))
    };
    Some(Organism {
        identifier: organism.get("taxonomy_id").and_then(v_str),
        name,
    })
}

fn parse_description(sample: &Value) -> Option<String> {
    let comment = v_get(sample, &["Description", "Comment"])?;
    match comment {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => {
            let paragraph = comment.get("Paragraph")?;
            match paragraph {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => {
                    let joined: Vec<String> =
                        items.iter().filter_map(|p| v_str(p)).collect();
                    if joined.is_empty() {
                        None
                    } else {
                        Some(joined.join(" "))
                    }
                }
                other => v_str(other),
            }
        }
        _ => None,
    }
}

fn parse_attributes(sample: &Value) -> Vec<Attribute> {
    let Some(attrs) = v_get(sample, &["Attributes", "Attribute"]) else {
        return Vec::new();
    };
    v_list(attrs)
        .into_iter()
        .filter_map(|attr| match attr {
            Value::Object(map) => Some(Attribute {
                attribute_name: map.get("attribute_name").and_then(Value::as_str).map(String::from),
                display_name: map.get("display_name").and_then(Value::as_str).map(String::from),
                harmonized_name: map
                    .get("harmonized_name")
                    .and_then(Value::as_str)
                    .map(String::from),
                content: map.get("content").and_then(Value::as_str).map(String::from),
            }),
            Value::String(s) => Some(Attribute {
                attribute_name: None,
                display_name: None,
                harmonized_name: None,
                content: Some(s.clone()),
            }),
            _ => None,
        })
        .collect()
}

fn parse_model(sample: &Value) -> Vec<SampleModel> {
    let Some(models) = v_get(sample, &["Models", "Model"]) else {
        return Vec::new();
    };
    v_list(models)
        .into_iter()
        .filter_map(v_str)
        .map(|name| SampleModel { name })
        .collect()
}

fn parse_package(sample: &Value, model: &[SampleModel], is_ddbj: bool) -> Option<SamplePackage> {
    if is_ddbj {
        // DDBJ samples have no Package element; the first model stands in.
        return model.first().map(|m| SamplePackage {
            name: m.name.clone(),
            display_name: m.name.clone(),
        });
    }
    let package = sample.get("Package")?;
    match package {
        Value::String(s) => Some(SamplePackage {
            name: s.clone(),
            display_name: s.clone(),
        }),
        Value::Object(map) => {
            let name = map
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let display_name = map
                .get("display_name")
                .and_then(Value::as_str)
                .map_or_else(|| name.clone(), String::from);
            Some(SamplePackage { name, display_name })
        }
        _ => None,
    }
}

fn parse_same_as(sample: &Value) -> Vec<Xref> {
    let Some(ids) = v_get(sample, &["Ids", "Id"]) else {
        return Vec::new();
    };
    v_list(ids)
        .into_iter()
        .filter_map(|id| {
            if id.get("db").and_then(Value::as_str) != Some("SRA") {
                return None;
            }
            let content = id.get("content").and_then(Value::as_str)?;
            Some(Xref::new(AccessionType::SraSample, content))
        })
        .collect()
}

fn parse_status(sample: &Value) -> Status {
    match v_get(sample, &["Status", "status"]).and_then(v_str).as_deref() {
        Some("suppressed") => Status::Suppressed,
        _ => Status::Live,
    }
}

fn parse_accessibility(sample: &Value) -> Accessibility {
    match sample.get("access").and_then(v_str).as_deref() {
        Some("controlled") => Accessibility::ControlledAccess,
        _ => Accessibility::PublicAccess,
    }
}

// === properties normalization ===

fn normalize_properties(sample: &mut Value, accession: &str, log: &RunLogger) {
    normalize_owner_name(sample, accession, log);
    normalize_model(sample, accession, log);
}

fn normalize_owner_name(sample: &mut Value, accession: &str, log: &RunLogger) {
    let Some(name) = sample.get_mut("Owner").and_then(|o| o.get_mut("Name")) else {
        return;
    };
    match name {
        Value::String(s) => {
            let content = std::mem::take(s);
            *name = serde_json::json!({ "content": content });
        }
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item {
                    let content = std::mem::take(s);
                    *item = serde_json::json!({ "content": content });
                }
            }
        }
        Value::Object(_) => {}
        _ => log.debug(
            "unexpected owner name shape",
            DebugCategory::NormalizeOwnerName,
            LogTarget::accession(accession),
        ),
    }
}

fn normalize_model(sample: &mut Value, accession: &str, log: &RunLogger) {
    let Some(model) = sample.get_mut("Models").and_then(|m| m.get_mut("Model")) else {
        return;
    };
    match model {
        Value::String(s) => {
            let content = std::mem::take(s);
            *model = serde_json::json!({ "content": content });
        }
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item {
                    let content = std::mem::take(s);
                    *item = serde_json::json!({ "content": content });
                }
            }
        }
        Value::Object(_) => {}
        _ => log.debug(
            "unexpected model shape",
            DebugCategory::NormalizeModel,
            LogTarget::accession(accession),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonl::bp::tests::test_config;
    use crate::xml::parse_record;
    use tempfile::tempdir;

    #[test]
    fn ddbj_sample_doc_uses_ids_and_models() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        std::fs::create_dir_all(&config.result_dir).expect("mkdir");
        let log = RunLogger::start(&config, "adhoc").expect("log");

        let mut value = parse_record(
            b"<BioSample access=\"public\">\
                <Ids><Id namespace=\"BioSample\">SAMD00000001</Id><Id db=\"SRA\">DRS000001</Id></Ids>\
                <Description><Title>soil</Title><SampleName>s1</SampleName>\
                  <Organism taxonomy_id=\"410658\"><OrganismName>soil metagenome</OrganismName></Organism>\
                </Description>\
                <Models><Model>Metagenome</Model></Models>\
                <Attributes><Attribute attribute_name=\"env_biome\">forest</Attribute></Attributes>\
              </BioSample>",
        )
        .expect("parse")
        .to_value();

        let accession = sample_accession(&value, true).expect("accession");
        assert_eq!(accession, "SAMD00000001");
        let doc = build_doc(&mut value, &accession, true, &log);

        assert_eq!(doc.title.as_deref(), Some("soil"));
        assert_eq!(doc.name.as_deref(), Some("s1"));
        assert_eq!(doc.model.len(), 1);
        assert_eq!(doc.package.as_ref().map(|p| p.name.as_str()), Some("Metagenome"));
        assert_eq!(doc.attributes.len(), 1);
        assert_eq!(doc.attributes[0].content.as_deref(), Some("forest"));
        assert_eq!(doc.same_as.len(), 1);
        assert_eq!(doc.same_as[0].identifier, "DRS000001");
        assert_eq!(doc.status, Status::Live);
        assert_eq!(doc.accessibility, Accessibility::PublicAccess);
        // Model normalization wrapped the bare string in properties.
        assert_eq!(
            v_get(&doc.properties, &["BioSample", "Models", "Model", "content"])
                .and_then(Value::as_str),
            Some("Metagenome")
        );
        log.finish(seqlink_core::RunStatus::Success);
    }

    #[test]
    fn ncbi_sample_reads_attribute_dates_and_status() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        std::fs::create_dir_all(&config.result_dir).expect("mkdir");
        let log = RunLogger::start(&config, "adhoc").expect("log");

        let mut value = parse_record(
            b"<BioSample accession=\"SAMN0001\" access=\"controlled\" \
                submission_date=\"2020-01-01\" last_update=\"2026-01-20\" publication_date=\"2020-02-01\">\
                <Status status=\"suppressed\"/>\
                <Package display_name=\"Generic\">Generic.1.0</Package>\
              </BioSample>",
        )
        .expect("parse")
        .to_value();

        let accession = sample_accession(&value, false).expect("accession");
        let doc = build_doc(&mut value, &accession, false, &log);
        assert_eq!(doc.status, Status::Suppressed);
        assert_eq!(doc.accessibility, Accessibility::ControlledAccess);
        assert_eq!(doc.date_modified.as_deref(), Some("2026-01-20"));
        assert_eq!(
            doc.package,
            Some(SamplePackage {
                name: "Generic.1.0".to_string(),
                display_name: "Generic".to_string(),
            })
        );
        log.finish(seqlink_core::RunStatus::Success);
    }
}
