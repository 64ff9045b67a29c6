// SPDX-License-Identifier: Apache-2.0

//! BioProject JSONL emission.
//!
//! Shards from `tmp_xml/bp` are joined with the DBLink graph and the
//! date cache. NCBI records carry their own dates in the XML; DDBJ
//! records get theirs from the cache, and cache values override XML
//! values whenever both exist. Incremental mode keeps NCBI records by
//! the (post-override) `dateModified` and DDBJ records by the cache's
//! modified-since set.

use crate::jsonl::{pooled_map, shard_number, write_jsonl, xrefs_for};
use crate::split::list_shards;
use crate::xml::{iterate_records, parse_record, v_get, v_list, v_str};
use crate::IngestError;
use seqlink_core::time::format_utc;
use seqlink_core::{accession, AccessionType, Config, DebugCategory, LogTarget, RunLogger};
use seqlink_model::last_run::{Family, LastRun};
use seqlink_model::{
    Accessibility, BioProjectDoc, Distribution, ExternalLink, Grant, GrantAgency, ObjectType,
    Organism, Organization, Publication, Status, Xref, SEARCH_BASE_URL,
};
use seqlink_store::date_cache::{DateCache, DateFamily};
use seqlink_store::{Blacklists, DblinkReader};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

const EXTERNAL_LINK_MAP: [(&str, &str); 9] = [
    ("GEO", "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc="),
    ("dbGaP", "https://www.ncbi.nlm.nih.gov/gap/advanced_search/?TERM="),
    ("ENA-SUBMISSION", "https://www.ebi.ac.uk/ena/browser/view/"),
    ("SRA", "https://www.ncbi.nlm.nih.gov/sra/"),
    ("PUBMED", "https://pubmed.ncbi.nlm.nih.gov/"),
    ("DOI", "https://doi.org/"),
    ("SRA|http", "https:"),
    ("3000 rice genomes on aws|https", "https"),
    ("ENA|http", "https:"),
];

struct WorkerCtx {
    dblink: DblinkReader,
    dates: DateCache,
}

pub fn generate_bp_jsonl(
    config: &Config,
    log: &RunLogger,
    full: bool,
) -> Result<u64, IngestError> {
    generate_bp_jsonl_opts(config, log, full, false)
}

pub fn generate_bp_jsonl_opts(
    config: &Config,
    log: &RunLogger,
    full: bool,
    resume: bool,
) -> Result<u64, IngestError> {
    let out_dir = config.jsonl_dir("bioproject");
    std::fs::create_dir_all(&out_dir)?;

    let blacklists = Blacklists::load(config)?;
    log.info(
        &format!("loaded {} blacklisted bioproject accessions", blacklists.bioproject.len()),
        LogTarget::default(),
    );

    // The cache is a hard prerequisite: fail fast before spawning workers.
    let dates = DateCache::open(config)?;
    dates
        .ensure_fresh(&config.today_str())
        .map_err(|e| IngestError(e.to_string()))?;

    let cutoff = incremental_cutoff(config, log, full)?;
    let ddbj_targets: Option<HashSet<String>> = match &cutoff {
        Some(cutoff) => Some(dates.modified_since(DateFamily::Bioproject, cutoff)?),
        None => None,
    };
    if let Some(targets) = &ddbj_targets {
        log.info(
            &format!("incremental mode: {} ddbj targets", targets.len()),
            LogTarget::default(),
        );
    }
    drop(dates);

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
        &format!("emitting {} bioproject shards", shards.len()),
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
                &blacklists.bioproject,
                ddbj_targets.as_ref(),
                cutoff.as_deref(),
                resume,
                log,
            )
        },
    );
    if failed > 0 || log.cancelled() {
        return Err(IngestError(format!("{failed} bioproject shard(s) failed")));
    }

    let total: u64 = counts.iter().sum();
    log.info(
        &format!("wrote {total} bioproject documents"),
        LogTarget::default(),
    );
    LastRun::record_success(&config.last_run_path(), Family::Bioproject, log.started_at())
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
    match state.cutoff(Family::Bioproject, config.margin_days) {
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
        "{source}_bioproject_{:04}.jsonl",
        shard_number(shard)
    ));
    if resume && out_path.exists() {
        log.info(
            "resume: output already present, skipping shard",
            LogTarget::file(out_path.display().to_string()),
        );
        return Ok(0);
    }

    let mut docs: Vec<BioProjectDoc> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for record in iterate_records(shard, "Package")? {
        let node = match parse_record(&record?) {
            Ok(node) => node,
            Err(e) => {
                log.warning(
                    &format!("failed to parse package: {e}"),
                    LogTarget::file(file.clone()),
                );
                continue;
            }
        };
        let mut value = node.to_value();
        let Some(accession) = package_accession(&value) else {
            log.debug(
                "package without archive accession",
                DebugCategory::MissingIdentifier,
                LogTarget::file(file.clone()).with_source(source),
            );
            continue;
        };
        if !accession::is_valid(&accession, AccessionType::Bioproject) {
            crate::dblink::log_invalid(log, source, &file, &accession, AccessionType::Bioproject);
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
                &format!("duplicate bioproject record: {accession}"),
                DebugCategory::DuplicateAccession,
                LogTarget::file(file.clone()).with_accession(accession.clone()),
            );
            continue;
        }
        docs.push(build_doc(&mut value, &accession, is_ddbj, log));
    }

    // Cross-references, then date overrides from the cache.
    let accessions: Vec<String> = docs.iter().map(|d| d.identifier.clone()).collect();
    let xref_map = xrefs_for(&ctx.dblink, AccessionType::Bioproject, &accessions)?;
    for doc in &mut docs {
        if let Some(xrefs) = xref_map.get(&doc.identifier) {
            doc.db_xrefs = xrefs.clone();
        }
    }
    let date_map = ctx.dates.get_bulk(DateFamily::Bioproject, &accessions)?;
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

    // NCBI incremental filtering happens after the override so the cache
    // wins over a back-dated XML value.
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

pub(crate) fn package_accession(value: &Value) -> Option<String> {
    v_get(value, &["Project", "Project", "ProjectID", "ArchiveID", "accession"])
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// `value` is the `Package` object; `properties` carries its `Project`
/// subtree after normalization.
pub(crate) fn build_doc(value: &mut Value, accession: &str, is_ddbj: bool, log: &RunLogger) -> BioProjectDoc {
    if let Some(project) = value.get_mut("Project") {
        normalize_properties(project, accession, log);
    }
    let project = value.get("Project").cloned().unwrap_or(Value::Null);

    BioProjectDoc {
        identifier: accession.to_string(),
        distribution: Distribution::data_download("bioproject", accession),
        is_part_of: "BioProject".to_string(),
        type_: "bioproject".to_string(),
        object_type: parse_object_type(&project),
        name: None,
        url: format!("{SEARCH_BASE_URL}/search/entries/bioproject/{accession}"),
        organism: parse_organism(&project, is_ddbj),
        title: v_get(&project, &["Project", "ProjectDescr", "Title"]).and_then(v_str),
        description: v_get(&project, &["Project", "ProjectDescr", "Description"]).and_then(v_str),
        organization: parse_organization(&project, is_ddbj),
        publication: parse_publication(&project),
        grant: parse_grant(&project),
        external_link: parse_external_link(&project, accession, log),
        db_xrefs: Vec::new(),
        same_as: parse_same_as(&project),
        status: Status::Live,
        accessibility: parse_accessibility(&project, is_ddbj),
        date_created: v_get(&project, &["Submission", "submitted"]).and_then(v_str),
        date_modified: v_get(&project, &["Submission", "last_update"]).and_then(v_str),
        date_published: v_get(&project, &["Project", "ProjectDescr", "ProjectReleaseDate"])
            .and_then(v_str),
        properties: serde_json::json!({ "Project": project }),
    }
}

fn parse_object_type(project: &Value) -> ObjectType {
    if v_get(project, &["Project", "ProjectType", "ProjectTypeTopAdmin"]).is_some() {
        ObjectType::UmbrellaBioProject
    } else {
        ObjectType::BioProject
    }
}

fn parse_organism(project: &Value, is_ddbj: bool) -> Option<Organism> {
    let organism = if is_ddbj {
        v_get(project, &["Project", "ProjectType", "ProjectTypeTopAdmin", "Organism"])
    } else {
        v_get(
            project,
            &["Project", "ProjectType", "ProjectTypeSubmission", "Target", "Organism"],
        )
    }?;
    Some(Organism {
        identifier: organism.get("taxID").and_then(|v| v_str(v)),
        name: organism.get("OrganismName").and_then(v_str),
    })
}

fn parse_organization(project: &Value, is_ddbj: bool) -> Vec<Organization> {
    let organization = if is_ddbj {
        v_get(project, &["Submission", "Submission", "Description", "Organization"])
    } else {
        v_get(project, &["Project", "ProjectDescr", "Organization"])
    };
    let Some(organization) = organization else {
        return Vec::new();
    };
    v_list(organization)
        .into_iter()
        .filter_map(|item| {
            let name = item.get("Name")?;
            let (name, abbreviation) = match name {
                Value::String(s) => (Some(s.clone()), None),
                Value::Object(map) => (
                    map.get("content").and_then(Value::as_str).map(String::from),
                    map.get("abbr").and_then(Value::as_str).map(String::from),
                ),
                _ => (None, None),
            };
            name.as_ref()?;
            Some(Organization {
                name,
                organization_type: item.get("type").and_then(v_str),
                role: item.get("role").and_then(v_str),
                url: item.get("url").and_then(v_str),
                abbreviation,
            })
        })
        .collect()
}

fn parse_publication(project: &Value) -> Vec<Publication> {
    let Some(publication) = v_get(project, &["Project", "ProjectDescr", "Publication"]) else {
        return Vec::new();
    };
    v_list(publication)
        .into_iter()
        .filter_map(|item| {
            let id = item.get("id").and_then(v_str);
            let mut db_type = item.get("DbType").and_then(v_str);
            let url = match db_type.as_deref() {
                Some("DOI") => id.as_ref().map(|i| format!("https://doi.org/{i}")),
                Some("ePubmed") => id
                    .as_ref()
                    .map(|i| format!("https://pubmed.ncbi.nlm.nih.gov/{i}/")),
                Some(other) if other.chars().all(|c| c.is_ascii_digit()) => {
                    db_type = Some("ePubmed".to_string());
                    id.as_ref()
                        .map(|i| format!("https://pubmed.ncbi.nlm.nih.gov/{i}/"))
                }
                _ => None,
            };
            Some(Publication {
                id,
                title: v_get(item, &["StructuredCitation", "Title"]).and_then(v_str),
                date: item.get("date").and_then(v_str),
                reference: item.get("Reference").and_then(v_str),
                url,
                db_type,
                status: item.get("status").and_then(v_str),
            })
        })
        .collect()
}

fn parse_grant(project: &Value) -> Vec<Grant> {
    let Some(grant) = v_get(project, &["Project", "ProjectDescr", "Grant"]) else {
        return Vec::new();
    };
    v_list(grant)
        .into_iter()
        .filter_map(|item| {
            let agency = item.get("Agency")?;
            let agency = match agency {
                Value::String(s) => GrantAgency {
                    abbreviation: Some(s.clone()),
                    name: Some(s.clone()),
                },
                Value::Object(map) => GrantAgency {
                    abbreviation: map.get("abbr").and_then(Value::as_str).map(String::from),
                    name: map.get("content").and_then(Value::as_str).map(String::from),
                },
                _ => return None,
            };
            Some(Grant {
                id: item.get("GrantId").and_then(v_str),
                title: item.get("Title").and_then(v_str),
                agency: vec![agency],
            })
        })
        .collect()
}

fn parse_external_link(project: &Value, accession: &str, log: &RunLogger) -> Vec<ExternalLink> {
    let Some(external) = v_get(project, &["Project", "ProjectDescr", "ExternalLink"]) else {
        return Vec::new();
    };
    v_list(external)
        .into_iter()
        .filter_map(|item| {
            if let Some(url) = item.get("URL").and_then(v_str) {
                let label = item.get("label").and_then(v_str).unwrap_or_else(|| url.clone());
                return Some(ExternalLink { url, label });
            }
            let db_xref = item.get("dbXREF")?;
            let db = db_xref.get("db").and_then(v_str)?;
            let id = db_xref.get("ID").and_then(v_str)?;
            match EXTERNAL_LINK_MAP.iter().find(|(key, _)| *key == db) {
                Some((_, base)) => {
                    let label = item.get("label").and_then(v_str).unwrap_or_else(|| id.clone());
                    Some(ExternalLink {
                        url: format!("{base}{id}"),
                        label,
                    })
                }
                None => {
                    log.info(
                        &format!("unsupported external link db: {db}"),
                        LogTarget::accession(accession),
                    );
                    None
                }
            }
        })
        .collect()
}

fn parse_same_as(project: &Value) -> Vec<Xref> {
    let Some(center) = v_get(project, &["Project", "ProjectID", "CenterID"]) else {
        return Vec::new();
    };
    v_list(center)
        .into_iter()
        .filter_map(|item| {
            if item.get("center").and_then(Value::as_str) != Some("GEO") {
                return None;
            }
            let id = item.get("content").and_then(Value::as_str)?;
            Some(Xref::new(AccessionType::Geo, id))
        })
        .collect()
}

/// The XML has no live/suppressed information; NCBI access control is
/// the only visible accessibility signal.
fn parse_accessibility(project: &Value, is_ddbj: bool) -> Accessibility {
    if is_ddbj {
        return Accessibility::PublicAccess;
    }
    match v_get(project, &["Submission", "Description", "Access"]).and_then(v_str) {
        Some(access) if access == "controlled-access" => Accessibility::ControlledAccess,
        _ => Accessibility::PublicAccess,
    }
}

// === properties normalization ===

fn normalize_properties(project: &mut Value, accession: &str, log: &RunLogger) {
    wrap_content_at(
        project,
        &["Project", "ProjectType", "ProjectTypeSubmission", "Target", "BioSampleSet", "ID"],
        accession,
        DebugCategory::NormalizeBiosampleSetId,
        log,
    );
    wrap_content_at(
        project,
        &["Project", "ProjectDescr", "LocusTagPrefix"],
        accession,
        DebugCategory::NormalizeLocusTagPrefix,
        log,
    );
    wrap_content_at(
        project,
        &["Project", "ProjectID", "LocalID"],
        accession,
        DebugCategory::NormalizeLocalId,
        log,
    );
    normalize_organization_names(project);
    normalize_grant_agency(project);
}

/// Replace a bare string (or bare strings inside a list) with
/// `{"content": …}` so the field has one shape downstream.
fn wrap_content_at(
    root: &mut Value,
    path: &[&str],
    accession: &str,
    category: DebugCategory,
    log: &RunLogger,
) {
    let Some(target) = get_mut_path(root, path) else {
        return;
    };
    match target {
        Value::String(s) => {
            let content = std::mem::take(s);
            *target = serde_json::json!({ "content": content });
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
        _ => {
            log.debug(
                &format!("unexpected shape at {}", path.join(".")),
                category,
                LogTarget::accession(accession),
            );
        }
    }
}

fn get_mut_path<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut node = value;
    for segment in path {
        node = node.get_mut(segment)?;
    }
    Some(node)
}

fn normalize_organization_names(project: &mut Value) {
    for path in [
        ["Submission", "Submission", "Description", "Organization"].as_slice(),
        ["Project", "ProjectDescr", "Organization"].as_slice(),
    ] {
        let Some(org) = get_mut_path(project, path) else {
            continue;
        };
        let items: Vec<&mut Value> = match org {
            Value::Array(items) => items.iter_mut().collect(),
            other => vec![other],
        };
        for item in items {
            if let Some(name) = item.get_mut("Name") {
                if let Value::String(s) = name {
                    let content = std::mem::take(s);
                    *name = serde_json::json!({ "content": content });
                }
            }
        }
    }
}

fn normalize_grant_agency(project: &mut Value) {
    let Some(grant) = get_mut_path(project, &["Project", "ProjectDescr", "Grant"]) else {
        return;
    };
    let items: Vec<&mut Value> = match grant {
        Value::Array(items) => items.iter_mut().collect(),
        other => vec![other],
    };
    for item in items {
        if let Some(agency) = item.get_mut("Agency") {
            if let Value::String(s) = agency {
                let abbr = std::mem::take(s);
                *agency = serde_json::json!({ "abbr": abbr.clone(), "content": abbr });
            }
        }
    }
}
