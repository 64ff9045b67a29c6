// SPDX-License-Identifier: Apache-2.0

//! Search document models.
//!
//! One JSONL line per entity, with a fixed schema per family. Field names
//! follow the index mappings (camelCase, `type`/`isPartOf` literals), so
//! the serde renames here are load-bearing.

use seqlink_core::AccessionType;
use serde::{Deserialize, Serialize};

pub const SEARCH_BASE_URL: &str = "https://ddbj.nig.ac.jp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Live,
    Unpublished,
    Suppressed,
    Withdrawn,
}

impl Status {
    /// Fold raw archive status values onto the INSDC set. `public` is the
    /// DRA spelling of live; `replaced`/`killed` are retired spellings of
    /// withdrawn. Unknown values fall back to live.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("live") => Self::Live,
            Some("unpublished") => Self::Unpublished,
            Some("suppressed") => Self::Suppressed,
            Some("withdrawn") => Self::Withdrawn,
            Some("public") => Self::Live,
            Some("replaced") | Some("killed") => Self::Withdrawn,
            _ => Self::Live,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Accessibility {
    PublicAccess,
    ControlledAccess,
}

impl Accessibility {
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw
            .map(|v| v.to_ascii_lowercase().replace('_', "-"))
            .as_deref()
        {
            Some("controlled-access") | Some("controlled") => Self::ControlledAccess,
            _ => Self::PublicAccess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(rename = "encodingFormat")]
    pub encoding_format: String,
    #[serde(rename = "contentUrl")]
    pub content_url: String,
}

impl Distribution {
    /// The single DataDownload entry every document carries.
    #[must_use]
    pub fn data_download(entry_type: &str, identifier: &str) -> Vec<Self> {
        vec![Self {
            type_: "DataDownload".to_string(),
            encoding_format: "JSON".to_string(),
            content_url: format!(
                "{SEARCH_BASE_URL}/search/entries/{entry_type}/{identifier}.json"
            ),
        }]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organism {
    pub identifier: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: Option<String>,
    #[serde(rename = "organizationType")]
    pub organization_type: Option<String>,
    pub role: Option<String>,
    pub url: Option<String>,
    pub abbreviation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    #[serde(rename = "Reference")]
    pub reference: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "DbType")]
    pub db_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantAgency {
    pub abbreviation: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: Option<String>,
    pub title: Option<String>,
    pub agency: Vec<GrantAgency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub url: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xref {
    pub identifier: String,
    #[serde(rename = "type")]
    pub type_: AccessionType,
    pub url: String,
}

impl Xref {
    #[must_use]
    pub fn new(ty: AccessionType, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let url = xref_url(ty, &identifier);
        Self {
            identifier,
            type_: ty,
            url,
        }
    }
}

/// Public landing URL for a cross-referenced identifier.
#[must_use]
pub fn xref_url(ty: AccessionType, id: &str) -> String {
    match ty {
        AccessionType::Bioproject | AccessionType::UmbrellaBioproject => {
            format!("{SEARCH_BASE_URL}/search/entries/bioproject/{id}")
        }
        AccessionType::Biosample => format!("{SEARCH_BASE_URL}/search/entries/biosample/{id}"),
        AccessionType::SraSubmission
        | AccessionType::SraStudy
        | AccessionType::SraExperiment
        | AccessionType::SraRun
        | AccessionType::SraSample
        | AccessionType::SraAnalysis
        | AccessionType::JgaStudy
        | AccessionType::JgaDataset
        | AccessionType::JgaDac
        | AccessionType::JgaPolicy => {
            format!("{SEARCH_BASE_URL}/search/entries/{}/{id}", ty.as_str())
        }
        AccessionType::Gea => {
            // GEA experiments are bucketed by thousands on the public
            // archive: E-GEAD-1012 lives under E-GEAD-1000/.
            let num: u64 = id
                .strip_prefix("E-GEAD-")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            let prefix = format!("E-GEAD-{:03}", (num / 1000) * 1000);
            format!("{SEARCH_BASE_URL}/public/ddbj_database/gea/experiment/{prefix}/{id}/")
        }
        AccessionType::Geo => {
            format!("https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?acc={id}")
        }
        AccessionType::InsdcAssembly => {
            format!("https://www.ncbi.nlm.nih.gov/datasets/genome/{id}")
        }
        AccessionType::InsdcMaster => format!("https://www.ncbi.nlm.nih.gov/nuccore/{id}"),
        AccessionType::Metabobank => format!("https://mb2.ddbj.nig.ac.jp/study/{id}.html"),
        AccessionType::HumId => format!("https://humandbs.dbcls.jp/{id}"),
        AccessionType::PubmedId => format!("https://pubmed.ncbi.nlm.nih.gov/{id}/"),
        AccessionType::Taxonomy => format!(
            "https://www.ncbi.nlm.nih.gov/Taxonomy/Browser/wwwtax.cgi?mode=Info&id={id}"
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    BioProject,
    UmbrellaBioProject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BioProjectDoc {
    pub identifier: String,
    pub properties: serde_json::Value,
    pub distribution: Vec<Distribution>,
    #[serde(rename = "isPartOf")]
    pub is_part_of: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(rename = "objectType")]
    pub object_type: ObjectType,
    pub name: Option<String>,
    pub url: String,
    pub organism: Option<Organism>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub organization: Vec<Organization>,
    pub publication: Vec<Publication>,
    pub grant: Vec<Grant>,
    #[serde(rename = "externalLink")]
    pub external_link: Vec<ExternalLink>,
    #[serde(rename = "dbXrefs")]
    pub db_xrefs: Vec<Xref>,
    #[serde(rename = "sameAs")]
    pub same_as: Vec<Xref>,
    pub status: Status,
    pub accessibility: Accessibility,
    #[serde(rename = "dateCreated")]
    pub date_created: Option<String>,
    #[serde(rename = "dateModified")]
    pub date_modified: Option<String>,
    #[serde(rename = "datePublished")]
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_name: Option<String>,
    pub display_name: Option<String>,
    pub harmonized_name: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleModel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplePackage {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BioSampleDoc {
    pub identifier: String,
    pub properties: serde_json::Value,
    pub distribution: Vec<Distribution>,
    #[serde(rename = "isPartOf")]
    pub is_part_of: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub name: Option<String>,
    pub url: String,
    pub organism: Option<Organism>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    pub model: Vec<SampleModel>,
    pub package: Option<SamplePackage>,
    #[serde(rename = "dbXrefs")]
    pub db_xrefs: Vec<Xref>,
    #[serde(rename = "sameAs")]
    pub same_as: Vec<Xref>,
    pub status: Status,
    pub accessibility: Accessibility,
    #[serde(rename = "dateCreated")]
    pub date_created: Option<String>,
    #[serde(rename = "dateModified")]
    pub date_modified: Option<String>,
    #[serde(rename = "datePublished")]
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SraDoc {
    pub identifier: String,
    pub properties: serde_json::Value,
    pub distribution: Vec<Distribution>,
    #[serde(rename = "isPartOf")]
    pub is_part_of: String,
    #[serde(rename = "type")]
    pub type_: AccessionType,
    pub name: Option<String>,
    pub url: String,
    pub organism: Option<Organism>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "dbXrefs")]
    pub db_xrefs: Vec<Xref>,
    #[serde(rename = "sameAs")]
    pub same_as: Vec<Xref>,
    pub status: Status,
    pub accessibility: Accessibility,
    #[serde(rename = "dateCreated")]
    pub date_created: Option<String>,
    #[serde(rename = "dateModified")]
    pub date_modified: Option<String>,
    #[serde(rename = "datePublished")]
    pub date_published: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JgaDoc {
    pub identifier: String,
    pub properties: serde_json::Value,
    pub distribution: Vec<Distribution>,
    #[serde(rename = "isPartOf")]
    pub is_part_of: String,
    #[serde(rename = "type")]
    pub type_: AccessionType,
    pub name: Option<String>,
    pub url: String,
    pub organism: Option<Organism>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "dbXrefs")]
    pub db_xrefs: Vec<Xref>,
    #[serde(rename = "sameAs")]
    pub same_as: Vec<Xref>,
    pub status: Status,
    pub accessibility: Accessibility,
    #[serde(rename = "dateCreated")]
    pub date_created: Option<String>,
    #[serde(rename = "dateModified")]
    pub date_modified: Option<String>,
    #[serde(rename = "datePublished")]
    pub date_published: Option<String>,
}

impl JgaDoc {
    /// JGA entries are always controlled-access human data.
    #[must_use]
    pub fn organism_homo_sapiens() -> Organism {
        Organism {
            identifier: Some("9606".to_string()),
            name: Some("Homo sapiens".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization_table() {
        assert_eq!(Status::normalize(Some("live")), Status::Live);
        assert_eq!(Status::normalize(Some("public")), Status::Live);
        assert_eq!(Status::normalize(Some("replaced")), Status::Withdrawn);
        assert_eq!(Status::normalize(Some("killed")), Status::Withdrawn);
        assert_eq!(Status::normalize(Some("suppressed")), Status::Suppressed);
        assert_eq!(Status::normalize(None), Status::Live);
        assert_eq!(Status::normalize(Some("???")), Status::Live);
    }

    #[test]
    fn accessibility_normalization_table() {
        assert_eq!(
            Accessibility::normalize(Some("controlled")),
            Accessibility::ControlledAccess
        );
        assert_eq!(
            Accessibility::normalize(Some("controlled_access")),
            Accessibility::ControlledAccess
        );
        assert_eq!(
            Accessibility::normalize(Some("public")),
            Accessibility::PublicAccess
        );
        assert_eq!(Accessibility::normalize(None), Accessibility::PublicAccess);
    }

    #[test]
    fn gea_url_buckets_by_thousands() {
        assert_eq!(
            xref_url(AccessionType::Gea, "E-GEAD-1012"),
            format!(
                "{SEARCH_BASE_URL}/public/ddbj_database/gea/experiment/E-GEAD-1000/E-GEAD-1012/"
            )
        );
        assert_eq!(
            xref_url(AccessionType::Gea, "E-GEAD-12"),
            format!("{SEARCH_BASE_URL}/public/ddbj_database/gea/experiment/E-GEAD-000/E-GEAD-12/")
        );
    }

    #[test]
    fn xref_serializes_with_kebab_type() {
        let xref = Xref::new(AccessionType::SraRun, "DRR000001");
        let value = serde_json::to_value(&xref).expect("serialize");
        assert_eq!(value["type"], "sra-run");
        assert_eq!(value["identifier"], "DRR000001");
    }

    #[test]
    fn sra_doc_round_trips_field_names() {
        let doc = SraDoc {
            identifier: "DRR000001".to_string(),
            properties: serde_json::json!({}),
            distribution: Distribution::data_download("sra-run", "DRR000001"),
            is_part_of: "sra".to_string(),
            type_: AccessionType::SraRun,
            name: None,
            url: format!("{SEARCH_BASE_URL}/search/entries/sra-run/DRR000001"),
            organism: None,
            title: None,
            description: None,
            db_xrefs: vec![],
            same_as: vec![],
            status: Status::Live,
            accessibility: Accessibility::PublicAccess,
            date_created: None,
            date_modified: Some("2026-01-01T00:00:00Z".to_string()),
            date_published: None,
        };
        let value = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(value["type"], "sra-run");
        assert_eq!(value["isPartOf"], "sra");
        assert_eq!(value["dateModified"], "2026-01-01T00:00:00Z");
        assert_eq!(value["accessibility"], "public-access");
        assert!(value["dbXrefs"].is_array());
    }
}
