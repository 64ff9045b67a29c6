// SPDX-License-Identifier: Apache-2.0

//! Accession identifiers and their classification.
//!
//! Every identifier moving through the pipeline is tagged with one of the
//! 21 [`AccessionType`] kinds. Classification is table-driven: an ordered
//! list of anchored patterns, scanned in priority order so that the bare
//! numeric kinds (pubmed-id, taxonomy) only match after everything else.

use crate::runlog::DebugCategory;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

/// Closed set of identifier kinds. The declaration order is the total
/// order used for canonical edge orientation; do not reorder variants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum AccessionType {
    Bioproject,
    UmbrellaBioproject,
    Biosample,
    SraSubmission,
    SraStudy,
    SraExperiment,
    SraRun,
    SraSample,
    SraAnalysis,
    JgaStudy,
    JgaDataset,
    JgaDac,
    JgaPolicy,
    Gea,
    Metabobank,
    InsdcAssembly,
    InsdcMaster,
    HumId,
    PubmedId,
    Geo,
    Taxonomy,
}

pub const ALL_ACCESSION_TYPES: [AccessionType; 21] = [
    AccessionType::Bioproject,
    AccessionType::UmbrellaBioproject,
    AccessionType::Biosample,
    AccessionType::SraSubmission,
    AccessionType::SraStudy,
    AccessionType::SraExperiment,
    AccessionType::SraRun,
    AccessionType::SraSample,
    AccessionType::SraAnalysis,
    AccessionType::JgaStudy,
    AccessionType::JgaDataset,
    AccessionType::JgaDac,
    AccessionType::JgaPolicy,
    AccessionType::Gea,
    AccessionType::Metabobank,
    AccessionType::InsdcAssembly,
    AccessionType::InsdcMaster,
    AccessionType::HumId,
    AccessionType::PubmedId,
    AccessionType::Geo,
    AccessionType::Taxonomy,
];

impl AccessionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bioproject => "bioproject",
            Self::UmbrellaBioproject => "umbrella-bioproject",
            Self::Biosample => "biosample",
            Self::SraSubmission => "sra-submission",
            Self::SraStudy => "sra-study",
            Self::SraExperiment => "sra-experiment",
            Self::SraRun => "sra-run",
            Self::SraSample => "sra-sample",
            Self::SraAnalysis => "sra-analysis",
            Self::JgaStudy => "jga-study",
            Self::JgaDataset => "jga-dataset",
            Self::JgaDac => "jga-dac",
            Self::JgaPolicy => "jga-policy",
            Self::Gea => "gea",
            Self::Metabobank => "metabobank",
            Self::InsdcAssembly => "insdc-assembly",
            Self::InsdcMaster => "insdc-master",
            Self::HumId => "hum-id",
            Self::PubmedId => "pubmed-id",
            Self::Geo => "geo",
            Self::Taxonomy => "taxonomy",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        ALL_ACCESSION_TYPES
            .iter()
            .copied()
            .find(|t| t.as_str() == input)
    }

    /// Position in the fixed total order used for canonical edges.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// The incremental-bookkeeping family this kind belongs to, if any.
    #[must_use]
    pub const fn family(self) -> Option<&'static str> {
        match self {
            Self::Bioproject | Self::UmbrellaBioproject => Some("bioproject"),
            Self::Biosample => Some("biosample"),
            Self::SraSubmission
            | Self::SraStudy
            | Self::SraExperiment
            | Self::SraRun
            | Self::SraSample
            | Self::SraAnalysis => Some("sra"),
            Self::JgaStudy | Self::JgaDataset | Self::JgaDac | Self::JgaPolicy => Some("jga"),
            _ => None,
        }
    }
}

impl Display for AccessionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct PatternEntry {
    ty: AccessionType,
    pattern: regex::Regex,
}

fn entry(ty: AccessionType, pattern: &str) -> PatternEntry {
    PatternEntry {
        ty,
        pattern: regex::Regex::new(pattern).expect("accession pattern must compile"),
    }
}

/// Priority-ordered pattern table. `umbrella-bioproject` shares the
/// bioproject pattern and is therefore never produced by a bare scan;
/// `pubmed-id` and `taxonomy` are bare numerics and must come last.
static PATTERNS: LazyLock<Vec<PatternEntry>> = LazyLock::new(|| {
    vec![
        entry(AccessionType::Biosample, r"^SAM[NED](\w)?\d+$"),
        entry(AccessionType::Bioproject, r"^PRJ[DEN][A-Z]\d+$"),
        entry(AccessionType::SraSubmission, r"^[SDE]RA\d+$"),
        entry(AccessionType::SraStudy, r"^[SDE]RP\d+$"),
        entry(AccessionType::SraExperiment, r"^[SDE]RX\d+$"),
        entry(AccessionType::SraRun, r"^[SDE]RR\d+$"),
        entry(AccessionType::SraSample, r"^[SDE]RS\d+$"),
        entry(AccessionType::SraAnalysis, r"^[SDE]RZ\d+$"),
        entry(AccessionType::JgaStudy, r"^JGAS\d+$"),
        entry(AccessionType::JgaDataset, r"^JGAD\d+$"),
        entry(AccessionType::JgaDac, r"^JGAC\d+$"),
        entry(AccessionType::JgaPolicy, r"^JGAP\d+$"),
        entry(AccessionType::Gea, r"^E-GEAD-\d+$"),
        entry(AccessionType::Geo, r"^GSE\d+$"),
        entry(AccessionType::InsdcAssembly, r"^GCA_[0-9]{9}(\.[0-9]+)?$"),
        entry(
            AccessionType::InsdcMaster,
            r"^([A-Z]0{5}|[A-Z]{2}0{6}|[A-Z]{4,6}0{8,10}|[A-J][A-Z]{2}0{5})$",
        ),
        entry(AccessionType::Metabobank, r"^MTBKS\d+$"),
        entry(AccessionType::HumId, r"^hum\d+$"),
        entry(AccessionType::PubmedId, r"^\d{7,8}$"),
        entry(AccessionType::Taxonomy, r"^\d{1,7}$"),
    ]
});

static MASTER_VERSION: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^([A-Z]+[0-9]+)\.[0-9]+$").expect("master pattern"));

static HUM_VERSION: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^(hum\d+)\..*$").expect("hum pattern"));

fn pattern_for(ty: AccessionType) -> &'static regex::Regex {
    // umbrella-bioproject validates with the bioproject pattern.
    let lookup = match ty {
        AccessionType::UmbrellaBioproject => AccessionType::Bioproject,
        other => other,
    };
    &PATTERNS
        .iter()
        .find(|e| e.ty == lookup)
        .expect("every accession type has a pattern entry")
        .pattern
}

/// Whether `raw` is a well-formed accession of the given kind.
#[must_use]
pub fn is_valid(raw: &str, ty: AccessionType) -> bool {
    pattern_for(ty).is_match(raw)
}

/// Classify a raw identifier, returning its kind and normalized form.
///
/// Normalization trims surrounding whitespace. Version suffixes are
/// stripped for `insdc-master` (`ABCD00000000.1` -> `ABCD00000000`) and
/// `hum-id` (`hum0001.v2` -> `hum0001`), and preserved for
/// `insdc-assembly` where GCA versions are meaningful. Returns `None`
/// when no pattern matches; callers decide whether to skip or warn.
#[must_use]
pub fn classify(raw: &str) -> Option<(AccessionType, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if let Some(caps) = MASTER_VERSION.captures(trimmed) {
        // A versioned master collapses to its base before pattern scan;
        // anything that is not actually a master keeps the raw form.
        let base = caps.get(1).map_or(trimmed, |m| m.as_str());
        if is_valid(base, AccessionType::InsdcMaster) {
            base
        } else {
            trimmed
        }
    } else if let Some(caps) = HUM_VERSION.captures(trimmed) {
        caps.get(1).map_or(trimmed, |m| m.as_str())
    } else {
        trimmed
    };

    PATTERNS
        .iter()
        .find(|e| e.pattern.is_match(candidate))
        .map(|e| (e.ty, candidate.to_string()))
}

/// Debug category to record when an identifier fails validation for the
/// expected kind. BioSample and BioProject get their own buckets.
#[must_use]
pub const fn invalid_category(expected: AccessionType) -> DebugCategory {
    match expected {
        AccessionType::Biosample => DebugCategory::InvalidBiosampleId,
        AccessionType::Bioproject | AccessionType::UmbrellaBioproject => {
            DebugCategory::InvalidBioprojectId
        }
        _ => DebugCategory::InvalidAccessionId,
    }
}

/// Collapse a WGS/TLS/TSA master (or versioned assembly series member)
/// onto its series master: strip `.N` and `-N` suffixes, then zero every
/// digit, so `BAAA01000001.1` and `BAAA02000000` both become
/// `BAAA00000000`.
#[must_use]
pub fn normalize_master_id(raw: &str) -> String {
    let base = raw.split('.').next().unwrap_or(raw);
    let base = base.split('-').next().unwrap_or(base);
    base.chars()
        .map(|c| if c.is_ascii_digit() { '0' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn classifies_the_common_prefixes() {
        let cases = [
            ("PRJNA12345", AccessionType::Bioproject),
            ("PRJDB1", AccessionType::Bioproject),
            ("PRJEB777", AccessionType::Bioproject),
            ("SAMN00000001", AccessionType::Biosample),
            ("SAMD0001", AccessionType::Biosample),
            ("SAMEA123", AccessionType::Biosample),
            ("DRA000001", AccessionType::SraSubmission),
            ("SRP123456", AccessionType::SraStudy),
            ("ERX99", AccessionType::SraExperiment),
            ("DRR000001", AccessionType::SraRun),
            ("SRS1", AccessionType::SraSample),
            ("ERZ123", AccessionType::SraAnalysis),
            ("JGAS000001", AccessionType::JgaStudy),
            ("JGAD000002", AccessionType::JgaDataset),
            ("JGAC000001", AccessionType::JgaDac),
            ("JGAP000001", AccessionType::JgaPolicy),
            ("E-GEAD-1012", AccessionType::Gea),
            ("GSE12345", AccessionType::Geo),
            ("GCA_000001405.15", AccessionType::InsdcAssembly),
            ("BAAA00000000", AccessionType::InsdcMaster),
            ("MTBKS1", AccessionType::Metabobank),
            ("hum0001", AccessionType::HumId),
            ("12345678", AccessionType::PubmedId),
            ("9606", AccessionType::Taxonomy),
        ];
        for (raw, expected) in cases {
            let (ty, normalized) = classify(raw).unwrap_or_else(|| panic!("{raw} must classify"));
            assert_eq!(ty, expected, "{raw}");
            assert_eq!(normalized, raw, "{raw} must survive normalization");
        }
    }

    #[test]
    fn rejects_garbage() {
        for raw in ["", "  ", "PRJ", "SAM", "XYZ123", "GCA_123", "E-GEAD-", "123456789"] {
            assert!(classify(raw).is_none(), "{raw:?} must be rejected");
        }
    }

    #[test]
    fn master_version_suffix_is_stripped() {
        let (ty, normalized) = classify("ABCD00000000.1").expect("versioned master");
        assert_eq!(ty, AccessionType::InsdcMaster);
        assert_eq!(normalized, "ABCD00000000");
    }

    #[test]
    fn assembly_version_suffix_is_preserved() {
        let (ty, normalized) = classify("GCA_000001405.15").expect("assembly");
        assert_eq!(ty, AccessionType::InsdcAssembly);
        assert_eq!(normalized, "GCA_000001405.15");
    }

    #[test]
    fn hum_id_version_is_stripped() {
        let (ty, normalized) = classify("hum0001.v2").expect("versioned hum id");
        assert_eq!(ty, AccessionType::HumId);
        assert_eq!(normalized, "hum0001");
    }

    #[test]
    fn era_prefixes_map_to_sra_types() {
        assert_eq!(
            classify("ERA123456").map(|(t, _)| t),
            Some(AccessionType::SraSubmission)
        );
        assert_eq!(
            classify("ERP000001").map(|(t, _)| t),
            Some(AccessionType::SraStudy)
        );
    }

    #[test]
    fn umbrella_validates_with_bioproject_pattern() {
        assert!(is_valid("PRJNA46297", AccessionType::UmbrellaBioproject));
        assert!(!is_valid("SAMN01", AccessionType::UmbrellaBioproject));
    }

    #[test]
    fn normalize_master_id_collapses_series() {
        assert_eq!(normalize_master_id("BAAA01000001.1"), "BAAA00000000");
        assert_eq!(normalize_master_id("AB000001-1"), "AB000000");
        assert_eq!(normalize_master_id("CAAB020000000"), "CAAB000000000");
    }

    #[test]
    fn invalid_categories_are_per_family() {
        assert_eq!(
            invalid_category(AccessionType::Biosample),
            DebugCategory::InvalidBiosampleId
        );
        assert_eq!(
            invalid_category(AccessionType::Bioproject),
            DebugCategory::InvalidBioprojectId
        );
        assert_eq!(
            invalid_category(AccessionType::SraRun),
            DebugCategory::InvalidAccessionId
        );
    }

    #[test]
    fn type_order_matches_declaration() {
        assert!(AccessionType::Bioproject < AccessionType::UmbrellaBioproject);
        assert!(AccessionType::UmbrellaBioproject < AccessionType::Biosample);
        assert!(AccessionType::Biosample < AccessionType::SraSubmission);
        assert_eq!(AccessionType::Taxonomy.ordinal(), 20);
    }

    proptest! {
        #[test]
        fn classified_accessions_revalidate(raw in "(PRJ[DEN][A-Z][0-9]{1,6}|SAM[NED][0-9]{1,8}|[SDE]R[APXRSZ][0-9]{1,6}|JGA[SDCP][0-9]{6})") {
            let (ty, normalized) = classify(&raw).expect("generated accession must classify");
            prop_assert!(is_valid(&normalized, ty));
        }

        #[test]
        fn classify_is_idempotent(raw in "\\PC{0,24}") {
            if let Some((ty, normalized)) = classify(&raw) {
                let again = classify(&normalized).expect("normalized form must classify");
                prop_assert_eq!(again.0, ty);
                prop_assert_eq!(again.1, normalized);
            }
        }
    }
}
