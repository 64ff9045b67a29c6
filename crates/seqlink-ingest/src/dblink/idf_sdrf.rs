// SPDX-License-Identifier: Apache-2.0

//! IDF/SDRF parsing shared by the GEA and MetaboBank extractors.
//!
//! The IDF names the study's BioProject on a
//! `Comment[BioProject]\t<value>` line; the SDRF carries one BioSample
//! per data row in its `Comment[BioSample]` column.

use crate::IngestError;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const IDF_BIOPROJECT_KEY: &str = "Comment[BioProject]";
const SDRF_BIOSAMPLE_COLUMN: &str = "Comment[BioSample]";

pub fn parse_idf_file(path: &Path) -> Result<Option<String>, IngestError> {
    let file = fs::File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.starts_with(IDF_BIOPROJECT_KEY) {
            continue;
        }
        if let Some(value) = trimmed.split('\t').nth(1) {
            let value = value.trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }
    Ok(None)
}

pub fn parse_sdrf_file(path: &Path) -> Result<BTreeSet<String>, IngestError> {
    let file = fs::File::open(path)?;
    let mut lines = BufReader::new(file).lines();
    let Some(header) = lines.next().transpose()? else {
        return Ok(BTreeSet::new());
    };
    let Some(column) = header
        .trim_end()
        .split('\t')
        .position(|col| col == SDRF_BIOSAMPLE_COLUMN)
    else {
        return Ok(BTreeSet::new());
    };

    let mut out = BTreeSet::new();
    for line in lines {
        let line = line?;
        if let Some(value) = line.trim_end().split('\t').nth(column) {
            let value = value.trim();
            if !value.is_empty() {
                out.insert(value.to_string());
            }
        }
    }
    Ok(out)
}

/// One study directory's worth of IDF/SDRF extraction: the directory
/// name is the study id; missing files yield nothing.
pub fn process_study_dir(
    dir: &Path,
) -> Result<(String, Option<String>, BTreeSet<String>), IngestError> {
    let study_id = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let bioproject = match first_matching(dir, ".idf.txt")? {
        Some(idf) => parse_idf_file(&idf)?,
        None => None,
    };
    let biosamples = match first_matching(dir, ".sdrf.txt")? {
        Some(sdrf) => parse_sdrf_file(&sdrf)?,
        None => BTreeSet::new(),
    };
    Ok((study_id, bioproject, biosamples))
}

fn first_matching(dir: &Path, suffix: &str) -> Result<Option<PathBuf>, IngestError> {
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(suffix))
        })
        .collect();
    matches.sort();
    Ok(matches.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn idf_yields_the_bioproject_comment() {
        let tmp = tempdir().expect("tempdir");
        let idf = tmp.path().join("E-GEAD-1.idf.txt");
        fs::write(
            &idf,
            "Investigation Title\tsome study\nComment[BioProject]\tPRJDB123\n",
        )
        .expect("write");
        assert_eq!(
            parse_idf_file(&idf).expect("parse").as_deref(),
            Some("PRJDB123")
        );
    }

    #[test]
    fn sdrf_collects_the_biosample_column() {
        let tmp = tempdir().expect("tempdir");
        let sdrf = tmp.path().join("E-GEAD-1.sdrf.txt");
        fs::write(
            &sdrf,
            "Source Name\tComment[BioSample]\tOther\n\
             s1\tSAMD00000001\tx\n\
             s2\tSAMD00000002\ty\n\
             s3\t\tz\n",
        )
        .expect("write");
        let samples = parse_sdrf_file(&sdrf).expect("parse");
        assert_eq!(samples.len(), 2);
        assert!(samples.contains("SAMD00000001"));
    }

    #[test]
    fn study_dir_combines_both_files() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("MTBKS42");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("MTBKS42.idf.txt"), "Comment[BioProject]\tPRJDB9\n").expect("idf");
        fs::write(
            dir.join("MTBKS42.sdrf.txt"),
            "Comment[BioSample]\nSAMD00000009\n",
        )
        .expect("sdrf");
        let (id, bp, bs) = process_study_dir(&dir).expect("process");
        assert_eq!(id, "MTBKS42");
        assert_eq!(bp.as_deref(), Some("PRJDB9"));
        assert_eq!(bs.len(), 1);
    }
}
