// SPDX-License-Identifier: Apache-2.0

//! Per-source blacklists and curated preserved-edge files.
//!
//! Blacklists are one accession per line; `#` comments and blank lines
//! are ignored, matching is case-sensitive on the raw accession. A
//! missing file is an empty set, not an error. Preserved files are
//! tab-separated `(from_id, to_id)` rows whose header line is weeded out
//! by the caller's classification pass.

use seqlink_core::{AccessionType, Config};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Blacklists {
    pub bioproject: HashSet<String>,
    pub biosample: HashSet<String>,
    pub sra: HashSet<String>,
    pub jga: HashSet<String>,
}

impl Blacklists {
    pub fn load(config: &Config) -> io::Result<Self> {
        Ok(Self {
            bioproject: load_blacklist_file(&config.blacklist_path("bp"))?,
            biosample: load_blacklist_file(&config.blacklist_path("bs"))?,
            sra: load_blacklist_file(&config.blacklist_path("sra"))?,
            jga: load_blacklist_file(&config.blacklist_path("jga"))?,
        })
    }

    /// Membership for an endpoint of the given kind, against the kind's
    /// family blacklist.
    #[must_use]
    pub fn contains(&self, ty: AccessionType, accession: &str) -> bool {
        match ty.family() {
            Some("bioproject") => self.bioproject.contains(accession),
            Some("biosample") => self.biosample.contains(accession),
            Some("sra") => self.sra.contains(accession),
            Some("jga") => self.jga.contains(accession),
            _ => false,
        }
    }

    pub fn union(&self) -> impl Iterator<Item = &String> {
        self.bioproject
            .iter()
            .chain(self.biosample.iter())
            .chain(self.sra.iter())
            .chain(self.jga.iter())
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.bioproject.len() + self.biosample.len() + self.sra.len() + self.jga.len()
    }
}

pub fn load_blacklist_file(path: &Path) -> io::Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

/// Raw `(from_id, to_id)` rows from a preserved TSV. Rows with fewer
/// than two columns are dropped here; identifier validation (which also
/// drops the header row) is the caller's job.
pub fn read_preserved_pairs(path: &Path) -> io::Result<Vec<(String, String)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut cols = line.split('\t');
            let from = cols.next()?.trim();
            let to = cols.next()?.trim();
            if from.is_empty() || to.is_empty() {
                None
            } else {
                Some((from.to_string(), to.to_string()))
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("blacklist.txt");
        fs::write(&path, "# comment\nPRJDB1\n\n  PRJDB2  \n#PRJDB3\n").expect("write");
        let set = load_blacklist_file(&path).expect("load");
        assert_eq!(set.len(), 2);
        assert!(set.contains("PRJDB1"));
        assert!(set.contains("PRJDB2"));
        assert!(!set.contains("PRJDB3"));
    }

    #[test]
    fn missing_blacklist_is_empty() {
        let tmp = tempdir().expect("tempdir");
        let set = load_blacklist_file(&tmp.path().join("nope.txt")).expect("load");
        assert!(set.is_empty());
    }

    #[test]
    fn membership_is_per_family() {
        let blacklists = Blacklists {
            bioproject: HashSet::from(["PRJDB1".to_string()]),
            sra: HashSet::from(["DRR000001".to_string()]),
            ..Blacklists::default()
        };
        assert!(blacklists.contains(AccessionType::Bioproject, "PRJDB1"));
        assert!(blacklists.contains(AccessionType::UmbrellaBioproject, "PRJDB1"));
        assert!(blacklists.contains(AccessionType::SraRun, "DRR000001"));
        assert!(!blacklists.contains(AccessionType::Biosample, "PRJDB1"));
        assert!(!blacklists.contains(AccessionType::Gea, "PRJDB1"));
    }

    #[test]
    fn preserved_pairs_keep_header_for_caller_validation() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("bpbs_preserved.tsv");
        fs::write(&path, "from_id\tto_id\nSAMD1\tPRJDB1\nbroken\n").expect("write");
        let pairs = read_preserved_pairs(&path).expect("read");
        assert_eq!(
            pairs,
            vec![
                ("from_id".to_string(), "to_id".to_string()),
                ("SAMD1".to_string(), "PRJDB1".to_string()),
            ]
        );
    }
}
