// SPDX-License-Identifier: Apache-2.0

//! Random access into the per-submission XML tar archives.
//!
//! Walking a multi-hundred-GB tar per worker is a non-starter, so the
//! member offsets are indexed once and cached in a sidecar JSON next to
//! the archive. The cache is invalidated by mtime when the tar is
//! re-synced. Readers seek straight to the member data.

use crate::{StoreError, StoreErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TarMember {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TarIndex {
    pub members: BTreeMap<String, TarMember>,
}

impl TarIndex {
    /// Lowest data offset of any member under `{submission}/`. Used to
    /// sort submissions into sequential read order.
    #[must_use]
    pub fn submission_offset(&self, submission: &str) -> Option<u64> {
        let prefix = format!("{submission}/");
        self.members
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(_, member)| member.offset)
            .min()
    }
}

#[must_use]
pub fn index_cache_path(tar_path: &Path) -> PathBuf {
    let mut name = tar_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".index.json");
    tar_path.with_file_name(name)
}

pub fn build_index(tar_path: &Path) -> Result<TarIndex, StoreError> {
    let file = fs::File::open(tar_path).map_err(|e| {
        StoreError::new(
            StoreErrorCode::NotFound,
            format!("{}: {e}", tar_path.display()),
        )
    })?;
    let mut archive = tar::Archive::new(file);
    let mut members = BTreeMap::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        members.insert(
            name,
            TarMember {
                offset: entry.raw_file_position(),
                size: entry.size(),
            },
        );
    }
    Ok(TarIndex { members })
}

/// Load the sidecar index, rebuilding (and re-caching) it when missing
/// or older than the archive.
pub fn load_or_build_index(tar_path: &Path) -> Result<TarIndex, StoreError> {
    let cache_path = index_cache_path(tar_path);
    if cache_path.exists() {
        let cache_mtime = fs::metadata(&cache_path)?.modified()?;
        let tar_mtime = fs::metadata(tar_path)?.modified()?;
        if cache_mtime >= tar_mtime {
            let raw = fs::read_to_string(&cache_path)?;
            if let Ok(index) = serde_json::from_str::<TarIndex>(&raw) {
                return Ok(index);
            }
        }
    }
    let index = build_index(tar_path)?;
    let tmp = cache_path.with_extension("json.tmp");
    fs::write(
        &tmp,
        serde_json::to_vec(&index)
            .map_err(|e| StoreError::new(StoreErrorCode::Io, e.to_string()))?,
    )?;
    fs::rename(&tmp, &cache_path)?;
    Ok(index)
}

pub struct TarXmlReader {
    file: fs::File,
    index: TarIndex,
}

impl TarXmlReader {
    pub fn open(tar_path: &Path) -> Result<Self, StoreError> {
        let index = load_or_build_index(tar_path)?;
        let file = fs::File::open(tar_path)?;
        Ok(Self { file, index })
    }

    #[must_use]
    pub fn index(&self) -> &TarIndex {
        &self.index
    }

    pub fn read_member(&mut self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(member) = self.index.members.get(name).copied() else {
            return Ok(None);
        };
        self.file.seek(SeekFrom::Start(member.offset))?;
        let mut buf = vec![0u8; member.size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// The `{sub}/{sub}.{kind}.xml` member for one submission, or `None`
    /// when the submission has no XML of that kind.
    pub fn read_xml(
        &mut self,
        submission: &str,
        kind: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_member(&format!("{submission}/{submission}.{kind}.xml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_fixture_tar(path: &Path) {
        let file = fs::File::create(path).expect("create tar");
        let mut builder = tar::Builder::new(file);
        for (name, body) in [
            (
                "DRA000001/DRA000001.submission.xml",
                "<SUBMISSION accession=\"DRA000001\"/>",
            ),
            (
                "DRA000001/DRA000001.run.xml",
                "<RUN_SET><RUN accession=\"DRR000001\"/></RUN_SET>",
            ),
            (
                "DRA000002/DRA000002.submission.xml",
                "<SUBMISSION accession=\"DRA000002\"/>",
            ),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .expect("append");
        }
        builder.finish().expect("finish");
    }

    #[test]
    fn random_access_reads_match_members() {
        let tmp = tempdir().expect("tempdir");
        let tar_path = tmp.path().join("DRA.tar");
        write_fixture_tar(&tar_path);

        let mut reader = TarXmlReader::open(&tar_path).expect("open");
        let body = reader
            .read_xml("DRA000001", "run")
            .expect("read")
            .expect("member present");
        assert_eq!(
            String::from_utf8_lossy(&body),
            "<RUN_SET><RUN accession=\"DRR000001\"/></RUN_SET>"
        );
        assert!(reader
            .read_xml("DRA000001", "analysis")
            .expect("read")
            .is_none());
    }

    #[test]
    fn index_is_cached_and_reused() {
        let tmp = tempdir().expect("tempdir");
        let tar_path = tmp.path().join("DRA.tar");
        write_fixture_tar(&tar_path);

        let first = load_or_build_index(&tar_path).expect("build");
        assert!(index_cache_path(&tar_path).exists());
        let second = load_or_build_index(&tar_path).expect("cached");
        assert_eq!(first.members.len(), second.members.len());
        assert_eq!(second.members.len(), 3);
    }

    #[test]
    fn submission_offsets_order_sequential_reads() {
        let tmp = tempdir().expect("tempdir");
        let tar_path = tmp.path().join("DRA.tar");
        write_fixture_tar(&tar_path);

        let index = load_or_build_index(&tar_path).expect("index");
        let first = index.submission_offset("DRA000001").expect("first");
        let second = index.submission_offset("DRA000002").expect("second");
        assert!(first < second);
        assert!(index.submission_offset("DRA999999").is_none());
    }
}
