// SPDX-License-Identifier: Apache-2.0

//! XML stream splitters.
//!
//! A multi-GB `BioSampleSet`/`PackageSet` document is cut into shards of
//! N records each, every shard re-wrapped with the original root element
//! so downstream workers see well-formed documents. Shards are written
//! to a `.tmp` sibling directory and renamed into place on success;
//! partial output is removed on failure.

use crate::xml::iterate_records;
use crate::IngestError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_RECORDS_PER_SHARD: usize = 30_000;

#[derive(Debug, Clone)]
pub struct SplitSpec {
    /// Record element name, e.g. `BioSample` or `Package`.
    pub tag: String,
    /// Wrapper emitted at the top of every shard.
    pub wrapper_start: String,
    /// Wrapper emitted at the bottom of every shard.
    pub wrapper_end: String,
    /// Shard file prefix, e.g. `ncbi` or `ddbj`.
    pub prefix: String,
    pub records_per_shard: usize,
}

impl SplitSpec {
    #[must_use]
    pub fn new(tag: &str, root: &str, prefix: &str) -> Self {
        Self {
            tag: tag.to_string(),
            wrapper_start: format!("<{root}>"),
            wrapper_end: format!("</{root}>"),
            prefix: prefix.to_string(),
            records_per_shard: DEFAULT_RECORDS_PER_SHARD,
        }
    }

    #[must_use]
    pub fn with_records_per_shard(mut self, n: usize) -> Self {
        self.records_per_shard = n.max(1);
        self
    }
}

/// Split one input file into shards inside `work_dir` (the caller's
/// `.tmp` staging directory). Returns the shard paths in name order.
pub fn split_into_dir(
    input: &Path,
    work_dir: &Path,
    spec: &SplitSpec,
) -> Result<Vec<PathBuf>, IngestError> {
    fs::create_dir_all(work_dir)?;

    let mut shards = Vec::new();
    let mut batch: Vec<Vec<u8>> = Vec::with_capacity(spec.records_per_shard);
    let mut shard_no = 1usize;

    for record in iterate_records(input, &spec.tag)? {
        batch.push(record?);
        if batch.len() >= spec.records_per_shard {
            shards.push(write_shard(work_dir, spec, shard_no, &batch)?);
            shard_no += 1;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        shards.push(write_shard(work_dir, spec, shard_no, &batch)?);
    }
    Ok(shards)
}

fn write_shard(
    dir: &Path,
    spec: &SplitSpec,
    shard_no: usize,
    records: &[Vec<u8>],
) -> Result<PathBuf, IngestError> {
    let path = dir.join(format!("{}_{shard_no:04}.xml", spec.prefix));
    let mut file = std::io::BufWriter::new(fs::File::create(&path)?);
    file.write_all(spec.wrapper_start.as_bytes())?;
    file.write_all(b"\n")?;
    for record in records {
        file.write_all(record)?;
        if !record.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
    }
    file.write_all(spec.wrapper_end.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    file.into_inner()
        .map_err(|e| IngestError(e.to_string()))?
        .sync_all()?;
    Ok(path)
}

/// Run a set of splits into a staging directory, then atomically replace
/// `target_dir`. All inputs must succeed; on any failure the staging
/// directory is removed and the previous shards stay in place.
pub fn split_all_atomically(
    inputs: &[(PathBuf, SplitSpec)],
    target_dir: &Path,
) -> Result<Vec<PathBuf>, IngestError> {
    let staging = staging_dir(target_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let mut produced = Vec::new();
    for (input, spec) in inputs {
        match split_into_dir(input, &staging, spec) {
            Ok(mut shards) => produced.append(&mut shards),
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        }
    }

    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    if let Some(parent) = target_dir.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&staging, target_dir)?;

    Ok(produced
        .into_iter()
        .map(|p| target_dir.join(p.file_name().map(PathBuf::from).unwrap_or_default()))
        .collect())
}

fn staging_dir(target_dir: &Path) -> PathBuf {
    let mut name = target_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "shards".to_string());
    name.push_str(".tmp");
    target_dir.with_file_name(name)
}

/// Shards of one source prefix under a shard directory, name-sorted.
pub fn list_shards(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, IngestError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut shards: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "xml")
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(&format!("{prefix}_")))
        })
        .collect();
    shards.sort();
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::iterate_records;
    use tempfile::tempdir;

    fn biosample_doc(count: usize) -> String {
        let mut doc = String::from("<BioSampleSet>\n");
        for i in 0..count {
            doc.push_str(&format!(
                "  <BioSample accession=\"SAMD{i:04}\">\n    <Title>s{i}</Title>\n  </BioSample>\n"
            ));
        }
        doc.push_str("</BioSampleSet>\n");
        doc
    }

    #[test]
    fn shards_are_wrapped_and_record_complete() {
        let tmp = tempdir().expect("tempdir");
        let input = tmp.path().join("biosample_set.xml");
        fs::write(&input, biosample_doc(7)).expect("write input");

        let target = tmp.path().join("shards");
        let spec = SplitSpec::new("BioSample", "BioSampleSet", "ddbj").with_records_per_shard(3);
        let shards =
            split_all_atomically(&[(input, spec)], &target).expect("split");
        assert_eq!(shards.len(), 3);

        // Round trip: the union of shard records equals the input set.
        let mut seen = Vec::new();
        for shard in &shards {
            let raw = fs::read_to_string(shard).expect("shard");
            assert!(raw.starts_with("<BioSampleSet>"));
            assert!(raw.trim_end().ends_with("</BioSampleSet>"));
            for record in iterate_records(shard, "BioSample").expect("iter") {
                let record = String::from_utf8(record.expect("record")).expect("utf8");
                let accession = record
                    .split("accession=\"")
                    .nth(1)
                    .and_then(|s| s.split('"').next())
                    .expect("accession")
                    .to_string();
                seen.push(accession);
            }
        }
        seen.sort();
        let expected: Vec<String> = (0..7).map(|i| format!("SAMD{i:04}")).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn gzip_input_is_detected_by_suffix() {
        let tmp = tempdir().expect("tempdir");
        let input = tmp.path().join("biosample_set.xml.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(fs::File::create(&input).expect("create"), flate2::Compression::fast());
        encoder
            .write_all(biosample_doc(2).as_bytes())
            .expect("write gz");
        encoder.finish().expect("finish gz");

        let target = tmp.path().join("shards");
        let spec = SplitSpec::new("BioSample", "BioSampleSet", "ncbi");
        let shards = split_all_atomically(&[(input, spec)], &target).expect("split");
        assert_eq!(shards.len(), 1);
        let raw = fs::read_to_string(&shards[0]).expect("shard");
        assert!(raw.contains("SAMD0001"));
    }

    #[test]
    fn corrupt_input_leaves_previous_shards_untouched() {
        let tmp = tempdir().expect("tempdir");
        let target = tmp.path().join("shards");

        let good = tmp.path().join("good.xml");
        fs::write(&good, biosample_doc(1)).expect("write good");
        let spec = SplitSpec::new("BioSample", "BioSampleSet", "ddbj");
        split_all_atomically(&[(good, spec.clone())], &target).expect("first split");
        let before = list_shards(&target, "ddbj").expect("list");
        assert_eq!(before.len(), 1);

        let corrupt = tmp.path().join("corrupt.xml");
        fs::write(
            &corrupt,
            "<BioSampleSet>\n<BioSample accession=\"SAMD9\">\n</BioSampleSet>\n",
        )
        .expect("write corrupt");
        let err = split_all_atomically(&[(corrupt, spec)], &target)
            .expect_err("corrupt input must fail");
        assert!(err.0.contains("unterminated"));

        let after = list_shards(&target, "ddbj").expect("list after");
        assert_eq!(after, before);
        assert!(!staging_dir(&target).exists());
    }

    #[test]
    fn list_shards_filters_by_prefix_and_sorts() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("shards");
        fs::create_dir_all(&dir).expect("mkdir");
        for name in ["ddbj_0002.xml", "ddbj_0001.xml", "ncbi_0001.xml", "notes.txt"] {
            fs::write(dir.join(name), "x").expect("write");
        }
        let shards = list_shards(&dir, "ddbj").expect("list");
        let names: Vec<_> = shards
            .iter()
            .map(|p| p.file_name().expect("name").to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ddbj_0001.xml", "ddbj_0002.xml"]);
    }
}
