// SPDX-License-Identifier: Apache-2.0

//! JSONL materialization.
//!
//! Per-family emitters join shard XML with the DBLink graph, the date
//! cache and the blacklists, and write one document per line. Workers
//! are pooled: each opens its read-only store handles once and then
//! drains a shared shard queue, so the open cost is paid per worker,
//! not per shard.

pub mod bp;
pub mod bs;
pub mod jga;
pub mod regenerate;
pub mod sra;

use crate::IngestError;
use seqlink_core::{AccessionType, LogTarget, RunLogger};
use seqlink_model::Xref;
use seqlink_store::DblinkReader;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Write documents as JSONL, one per line, replacing any existing file.
pub fn write_jsonl<T: Serialize>(path: &Path, docs: &[T]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = std::io::BufWriter::new(fs::File::create(path)?);
    for doc in docs {
        let line = serde_json::to_string(doc).map_err(|e| IngestError(e.to_string()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}

/// Cross-references for a batch of accessions, as identifier-sorted
/// Xref lists.
pub fn xrefs_for(
    dblink: &DblinkReader,
    ty: AccessionType,
    accessions: &[String],
) -> Result<BTreeMap<String, Vec<Xref>>, IngestError> {
    let related = dblink.related_bulk(ty, accessions)?;
    Ok(related
        .into_iter()
        .map(|(accession, neighbors)| {
            let mut xrefs: Vec<Xref> = neighbors
                .into_iter()
                .map(|(neighbor_type, neighbor_acc)| Xref::new(neighbor_type, neighbor_acc))
                .collect();
            xrefs.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            (accession, xrefs)
        })
        .collect())
}

/// Shard number from a `{prefix}_{NNNN}.xml` file name; `0` when the
/// name does not follow the convention.
#[must_use]
pub fn shard_number(path: &Path) -> u32 {
    path.file_stem()
        .map(|stem| stem.to_string_lossy())
        .and_then(|stem| {
            stem.rsplit('_')
                .next()
                .and_then(|digits| digits.parse::<u32>().ok())
        })
        .unwrap_or(0)
}

/// Fixed worker pool over a shard queue. Each worker builds its own
/// context (store handles) once via `init`, then processes shards until
/// the queue drains or cancellation is raised. Returns the per-shard
/// results and the failed-shard count.
pub fn pooled_map<C, R, G, F>(
    shards: &[PathBuf],
    parallel: usize,
    log: &RunLogger,
    init: G,
    work: F,
) -> (Vec<R>, usize)
where
    R: Send,
    G: Fn() -> Result<C, IngestError> + Sync,
    F: Fn(&mut C, &Path) -> Result<R, IngestError> + Sync,
{
    let next = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let results = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..parallel.max(1) {
            scope.spawn(|| {
                let mut ctx = match init() {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        log.critical("worker context init failed", &e.0, LogTarget::default());
                        return;
                    }
                };
                loop {
                    if log.cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(shard) = shards.get(index) else {
                        break;
                    };
                    match work(&mut ctx, shard) {
                        Ok(result) => {
                            if let Ok(mut guard) = results.lock() {
                                guard.push(result);
                            }
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            log.error(
                                &format!("shard failed: {}", shard.display()),
                                &e.0,
                                LogTarget::file(shard.display().to_string()),
                            );
                        }
                    }
                }
            });
        }
    });

    (
        results.into_inner().unwrap_or_default(),
        failed.into_inner(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_numbers_parse_from_names() {
        assert_eq!(shard_number(Path::new("/x/ncbi_0042.xml")), 42);
        assert_eq!(shard_number(Path::new("/x/ddbj_0001.xml")), 1);
        assert_eq!(shard_number(Path::new("/x/whatever.xml")), 0);
    }
}
