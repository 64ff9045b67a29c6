// SPDX-License-Identifier: Apache-2.0

//! DBLink relation extractors.
//!
//! Each extractor reads one input family and appends edges to the tmp
//! relation store. The store takes a single writer, so every extractor
//! runs through the same harness: parser workers stream edge batches
//! into a bounded channel, and one serializer thread drains the channel
//! into the database in batched transactions. Extractor steps themselves
//! run sequentially under the coordinator's write lock.

pub mod assembly_master;
pub mod bp_bs;
pub mod bp_internal;
pub mod gea;
pub mod idf_sdrf;
pub mod jga;
pub mod metabobank;
pub mod sra_internal;

use crate::IngestError;
use crossbeam_channel::{bounded, Sender};
use seqlink_core::{accession, AccessionType, Config, LogTarget, RelationEdge, RunLogger};
use seqlink_store::dblink::{drain_edges, DblinkWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Edges buffered per producer before a channel send; matches the
/// serializer's transaction size.
pub const EDGE_BATCH: usize = 50_000;

const CHANNEL_DEPTH: usize = 8;

#[derive(Clone)]
pub struct EdgeSender {
    tx: Sender<Vec<RelationEdge>>,
}

impl EdgeSender {
    /// A per-worker buffering sink. Call [`EdgeSink::finish`] before the
    /// worker exits.
    #[must_use]
    pub fn sink(&self) -> EdgeSink {
        EdgeSink {
            tx: self.tx.clone(),
            buf: Vec::new(),
        }
    }
}

pub struct EdgeSink {
    tx: Sender<Vec<RelationEdge>>,
    buf: Vec<RelationEdge>,
}

impl EdgeSink {
    pub fn push(&mut self, edge: RelationEdge) -> Result<(), IngestError> {
        self.buf.push(edge);
        if self.buf.len() >= EDGE_BATCH {
            self.flush()?;
        }
        Ok(())
    }

    pub fn push_pair(
        &mut self,
        a_type: AccessionType,
        a: impl Into<String>,
        b_type: AccessionType,
        b: impl Into<String>,
    ) -> Result<(), IngestError> {
        self.push(RelationEdge::new(a_type, a, b_type, b))
    }

    fn flush(&mut self) -> Result<(), IngestError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buf);
        self.tx
            .send(batch)
            .map_err(|_| IngestError("edge serializer hung up".to_string()))
    }

    pub fn finish(mut self) -> Result<(), IngestError> {
        self.flush()
    }
}

/// Run one extractor against the tmp relation store: spawn the
/// serializer, hand the producer side an [`EdgeSender`], and join.
/// Returns the number of edges written.
pub fn run_extractor<F>(config: &Config, produce: F) -> Result<u64, IngestError>
where
    F: FnOnce(&EdgeSender) -> Result<(), IngestError>,
{
    let mut writer = DblinkWriter::open_tmp(config)?;
    let (tx, rx) = bounded::<Vec<RelationEdge>>(CHANNEL_DEPTH);
    let serializer = std::thread::spawn(move || drain_edges(&mut writer, &rx));

    let sender = EdgeSender { tx };
    let produced = produce(&sender);
    drop(sender);

    let written = serializer
        .join()
        .map_err(|_| IngestError("edge serializer panicked".to_string()))?
        .map_err(IngestError::from)?;
    produced?;
    Ok(written)
}

/// Fan a shard list over a fixed worker pool, collecting each shard's
/// result. A failed shard is logged as ERROR and counted; the remaining
/// shards still run. Workers stop picking up new shards once
/// cancellation is raised.
pub fn map_shards<T, F>(
    shards: &[PathBuf],
    parallel: usize,
    log: &RunLogger,
    f: F,
) -> (Vec<T>, usize)
where
    T: Send,
    F: Fn(&Path) -> Result<T, IngestError> + Sync,
{
    let next = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let results = std::sync::Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..parallel.max(1) {
            scope.spawn(|| loop {
                if log.cancelled() {
                    break;
                }
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(shard) = shards.get(index) else {
                    break;
                };
                match f(shard) {
                    Ok(value) => {
                        if let Ok(mut guard) = results.lock() {
                            guard.push(value);
                        }
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        log.error(
                            &format!("error processing {}", shard.display()),
                            &e.0,
                            LogTarget::file(shard.display().to_string()),
                        );
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

/// Validate both sides of a raw pair against their expected kinds,
/// logging a DEBUG skip (with the kind-specific category) on mismatch.
#[must_use]
pub fn checked_pair(
    log: &RunLogger,
    source: &str,
    file: &str,
    a: &str,
    a_type: AccessionType,
    b: &str,
    b_type: AccessionType,
) -> Option<(String, String)> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if !accession::is_valid(a, a_type) {
        log_invalid(log, source, file, a, a_type);
        return None;
    }
    if !accession::is_valid(b, b_type) {
        log_invalid(log, source, file, b, b_type);
        return None;
    }
    Some((a.to_string(), b.to_string()))
}

pub fn log_invalid(log: &RunLogger, source: &str, file: &str, raw: &str, expected: AccessionType) {
    log.debug(
        &format!("skipping invalid {}: {raw}", expected.as_str()),
        accession::invalid_category(expected),
        LogTarget::file(file)
            .with_accession(raw)
            .with_source(source),
    );
}

/// Load a preserved TSV, keeping only pairs whose sides validate as the
/// expected kinds. The header row fails validation and drops out here,
/// which is the intended treatment.
pub fn load_preserved(
    log: &RunLogger,
    path: &Path,
    from_type: AccessionType,
    to_type: AccessionType,
) -> Result<Vec<(String, String)>, IngestError> {
    let pairs = seqlink_store::blacklist::read_preserved_pairs(path)?;
    let file = path.display().to_string();
    Ok(pairs
        .into_iter()
        .filter_map(|(from, to)| {
            checked_pair(log, "preserved", &file, &from, from_type, &to, to_type)
        })
        .collect())
}
