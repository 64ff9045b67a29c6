// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Document-sink adapter.
//!
//! Reads JSONL shards, batches documents, and feeds the search
//! backend's `_bulk` endpoint with `index` (upsert) actions keyed on
//! each document's `identifier`. Transient failures (5xx, connect,
//! timeout) are retried with exponential backoff; a permanently failed
//! batch is logged and skipped so the rest of the ingest proceeds.
//! Deletes treat a 404 item as `not_found`, not an error.

use seqlink_core::{Config, DebugCategory, LogTarget, RunLogger};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CRATE_NAME: &str = "seqlink-sink";

pub const BATCH_SIZE: usize = 5_000;
pub const REQUEST_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SinkErrorCode {
    Transient,
    Permanent,
    Io,
}

impl SinkErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Io => "io_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkError {
    pub code: SinkErrorCode,
    pub message: String,
}

impl SinkError {
    #[must_use]
    pub fn new(code: SinkErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for SinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        Self::new(SinkErrorCode::Io, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub backoff_factor: u32,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_factor: 2,
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.backoff_factor);
            if delay >= self.backoff_cap {
                return self.backoff_cap;
            }
        }
        delay.min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub success: u64,
    pub errors: u64,
    pub not_found: u64,
}

impl BatchResult {
    fn merge(&mut self, other: BatchResult) {
        self.success += other.success;
        self.errors += other.errors;
        self.not_found += other.not_found;
    }
}

pub struct EsClient {
    base_url: String,
    http: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl EsClient {
    pub fn new(config: &Config) -> Result<Self, SinkError> {
        Self::with_retry(config, RetryPolicy::default())
    }

    pub fn with_retry(config: &Config, retry: RetryPolicy) -> Result<Self, SinkError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SinkError::new(SinkErrorCode::Permanent, e.to_string()))?;
        Ok(Self {
            base_url: config.es_url.trim_end_matches('/').to_string(),
            http,
            retry,
        })
    }

    /// Upsert one batch of `(id, document)` pairs into an index.
    pub fn put_batch(
        &self,
        index: &str,
        docs: &[(String, Value)],
    ) -> Result<BatchResult, SinkError> {
        if docs.is_empty() {
            return Ok(BatchResult::default());
        }
        let mut body = String::new();
        for (id, doc) in docs {
            let action = serde_json::json!({ "index": { "_index": index, "_id": id } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.to_string());
            body.push('\n');
        }
        self.bulk_with_retry(body)
    }

    /// Delete a batch of ids from an index. 404 items count as
    /// `not_found` rather than failure.
    pub fn delete_batch(&self, index: &str, ids: &[String]) -> Result<BatchResult, SinkError> {
        if ids.is_empty() {
            return Ok(BatchResult::default());
        }
        let mut body = String::new();
        for id in ids {
            let action = serde_json::json!({ "delete": { "_index": index, "_id": id } });
            body.push_str(&action.to_string());
            body.push('\n');
        }
        self.bulk_with_retry(body)
    }

    fn bulk_with_retry(&self, body: String) -> Result<BatchResult, SinkError> {
        let url = format!("{}/_bulk", self.base_url);
        let mut attempt = 0usize;
        loop {
            match self.bulk_once(&url, &body) {
                Ok(result) => return Ok(result),
                Err(err) if err.code == SinkErrorCode::Transient && attempt < self.retry.max_retries => {
                    std::thread::sleep(self.retry.delay_for_attempt(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn bulk_once(&self, url: &str, body: &str) -> Result<BatchResult, SinkError> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/x-ndjson")
            .body(body.to_string())
            .send()
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SinkError::new(
                SinkErrorCode::Transient,
                format!("bulk request returned {status}"),
            ));
        }
        if !status.is_success() {
            return Err(SinkError::new(
                SinkErrorCode::Permanent,
                format!("bulk request returned {status}"),
            ));
        }

        let payload: Value = response
            .json()
            .map_err(|e| SinkError::new(SinkErrorCode::Permanent, e.to_string()))?;
        Ok(tally_bulk_response(&payload))
    }
}

fn classify_request_error(err: reqwest::Error) -> SinkError {
    if err.is_timeout() || err.is_connect() {
        SinkError::new(SinkErrorCode::Transient, err.to_string())
    } else {
        SinkError::new(SinkErrorCode::Permanent, err.to_string())
    }
}

/// Per-item accounting of a `_bulk` response body.
#[must_use]
pub fn tally_bulk_response(payload: &Value) -> BatchResult {
    let mut result = BatchResult::default();
    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return result;
    };
    for item in items {
        let Some(entry) = item
            .get("index")
            .or_else(|| item.get("delete"))
            .or_else(|| item.get("create"))
        else {
            continue;
        };
        let status = entry.get("status").and_then(Value::as_u64).unwrap_or(0);
        let op_is_delete = item.get("delete").is_some();
        match status {
            200 | 201 => result.success += 1,
            404 if op_is_delete => result.not_found += 1,
            _ => result.errors += 1,
        }
    }
    result
}

/// JSONL shards under a directory matching `{pattern}*.jsonl`,
/// name-sorted. An empty pattern matches every shard.
pub fn matching_shards(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, SinkError> {
    if !dir.is_dir() {
        return Err(SinkError::new(
            SinkErrorCode::Io,
            format!("jsonl directory not found: {}", dir.display()),
        ));
    }
    let mut shards: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "jsonl")
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(pattern))
        })
        .collect();
    shards.sort();
    Ok(shards)
}

/// Ingest a set of JSONL shards into one index, batching
/// [`BATCH_SIZE`] documents per request. Lines without an `identifier`
/// are skipped with DEBUG; a permanently failed batch is logged as
/// ERROR and the ingest continues.
pub fn insert_jsonl_files(
    client: &EsClient,
    files: &[PathBuf],
    index: &str,
    log: &RunLogger,
) -> Result<BatchResult, SinkError> {
    let mut totals = BatchResult::default();
    let mut batch: Vec<(String, Value)> = Vec::with_capacity(BATCH_SIZE);

    for file in files {
        let handle = fs::File::open(file)?;
        for line in BufReader::new(handle).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let doc: Value = match serde_json::from_str(trimmed) {
                Ok(doc) => doc,
                Err(e) => {
                    log.warning(
                        &format!("skipping malformed jsonl line: {e}"),
                        LogTarget::file(file.display().to_string()),
                    );
                    continue;
                }
            };
            let Some(id) = doc.get("identifier").and_then(Value::as_str) else {
                log.debug(
                    "document without identifier",
                    DebugCategory::MissingIdentifier,
                    LogTarget::file(file.display().to_string()),
                );
                continue;
            };
            batch.push((id.to_string(), doc.clone()));
            if batch.len() >= BATCH_SIZE {
                flush_batch(client, index, &mut batch, &mut totals, log);
            }
        }
        log.info(
            "queued shard for ingest",
            LogTarget::file(file.display().to_string()),
        );
    }
    flush_batch(client, index, &mut batch, &mut totals, log);
    Ok(totals)
}

fn flush_batch(
    client: &EsClient,
    index: &str,
    batch: &mut Vec<(String, Value)>,
    totals: &mut BatchResult,
    log: &RunLogger,
) {
    if batch.is_empty() {
        return;
    }
    let docs = std::mem::take(batch);
    match client.put_batch(index, &docs) {
        Ok(result) => totals.merge(result),
        Err(e) => {
            // Skip the batch, keep ingesting; the retry budget is spent.
            totals.errors += docs.len() as u64;
            log.error(
                &format!("bulk insert batch failed ({} docs)", docs.len()),
                &e.to_string(),
                LogTarget::default().with_source(index),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn bulk_tally_counts_delete_404_as_not_found() {
        let payload = serde_json::json!({
            "items": [
                { "index": { "status": 201 } },
                { "index": { "status": 200 } },
                { "index": { "status": 429 } },
                { "delete": { "status": 404 } },
                { "delete": { "status": 200 } },
            ]
        });
        let result = tally_bulk_response(&payload);
        assert_eq!(
            result,
            BatchResult {
                success: 3,
                errors: 1,
                not_found: 1,
            }
        );
    }

    #[test]
    fn shard_matching_filters_by_prefix() {
        let tmp = tempfile::tempdir().expect("tempdir");
        for name in [
            "dra_run_0001.jsonl",
            "dra_run_0002.jsonl",
            "ncbi_run_0001.jsonl",
            "notes.txt",
        ] {
            fs::write(tmp.path().join(name), "{}").expect("write");
        }
        let shards = matching_shards(tmp.path(), "dra_run_").expect("match");
        assert_eq!(shards.len(), 2);
        let all = matching_shards(tmp.path(), "").expect("all");
        assert_eq!(all.len(), 3);
    }
}
