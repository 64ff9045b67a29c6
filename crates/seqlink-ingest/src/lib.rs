// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod date_cache;
pub mod dblink;
pub mod jsonl;
pub mod resources;
pub mod split;
pub mod xml;

use std::fmt::{Display, Formatter};

pub const CRATE_NAME: &str = "seqlink-ingest";

#[derive(Debug)]
pub struct IngestError(pub String);

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<seqlink_store::StoreError> for IngestError {
    fn from(err: seqlink_store::StoreError) -> Self {
        Self(err.to_string())
    }
}
