// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod accessions;
pub mod blacklist;
pub mod date_cache;
pub mod dblink;
pub mod tar_index;

use std::fmt::{Display, Formatter};

pub use accessions::{AccessionInfo, AccessionsDb, ArchiveSource, SraRelationKind};
pub use blacklist::Blacklists;
pub use date_cache::{DateCache, DateCacheWriter, DateFamily, DateRow};
pub use dblink::{DblinkReader, DblinkWriter};
pub use tar_index::TarXmlReader;

pub const CRATE_NAME: &str = "seqlink-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreErrorCode {
    NotFound,
    Validation,
    Conflict,
    Io,
    Db,
}

impl StoreErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::Conflict => "conflict",
            Self::Io => "io_error",
            Self::Db => "db_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(StoreErrorCode::Db, err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::new(StoreErrorCode::Io, err.to_string())
    }
}
