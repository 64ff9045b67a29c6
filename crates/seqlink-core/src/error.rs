// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

/// Process exit codes for the CLI.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExitCode {
    Success = 0,
    Usage = 2,
    StepFailed = 3,
    ResourceMissing = 4,
    Internal = 10,
}

impl ExitCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Usage => "usage",
            Self::StepFailed => "step_failed",
            Self::ResourceMissing => "resource_missing",
            Self::Internal => "internal",
        }
    }
}

/// Failure classes shared across the pipeline crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineErrorCode {
    /// Required on-disk resource or connection is absent; the step aborts.
    Critical,
    /// One shard or worker failed; the step continues on other shards.
    Shard,
    /// Transient network condition; retried by the caller.
    Transient,
    Io,
    Db,
    Parse,
    Config,
}

impl PipelineErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Shard => "shard",
            Self::Transient => "transient",
            Self::Io => "io",
            Self::Db => "db",
            Self::Parse => "parse",
            Self::Config => "config",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineError {
    pub code: PipelineErrorCode,
    pub message: String,
}

impl PipelineError {
    #[must_use]
    pub fn new(code: PipelineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorCode::Critical, message)
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.code == PipelineErrorCode::Critical
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::new(PipelineErrorCode::Io, err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(PipelineErrorCode::Db, err.to_string())
    }
}
