// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use thiserror::Error;

/// Typed failure modes surfaced across the instantiation pipeline.
///
/// Validation failures while parsing recoverable inputs (init scripts,
/// property files, file_contexts lines) are logged and skipped per-line
/// rather than raised here; these variants are reserved for the failures
/// spec'd as fatal or explicitly counted.
#[derive(Debug, Error)]
pub enum AspError {
    #[error("required firmware input not found: {0}")]
    MissingInput(PathBuf),

    #[error("unsupported Android major version {found} (minimum supported is {minimum})")]
    UnsupportedVersion { found: u32, minimum: u32 },

    #[error("malformed SELinux policy: {0}")]
    MalformedPolicy(String),

    #[error("malformed init/property configuration at {path}:{line}: {reason}")]
    MalformedConfig {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Files dropped during label resolution because no file-context,
    /// genfscon, fs_use, or pre-existing xattr label could be found. Not
    /// fatal; the count and sample paths are carried for the caller to log
    /// or include in a report.
    #[error("{count} file(s) could not be labelled (first: {first:?})")]
    LabelUnresolved { count: usize, first: Option<String> },

    #[error("subject hierarchy is inconsistent: {0}")]
    HierarchyInconsistent(String),

    #[error("credential simulation failed: {0}")]
    SimulationFailed(String),
}

pub type Result<T> = std::result::Result<T, AspError>;
