//! Helper functions for tempfile/tempdir usage in tests
//!
//! Wrappers around the tempfile crate with consistent error context.

use anyhow::Context;
use std::path::{Path, PathBuf};

/// Create a temp directory with a helpful error message.
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}

/// Path for a log file inside `dir` that does not exist yet.
pub fn log_path_in(dir: &Path, name: &str) -> PathBuf {
    dir.join("logs").join(name)
}

/// Read a whole file, with the path in the error context.
pub fn read_to_string(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[allow(dead_code)]
pub use tempfile::TempDir;
