use std::path::PathBuf;

use thiserror::Error;

use crate::builder::Stage;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("index not initialized: {} does not exist. Run 'notewiki update-id-path' first.", .path.display())]
    IndexNotInitialized { path: PathBuf },

    #[error("index file {} is corrupt: {reason}", .path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("compiler failed on {source_name} ({status}){}", render_stderr(.stderr))]
    CompilerFailed {
        source_name: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    CompilerSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build aborted at {stage} of {document}: {source}")]
    Aborted {
        stage: Stage,
        document: String,
        #[source]
        source: Box<Error>,
    },

    #[error("template {} not found", .path.display())]
    TemplateMissing { path: PathBuf },

    #[error("config {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid exclude glob: {0}")]
    Glob(#[from] globset::Error),
}

fn render_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}
