//! Error types shared by the pipeline stages.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode artifact {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {path} is corrupt: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("column '{column}' not found ({context})")]
    MissingColumn { column: String, context: String },

    #[error("column '{0}' already exists")]
    ColumnExists(String),

    /// A fix rule references something the data does not have.
    #[error("rule '{op}' for {iso3} is invalid: {reason}")]
    Rule {
        iso3: String,
        op: &'static str,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot parse '{value}' in column '{column}' as a date")]
    Date { column: String, value: String },

    #[error("unsupported coordinate reference EPSG:{0}")]
    UnsupportedCrs(u32),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn missing_column(column: &str, context: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.to_string(),
            context: context.into(),
        }
    }
}
