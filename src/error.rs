// src/error.rs

use thiserror::Error;

use crate::models::SourceTag;

/// Configuration rejected before a reconciliation run starts
#[derive(Debug, Error, PartialEq)]
pub enum OptionsError {
    #[error("{name} is out of range, got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("row cap for patient '{patient}' must keep at least one row")]
    ZeroRowCap { patient: String },

    #[error("row cap entry '{entry}' is not of the form Name=N")]
    MalformedRowCap { entry: String },

    #[error("unknown {name} value '{value}'")]
    UnknownVariant { name: &'static str, value: String },
}

/// A source document that could not be read at all
///
/// Individual malformed records are dropped during ingestion and never
/// produce this error.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {source_tag} source {}: {cause}", path.display())]
    Io {
        source_tag: SourceTag,
        path: std::path::PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("failed to read {source_tag} source: {cause}")]
    Csv {
        source_tag: SourceTag,
        #[source]
        cause: csv::Error,
    },

    #[error("{source_tag} source has no {column} column (headers: {headers:?})")]
    MissingColumn {
        source_tag: SourceTag,
        column: &'static str,
        headers: Vec<String>,
    },

    #[error("{source_tag} source is empty")]
    Empty { source_tag: SourceTag },
}
