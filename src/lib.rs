// src/lib.rs
pub mod assemble;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod matching;
pub mod models;
pub mod results;

// Re-export common types for easier access
pub use models::{
    ActPair, ComparisonRow, MatchResult, MatchStatus, NameKey, SourceRecord, SourceTag,
};

// Re-export important functionality
pub use assemble::{ComparisonAssembler, reconcile};
pub use config::{OrphanPolicy, ReconcileOptions, ResolutionMode};
pub use error::{IngestError, OptionsError};
