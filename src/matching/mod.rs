// src/matching/mod.rs
pub mod acts;
pub mod fuzzy;
pub mod index;
pub mod name;
pub mod resolver;

pub use acts::{ActPairing, ActPairingEngine};
pub use fuzzy::{FuzzyTokenMatcher, TokenMatch};
pub use index::{PatientBucket, PatientIndex};
pub use name::NameNormalizer;
pub use resolver::PatientResolver;
