// src/models.rs

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

//------------------------------------------------------------------------------
// SOURCE RECORDS
//------------------------------------------------------------------------------

/// Identifies which document a record was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    /// Internal billing export (the "result" table)
    Primary,

    /// Lab invoice feed (Desmos)
    Lab,

    /// Second provider feed (Cosmident)
    ExternalProvider,
}

impl SourceTag {
    /// Converts the enum to a string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Lab => "lab",
            Self::ExternalProvider => "provider",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted line item from one source document
///
/// Records are produced once by ingestion and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Patient name exactly as found in the source
    pub patient_name: String,

    /// Free-text description of the billed procedure
    pub act_description: String,

    /// Billed amount. Zero and blank amounts are stored as `None`.
    pub price: Option<Decimal>,

    /// Document the record came from
    pub source_tag: SourceTag,

    /// Tooth reference (primary export only)
    pub tooth: Option<String>,

    /// Billing code (primary export only)
    pub code: Option<String>,
}

impl SourceRecord {
    pub fn new(
        patient_name: impl Into<String>,
        act_description: impl Into<String>,
        price: Option<Decimal>,
        source_tag: SourceTag,
    ) -> Self {
        Self {
            patient_name: patient_name.into(),
            act_description: act_description.into(),
            price: price.filter(|p| !p.is_zero()),
            source_tag,
            tooth: None,
            code: None,
        }
    }

    pub fn with_tooth(mut self, tooth: impl Into<String>) -> Self {
        self.tooth = Some(tooth.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Description used for act scoring. The tooth column is folded in so
    /// that tooth numbers recorded apart from the label still count.
    pub fn scoring_text(&self) -> String {
        match self.tooth.as_deref().map(str::trim) {
            Some(tooth) if !tooth.is_empty() => format!("{} {}", self.act_description, tooth),
            _ => self.act_description.clone(),
        }
    }
}

//------------------------------------------------------------------------------
// NAME KEYS
//------------------------------------------------------------------------------

/// Canonical, order-independent representation of a patient name
///
/// Tokens are sorted, so "DUVAL Eric" and "eric duval" share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NameKey {
    tokens: Vec<String>,
}

impl NameKey {
    /// Builds a key from already-normalized tokens. Tokens are sorted here so
    /// the ordering invariant holds for every constructed key.
    pub fn from_tokens(mut tokens: Vec<String>) -> Self {
        tokens.sort();
        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Index key string (tokens joined by a single space)
    pub fn as_key(&self) -> String {
        self.tokens.join(" ")
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

//------------------------------------------------------------------------------
// MATCHING OUTCOMES
//------------------------------------------------------------------------------

/// Outcome of resolving one target name against one patient index
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,

    /// Confidence of the match. Only meaningful when `matched` is set; may
    /// exceed 1.0 for fuzzy matches carrying the core-token bonus.
    pub score: f64,

    /// Records judged to belong to the target patient
    pub candidate_records: Vec<SourceRecord>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            score: 0.0,
            candidate_records: Vec::new(),
        }
    }
}

/// Correspondence between at most one record on each side of an act pairing
#[derive(Debug, Clone, PartialEq)]
pub struct ActPair {
    pub left: Option<SourceRecord>,
    pub right: Option<SourceRecord>,

    /// Composite pairing score, `None` when one side is absent
    pub score: Option<f64>,
}

/// Classification of a comparison row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Patient resolved in both the lab and provider feeds
    Both,

    /// Patient resolved in exactly one of the two feeds
    SingleSource,

    /// Patient resolved in neither feed
    NoMatch,

    /// Provider record with no counterpart in the other configured sources
    Orphan,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::SingleSource => "single_source",
            Self::NoMatch => "no_match",
            Self::Orphan => "orphan",
        }
    }

    /// Background colour used by the comparison table
    pub fn color_hex(&self) -> &'static str {
        match self {
            Self::Both => "#c6f6d5",
            Self::SingleSource => "#cfe8ff",
            Self::NoMatch => "#ffd6d6",
            Self::Orphan => "#ffe8b3",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------------------------------------------------------------------------
// OUTPUT
//------------------------------------------------------------------------------

/// One row of the unified comparison table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    /// Display name for the row (primary spelling when available)
    pub patient_name: String,

    /// Normalized key the row is grouped and sorted under
    pub patient_key: String,

    pub primary: Option<SourceRecord>,
    pub lab: Option<SourceRecord>,
    pub provider: Option<SourceRecord>,

    /// Lab/provider act pairing score when both sides are present
    pub pair_score: Option<f64>,

    pub status: MatchStatus,
}

impl ComparisonRow {
    /// Record whose price drives row ordering: lab first, then provider,
    /// then the primary export.
    pub fn reference_record(&self) -> Option<&SourceRecord> {
        self.lab
            .as_ref()
            .or(self.provider.as_ref())
            .or(self.primary.as_ref())
    }

    pub fn reference_price(&self) -> Option<Decimal> {
        self.reference_record().and_then(|r| r.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn zero_price_is_stored_as_absent() {
        let rec = SourceRecord::new("Jean Dupont", "Couronne", Some(Decimal::ZERO), SourceTag::Lab);
        assert_eq!(rec.price, None);
    }

    #[test]
    fn name_key_sorts_tokens() {
        let key = NameKey::from_tokens(vec!["dupont".into(), "jean".into()]);
        let other = NameKey::from_tokens(vec!["jean".into(), "dupont".into()]);
        assert_eq!(key, other);
        assert_eq!(key.as_key(), "dupont jean");
    }

    #[test]
    fn reference_record_prefers_lab_then_provider() {
        let lab = SourceRecord::new("A B", "x", Some(dec("10.00")), SourceTag::Lab);
        let provider = SourceRecord::new("A B", "x", Some(dec("20.00")), SourceTag::ExternalProvider);
        let mut row = ComparisonRow {
            patient_name: "A B".into(),
            patient_key: "a b".into(),
            primary: None,
            lab: Some(lab),
            provider: Some(provider),
            pair_score: None,
            status: MatchStatus::Both,
        };
        assert_eq!(row.reference_price(), Some(dec("10.00")));
        row.lab = None;
        assert_eq!(row.reference_price(), Some(dec("20.00")));
    }

    #[test]
    fn scoring_text_includes_tooth() {
        let rec = SourceRecord::new("A B", "Couronne zircone", None, SourceTag::Primary).with_tooth("21");
        assert_eq!(rec.scoring_text(), "Couronne zircone 21");
    }
}
