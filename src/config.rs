// src/config.rs

use std::collections::BTreeMap;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

// Minimum resolver score to accept a cross-source patient match
pub const DEFAULT_PATIENT_MATCH_THRESHOLD: f64 = 0.50;

// Maximum relative edit distance for two name tokens to count as equal
pub const DEFAULT_FUZZY_TOKEN_TOLERANCE: f64 = 0.20;

// Minimum composite score for a lab/provider act correspondence
pub const DEFAULT_ACT_PAIRING_THRESHOLD: f64 = 0.55;

// Minimum composite score to align a primary act with an emitted row.
// A same-price hit alone (price weight 0.20) reaches it.
pub const DEFAULT_PRIMARY_PAIRING_THRESHOLD: f64 = 0.20;

// Tokens shorter than this never reach a name key
pub const MIN_TOKEN_LENGTH: usize = 2;

// Articles, prepositions and honorifics found around patient names
pub const STOPWORDS: [&str; 11] = [
    "de", "du", "des", "la", "le", "les", "mr", "mme", "m", "monsieur", "madame",
];

// Environment variable names read by `ReconcileOptions::from_env`
pub const ENV_PATIENT_MATCH_THRESHOLD: &str = "DENTRECON_PATIENT_MATCH_THRESHOLD";
pub const ENV_FUZZY_TOKEN_TOLERANCE: &str = "DENTRECON_FUZZY_TOKEN_TOLERANCE";
pub const ENV_ACT_PAIRING_THRESHOLD: &str = "DENTRECON_ACT_PAIRING_THRESHOLD";
pub const ENV_PRIMARY_PAIRING_THRESHOLD: &str = "DENTRECON_PRIMARY_PAIRING_THRESHOLD";
pub const ENV_ORPHAN_POLICY: &str = "DENTRECON_ORPHAN_POLICY";
pub const ENV_RESOLUTION_MODE: &str = "DENTRECON_RESOLUTION_MODE";
pub const ENV_ROW_CAPS: &str = "DENTRECON_ROW_CAPS";

//------------------------------------------------------------------------------
// POLICIES
//------------------------------------------------------------------------------

/// When a provider record counts as orphaned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Orphan as soon as the primary export has no matching patient
    AbsentFromPrimaryOnly,

    /// Orphan only when neither the primary export nor the lab feed matches
    #[default]
    AbsentFromBoth,
}

impl FromStr for OrphanPolicy {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "primary" | "primary_only" | "absent_from_primary_only" => {
                Ok(Self::AbsentFromPrimaryOnly)
            }
            "both" | "absent_from_both" => Ok(Self::AbsentFromBoth),
            _ => Err(OptionsError::UnknownVariant {
                name: "orphan_policy",
                value: s.to_string(),
            }),
        }
    }
}

/// How many index buckets a resolved patient may draw records from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Single best bucket (`resolve`)
    #[default]
    Best,

    /// Every bucket at or above the threshold (`resolve_all`)
    AllQualifying,
}

impl FromStr for ResolutionMode {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "best" => Ok(Self::Best),
            "all" | "all_qualifying" => Ok(Self::AllQualifying),
            _ => Err(OptionsError::UnknownVariant {
                name: "resolution_mode",
                value: s.to_string(),
            }),
        }
    }
}

//------------------------------------------------------------------------------
// WEIGHTS
//------------------------------------------------------------------------------

/// Constants of the fuzzy name matcher's composite score and decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherWeights {
    pub coverage_weight: f64,
    pub jaccard_weight: f64,
    pub core_bonus: f64,

    /// Coverage at or above which two names match outright
    pub coverage_pass: f64,

    /// Aligned token count at or above which two names match outright
    pub min_aligned_tokens: usize,
}

impl MatcherWeights {
    /// Weights must be finite and non-negative, the coverage pass mark a
    /// fraction and at least one aligned token required.
    pub fn validate(&self) -> Result<(), OptionsError> {
        check_weights(&[
            ("matcher.coverage_weight", self.coverage_weight),
            ("matcher.jaccard_weight", self.jaccard_weight),
            ("matcher.core_bonus", self.core_bonus),
        ])?;
        if !self.coverage_pass.is_finite() || !(0.0..=1.0).contains(&self.coverage_pass) {
            return Err(OptionsError::OutOfRange {
                name: "matcher.coverage_pass",
                value: self.coverage_pass,
            });
        }
        if self.min_aligned_tokens == 0 {
            return Err(OptionsError::OutOfRange {
                name: "matcher.min_aligned_tokens",
                value: 0.0,
            });
        }
        Ok(())
    }
}

impl Default for MatcherWeights {
    fn default() -> Self {
        Self {
            coverage_weight: 0.6,
            jaccard_weight: 0.4,
            core_bonus: 0.15,
            coverage_pass: 0.66,
            min_aligned_tokens: 2,
        }
    }
}

/// Weights of the act pairing composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActPairingWeights {
    pub description: f64,
    pub tooth: f64,
    pub price: f64,
}

impl ActPairingWeights {
    pub fn validate(&self) -> Result<(), OptionsError> {
        check_weights(&[
            ("act_weights.description", self.description),
            ("act_weights.tooth", self.tooth),
            ("act_weights.price", self.price),
        ])
    }
}

fn check_weights(weights: &[(&'static str, f64)]) -> Result<(), OptionsError> {
    for &(name, value) in weights {
        if !value.is_finite() || value < 0.0 {
            return Err(OptionsError::OutOfRange { name, value });
        }
    }
    Ok(())
}

impl Default for ActPairingWeights {
    fn default() -> Self {
        Self {
            description: 0.55,
            tooth: 0.25,
            price: 0.20,
        }
    }
}

//------------------------------------------------------------------------------
// RUN OPTIONS
//------------------------------------------------------------------------------

/// Every tunable of one reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    pub patient_match_threshold: f64,
    pub fuzzy_token_tolerance: f64,
    pub act_pairing_threshold: f64,
    pub primary_pairing_threshold: f64,
    pub orphan_policy: OrphanPolicy,
    pub resolution_mode: ResolutionMode,

    /// Patient name to the number of cheapest rows kept for that patient
    pub per_patient_row_cap: BTreeMap<String, usize>,

    pub stop_words: Vec<String>,
    pub matcher: MatcherWeights,
    pub act_weights: ActPairingWeights,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            patient_match_threshold: DEFAULT_PATIENT_MATCH_THRESHOLD,
            fuzzy_token_tolerance: DEFAULT_FUZZY_TOKEN_TOLERANCE,
            act_pairing_threshold: DEFAULT_ACT_PAIRING_THRESHOLD,
            primary_pairing_threshold: DEFAULT_PRIMARY_PAIRING_THRESHOLD,
            orphan_policy: OrphanPolicy::default(),
            resolution_mode: ResolutionMode::default(),
            per_patient_row_cap: BTreeMap::new(),
            stop_words: STOPWORDS.iter().map(|s| s.to_string()).collect(),
            matcher: MatcherWeights::default(),
            act_weights: ActPairingWeights::default(),
        }
    }
}

impl ReconcileOptions {
    /// Defaults overridden by `DENTRECON_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    /// Values that fail to parse are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        let read_f64 = |key: &str, target: &mut f64| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<f64>() {
                    Ok(v) => {
                        debug!("{} = {}", key, v);
                        *target = v;
                    }
                    Err(e) => warn!("Ignoring {}='{}': {}", key, raw, e),
                }
            }
        };
        read_f64(ENV_PATIENT_MATCH_THRESHOLD, &mut options.patient_match_threshold);
        read_f64(ENV_FUZZY_TOKEN_TOLERANCE, &mut options.fuzzy_token_tolerance);
        read_f64(ENV_ACT_PAIRING_THRESHOLD, &mut options.act_pairing_threshold);
        read_f64(ENV_PRIMARY_PAIRING_THRESHOLD, &mut options.primary_pairing_threshold);

        if let Some(raw) = lookup(ENV_ORPHAN_POLICY) {
            match raw.parse() {
                Ok(policy) => options.orphan_policy = policy,
                Err(e) => warn!("Ignoring {}: {}", ENV_ORPHAN_POLICY, e),
            }
        }
        if let Some(raw) = lookup(ENV_RESOLUTION_MODE) {
            match raw.parse() {
                Ok(mode) => options.resolution_mode = mode,
                Err(e) => warn!("Ignoring {}: {}", ENV_RESOLUTION_MODE, e),
            }
        }
        if let Some(raw) = lookup(ENV_ROW_CAPS) {
            for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
                match parse_row_cap(entry) {
                    Ok((name, cap)) => {
                        options.per_patient_row_cap.insert(name, cap);
                    }
                    Err(e) => warn!("Ignoring {} entry: {}", ENV_ROW_CAPS, e),
                }
            }
        }

        options
    }

    /// Rejects settings that would make a run meaningless. Called by
    /// `reconcile` before any resolution happens.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let unit_interval = [
            ("patient_match_threshold", self.patient_match_threshold),
            ("fuzzy_token_tolerance", self.fuzzy_token_tolerance),
            ("act_pairing_threshold", self.act_pairing_threshold),
            ("primary_pairing_threshold", self.primary_pairing_threshold),
        ];
        for (name, value) in unit_interval {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(OptionsError::OutOfRange { name, value });
            }
        }
        self.matcher.validate()?;
        self.act_weights.validate()?;

        if let Some((patient, _)) = self.per_patient_row_cap.iter().find(|(_, cap)| **cap == 0) {
            return Err(OptionsError::ZeroRowCap {
                patient: patient.clone(),
            });
        }

        Ok(())
    }
}

/// Parses one `Name=N` row cap entry
pub fn parse_row_cap(entry: &str) -> Result<(String, usize), OptionsError> {
    let malformed = || OptionsError::MalformedRowCap {
        entry: entry.to_string(),
    };
    let (name, cap) = entry.rsplit_once('=').ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(malformed());
    }
    let cap = cap.trim().parse::<usize>().map_err(|_| malformed())?;
    Ok((name.to_string(), cap))
}
