// src/matching/acts.rs

use std::collections::BTreeSet;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::ActPairingWeights;
use crate::matching::name::fold_text;
use crate::models::{ActPair, SourceRecord};

// Standalone two-digit numbers; FDI tooth numbers live in 11..=48
static TOOTH_NUMBER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{2}\b").expect("tooth number regex is valid"));

const MAX_TOOTH_NUMBER: u8 = 48;
const MIN_DESCRIPTION_TOKEN_LENGTH: usize = 2;

/// Outcome of pairing two act lists for one patient
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActPairing {
    /// One entry per left-side record, in input order
    pub pairs: Vec<ActPair>,

    /// Right-side index paired with each left-side record
    pub partners: Vec<Option<usize>>,

    /// Right-side indices no pair consumed
    pub unmatched_right: BTreeSet<usize>,
}

impl ActPairing {
    /// Right-side records left over, in input order
    pub fn unmatched_right_records<'a>(
        &'a self,
        right: &'a [SourceRecord],
    ) -> impl Iterator<Item = &'a SourceRecord> + 'a {
        self.unmatched_right.iter().map(move |&j| &right[j])
    }
}

/// Aligns the acts of one resolved patient across two sources, one to one
#[derive(Debug, Clone, Default)]
pub struct ActPairingEngine {
    weights: ActPairingWeights,
}

impl ActPairingEngine {
    pub fn new(weights: ActPairingWeights) -> Self {
        Self { weights }
    }

    /// Composite similarity of two acts: description token overlap, shared
    /// tooth numbers and price proximity.
    pub fn act_score(&self, a: &SourceRecord, b: &SourceRecord) -> f64 {
        let text_a = a.scoring_text();
        let text_b = b.scoring_text();
        self.weights.description * jaccard(&description_tokens(&text_a), &description_tokens(&text_b))
            + self.weights.tooth * jaccard(&tooth_numbers(&text_a), &tooth_numbers(&text_b))
            + self.weights.price * price_closeness(a.price, b.price)
    }

    /// Pairs `left` with `right`.
    ///
    /// All candidate pairs at or above `threshold` are sorted by descending
    /// score and accepted greedily when neither side is consumed yet. This
    /// approximates maximum-weight bipartite matching; a patient carries a
    /// handful of acts, and the greedy pass is cheap and deterministic.
    pub fn pair(&self, left: &[SourceRecord], right: &[SourceRecord], threshold: f64) -> ActPairing {
        let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
        for (i, a) in left.iter().enumerate() {
            for (j, b) in right.iter().enumerate() {
                let score = self.act_score(a, b);
                trace!(
                    "Act score {:.3} for '{}' vs '{}'",
                    score, a.act_description, b.act_description
                );
                if score >= threshold {
                    candidates.push((i, j, score));
                }
            }
        }
        // Stable sort: equal scores keep left-major generation order
        candidates.sort_by(|x, y| y.2.total_cmp(&x.2));

        let mut left_partner: Vec<Option<(usize, f64)>> = vec![None; left.len()];
        let mut right_used = vec![false; right.len()];
        for (i, j, score) in candidates {
            if left_partner[i].is_some() || right_used[j] {
                continue;
            }
            left_partner[i] = Some((j, score));
            right_used[j] = true;
        }

        let partners: Vec<Option<usize>> = left_partner.iter().map(|p| p.map(|(j, _)| j)).collect();
        let pairs: Vec<ActPair> = left
            .iter()
            .zip(left_partner)
            .map(|(a, partner)| match partner {
                Some((j, score)) => ActPair {
                    left: Some(a.clone()),
                    right: Some(right[j].clone()),
                    score: Some(score),
                },
                None => ActPair {
                    left: Some(a.clone()),
                    right: None,
                    score: None,
                },
            })
            .collect();

        let unmatched_right: BTreeSet<usize> = right_used
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(j, _)| j)
            .collect();

        debug!(
            "Paired {} of {} left acts with {} right acts ({} right unmatched)",
            pairs.iter().filter(|p| p.right.is_some()).count(),
            left.len(),
            right.len(),
            unmatched_right.len()
        );

        ActPairing {
            pairs,
            partners,
            unmatched_right,
        }
    }
}

/// Folded alphanumeric tokens of an act description
pub fn description_tokens(text: &str) -> BTreeSet<String> {
    fold_text(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_DESCRIPTION_TOKEN_LENGTH)
        .map(str::to_string)
        .collect()
}

/// Two-digit tooth numbers (1..=48) mentioned in a description. Digits
/// belonging to an amount ("45,50", "12.5") are not tooth numbers.
pub fn tooth_numbers(text: &str) -> BTreeSet<u8> {
    TOOTH_NUMBER_REGEX
        .find_iter(text)
        .filter(|m| !is_amount_part(text.as_bytes(), m.start(), m.end()))
        .filter_map(|m| m.as_str().parse::<u8>().ok())
        .filter(|n| (1..=MAX_TOOTH_NUMBER).contains(n))
        .collect()
}

/// True when `bytes[start..end]` is followed by `[.,]<digit>` or preceded
/// by `<digit>[.,]`
fn is_amount_part(bytes: &[u8], start: usize, end: usize) -> bool {
    let is_sep = |b: u8| b == b'.' || b == b',';
    let fraction_follows = matches!(
        (bytes.get(end), bytes.get(end + 1)),
        (Some(&sep), Some(digit)) if is_sep(sep) && digit.is_ascii_digit()
    );
    let integer_precedes = start >= 2 && is_sep(bytes[start - 1]) && bytes[start - 2].is_ascii_digit();
    fraction_follows || integer_precedes
}

/// `1 - |a - b| / max(a, b)`, floored at 0; 0 when either price is absent
pub fn price_closeness(a: Option<Decimal>, b: Option<Decimal>) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let largest = a.max(b);
    if largest <= Decimal::ZERO {
        return 0.0;
    }
    let relative_gap = ((a - b).abs() / largest).to_f64().unwrap_or(1.0);
    (1.0 - relative_gap).max(0.0)
}

/// Jaccard index; 0 when either set is empty
fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ACT_PAIRING_THRESHOLD;
    use crate::models::SourceTag;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn lab(act: &str, price: &str) -> SourceRecord {
        SourceRecord::new("Jean Dupont", act, Some(dec(price)), SourceTag::Lab)
    }

    fn provider(act: &str, price: &str) -> SourceRecord {
        SourceRecord::new("Jean Dupont", act, Some(dec(price)), SourceTag::ExternalProvider)
    }

    #[test]
    fn tooth_numbers_are_range_checked() {
        assert_eq!(tooth_numbers("Couronne 11 et 21"), BTreeSet::from([11, 21]));
        assert_eq!(tooth_numbers("Bridge 36-37-38"), BTreeSet::from([36, 37, 38]));
        assert!(tooth_numbers("Dent 55, total 100.00").is_empty());
        assert!(tooth_numbers("Lot 2024").is_empty());
    }

    #[test]
    fn amounts_in_descriptions_are_not_teeth() {
        assert!(tooth_numbers("Couronne 45,50").is_empty());
        assert!(tooth_numbers("Supplement 12.5 EUR").is_empty());
        assert_eq!(tooth_numbers("Couronne 36, 37"), BTreeSet::from([36, 37]));
        assert_eq!(tooth_numbers("Dent 21. Couronne"), BTreeSet::from([21]));
    }

    #[test]
    fn description_tokens_fold_accents() {
        assert_eq!(
            description_tokens("Gouttière SOUPLE, 1 arcade"),
            BTreeSet::from(["arcade".to_string(), "gouttiere".to_string(), "souple".to_string()])
        );
    }

    #[test]
    fn price_closeness_edges() {
        assert_eq!(price_closeness(Some(dec("100")), Some(dec("100"))), 1.0);
        assert!((price_closeness(Some(dec("100")), Some(dec("80"))) - 0.8).abs() < 1e-9);
        assert_eq!(price_closeness(None, Some(dec("80"))), 0.0);
        assert_eq!(price_closeness(Some(Decimal::ZERO), Some(Decimal::ZERO)), 0.0);
    }

    #[test]
    fn identical_acts_score_one() {
        let engine = ActPairingEngine::default();
        let score = engine.act_score(&lab("Couronne zircone 11", "180.00"), &provider("couronne ZIRCONE 11", "180.00"));
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn acts_pair_by_content_not_position() {
        let engine = ActPairingEngine::default();
        let left = vec![lab("Couronne zircone 11", "180.00"), lab("Onlay emax 36", "250.00")];
        let right = vec![provider("Onlay EMAX 36", "250.00"), provider("Couronne zircone 11", "175.00")];

        let result = engine.pair(&left, &right, DEFAULT_ACT_PAIRING_THRESHOLD);
        assert_eq!(result.pairs.len(), 2);
        assert_eq!(result.pairs[0].right.as_ref().unwrap().act_description, "Couronne zircone 11");
        assert_eq!(result.pairs[1].right.as_ref().unwrap().act_description, "Onlay EMAX 36");
        assert_eq!(result.partners, vec![Some(1), Some(0)]);
        assert!(result.unmatched_right.is_empty());
    }

    #[test]
    fn greedy_takes_highest_score_first() {
        let engine = ActPairingEngine::default();
        // Both left acts want the single crown on tooth 21; the exact one wins.
        let left = vec![lab("Couronne 11", "150.00"), lab("Couronne 21", "150.00")];
        let right = vec![provider("Couronne 21", "150.00")];
        let result = engine.pair(&left, &right, 0.5);
        assert!(result.pairs[0].right.is_none());
        assert_eq!(result.pairs[1].right.as_ref().unwrap().act_description, "Couronne 21");
    }

    #[test]
    fn unmatched_right_records_are_reported_once() {
        let engine = ActPairingEngine::default();
        let left = vec![lab("Couronne 11", "150.00")];
        let right = vec![provider("Plaque base resine", "90.00"), provider("Couronne 11", "150.00")];
        let result = engine.pair(&left, &right, DEFAULT_ACT_PAIRING_THRESHOLD);
        assert_eq!(result.unmatched_right, BTreeSet::from([0]));
        let leftovers: Vec<&SourceRecord> = result.unmatched_right_records(&right).collect();
        assert_eq!(leftovers, vec![&right[0]]);
    }

    #[test]
    fn empty_sides_pair_to_nothing() {
        let engine = ActPairingEngine::default();
        let result = engine.pair(&[], &[provider("x", "1.00")], 0.5);
        assert!(result.pairs.is_empty());
        assert_eq!(result.unmatched_right, BTreeSet::from([0]));
    }

    proptest! {
        #[test]
        fn pairing_is_injective(
            left_specs in proptest::collection::vec((0u8..4, 11u8..15, 1u32..5), 0..6),
            right_specs in proptest::collection::vec((0u8..4, 11u8..15, 1u32..5), 0..6),
            threshold in 0.0f64..1.0,
        ) {
            let labels = ["couronne", "onlay", "plaque", "inlay"];
            let build = |specs: &[(u8, u8, u32)], tag: SourceTag| -> Vec<SourceRecord> {
                specs
                    .iter()
                    .map(|(l, t, p)| SourceRecord::new(
                        "P Q",
                        format!("{} {}", labels[*l as usize], t),
                        Some(Decimal::from(*p * 50)),
                        tag,
                    ))
                    .collect()
            };
            let left = build(&left_specs, SourceTag::Lab);
            let right = build(&right_specs, SourceTag::ExternalProvider);

            let result = ActPairingEngine::default().pair(&left, &right, threshold);
            prop_assert_eq!(result.pairs.len(), left.len());

            let matched = result.pairs.iter().filter(|p| p.right.is_some()).count();
            prop_assert_eq!(matched + result.unmatched_right.len(), right.len());
            for (pair, original) in result.pairs.iter().zip(&left) {
                prop_assert_eq!(pair.left.as_ref(), Some(original));
            }
        }
    }
}
