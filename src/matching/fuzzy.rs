// src/matching/fuzzy.rs

use std::collections::BTreeSet;

use log::trace;
use strsim::levenshtein;

use crate::config::{DEFAULT_FUZZY_TOKEN_TOLERANCE, MatcherWeights};

/// Score and decision for one pair of name token lists
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenMatch {
    pub matched: bool,
    pub score: f64,

    /// Number of one-to-one fuzzy token alignments
    pub aligned: usize,
    pub coverage: f64,
    pub jaccard: f64,
    pub core_bonus: bool,
}

impl TokenMatch {
    fn none() -> Self {
        Self {
            matched: false,
            score: 0.0,
            aligned: 0,
            coverage: 0.0,
            jaccard: 0.0,
            core_bonus: false,
        }
    }
}

/// Edit-distance tolerant comparison of name token lists
#[derive(Debug, Clone)]
pub struct FuzzyTokenMatcher {
    tolerance: f64,
    weights: MatcherWeights,
}

impl Default for FuzzyTokenMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_TOKEN_TOLERANCE, MatcherWeights::default())
    }
}

impl FuzzyTokenMatcher {
    pub fn new(tolerance: f64, weights: MatcherWeights) -> Self {
        Self { tolerance, weights }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Two tokens are equal if identical or if their edit distance divided by
    /// the longer token's length is within the tolerance.
    pub fn tokens_equal(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let longest = a.chars().count().max(b.chars().count());
        if longest == 0 {
            return false;
        }
        let distance = levenshtein(a, b) as f64 / longest as f64;
        distance <= self.tolerance
    }

    /// Compares two token lists.
    ///
    /// Scoring is `coverage_weight * coverage + jaccard_weight * jaccard`
    /// plus `core_bonus` when one side's two longest tokens are both found on
    /// the other side. Any of coverage at the pass mark, two aligned tokens
    /// or a core hit is a match, so extra maiden or middle names still
    /// resolve.
    pub fn score(&self, a: &[String], b: &[String]) -> TokenMatch {
        if a.is_empty() || b.is_empty() {
            return TokenMatch::none();
        }

        let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
        let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
        if set_a == set_b {
            return TokenMatch {
                matched: true,
                score: 1.0,
                aligned: a.len().min(b.len()),
                coverage: 1.0,
                jaccard: 1.0,
                core_bonus: false,
            };
        }

        // Greedy alignment is not a maximum matching and that is intended:
        // names have a handful of tokens. Running it from both sides and
        // keeping the larger count keeps the decision symmetric.
        let aligned = self.greedy_alignment(a, b).max(self.greedy_alignment(b, a));

        let coverage = aligned as f64 / a.len().min(b.len()) as f64;
        let union = a.len() + b.len() - aligned;
        let jaccard = aligned as f64 / union as f64;
        let core_bonus = self.core_tokens_present(a, b) || self.core_tokens_present(b, a);

        let mut score = self.weights.coverage_weight * coverage + self.weights.jaccard_weight * jaccard;
        if core_bonus {
            score += self.weights.core_bonus;
        }

        let matched = coverage >= self.weights.coverage_pass
            || aligned >= self.weights.min_aligned_tokens
            || core_bonus;

        trace!(
            "{:?} vs {:?}: aligned={} coverage={:.2} jaccard={:.2} core={} score={:.3} matched={}",
            a, b, aligned, coverage, jaccard, core_bonus, score, matched
        );

        TokenMatch {
            matched,
            score,
            aligned,
            coverage,
            jaccard,
            core_bonus,
        }
    }

    /// For each token of `from`, consumes the first unused fuzzy-equal token
    /// of `to`; ties go to the first one found.
    fn greedy_alignment(&self, from: &[String], to: &[String]) -> usize {
        let mut used = vec![false; to.len()];
        let mut aligned = 0;
        for token in from {
            let hit = to
                .iter()
                .enumerate()
                .find(|(j, candidate)| !used[*j] && self.tokens_equal(token, candidate));
            if let Some((j, _)) = hit {
                used[j] = true;
                aligned += 1;
            }
        }
        aligned
    }

    /// True when every core token of `side` (its two longest tokens, usually
    /// surname and first name) has a fuzzy-equal token in `other`.
    fn core_tokens_present(&self, side: &[String], other: &[String]) -> bool {
        core_tokens(side)
            .iter()
            .all(|core| other.iter().any(|t| self.tokens_equal(core, t)))
    }
}

/// The two longest tokens, ties broken by position
fn core_tokens(tokens: &[String]) -> Vec<&str> {
    let mut by_length: Vec<&str> = tokens.iter().map(String::as_str).collect();
    by_length.sort_by(|x, y| y.chars().count().cmp(&x.chars().count()));
    by_length.truncate(2);
    by_length
}
