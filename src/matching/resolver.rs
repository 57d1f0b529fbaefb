// src/matching/resolver.rs

use log::{debug, trace};

use crate::matching::fuzzy::FuzzyTokenMatcher;
use crate::matching::index::{PatientBucket, PatientIndex};
use crate::matching::name::NameNormalizer;
use crate::models::{MatchResult, NameKey};

/// Finds the records of a target patient inside another source's index
#[derive(Debug, Clone, Default)]
pub struct PatientResolver {
    normalizer: NameNormalizer,
    matcher: FuzzyTokenMatcher,
}

impl PatientResolver {
    pub fn new(normalizer: NameNormalizer, matcher: FuzzyTokenMatcher) -> Self {
        Self {
            normalizer,
            matcher,
        }
    }

    pub fn normalizer(&self) -> &NameNormalizer {
        &self.normalizer
    }

    pub fn matcher(&self) -> &FuzzyTokenMatcher {
        &self.matcher
    }

    /// Best single bucket for `target_name`, or no match
    pub fn resolve(&self, target_name: &str, index: &PatientIndex, threshold: f64) -> MatchResult {
        self.resolve_key(&self.normalizer.normalize(target_name), index, threshold)
    }

    /// Every bucket reaching `threshold`, for patients whose acts are spread
    /// over several spellings in one source
    pub fn resolve_all(&self, target_name: &str, index: &PatientIndex, threshold: f64) -> MatchResult {
        self.resolve_all_key(&self.normalizer.normalize(target_name), index, threshold)
    }

    /// `resolve` for an already-normalized key.
    ///
    /// An exact key hit is returned with score 1.0 before any fuzzy work, so
    /// a higher-scoring fuzzy neighbour can never displace it. Otherwise every
    /// bucket is scanned linearly and the best matched bucket is kept if it
    /// reaches `threshold`; ties keep the earlier bucket.
    pub fn resolve_key(&self, target: &NameKey, index: &PatientIndex, threshold: f64) -> MatchResult {
        if target.is_empty() || index.is_empty() {
            return MatchResult::no_match();
        }

        if let Some(bucket) = index.get(&target.as_key()) {
            trace!("Exact key hit for '{}'", target);
            return MatchResult {
                matched: true,
                score: 1.0,
                candidate_records: bucket.records.clone(),
            };
        }

        let mut best: Option<(&PatientBucket, f64)> = None;
        for bucket in index.buckets() {
            let result = self.matcher.score(target.tokens(), bucket.key.tokens());
            if !result.matched {
                continue;
            }
            if best.is_none_or(|(_, best_score)| result.score > best_score) {
                best = Some((bucket, result.score));
            }
        }

        match best {
            Some((bucket, score)) if score >= threshold => {
                debug!("Fuzzy match '{}' -> '{}' (score {:.3})", target, bucket.key, score);
                MatchResult {
                    matched: true,
                    score,
                    candidate_records: bucket.records.clone(),
                }
            }
            Some((bucket, score)) => {
                trace!(
                    "Best candidate '{}' for '{}' below threshold ({:.3} < {:.3})",
                    bucket.key, target, score, threshold
                );
                MatchResult::no_match()
            }
            None => MatchResult::no_match(),
        }
    }

    /// `resolve_all` for an already-normalized key.
    ///
    /// The exact bucket, if any, comes first with score 1.0; qualifying fuzzy
    /// buckets follow by descending score (stable on index order).
    pub fn resolve_all_key(&self, target: &NameKey, index: &PatientIndex, threshold: f64) -> MatchResult {
        if target.is_empty() || index.is_empty() {
            return MatchResult::no_match();
        }

        let exact_key = target.as_key();
        let exact = index.get(&exact_key);

        let mut qualifying: Vec<(&PatientBucket, f64)> = index
            .buckets()
            .filter(|bucket| bucket.key.as_key() != exact_key)
            .filter_map(|bucket| {
                let result = self.matcher.score(target.tokens(), bucket.key.tokens());
                (result.matched && result.score >= threshold).then_some((bucket, result.score))
            })
            .collect();
        qualifying.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut candidate_records = Vec::new();
        let mut score = 0.0f64;
        if let Some(bucket) = exact {
            candidate_records.extend(bucket.records.iter().cloned());
            score = 1.0;
        }
        for (bucket, bucket_score) in &qualifying {
            candidate_records.extend(bucket.records.iter().cloned());
            score = score.max(*bucket_score);
        }

        if candidate_records.is_empty() {
            return MatchResult::no_match();
        }
        debug!(
            "'{}' resolved to {} bucket(s), {} record(s)",
            target,
            qualifying.len() + usize::from(exact.is_some()),
            candidate_records.len()
        );
        MatchResult {
            matched: true,
            score,
            candidate_records,
        }
    }
}
