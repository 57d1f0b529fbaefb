// src/matching/index.rs

use std::collections::HashMap;

use log::debug;

use crate::matching::name::NameNormalizer;
use crate::models::{NameKey, SourceRecord};

/// All records of one source sharing one exact name key
#[derive(Debug, Clone)]
pub struct PatientBucket {
    pub key: NameKey,
    pub records: Vec<SourceRecord>,
}

/// Records of one source grouped by normalized patient name
///
/// Buckets keep first-insertion order, so "first bucket" and "first record"
/// are deterministic for a given input.
#[derive(Debug, Clone, Default)]
pub struct PatientIndex {
    buckets: Vec<PatientBucket>,
    positions: HashMap<String, usize>,
    skipped: usize,
}

impl PatientIndex {
    /// Builds the index; records whose name normalizes to an empty key are
    /// skipped and never become matchable.
    pub fn build(records: &[SourceRecord], normalizer: &NameNormalizer) -> Self {
        let mut index = Self::default();
        for record in records {
            let key = normalizer.normalize(&record.patient_name);
            if key.is_empty() {
                debug!(
                    "Skipping {} record with unusable patient name '{}'",
                    record.source_tag, record.patient_name
                );
                index.skipped += 1;
                continue;
            }
            index.insert(key, record.clone());
        }
        debug!(
            "Indexed {} records into {} patient buckets ({} skipped)",
            records.len() - index.skipped,
            index.buckets.len(),
            index.skipped
        );
        index
    }

    fn insert(&mut self, key: NameKey, record: SourceRecord) {
        let key_string = key.as_key();
        match self.positions.get(&key_string) {
            Some(&pos) => self.buckets[pos].records.push(record),
            None => {
                self.positions.insert(key_string, self.buckets.len());
                self.buckets.push(PatientBucket {
                    key,
                    records: vec![record],
                });
            }
        }
    }

    /// Exact lookup by key string
    pub fn get(&self, key: &str) -> Option<&PatientBucket> {
        self.positions.get(key).map(|&pos| &self.buckets[pos])
    }

    /// Buckets in first-insertion order
    pub fn buckets(&self) -> impl Iterator<Item = &PatientBucket> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Records dropped because their name normalized to nothing
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceTag;

    fn rec(name: &str, act: &str) -> SourceRecord {
        SourceRecord::new(name, act, None, SourceTag::Lab)
    }

    #[test]
    fn empty_input_builds_empty_index() {
        let index = PatientIndex::build(&[], &NameNormalizer::default());
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn reordered_names_share_a_bucket_in_insertion_order() {
        let records = vec![
            rec("DUPONT Jean", "Couronne 11"),
            rec("Marie Curie", "Onlay"),
            rec("jean dupont", "Couronne 21"),
        ];
        let index = PatientIndex::build(&records, &NameNormalizer::default());
        assert_eq!(index.len(), 2);

        let bucket = index.get("dupont jean").unwrap();
        let acts: Vec<&str> = bucket.records.iter().map(|r| r.act_description.as_str()).collect();
        assert_eq!(acts, vec!["Couronne 11", "Couronne 21"]);

        let keys: Vec<String> = index.buckets().map(|b| b.key.as_key()).collect();
        assert_eq!(keys, vec!["dupont jean", "curie marie"]);
    }

    #[test]
    fn empty_keys_are_never_indexed() {
        let records = vec![rec("Mme", "x"), rec("", "y"), rec("Paul Martin", "z")];
        let index = PatientIndex::build(&records, &NameNormalizer::default());
        assert_eq!(index.len(), 1);
        assert_eq!(index.skipped(), 2);
        assert!(index.get("").is_none());
    }
}
