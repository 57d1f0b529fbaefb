// src/assemble.rs

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::{OrphanPolicy, ReconcileOptions, ResolutionMode};
use crate::error::OptionsError;
use crate::matching::{
    ActPairingEngine, FuzzyTokenMatcher, NameNormalizer, PatientIndex, PatientResolver,
};
use crate::models::{ComparisonRow, MatchResult, MatchStatus, NameKey, SourceRecord};

/// Builds the unified comparison table from the three record sets.
///
/// Options are validated before any work; once they pass, the run cannot
/// fail. A missing source is passed as an empty slice.
pub fn reconcile(
    primary: &[SourceRecord],
    lab: &[SourceRecord],
    provider: &[SourceRecord],
    options: &ReconcileOptions,
) -> Result<Vec<ComparisonRow>, OptionsError> {
    options.validate()?;
    let start_time = Instant::now();

    let assembler = ComparisonAssembler::new(options.clone());
    let lab_index = PatientIndex::build(lab, assembler.resolver.normalizer());
    let provider_index = PatientIndex::build(provider, assembler.resolver.normalizer());
    info!(
        "Indexed {} lab patients and {} provider patients",
        lab_index.len(),
        provider_index.len()
    );

    let rows = assembler.assemble(primary, &lab_index, &provider_index);
    info!(
        "Reconciled {} primary records into {} rows in {:.2?}",
        primary.len(),
        rows.len(),
        start_time.elapsed()
    );
    Ok(rows)
}

/// Resolves primary patients across the other sources and emits classified
/// rows
#[derive(Debug, Clone)]
pub struct ComparisonAssembler {
    options: ReconcileOptions,
    resolver: PatientResolver,
    engine: ActPairingEngine,
}

impl ComparisonAssembler {
    pub fn new(options: ReconcileOptions) -> Self {
        let normalizer = NameNormalizer::new(&options.stop_words);
        let matcher = FuzzyTokenMatcher::new(options.fuzzy_token_tolerance, options.matcher.clone());
        let engine = ActPairingEngine::new(options.act_weights.clone());
        Self {
            resolver: PatientResolver::new(normalizer, matcher),
            engine,
            options,
        }
    }

    pub fn resolver(&self) -> &PatientResolver {
        &self.resolver
    }

    /// Orphan rows first, then one block of rows per primary patient; both
    /// sections sorted and capped independently.
    pub fn assemble(
        &self,
        primary: &[SourceRecord],
        lab_index: &PatientIndex,
        provider_index: &PatientIndex,
    ) -> Vec<ComparisonRow> {
        let primary_index = PatientIndex::build(primary, self.resolver.normalizer());
        if primary_index.skipped() > 0 {
            warn!(
                "Dropped {} primary records whose patient name is unusable",
                primary_index.skipped()
            );
        }

        let mut rows = Vec::new();
        for bucket in primary_index.buckets() {
            rows.extend(self.patient_rows(&bucket.key, &bucket.records, lab_index, provider_index));
        }

        let mut orphans = self.orphan_rows(&primary_index, lab_index, provider_index);

        sort_rows(&mut orphans);
        sort_rows(&mut rows);

        let caps = self.normalized_caps();
        let mut out = apply_row_caps(orphans, &caps);
        out.extend(apply_row_caps(rows, &caps));
        out
    }

    fn resolve(&self, key: &NameKey, index: &PatientIndex) -> MatchResult {
        let threshold = self.options.patient_match_threshold;
        match self.options.resolution_mode {
            ResolutionMode::Best => self.resolver.resolve_key(key, index, threshold),
            ResolutionMode::AllQualifying => self.resolver.resolve_all_key(key, index, threshold),
        }
    }

    /// Rows for one primary patient (all primary records sharing `key`)
    fn patient_rows(
        &self,
        key: &NameKey,
        primary_records: &[SourceRecord],
        lab_index: &PatientIndex,
        provider_index: &PatientIndex,
    ) -> Vec<ComparisonRow> {
        let display_name = primary_records
            .first()
            .map(|r| r.patient_name.clone())
            .unwrap_or_else(|| key.as_key());
        let blank_row = |status: MatchStatus| ComparisonRow {
            patient_name: display_name.clone(),
            patient_key: key.as_key(),
            primary: None,
            lab: None,
            provider: None,
            pair_score: None,
            status,
        };

        let lab_match = self.resolve(key, lab_index);
        let provider_match = self.resolve(key, provider_index);

        let mut rows = match (lab_match.matched, provider_match.matched) {
            (true, true) => {
                let lab_acts = &lab_match.candidate_records;
                let provider_acts = &provider_match.candidate_records;
                let pairing = self
                    .engine
                    .pair(lab_acts, provider_acts, self.options.act_pairing_threshold);

                let mut rows: Vec<ComparisonRow> = pairing
                    .pairs
                    .into_iter()
                    .map(|pair| ComparisonRow {
                        lab: pair.left,
                        provider: pair.right,
                        pair_score: pair.score,
                        ..blank_row(MatchStatus::Both)
                    })
                    .collect();
                rows.extend(pairing.unmatched_right.iter().map(|&j| ComparisonRow {
                    provider: Some(provider_acts[j].clone()),
                    ..blank_row(MatchStatus::Both)
                }));
                rows
            }
            (true, false) => lab_match
                .candidate_records
                .into_iter()
                .map(|act| ComparisonRow {
                    lab: Some(act),
                    ..blank_row(MatchStatus::SingleSource)
                })
                .collect(),
            (false, true) => provider_match
                .candidate_records
                .into_iter()
                .map(|act| ComparisonRow {
                    provider: Some(act),
                    ..blank_row(MatchStatus::SingleSource)
                })
                .collect(),
            (false, false) => {
                debug!("No lab or provider match for '{}'", display_name);
                return primary_records
                    .iter()
                    .map(|record| ComparisonRow {
                        primary: Some(record.clone()),
                        ..blank_row(MatchStatus::NoMatch)
                    })
                    .collect();
            }
        };

        let status = rows.first().map(|r| r.status).unwrap_or(MatchStatus::NoMatch);
        let leftovers = self.align_primary(primary_records, &mut rows);
        rows.extend(leftovers.into_iter().map(|record| ComparisonRow {
            primary: Some(record),
            ..blank_row(status)
        }));
        rows
    }

    /// Attaches primary records to the rows whose reference act they pair
    /// with; returns the primary records left over.
    ///
    /// A first pass pairs at `primary_pairing_threshold`. Records it leaves
    /// out are then given, best score first and with no threshold, to rows
    /// still lacking a primary record, so a price or label conflict stays on
    /// one row. Only records beyond the row count are returned.
    fn align_primary(
        &self,
        primary_records: &[SourceRecord],
        rows: &mut [ComparisonRow],
    ) -> Vec<SourceRecord> {
        let references: Vec<SourceRecord> = rows
            .iter()
            .filter_map(|row| row.reference_record().cloned())
            .collect();
        // Every row built so far carries a lab or provider record
        debug_assert_eq!(references.len(), rows.len());

        let pairing = self.engine.pair(
            primary_records,
            &references,
            self.options.primary_pairing_threshold,
        );

        let mut unaligned = Vec::new();
        for (record, partner) in primary_records.iter().zip(&pairing.partners) {
            match partner {
                Some(j) => rows[*j].primary = Some(record.clone()),
                None => unaligned.push(record.clone()),
            }
        }
        if unaligned.is_empty() || pairing.unmatched_right.is_empty() {
            return unaligned;
        }

        let open_rows: Vec<usize> = pairing.unmatched_right.iter().copied().collect();
        let open_references: Vec<SourceRecord> =
            open_rows.iter().map(|&j| references[j].clone()).collect();
        let fallback = self.engine.pair(&unaligned, &open_references, 0.0);

        let mut leftovers = Vec::new();
        for (record, partner) in unaligned.into_iter().zip(&fallback.partners) {
            match partner {
                Some(k) => {
                    debug!(
                        "Primary act '{}' attached below threshold to '{}'",
                        record.act_description, open_references[*k].act_description
                    );
                    rows[open_rows[*k]].primary = Some(record);
                }
                None => leftovers.push(record),
            }
        }
        leftovers
    }

    /// Provider records with no counterpart in the sources the orphan policy
    /// names
    fn orphan_rows(
        &self,
        primary_index: &PatientIndex,
        lab_index: &PatientIndex,
        provider_index: &PatientIndex,
    ) -> Vec<ComparisonRow> {
        let threshold = self.options.patient_match_threshold;
        let mut orphans = Vec::new();

        for bucket in provider_index.buckets() {
            let in_primary = self
                .resolver
                .resolve_key(&bucket.key, primary_index, threshold)
                .matched;
            let orphaned = match self.options.orphan_policy {
                OrphanPolicy::AbsentFromPrimaryOnly => !in_primary,
                OrphanPolicy::AbsentFromBoth => {
                    !in_primary
                        && !self
                            .resolver
                            .resolve_key(&bucket.key, lab_index, threshold)
                            .matched
                }
            };
            if !orphaned {
                if !in_primary {
                    debug!(
                        "Provider patient '{}' found in lab feed only; not listed",
                        bucket.key
                    );
                }
                continue;
            }

            debug!(
                "Provider patient '{}' is orphaned ({} records)",
                bucket.key,
                bucket.records.len()
            );
            orphans.extend(bucket.records.iter().map(|record| ComparisonRow {
                patient_name: record.patient_name.clone(),
                patient_key: bucket.key.as_key(),
                primary: None,
                lab: None,
                provider: Some(record.clone()),
                pair_score: None,
                status: MatchStatus::Orphan,
            }));
        }

        if !orphans.is_empty() {
            info!("Found {} orphaned provider records", orphans.len());
        }
        orphans
    }

    /// Row caps keyed by normalized patient key
    fn normalized_caps(&self) -> HashMap<String, usize> {
        self.options
            .per_patient_row_cap
            .iter()
            .filter_map(|(name, cap)| {
                let key = self.resolver.normalizer().normalize(name);
                if key.is_empty() {
                    warn!("Row cap for '{}' ignored: name normalizes to nothing", name);
                    return None;
                }
                Some((key.as_key(), *cap))
            })
            .collect()
    }
}

/// Orders rows by (patient key, reference price ascending with absent
/// prices last, reference source). The sort is stable, so ties keep input
/// order.
pub fn sort_rows(rows: &mut [ComparisonRow]) {
    rows.sort_by(|a, b| {
        a.patient_key
            .cmp(&b.patient_key)
            .then_with(|| compare_prices(a, b))
            .then_with(|| {
                let tag_a = a.reference_record().map(|r| r.source_tag);
                let tag_b = b.reference_record().map(|r| r.source_tag);
                tag_a.cmp(&tag_b)
            })
    });
}

fn compare_prices(a: &ComparisonRow, b: &ComparisonRow) -> Ordering {
    match (a.reference_price(), b.reference_price()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Keeps at most `caps[key]` rows per capped patient.
///
/// Must run on rows already sorted by `sort_rows`, so the rows kept are the
/// cheapest ones.
pub fn apply_row_caps(rows: Vec<ComparisonRow>, caps: &HashMap<String, usize>) -> Vec<ComparisonRow> {
    if caps.is_empty() {
        return rows;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    rows.into_iter()
        .filter(|row| match caps.get(&row.patient_key) {
            Some(&cap) => {
                let count = seen.entry(row.patient_key.clone()).or_insert(0);
                *count += 1;
                if *count > cap {
                    debug!("Row cap {} reached for '{}', dropping row", cap, row.patient_key);
                }
                *count <= cap
            }
            None => true,
        })
        .collect()
}
