// src/results.rs

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::ingest::IngestReport;
use crate::models::{ComparisonRow, MatchStatus};

/// Row counts per classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub both: usize,
    pub single_source: usize,
    pub no_match: usize,
    pub orphan: usize,
}

impl StatusCounts {
    pub fn from_rows(rows: &[ComparisonRow]) -> Self {
        let mut counts = Self::default();
        for row in rows {
            match row.status {
                MatchStatus::Both => counts.both += 1,
                MatchStatus::SingleSource => counts.single_source += 1,
                MatchStatus::NoMatch => counts.no_match += 1,
                MatchStatus::Orphan => counts.orphan += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.both + self.single_source + self.no_match + self.orphan
    }
}

/// Statistics of one reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileStats {
    pub run_id: String,
    pub run_timestamp: NaiveDateTime,
    pub description: Option<String>,

    /// One report per source that was loaded
    pub sources: Vec<IngestReport>,

    /// Rows in the exported table, by status
    pub rows: StatusCounts,

    /// Distinct patient keys among non-orphan rows
    pub patients: usize,

    pub loading_time: f64,
    pub reconcile_time: f64,
    pub total_processing_time: f64,
}

impl ReconcileStats {
    pub fn new(
        rows: &[ComparisonRow],
        sources: Vec<IngestReport>,
        loading_time: Duration,
        reconcile_time: Duration,
        description: Option<String>,
    ) -> Self {
        let mut patient_keys: Vec<&str> = rows
            .iter()
            .filter(|r| r.status != MatchStatus::Orphan)
            .map(|r| r.patient_key.as_str())
            .collect();
        patient_keys.sort_unstable();
        patient_keys.dedup();

        Self {
            run_id: Uuid::new_v4().to_string(),
            run_timestamp: Utc::now().naive_utc(),
            description,
            sources,
            rows: StatusCounts::from_rows(rows),
            patients: patient_keys.len(),
            loading_time: loading_time.as_secs_f64(),
            reconcile_time: reconcile_time.as_secs_f64(),
            total_processing_time: (loading_time + reconcile_time).as_secs_f64(),
        }
    }

    /// Writes the statistics as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run statistics")?;
        fs::write(path, json)
            .with_context(|| format!("Failed writing run statistics to {}", path.display()))?;
        info!("Run statistics for {} written to {}", self.run_id, path.display());
        Ok(())
    }
}

/// Prints a human-readable report of the run to stdout
pub fn print_report(stats: &ReconcileStats) {
    println!("\n========== DENTAL INVOICE RECONCILIATION REPORT ==========");
    println!("Run ID: {}", stats.run_id);
    println!("Timestamp: {}", stats.run_timestamp);
    if let Some(desc) = &stats.description {
        println!("Description: {}", desc);
    }

    println!("\n--- SOURCES ---");
    for source in &stats.sources {
        println!(
            "{}: {} records kept of {} rows ({} blank patient, {} blank act, {} unreadable price, {} duplicates)",
            source.source_tag,
            source.records_kept,
            source.rows_read,
            source.blank_patient,
            source.blank_act,
            source.unparseable_price,
            source.duplicates_removed
        );
    }

    println!("\n--- COMPARISON TABLE ---");
    println!("Patients: {}", stats.patients);
    println!("Rows: {}", stats.rows.total());
    println!("  {}: {}", MatchStatus::Both, stats.rows.both);
    println!("  {}: {}", MatchStatus::SingleSource, stats.rows.single_source);
    println!("  {}: {}", MatchStatus::NoMatch, stats.rows.no_match);
    println!("  {}: {}", MatchStatus::Orphan, stats.rows.orphan);

    println!("\n--- TIMING INFORMATION ---");
    println!("Loading time: {:.2} seconds", stats.loading_time);
    println!("Reconciliation time: {:.2} seconds", stats.reconcile_time);
    println!("Total processing time: {:.2} seconds", stats.total_processing_time);
    println!("\n==========================================================\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, status: MatchStatus) -> ComparisonRow {
        ComparisonRow {
            patient_name: key.to_string(),
            patient_key: key.to_string(),
            primary: None,
            lab: None,
            provider: None,
            pair_score: None,
            status,
        }
    }

    #[test]
    fn counts_rows_and_patients() {
        let rows = vec![
            row("martin paul", MatchStatus::Orphan),
            row("curie marie", MatchStatus::Both),
            row("curie marie", MatchStatus::Both),
            row("dupont jean", MatchStatus::NoMatch),
        ];
        let stats = ReconcileStats::new(&rows, Vec::new(), Duration::from_millis(5), Duration::from_millis(10), None);
        assert_eq!(
            stats.rows,
            StatusCounts {
                both: 2,
                single_source: 0,
                no_match: 1,
                orphan: 1
            }
        );
        assert_eq!(stats.rows.total(), 4);
        assert_eq!(stats.patients, 2);
        assert!((stats.total_processing_time - 0.015).abs() < 1e-9);
        assert!(Uuid::parse_str(&stats.run_id).is_ok());
    }

    #[test]
    fn serializes_to_json() {
        let stats = ReconcileStats::new(&[], Vec::new(), Duration::ZERO, Duration::ZERO, Some("test".into()));
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["rows"]["orphan"], 0);
        assert_eq!(value["description"], "test");
    }
}
