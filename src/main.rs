// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use dentrecon_lib::{
    assemble, config, export,
    ingest::{self, IngestReport},
    models::{SourceRecord, SourceTag},
    results::{self, ReconcileStats},
    OrphanPolicy, ReconcileOptions, ResolutionMode,
};

/// Reconciles a billing export against lab and provider invoices
#[derive(Debug, Parser)]
#[command(name = "dentrecon", version, about)]
struct Cli {
    /// Billing export (CSV with Patient / Dent / Code / Acte / Tarif columns)
    #[arg(long)]
    primary: PathBuf,

    /// Lab invoice lines (Desmos), as CSV
    #[arg(long)]
    lab: Option<PathBuf>,

    /// Provider invoice lines (Cosmident), as CSV
    #[arg(long)]
    provider: Option<PathBuf>,

    /// Where the comparison table is written
    #[arg(long, default_value = "comparatif_fusion.csv")]
    output: PathBuf,

    /// JSON file with run options; replaces the environment-derived options
    #[arg(long)]
    options: Option<PathBuf>,

    /// Write run statistics as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    #[arg(long, value_enum)]
    orphan_policy: Option<OrphanPolicyArg>,

    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Keep only the N cheapest rows for a patient, as "Name=N"; repeatable
    #[arg(long = "cap", value_name = "NAME=N")]
    caps: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrphanPolicyArg {
    /// Orphan when absent from the billing export
    PrimaryOnly,
    /// Orphan when absent from both the billing export and the lab feed
    Both,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Best,
    All,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment variables from {}", path.display()),
        Err(_) => info!("No .env file found, using environment variables from system"),
    }

    let cli = Cli::parse();
    let start_time = Instant::now();

    let options = build_options(&cli)?;
    info!(
        "Options: patient threshold {:.2}, token tolerance {:.2}, act threshold {:.2}, orphan policy {:?}, mode {:?}",
        options.patient_match_threshold,
        options.fuzzy_token_tolerance,
        options.act_pairing_threshold,
        options.orphan_policy,
        options.resolution_mode
    );

    // The billing export is mandatory; the invoice feeds are best effort
    let (primary, primary_report) = ingest::load_source(&cli.primary, SourceTag::Primary)
        .with_context(|| format!("Failed to load billing export {}", cli.primary.display()))?;
    let mut reports = vec![primary_report];
    let lab = load_optional(cli.lab.as_deref(), SourceTag::Lab, &mut reports);
    let provider = load_optional(cli.provider.as_deref(), SourceTag::ExternalProvider, &mut reports);
    let loading_time = start_time.elapsed();

    let reconcile_start = Instant::now();
    let rows = assemble::reconcile(&primary, &lab, &provider, &options)
        .context("Invalid reconciliation options")?;
    let reconcile_time = reconcile_start.elapsed();

    export::write_csv(&cli.output, &rows)?;

    let stats = ReconcileStats::new(
        &rows,
        reports,
        loading_time,
        reconcile_time,
        Some(format!("Comparison written to {}", cli.output.display())),
    );
    if let Some(path) = &cli.summary {
        stats.write_json(path)?;
    }
    results::print_report(&stats);

    info!(
        "Reconciliation completed in {:.2?}. {} rows ({} both, {} single source, {} no match, {} orphan)",
        start_time.elapsed(),
        stats.rows.total(),
        stats.rows.both,
        stats.rows.single_source,
        stats.rows.no_match,
        stats.rows.orphan
    );

    Ok(())
}

/// Options file (or environment), then command-line overrides
fn build_options(cli: &Cli) -> Result<ReconcileOptions> {
    let mut options = match &cli.options {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read options file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse options file {}", path.display()))?
        }
        None => ReconcileOptions::from_env(),
    };

    if let Some(policy) = cli.orphan_policy {
        options.orphan_policy = match policy {
            OrphanPolicyArg::PrimaryOnly => OrphanPolicy::AbsentFromPrimaryOnly,
            OrphanPolicyArg::Both => OrphanPolicy::AbsentFromBoth,
        };
    }
    if let Some(mode) = cli.mode {
        options.resolution_mode = match mode {
            ModeArg::Best => ResolutionMode::Best,
            ModeArg::All => ResolutionMode::AllQualifying,
        };
    }
    for entry in &cli.caps {
        let (name, cap) = config::parse_row_cap(entry)?;
        options.per_patient_row_cap.insert(name, cap);
    }

    options.validate().context("Invalid reconciliation options")?;
    Ok(options)
}

/// Loads an optional source; any failure leaves that source empty
fn load_optional(path: Option<&Path>, source_tag: SourceTag, reports: &mut Vec<IngestReport>) -> Vec<SourceRecord> {
    let Some(path) = path else {
        info!("No {} source given", source_tag);
        return Vec::new();
    };
    match ingest::load_source(path, source_tag) {
        Ok((records, report)) => {
            reports.push(report);
            records
        }
        Err(e) => {
            warn!("Continuing without {} records: {}", source_tag, e);
            Vec::new()
        }
    }
}
