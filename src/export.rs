// src/export.rs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use log::info;

use crate::models::{ComparisonRow, SourceRecord};

/// Column headers of the exported comparison table
pub const HEADERS: [&str; 12] = [
    "status",
    "patient",
    "tooth",
    "code",
    "primary_act",
    "primary_price",
    "lab_act",
    "lab_price",
    "provider_act",
    "provider_price",
    "pair_score",
    "color",
];

/// Writes the comparison table to `path` as `;`-separated UTF-8 with a BOM,
/// the layout spreadsheet tools open without an import dialog.
pub fn write_csv(path: &Path, rows: &[ComparisonRow]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed creating output file {}", path.display()))?;
    write_rows(BufWriter::new(file), rows)
        .with_context(|| format!("Failed writing comparison table to {}", path.display()))?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Writes the BOM, the header line and one line per row to `out`
pub fn write_rows<W: Write>(mut out: W, rows: &[ComparisonRow]) -> Result<()> {
    out.write_all("\u{feff}".as_bytes())?;

    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .quote_style(QuoteStyle::Necessary)
        .from_writer(out);
    writer.write_record(HEADERS)?;
    for row in rows {
        writer.write_record(row_fields(row))?;
    }
    writer.flush()?;
    Ok(())
}

fn row_fields(row: &ComparisonRow) -> [String; 12] {
    let primary = row.primary.as_ref();
    let (primary_act, primary_price) = act_and_price(primary);
    let (lab_act, lab_price) = act_and_price(row.lab.as_ref());
    let (provider_act, provider_price) = act_and_price(row.provider.as_ref());

    [
        row.status.as_str().to_string(),
        row.patient_name.clone(),
        primary.and_then(|r| r.tooth.clone()).unwrap_or_default(),
        primary.and_then(|r| r.code.clone()).unwrap_or_default(),
        primary_act,
        primary_price,
        lab_act,
        lab_price,
        provider_act,
        provider_price,
        row.pair_score.map(|s| format!("{:.3}", s)).unwrap_or_default(),
        row.status.color_hex().to_string(),
    ]
}

fn act_and_price(record: Option<&SourceRecord>) -> (String, String) {
    match record {
        Some(r) => (
            r.act_description.clone(),
            r.price.map(|p| p.to_string()).unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchStatus, SourceTag};
    use rust_decimal::Decimal;

    #[test]
    fn output_starts_with_bom_and_uses_semicolons() {
        let lab = SourceRecord::new("Jean Dupont", "Couronne; zircone", Some(Decimal::new(12050, 2)), SourceTag::Lab);
        let primary = SourceRecord::new("Jean Dupont", "Couronne", Some(Decimal::new(12050, 2)), SourceTag::Primary)
            .with_tooth("11")
            .with_code("HBLD634");
        let row = ComparisonRow {
            patient_name: "Jean Dupont".to_string(),
            patient_key: "dupont jean".to_string(),
            primary: Some(primary),
            lab: Some(lab),
            provider: None,
            pair_score: None,
            status: MatchStatus::SingleSource,
        };

        let mut buf = Vec::new();
        write_rows(&mut buf, &[row]).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with('\u{feff}'));
        let lines: Vec<&str> = text.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(lines[0], HEADERS.join(";"));
        assert_eq!(
            lines[1],
            "single_source;Jean Dupont;11;HBLD634;Couronne;120.50;\"Couronne; zircone\";120.50;;;;#cfe8ff"
        );
    }

    #[test]
    fn empty_table_still_has_headers() {
        let mut buf = Vec::new();
        write_rows(&mut buf, &[]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim_start_matches('\u{feff}').lines().count(), 1);
    }
}
