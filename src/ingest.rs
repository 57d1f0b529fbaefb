// src/ingest.rs

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::IngestError;
use crate::matching::name::fold_text;
use crate::models::{SourceRecord, SourceTag};

// First amount in a cell; decimal separator may be '.' or ','
static PRICE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:[.,]\d{1,2})?").expect("price regex is valid"));

const UTF8_BOM: char = '\u{feff}';

const PATIENT_KEYWORDS: &[&str] = &["patient", "nom", "ref", "name"];
const ACT_KEYWORDS: &[&str] = &["acte", "soin", "libelle", "description", "act"];
const PRICE_KEYWORDS: &[&str] = &["prix", "hono", "montant", "tarif", "price"];
const TOOTH_KEYWORDS: &[&str] = &["dent", "tooth"];
const CODE_KEYWORDS: &[&str] = &["code"];

/// Counts gathered while loading one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_tag: SourceTag,
    pub rows_read: usize,
    pub records_kept: usize,
    pub blank_patient: usize,
    pub unparseable_price: usize,
    pub blank_act: usize,
    pub duplicates_removed: usize,
}

impl IngestReport {
    fn new(source_tag: SourceTag) -> Self {
        Self {
            source_tag,
            rows_read: 0,
            records_kept: 0,
            blank_patient: 0,
            unparseable_price: 0,
            blank_act: 0,
            duplicates_removed: 0,
        }
    }

    /// Rows read but not kept
    pub fn dropped(&self) -> usize {
        self.rows_read - self.records_kept
    }
}

/// Column positions resolved from a header row
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMap {
    patient: usize,
    act: Option<usize>,
    price: usize,
    tooth: Option<usize>,
    code: Option<usize>,
}

impl ColumnMap {
    fn detect(headers: &StringRecord, source_tag: SourceTag) -> Result<Self, IngestError> {
        let folded: Vec<String> = headers.iter().map(|h| fold_text(h.trim())).collect();
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut pick = |keywords: &[&str]| -> Option<usize> {
            let pos = folded
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed.contains(i))
                .find(|(_, h)| keywords.iter().any(|k| h.contains(k)))
                .map(|(i, _)| i)?;
            claimed.insert(pos);
            Some(pos)
        };

        // Order matters: a "Code acte" header is a code column, not an act one
        let patient = pick(PATIENT_KEYWORDS);
        let price = pick(PRICE_KEYWORDS);
        let (tooth, code) = if source_tag == SourceTag::Primary {
            (pick(TOOTH_KEYWORDS), pick(CODE_KEYWORDS))
        } else {
            (None, None)
        };
        let act = pick(ACT_KEYWORDS);

        let missing = |column: &'static str| IngestError::MissingColumn {
            source_tag,
            column,
            headers: headers.iter().map(str::to_string).collect(),
        };
        let patient = patient.ok_or_else(|| missing("patient"))?;
        let price = price.ok_or_else(|| missing("price"))?;
        if act.is_none() && code.is_none() {
            return Err(missing("act"));
        }

        Ok(Self {
            patient,
            act,
            price,
            tooth,
            code,
        })
    }
}

/// Loads one source CSV from disk
pub fn load_source(path: &Path, source_tag: SourceTag) -> Result<(Vec<SourceRecord>, IngestReport), IngestError> {
    let bytes = fs::read(path).map_err(|cause| IngestError::Io {
        source_tag,
        path: path.to_path_buf(),
        cause,
    })?;
    // Exports from office tools are not always valid UTF-8
    let text = String::from_utf8_lossy(&bytes);
    let (records, report) = parse_source(&text, source_tag)?;
    info!(
        "Loaded {} {} records from {} ({} rows read, {} dropped)",
        report.records_kept,
        source_tag,
        path.display(),
        report.rows_read,
        report.dropped()
    );
    Ok((records, report))
}

/// Parses CSV text for one source.
///
/// The delimiter is sniffed from the header line (`;` or `,`) and a leading
/// byte-order mark is ignored. Rows with a blank patient, a blank act (after
/// the primary export's code fallback) or a price cell holding no amount are
/// dropped; blank and zero prices become absent.
pub fn parse_source(text: &str, source_tag: SourceTag) -> Result<(Vec<SourceRecord>, IngestReport), IngestError> {
    let text = text.trim_start_matches(UTF8_BOM);
    if text.trim().is_empty() {
        return Err(IngestError::Empty { source_tag });
    }

    let delimiter = sniff_delimiter(text);
    debug!("Using delimiter '{}' for {} source", delimiter as char, source_tag);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|cause| IngestError::Csv { source_tag, cause })?
        .clone();
    let columns = ColumnMap::detect(&headers, source_tag)?;
    debug!("{} columns resolved as {:?}", source_tag, columns);

    let mut report = IngestReport::new(source_tag);
    let mut records = Vec::new();
    let mut seen: HashSet<(String, String, Option<Decimal>)> = HashSet::new();

    for result in reader.records() {
        let row = result.map_err(|cause| IngestError::Csv { source_tag, cause })?;
        report.rows_read += 1;

        let patient = collapse_whitespace(cell(&row, Some(columns.patient)));
        if patient.is_empty() {
            report.blank_patient += 1;
            continue;
        }

        let price = match parse_price(cell(&row, Some(columns.price))) {
            Ok(price) => price,
            Err(raw) => {
                debug!("Dropping {} row for '{}': unreadable price '{}'", source_tag, patient, raw);
                report.unparseable_price += 1;
                continue;
            }
        };

        let code = Some(cell(&row, columns.code)).filter(|c| !c.is_empty());
        let mut act = collapse_whitespace(cell(&row, columns.act));
        if act.is_empty() {
            act = code.map(str::to_string).unwrap_or_default();
        }
        if act.is_empty() {
            debug!("Dropping {} row for '{}': no act description", source_tag, patient);
            report.blank_act += 1;
            continue;
        }

        if source_tag == SourceTag::ExternalProvider
            && !seen.insert((patient.clone(), act.clone(), price))
        {
            report.duplicates_removed += 1;
            continue;
        }

        let mut record = SourceRecord::new(patient, act, price, source_tag);
        if let Some(tooth) = Some(cell(&row, columns.tooth)).filter(|t| !t.is_empty()) {
            record = record.with_tooth(tooth);
        }
        if let Some(code) = code {
            record = record.with_code(code);
        }
        records.push(record);
    }

    report.records_kept = records.len();
    if report.duplicates_removed > 0 {
        warn!(
            "Removed {} duplicate {} records",
            report.duplicates_removed, source_tag
        );
    }
    Ok((records, report))
}

/// `;` unless the header line carries more commas than semicolons
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if commas > semicolons { b',' } else { b';' }
}

/// Extracts the amount from a price cell.
///
/// `Ok(None)` for blank or zero amounts; `Err` with the raw text when the
/// cell is not blank but holds no amount.
pub fn parse_price(raw: &str) -> Result<Option<Decimal>, String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.is_empty() {
        return Ok(None);
    }
    let found = PRICE_REGEX.find(&compact).ok_or_else(|| raw.to_string())?;
    let amount: Decimal = found
        .as_str()
        .replace(',', ".")
        .parse()
        .map_err(|_| raw.to_string())?;
    Ok(Some(amount).filter(|a| !a.is_zero()))
}

fn cell(row: &StringRecord, pos: Option<usize>) -> &str {
    pos.and_then(|p| row.get(p)).unwrap_or("").trim()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn prices_accept_both_separators() {
        assert_eq!(parse_price("120,50 €"), Ok(Some(dec("120.50"))));
        assert_eq!(parse_price("EUR 99.9"), Ok(Some(dec("99.9"))));
        assert_eq!(parse_price("1 250,00"), Ok(Some(dec("1250.00"))));
    }

    #[test]
    fn blank_and_zero_prices_are_absent() {
        assert_eq!(parse_price(""), Ok(None));
        assert_eq!(parse_price("   "), Ok(None));
        assert_eq!(parse_price("0,00"), Ok(None));
    }

    #[test]
    fn text_prices_are_rejected() {
        assert_eq!(parse_price("offert"), Err("offert".to_string()));
    }

    #[test]
    fn delimiter_is_sniffed_from_header() {
        assert_eq!(sniff_delimiter("Patient;Acte;Prix\nA;b;1,5"), b';');
        assert_eq!(sniff_delimiter("Patient,Acte,Prix\n"), b',');
        assert_eq!(sniff_delimiter("Patient\n"), b';');
    }

    #[test]
    fn primary_export_with_bom_and_french_headers() {
        let text = "\u{feff}Patient;Dent;Code;Acte;Tarif\n\
                    DUPONT Jean;11;HBLD634;Couronne céramique;120,00\n\
                    ;21;HBLD634;Couronne;80,00\n\
                    Marie Curie;36;HBMD351;;250\n";
        let (records, report) = parse_source(text, SourceTag::Primary).unwrap();

        assert_eq!(report.rows_read, 3);
        assert_eq!(report.blank_patient, 1);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].patient_name, "DUPONT Jean");
        assert_eq!(records[0].act_description, "Couronne céramique");
        assert_eq!(records[0].price, Some(dec("120.00")));
        assert_eq!(records[0].tooth.as_deref(), Some("11"));
        assert_eq!(records[0].code.as_deref(), Some("HBLD634"));

        // Blank act falls back to the procedure code
        assert_eq!(records[1].act_description, "HBMD351");
    }

    #[test]
    fn provider_duplicates_are_removed() {
        let text = "Nom patient,Description,Montant\n\
                    Paul Martin,Onlay 36,200.00\n\
                    Paul  Martin,Onlay 36,200.00\n\
                    Paul Martin,Onlay 36,210.00\n";
        let (records, report) = parse_source(text, SourceTag::ExternalProvider).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.dropped(), 1);
    }

    #[test]
    fn lab_duplicates_are_kept() {
        let text = "Patient;Soin;Prix\nA B;Couronne;10\nA B;Couronne;10\n";
        let (records, _) = parse_source(text, SourceTag::Lab).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unreadable_price_drops_only_that_row() {
        let text = "Patient;Acte;Prix\nA B;Couronne;gratuit\nC D;Onlay;\n";
        let (records, report) = parse_source(text, SourceTag::Lab).unwrap();
        assert_eq!(report.unparseable_price, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, None);
    }

    #[test]
    fn blank_act_without_code_is_dropped() {
        let text = "Patient;Acte;Prix\nA B;;10\nC D;Couronne;20\n";
        let (records, report) = parse_source(text, SourceTag::Lab).unwrap();
        assert_eq!(report.blank_act, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].patient_name, "C D");
    }

    #[test]
    fn missing_price_column_is_an_error() {
        let err = parse_source("Patient;Acte\nA B;Couronne\n", SourceTag::Lab).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn { column: "price", .. }));
    }

    #[test]
    fn empty_text_is_an_error() {
        let err = parse_source("\u{feff}  \n", SourceTag::Lab).unwrap_err();
        assert!(matches!(err, IngestError::Empty { source_tag: SourceTag::Lab }));
    }
}
