//! One import run: catalog + measurement documents -> merged horses + report.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::extract_catalog;
use crate::config::{ImportConfig, MeasureConfig};
use crate::error::{ExtractError, SkippedRecord};
use crate::measure::{extract_measurements, MeasurementEntry};
use crate::merge::{merge, HorseRecord};
use crate::pdf::TextExtractor;

const MAX_PRINTED_SKIPS: usize = 20;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentReport {
    pub source: String,
    pub rows: usize,
    pub absent: usize,
    pub skipped: Vec<SkippedRecord>,
    /// Set when the document was unusable as a whole (e.g. no header line).
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub catalog: DocumentReport,
    pub measurements: Vec<DocumentReport>,
    pub merged: usize,
    pub measured: usize,
    pub absent: usize,
    pub inserted: usize,
}

impl ImportReport {
    pub fn measurement_rows(&self) -> usize {
        self.measurements.iter().map(|d| d.rows).sum()
    }

    pub fn skipped_total(&self) -> usize {
        self.catalog.skipped.len() + self.measurements.iter().map(|d| d.skipped.len()).sum::<usize>()
    }

    pub fn print(&self) {
        println!(
            "Catalog       {}: {} rows ({} skipped)",
            self.catalog.source,
            self.catalog.rows,
            self.catalog.skipped.len()
        );
        for d in &self.measurements {
            match &d.error {
                Some(e) => println!("Measurements  {}: FAILED ({})", d.source, e),
                None => println!(
                    "Measurements  {}: {} rows, {} absent ({} skipped)",
                    d.source,
                    d.rows,
                    d.absent,
                    d.skipped.len()
                ),
            }
        }
        println!(
            "Merged {} horses: {} measured, {} absent, {} without measurements.",
            self.merged,
            self.measured,
            self.absent,
            self.merged - self.measured - self.absent
        );
        if self.inserted > 0 {
            println!("Inserted {} rows.", self.inserted);
        }

        for d in std::iter::once(&self.catalog).chain(&self.measurements) {
            if d.skipped.is_empty() {
                continue;
            }
            println!("\n--- Skipped in {} ---", d.source);
            for s in d.skipped.iter().take(MAX_PRINTED_SKIPS) {
                println!("  {}", s);
            }
            if d.skipped.len() > MAX_PRINTED_SKIPS {
                println!("  ... and {} more", d.skipped.len() - MAX_PRINTED_SKIPS);
            }
        }
    }
}

pub struct ImportOutcome {
    pub horses: Vec<HorseRecord>,
    pub report: ImportReport,
}

/// Extract each `(source, text)` in parallel. Output keeps input order.
pub fn measure_documents(
    texts: &[(String, String)],
    cfg: &MeasureConfig,
) -> Vec<(DocumentReport, Vec<MeasurementEntry>)> {
    texts
        .par_iter()
        .map(|(source, text)| {
            let out = extract_measurements(text, cfg);
            let mut report = DocumentReport {
                source: source.clone(),
                rows: out.entries.len(),
                absent: out.entries.iter().filter(|e| e.is_absent()).count(),
                ..Default::default()
            };
            match out.require_header(cfg) {
                Ok(out) => {
                    report.skipped = out.skipped;
                    (report, out.entries)
                }
                Err(e) => {
                    warn!("{}: {}", source, e);
                    report.error = Some(e.to_string());
                    (report, Vec::new())
                }
            }
        })
        .collect()
}

/// Run the extract and merge steps for one sale.
///
/// A catalog without a table, an unknown encoding, or a failing text
/// extractor aborts the run. A measurement document without a header is
/// reported and contributes nothing.
pub fn run_import(
    catalog_source: &str,
    catalog_html: &[u8],
    pdfs: &[(String, Vec<u8>)],
    extractor: &dyn TextExtractor,
    cfg: &ImportConfig,
) -> Result<ImportOutcome, ExtractError> {
    let catalog = extract_catalog(catalog_html, &cfg.catalog)?;
    info!(
        "Catalog {}: {} entries, {} skipped",
        catalog_source,
        catalog.entries.len(),
        catalog.skipped.len()
    );

    let mode = cfg.measurements.layout;
    let texts = pdfs
        .par_iter()
        .map(|(source, bytes)| Ok((source.clone(), extractor.extract_text(bytes, mode)?)))
        .collect::<Result<Vec<_>, ExtractError>>()?;

    let measured = measure_documents(&texts, &cfg.measurements);
    let (doc_reports, documents): (Vec<_>, Vec<_>) = measured.into_iter().unzip();

    let horses = merge(&catalog.entries, &documents);

    let report = ImportReport {
        catalog: DocumentReport {
            source: catalog_source.to_string(),
            rows: catalog.entries.len(),
            absent: 0,
            skipped: catalog.skipped,
            error: None,
        },
        measurements: doc_reports,
        merged: horses.len(),
        measured: horses.iter().filter(|h| h.is_measured()).count(),
        absent: horses.iter().filter(|h| h.absent).count(),
        inserted: 0,
    };

    Ok(ImportOutcome { horses, report })
}
