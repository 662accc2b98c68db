//! Column-preserving text (`pdftotext -layout`): each lot is one row.
//!
//! ```text
//!   41   152  171  19.0        44   149  168  18.5
//!   43   欠場                  46   151  170  19.2
//! ```
//!
//! A line may hold several rows when the sheet is printed in columns.

use regex::{Captures, Regex};
use tracing::debug;

use super::{is_terminator, MeasurementEntry, MeasurementExtraction, MeasurementLayout};
use crate::config::{LayoutMode, MeasureConfig};
use crate::error::{SkipReason, SkippedRecord};
use crate::text::{ascii_digits, parse_decimal, parse_numeric_line};

pub struct RowLayout;

impl MeasurementLayout for RowLayout {
    fn mode(&self) -> LayoutMode {
        LayoutMode::Layout
    }

    fn extract(&self, lines: &[&str], cfg: &MeasureConfig) -> MeasurementExtraction {
        let re = row_pattern(&cfg.absent_marker);
        let mut out = MeasurementExtraction::default();

        for line in lines.iter().take_while(|l| !is_terminator(l, &cfg.terminators)) {
            let line = ascii_digits(line);
            let mut last_end = 0;

            for caps in re.captures_iter(&line) {
                let whole = caps.get(0).map_or(last_end..last_end, |m| m.range());
                report_gap(&line[last_end..whole.start], &mut out);
                last_end = whole.end;

                let Some(lot) = caps
                    .get(1)
                    .and_then(|m| parse_numeric_line(m.as_str()))
                    .filter(|&n| n > 0)
                else {
                    continue;
                };
                if caps.get(2).is_some() {
                    out.entries.push(MeasurementEntry::Absent { lot });
                    continue;
                }
                match measured(lot, &caps) {
                    Some(e) => out.entries.push(e),
                    None => out.skipped.push(SkippedRecord {
                        lot: Some(lot),
                        reason: SkipReason::BrokenMeasurement { line: line.trim().to_string() },
                    }),
                }
            }
            report_gap(&line[last_end..], &mut out);

            if let Some(cap) = cfg.lot_count {
                if out.entries.len() >= cap {
                    out.entries.truncate(cap);
                    break;
                }
            }
        }

        out
    }
}

/// Text between matched rows that opens with a lot number is a broken row.
fn report_gap(gap: &str, out: &mut MeasurementExtraction) {
    let gap = gap.trim();
    let Some(lot) = gap
        .split_whitespace()
        .next()
        .and_then(parse_numeric_line)
        .filter(|&n| n > 0)
    else {
        return;
    };
    debug!("Unmatched row for lot {}: {:?}", lot, gap);
    out.skipped.push(SkippedRecord {
        lot: Some(lot),
        reason: SkipReason::BrokenMeasurement { line: gap.to_string() },
    });
}

fn measured(lot: u32, caps: &Captures<'_>) -> Option<MeasurementEntry> {
    Some(MeasurementEntry::Measured {
        lot,
        height: parse_numeric_line(caps.get(3)?.as_str())?,
        girth: parse_numeric_line(caps.get(4)?.as_str())?,
        cannon: parse_decimal(caps.get(5)?.as_str())?,
    })
}

/// `<lot> <absent>` or `<lot> <height> <girth> <cannon>`, cannon with a decimal point.
fn row_pattern(absent_marker: &str) -> Regex {
    Regex::new(&format!(
        r"\b(\d+)[ \t]+(?:({})|(\d+)[ \t]+(\d+)[ \t]+(\d+\.\d+))(?:[ \t]|$)",
        regex::escape(absent_marker)
    ))
    .unwrap()
}
