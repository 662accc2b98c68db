//! Reading-order text: every value on its own line.
//!
//! ```text
//! 番号
//! 41          <- lot-number run, +1 each line, blanks allowed
//! 42
//! 43
//!
//! 152         <- first line that breaks the run starts the values
//! 171
//! 19.0
//! 欠場        <- absent lot takes one line
//! ...
//! 落札価格    <- terminator; the rest is ignored
//! ```
//!
//! The run/value boundary is only a sequence break. A first height equal to
//! last lot + 1 is swallowed into the run; `MeasureConfig::lot_count` caps
//! the run when the lot count is known.

use tracing::debug;

use super::{is_terminator, MeasurementEntry, MeasurementExtraction, MeasurementLayout};
use crate::config::{LayoutMode, MeasureConfig};
use crate::error::{SkipReason, SkippedRecord};
use crate::text::{parse_decimal, parse_numeric_line};

pub struct StreamLayout;

impl MeasurementLayout for StreamLayout {
    fn mode(&self) -> LayoutMode {
        LayoutMode::Stream
    }

    fn extract(&self, lines: &[&str], cfg: &MeasureConfig) -> MeasurementExtraction {
        let (lots, boundary) = collect_lot_run(lines, cfg.lot_count);
        if lots.is_empty() {
            debug!("No lot-number run after header");
            return MeasurementExtraction::default();
        }
        let values = collect_values(&lines[boundary..], &cfg.terminators);
        debug!(
            "Lots {}..={} ({}), {} value lines",
            lots[0],
            lots[lots.len() - 1],
            lots.len(),
            values.len()
        );
        associate(&lots, &values, &cfg.absent_marker)
    }
}

/// Find the first numeric line, then take lines while each is previous + 1.
/// Returns the run and the index of the first line not consumed.
fn collect_lot_run(lines: &[&str], cap: Option<usize>) -> (Vec<u32>, usize) {
    let Some((start, first)) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| parse_numeric_line(l).filter(|&n| n > 0).map(|n| (i, n)))
    else {
        return (Vec::new(), lines.len());
    };

    let mut lots = vec![first];
    let mut i = start + 1;
    while i < lines.len() {
        if cap.is_some_and(|c| lots.len() >= c) {
            break;
        }
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        match parse_numeric_line(line) {
            Some(n) if lots.last().and_then(|l| l.checked_add(1)) == Some(n) => {
                lots.push(n);
                i += 1;
            }
            _ => break,
        }
    }
    (lots, i)
}

/// Non-blank lines from the boundary up to (not including) a terminator line.
fn collect_values<'a>(lines: &[&'a str], terminators: &[String]) -> Vec<&'a str> {
    lines
        .iter()
        .copied()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take_while(|l| !is_terminator(l, terminators))
        .collect()
}

/// Walk the lots against the value lines.
///
/// An absent marker takes one line; a height/girth/cannon triple takes three.
/// A line that starts neither is dropped and the same lot is retried on the
/// next line. Lots left over when the lines run out get no entry.
fn associate(lots: &[u32], values: &[&str], absent_marker: &str) -> MeasurementExtraction {
    let mut out = MeasurementExtraction::default();
    let mut cursor = 0;

    'lots: for (n, &lot) in lots.iter().enumerate() {
        loop {
            if cursor >= values.len() {
                out.skipped.extend(lots[n..].iter().map(|&l| SkippedRecord {
                    lot: Some(l),
                    reason: SkipReason::NoMeasurement,
                }));
                break 'lots;
            }

            if values[cursor] == absent_marker {
                out.entries.push(MeasurementEntry::Absent { lot });
                cursor += 1;
                continue 'lots;
            }

            if let Some(entry) = parse_triple(lot, &values[cursor..]) {
                out.entries.push(entry);
                cursor += 3;
                continue 'lots;
            }

            debug!("Lot {}: dropping {:?}", lot, values[cursor]);
            out.skipped.push(SkippedRecord {
                lot: None,
                reason: SkipReason::BrokenMeasurement {
                    line: values[cursor].to_string(),
                },
            });
            cursor += 1;
        }
    }

    out
}

fn parse_triple(lot: u32, values: &[&str]) -> Option<MeasurementEntry> {
    let [h, g, c, ..] = values else {
        return None;
    };
    Some(MeasurementEntry::Measured {
        lot,
        height: parse_numeric_line(h)?,
        girth: parse_numeric_line(g)?,
        cannon: parse_decimal(c)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::extract_measurements;

    fn measured(lot: u32, height: u32, girth: u32, cannon: f64) -> MeasurementEntry {
        MeasurementEntry::Measured { lot, height, girth, cannon }
    }

    #[test]
    fn absent_lot_between_measured_lots() {
        let text = "番号\n\n1\n2\n3\n\n156\n157\n151\n157\n欠場\n151\n157\n151";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(
            out.entries,
            vec![
                measured(1, 156, 157, 151.0),
                MeasurementEntry::Absent { lot: 2 },
                measured(3, 151, 157, 151.0),
            ]
        );
        // the stray "157" was dropped to get back in step; no lot was lost
        assert_eq!(
            out.skipped,
            vec![SkippedRecord {
                lot: None,
                reason: SkipReason::BrokenMeasurement { line: "157".into() },
            }]
        );
    }

    #[test]
    fn sequential_lots_starting_anywhere() {
        let mut text = String::from("測尺 上場番号\n");
        for lot in 120..130 {
            text.push_str(&format!("{}\n", lot));
        }
        text.push('\n');
        for lot in 120..130 {
            text.push_str(&format!("{}\n{}\n{}.5\n", 150 + lot % 7, 170 + lot % 5, 18 + lot % 3));
        }
        let out = extract_measurements(&text, &MeasureConfig::default());
        let lots: Vec<u32> = out.entries.iter().map(|e| e.lot()).collect();
        assert_eq!(lots, (120..130).collect::<Vec<_>>());
        assert!(out.entries.iter().all(|e| !e.is_absent()));
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn absent_consumes_one_line() {
        let text = "番号\n5\n6\n欠場\n150\n170\n19.5";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(
            out.entries,
            vec![MeasurementEntry::Absent { lot: 5 }, measured(6, 150, 170, 19.5)]
        );
    }

    #[test]
    fn lines_before_run_are_skipped() {
        let text = "番号 体高 胸囲 管囲\n(cm)\n単位\n1\n2\n160\n180\n20.5\n158\n176\n19.8";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(
            out.entries,
            vec![measured(1, 160, 180, 20.5), measured(2, 158, 176, 19.8)]
        );
    }

    #[test]
    fn terminator_ends_values() {
        let text = "番号\n1\n2\n3\n160\n180\n20.5\n落札価格\n158\n176\n19.8";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(out.entries, vec![measured(1, 160, 180, 20.5)]);
        let missing: Vec<_> = out
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::NoMeasurement)
            .filter_map(|s| s.lot)
            .collect();
        assert_eq!(missing, vec![2, 3]);
    }

    #[test]
    fn running_out_of_values_stops_early() {
        let text = "番号\n1\n2\n3\n160\n180\n20.5\n158\n176";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(out.entries, vec![measured(1, 160, 180, 20.5)]);
        assert!(out.skipped.iter().any(|s| s.lot == Some(3)));
    }

    #[test]
    fn full_width_digits() {
        let text = "番号\n１\n２\n１６０\n１８０\n２０．５\n欠場";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(
            out.entries,
            vec![measured(1, 160, 180, 20.5), MeasurementEntry::Absent { lot: 2 }]
        );
    }

    #[test]
    fn header_without_run_is_empty() {
        let out = extract_measurements("番号\nなし\n", &MeasureConfig::default());
        assert!(out.header_found);
        assert!(out.entries.is_empty());
    }

    // Known weak spot: a first height that continues the lot sequence is read
    // as another lot number. Here lots are 1..=2 and the first height is 3.
    #[test]
    fn run_swallows_value_that_continues_sequence() {
        let text = "番号\n1\n2\n3\n170\n19.5\n4\n171\n19.0";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_ne!(
            out.entries,
            vec![measured(1, 3, 170, 19.5), measured(2, 4, 171, 19.0)]
        );

        let cfg = MeasureConfig {
            lot_count: Some(2),
            ..MeasureConfig::default()
        };
        let out = extract_measurements(text, &cfg);
        assert_eq!(
            out.entries,
            vec![measured(1, 3, 170, 19.5), measured(2, 4, 171, 19.0)]
        );
    }

    #[test]
    fn lot_run_boundary() {
        let lines = ["x", "7", "", "8", "9", "", "150", "170"];
        let (lots, boundary) = collect_lot_run(&lines, None);
        assert_eq!(lots, vec![7, 8, 9]);
        assert_eq!(lines[boundary], "150");
    }

    #[test]
    fn run_at_u32_max_does_not_overflow() {
        let out = extract_measurements("番号\n4294967295\n150\n170\n19.0\n", &MeasureConfig::default());
        assert_eq!(out.entries, vec![measured(u32::MAX, 150, 170, 19.0)]);
    }

    #[test]
    fn one_lot_record_per_missing_lot() {
        let text = "番号\n1\n2\n160\n180\n20.5\nx\ny\nz";
        let out = extract_measurements(text, &MeasureConfig::default());
        assert_eq!(out.entries, vec![measured(1, 160, 180, 20.5)]);
        let per_lot: Vec<_> = out.skipped.iter().filter(|s| s.lot.is_some()).collect();
        assert_eq!(per_lot.len(), 1);
        assert_eq!(per_lot[0].lot, Some(2));
        assert_eq!(per_lot[0].reason, SkipReason::NoMeasurement);
        assert_eq!(out.skipped.len(), 4);
    }
}
