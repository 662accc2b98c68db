//! Catalog extractor: sale catalog HTML table -> one `CatalogEntry` per lot.

use std::sync::LazyLock;

use encoding_rs::Encoding;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CatalogConfig, ColumnMap};
use crate::error::{ExtractError, SkipReason, SkippedRecord};
use crate::text::{clean_cell, dedup_leading_token, parse_numeric_line};

static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Gelding,
}

impl Sex {
    pub fn parse(s: &str) -> Option<Sex> {
        let s = s.trim();
        match s {
            "牡" | "male" | "Male" | "colt" | "Colt" | "C" => Some(Sex::Male),
            "牝" | "female" | "Female" | "filly" | "Filly" | "F" => Some(Sex::Female),
            "セ" | "せん" | "騸" | "gelding" | "Gelding" | "G" => Some(Sex::Gelding),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Gelding => "gelding",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub lot: u32,
    pub sex: Option<Sex>,
    pub color: Option<String>,
    /// Verbatim cell text.
    pub birth_date: Option<String>,
    pub sire: Option<String>,
    pub dam: Option<String>,
    pub consignor: Option<String>,
    pub breeder: Option<String>,
}

#[derive(Debug, Default)]
pub struct CatalogExtraction {
    pub entries: Vec<CatalogEntry>,
    pub skipped: Vec<SkippedRecord>,
    /// The decoder hit malformed byte sequences and substituted U+FFFD.
    pub had_decode_errors: bool,
}

/// Decode `html` with the configured encoding and read the first table.
pub fn extract_catalog(html: &[u8], cfg: &CatalogConfig) -> Result<CatalogExtraction, ExtractError> {
    let encoding = Encoding::for_label(cfg.encoding.trim().as_bytes())
        .ok_or_else(|| ExtractError::UnknownEncoding(cfg.encoding.clone()))?;
    let (text, used, had_errors) = encoding.decode(html);
    if had_errors {
        warn!("Catalog is not clean {}; replaced undecodable bytes", used.name());
    }

    let mut out = extract_catalog_str(&text, cfg)?;
    out.had_decode_errors = had_errors;
    Ok(out)
}

/// Same as [`extract_catalog`] for already-decoded markup.
pub fn extract_catalog_str(html: &str, cfg: &CatalogConfig) -> Result<CatalogExtraction, ExtractError> {
    let doc = Html::parse_document(html);
    let table = doc.select(&TABLE_SEL).next().ok_or(ExtractError::NoTable)?;

    let mut out = CatalogExtraction::default();
    for (idx, row) in table.select(&ROW_SEL).enumerate().skip(cfg.header_rows) {
        let cells: Vec<String> = row.select(&CELL_SEL).map(cell_text).collect();
        if cells.len() < cfg.min_columns {
            debug!("Skipping row {}: {} cells", idx, cells.len());
            out.skipped.push(SkippedRecord {
                lot: None,
                reason: SkipReason::ShortRow { row: idx, cells: cells.len() },
            });
            continue;
        }
        match row_to_entry(&cells, &cfg.columns) {
            Some(entry) => out.entries.push(entry),
            None => {
                let text = cells.get(cfg.columns.lot).cloned().unwrap_or_default();
                debug!("Skipping row {}: lot cell {:?}", idx, text);
                out.skipped.push(SkippedRecord {
                    lot: None,
                    reason: SkipReason::BadLotNumber { row: idx, text },
                });
            }
        }
    }

    Ok(out)
}

/// Text nodes are concatenated as-is. `<br>` and hidden elements (the
/// duplicated-label artifact) start a new token.
fn cell_text(cell: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in cell.descendants() {
        match node.value() {
            Node::Text(t) => raw.push_str(t),
            Node::Element(e) if e.name() == "br" || is_hidden(e) => raw.push(' '),
            _ => {}
        }
    }
    clean_cell(&raw)
}

fn is_hidden(e: &Element) -> bool {
    e.attr("hidden").is_some()
        || e.attr("style")
            .is_some_and(|s| s.replace(' ', "").to_ascii_lowercase().contains("display:none"))
}

fn row_to_entry(cells: &[String], cols: &ColumnMap) -> Option<CatalogEntry> {
    let lot = cells.get(cols.lot).and_then(|c| parse_numeric_line(c)).filter(|&n| n > 0)?;

    let field = |idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| cells.get(i))
            .map(|c| dedup_leading_token(c))
            .filter(|c| !c.is_empty())
    };

    Some(CatalogEntry {
        lot,
        sex: field(cols.sex).as_deref().and_then(Sex::parse),
        color: field(cols.color),
        birth_date: field(cols.birth_date),
        sire: field(cols.sire),
        dam: field(cols.dam),
        consignor: field(cols.consignor),
        breeder: field(cols.breeder),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
        format!("<tr>{}</tr>", tds)
    }

    fn data_row(lot: &str, sire: &str) -> Vec<String> {
        let mut cells: Vec<String> = (0..15).map(|i| format!("c{}", i)).collect();
        cells[0] = lot.to_string();
        cells[4] = "牡".to_string();
        cells[5] = "鹿毛".to_string();
        cells[6] = "2023/04/01".to_string();
        cells[7] = sire.to_string();
        cells[8] = "テストメア".to_string();
        cells[10] = "山田牧場".to_string();
        cells[11] = "佐藤 太郎".to_string();
        cells
    }

    fn page(rows: &[String]) -> String {
        let header = row(&["番号"; 15]);
        format!(
            "<html><body><p>catalog</p><table>{}{}</table></body></html>",
            header,
            rows.concat()
        )
    }

    fn as_row(cells: &[String]) -> String {
        let refs: Vec<&str> = cells.iter().map(String::as_str).collect();
        row(&refs)
    }

    #[test]
    fn reads_mapped_columns() {
        let html = page(&[as_row(&data_row("1", "コパノリッキー"))]);
        let out = extract_catalog_str(&html, &CatalogConfig::default()).unwrap();
        assert_eq!(out.entries.len(), 1);
        let e = &out.entries[0];
        assert_eq!(e.lot, 1);
        assert_eq!(e.sex, Some(Sex::Male));
        assert_eq!(e.color.as_deref(), Some("鹿毛"));
        assert_eq!(e.birth_date.as_deref(), Some("2023/04/01"));
        assert_eq!(e.sire.as_deref(), Some("コパノリッキー"));
        assert_eq!(e.dam.as_deref(), Some("テストメア"));
        assert_eq!(e.consignor.as_deref(), Some("山田牧場"));
        // two different tokens are a real name, not a duplicate
        assert_eq!(e.breeder.as_deref(), Some("佐藤 太郎"));
    }

    #[test]
    fn collapses_duplicated_sire_name() {
        let cells = data_row("7", "<span>コパノリッキー</span>\n <span style=\"display:none\">コパノリッキー</span>");
        let html = page(&[as_row(&cells)]);
        let out = extract_catalog_str(&html, &CatalogConfig::default()).unwrap();
        assert_eq!(out.entries[0].sire.as_deref(), Some("コパノリッキー"));
    }

    #[test]
    fn inline_markup_does_not_split_names() {
        let mut cells = data_row("8", "<a href=\"/h/1\">ロード</a>カナロア");
        cells[8] = "<span>ディア</span><span hidden>ディア</span>".to_string();
        cells[5] = "鹿毛<br>(Bay)".to_string();
        let out = extract_catalog_str(&page(&[as_row(&cells)]), &CatalogConfig::default()).unwrap();
        let e = &out.entries[0];
        assert_eq!(e.sire.as_deref(), Some("ロードカナロア"));
        assert_eq!(e.dam.as_deref(), Some("ディア"));
        assert_eq!(e.color.as_deref(), Some("鹿毛 (Bay)"));
    }

    #[test]
    fn short_row_is_skipped_without_error() {
        let short = row(&["2", "a", "b"]);
        let html = page(&[as_row(&data_row("1", "X")), short, as_row(&data_row("3", "Y"))]);
        let out = extract_catalog_str(&html, &CatalogConfig::default()).unwrap();
        let lots: Vec<u32> = out.entries.iter().map(|e| e.lot).collect();
        assert_eq!(lots, vec![1, 3]);
        assert!(matches!(
            out.skipped[0].reason,
            SkipReason::ShortRow { row: 2, cells: 3 }
        ));
    }

    #[test]
    fn non_numeric_lot_is_dropped() {
        let html = page(&[
            as_row(&data_row("小計", "X")),
            as_row(&data_row("0", "X")),
            as_row(&data_row("１２", "Y")),
        ]);
        let out = extract_catalog_str(&html, &CatalogConfig::default()).unwrap();
        assert_eq!(out.entries.len(), 1);
        assert_eq!(out.entries[0].lot, 12);
        assert_eq!(out.skipped.len(), 2);
    }

    #[test]
    fn missing_table_is_fatal() {
        let err = extract_catalog_str("<html><body><p>no data</p></body></html>", &CatalogConfig::default())
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoTable));
    }

    #[test]
    fn only_first_table_is_read() {
        let first = page(&[as_row(&data_row("1", "X"))]);
        let html = first.replace(
            "</body>",
            &format!("<table>{}</table></body>", as_row(&data_row("99", "Z"))),
        );
        let out = extract_catalog_str(&html, &CatalogConfig::default()).unwrap();
        assert_eq!(out.entries.len(), 1);
        assert_eq!(out.entries[0].lot, 1);
    }

    #[test]
    fn drifted_layout_via_column_map() {
        let mut cfg = CatalogConfig::default();
        cfg.min_columns = 4;
        cfg.columns = ColumnMap {
            lot: 1,
            sex: Some(0),
            color: None,
            birth_date: None,
            sire: Some(2),
            dam: Some(3),
            consignor: None,
            breeder: None,
        };
        let html = page(&[row(&["牝", "5", "キタサンブラック", "母"])]);
        let out = extract_catalog_str(&html, &cfg).unwrap();
        let e = &out.entries[0];
        assert_eq!(e.lot, 5);
        assert_eq!(e.sex, Some(Sex::Female));
        assert_eq!(e.sire.as_deref(), Some("キタサンブラック"));
        assert_eq!(e.color, None);
    }

    #[test]
    fn decodes_shift_jis_bytes() {
        let html = page(&[as_row(&data_row("3", "ドゥラメンテ"))]);
        let (bytes, _, unmappable) = encoding_rs::SHIFT_JIS.encode(&html);
        assert!(!unmappable);
        let out = extract_catalog(&bytes, &CatalogConfig::default()).unwrap();
        assert!(!out.had_decode_errors);
        assert_eq!(out.entries[0].sire.as_deref(), Some("ドゥラメンテ"));
    }

    #[test]
    fn bad_bytes_do_not_abort_document() {
        let html = page(&[as_row(&data_row("4", "ABC"))]);
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(&html);
        let mut bytes = bytes.into_owned();
        // a lone lead byte inside the first <p>
        let pos = bytes.windows(7).position(|w| w == b"catalog").unwrap();
        bytes.insert(pos, 0x81);
        bytes.insert(pos + 1, 0x20);
        let out = extract_catalog(&bytes, &CatalogConfig::default()).unwrap();
        assert!(out.had_decode_errors);
        assert_eq!(out.entries.len(), 1);
        assert_eq!(out.entries[0].lot, 4);
    }

    #[test]
    fn unknown_encoding_label() {
        let mut cfg = CatalogConfig::default();
        cfg.encoding = "klingon".to_string();
        assert!(matches!(
            extract_catalog(b"<table></table>", &cfg),
            Err(ExtractError::UnknownEncoding(_))
        ));
    }
}
