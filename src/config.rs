//! Import configuration.
//!
//! Every knob the extractors depend on lives here because the catalog and
//! measurement documents drift between sale years. Values come from an
//! optional TOML file layered under `SERI_*` environment variables
//! (`SERI_DATABASE__PATH=/tmp/x.sqlite`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "seri.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub catalog: CatalogConfig,
    pub measurements: MeasureConfig,
    pub fetch: FetchConfig,
    pub pdf: PdfConfig,
    pub database: DatabaseConfig,
}

impl ImportConfig {
    /// Load from `path` (missing file is fine) and the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SERI")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        settings
            .try_deserialize()
            .context("Invalid import configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// WHATWG encoding label, e.g. "shift_jis", "euc-jp", "utf-8".
    pub encoding: String,
    /// Rows with fewer cells are not data rows.
    pub min_columns: usize,
    /// Leading rows of the table to skip.
    pub header_rows: usize,
    pub columns: ColumnMap,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            encoding: "shift_jis".to_string(),
            min_columns: 15,
            header_rows: 1,
            columns: ColumnMap::default(),
        }
    }
}

/// Zero-based cell index for each catalog field. `None` leaves the field empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub lot: usize,
    pub sex: Option<usize>,
    pub color: Option<usize>,
    pub birth_date: Option<usize>,
    pub sire: Option<usize>,
    pub dam: Option<usize>,
    pub consignor: Option<usize>,
    pub breeder: Option<usize>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        ColumnMap {
            lot: 0,
            sex: Some(4),
            color: Some(5),
            birth_date: Some(6),
            sire: Some(7),
            dam: Some(8),
            consignor: Some(10),
            breeder: Some(11),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// Reading-order text: one value per line.
    #[default]
    Stream,
    /// Column-preserving text: one lot per row.
    Layout,
}

impl LayoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutMode::Stream => "stream",
            LayoutMode::Layout => "layout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    pub layout: LayoutMode,
    /// A line containing any of these starts the table.
    pub header_markers: Vec<String>,
    pub absent_marker: String,
    /// A line containing any of these ends the table.
    pub terminators: Vec<String>,
    /// Known number of lots in the document. Caps the lot-number run.
    pub lot_count: Option<usize>,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        MeasureConfig {
            layout: LayoutMode::Stream,
            header_markers: vec!["番号".to_string()],
            absent_marker: "欠場".to_string(),
            terminators: vec![
                "価格".to_string(),
                "備考".to_string(),
                "付録".to_string(),
            ],
            lot_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub timeout_secs: u64,
    /// Cached document bodies older than this are refetched. 0 disables the cache.
    pub cache_ttl_hours: i64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            concurrency: 4,
            max_retries: 3,
            base_backoff_ms: 2000,
            timeout_secs: 60,
            cache_ttl_hours: 24,
            user_agent: concat!("seri_import/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Poppler `pdftotext` binary.
    pub tool: String,
}

impl Default for PdfConfig {
    fn default() -> Self {
        PdfConfig {
            tool: "pdftotext".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "data/seri.sqlite".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = ImportConfig::load(Path::new("tests/fixtures/does_not_exist.toml")).unwrap();
        assert_eq!(cfg.catalog.min_columns, 15);
        assert_eq!(cfg.catalog.columns, ColumnMap::default());
        assert_eq!(cfg.measurements.layout, LayoutMode::Stream);
        assert_eq!(cfg.measurements.absent_marker, "欠場");
    }

    #[test]
    fn file_overrides_columns_and_layout() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[catalog]
encoding = "euc-jp"
min_columns = 12

[catalog.columns]
sire = 6
dam = 7

[measurements]
layout = "layout"
lot_count = 65
terminators = ["落札"]
"#
        )
        .unwrap();

        let cfg = ImportConfig::load(file.path()).unwrap();
        assert_eq!(cfg.catalog.encoding, "euc-jp");
        assert_eq!(cfg.catalog.min_columns, 12);
        assert_eq!(cfg.catalog.columns.sire, Some(6));
        assert_eq!(cfg.catalog.columns.dam, Some(7));
        // untouched columns keep their defaults
        assert_eq!(cfg.catalog.columns.breeder, Some(11));
        assert_eq!(cfg.measurements.layout, LayoutMode::Layout);
        assert_eq!(cfg.measurements.lot_count, Some(65));
        assert_eq!(cfg.measurements.terminators, vec!["落札".to_string()]);
        assert_eq!(cfg.measurements.header_markers, vec!["番号".to_string()]);
    }
}
