use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use seri_import::config::{ImportConfig, LayoutMode, DEFAULT_CONFIG_FILE};
use seri_import::fetch::{self, HttpFetcher, Source};
use seri_import::pdf::{PdftotextExtractor, TextExtractor};
use seri_import::{catalog, db, import, measure};

#[derive(Parser)]
#[command(name = "seri_import", about = "Horse sale catalog and measurement importer")]
struct Cli {
    /// TOML config file; SERI_* environment variables override it
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and drop expired cached documents
    Init,
    /// Extract a catalog page (URL or file) and print entries as JSON
    Catalog { source: String },
    /// Extract a measurement PDF (URL or file) and print entries as JSON
    Measurements {
        source: String,
        /// Text layout of the document (default from config)
        #[arg(long, value_enum)]
        layout: Option<LayoutMode>,
        /// Known number of lots in the document
        #[arg(long)]
        lot_count: Option<usize>,
    },
    /// Extract, merge and store one sale
    Import {
        /// Sale name (e.g. "2024 セレクトセール")
        #[arg(long)]
        sale: String,
        /// Catalog page URL or file
        #[arg(long)]
        catalog: String,
        /// Measurement PDF URL or file; repeat for split documents
        #[arg(long = "pdf")]
        pdfs: Vec<String>,
        #[arg(long, value_enum)]
        layout: Option<LayoutMode>,
        #[arg(long)]
        lot_count: Option<usize>,
        /// Extract and merge, but write nothing except the document cache
        #[arg(long)]
        dry_run: bool,
    },
    /// Horses of one sale, in lot order
    Horses {
        #[arg(long)]
        sale: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },
    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut cfg = ImportConfig::load(&cli.config)?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&cfg.database.path)?;
            db::init_schema(&conn)?;
            let purged = db::purge_documents(&conn, cfg.fetch.cache_ttl_hours)?;
            println!("Database ready at {} ({} expired documents removed)", cfg.database.path, purged);
            Ok(())
        }
        Commands::Catalog { source } => {
            let fetcher = HttpFetcher::new(&cfg.fetch)?;
            let source = Source::parse(&source);
            let html = fetcher.load(&source).await.with_context(|| format!("Failed to load {}", source))?;
            let out = catalog::extract_catalog(&html, &cfg.catalog)?;
            for s in &out.skipped {
                eprintln!("skipped: {}", s);
            }
            println!("{}", serde_json::to_string_pretty(&out.entries)?);
            Ok(())
        }
        Commands::Measurements { source, layout, lot_count } => {
            apply_overrides(&mut cfg, layout, lot_count);
            let fetcher = HttpFetcher::new(&cfg.fetch)?;
            let source = Source::parse(&source);
            let bytes = fetcher.load(&source).await.with_context(|| format!("Failed to load {}", source))?;

            // Already-extracted text is accepted as-is.
            let text = if bytes.starts_with(b"%PDF") {
                PdftotextExtractor::new(cfg.pdf.tool.as_str()).extract_text(&bytes, cfg.measurements.layout)?
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            };
            let out = measure::extract_measurements(&text, &cfg.measurements)
                .require_header(&cfg.measurements)?;
            for s in &out.skipped {
                eprintln!("skipped: {}", s);
            }
            println!("{}", serde_json::to_string_pretty(&out.entries)?);
            Ok(())
        }
        Commands::Import { sale, catalog, pdfs, layout, lot_count, dry_run } => {
            apply_overrides(&mut cfg, layout, lot_count);
            let conn = db::connect(&cfg.database.path)?;
            db::init_schema(&conn)?;

            let catalog_source = Source::parse(&catalog);
            let pdf_sources: Vec<Source> = pdfs.iter().map(|p| Source::parse(p)).collect();
            let sources: Vec<Source> = std::iter::once(catalog_source.clone())
                .chain(pdf_sources.iter().cloned())
                .collect();

            let t_fetch = Instant::now();
            println!("Loading {} documents...", sources.len());
            let fetcher = Arc::new(HttpFetcher::new(&cfg.fetch)?);
            let mut docs = fetch::load_documents(&conn, fetcher, &sources, &cfg.fetch).await?;
            println!("Loaded in {:.1}s", t_fetch.elapsed().as_secs_f64());

            let catalog_html = docs.remove(0);
            let pdf_docs: Vec<(String, Vec<u8>)> = pdf_sources
                .iter()
                .map(|s| s.to_string())
                .zip(docs)
                .collect();

            let extractor = PdftotextExtractor::new(cfg.pdf.tool.as_str());
            let mut outcome = import::run_import(
                &catalog_source.to_string(),
                &catalog_html,
                &pdf_docs,
                &extractor,
                &cfg,
            )
            .with_context(|| format!("Import of {} aborted", sale))?;

            if dry_run {
                outcome.report.print();
                println!("\nDry run: nothing saved.");
                return Ok(());
            }

            let catalog_url = match &catalog_source {
                Source::Url(u) => Some(u.as_str()),
                Source::Path(_) => None,
            };
            let sale_id = db::upsert_sale(&conn, &sale, catalog_url)?;
            outcome.report.inserted = db::save_horses(&conn, sale_id, &outcome.horses)?;

            let report_json = serde_json::to_string(&outcome.report)?;
            let r = &outcome.report;
            db::save_run(
                &conn,
                &db::RunRow {
                    sale_id,
                    catalog_rows: r.catalog.rows,
                    measurement_rows: r.measurement_rows(),
                    merged_rows: r.merged,
                    inserted_rows: r.inserted,
                    skipped_rows: r.skipped_total(),
                    report_json: &report_json,
                },
            )?;
            r.print();
            Ok(())
        }
        Commands::Horses { sale, limit } => {
            let conn = db::connect(&cfg.database.path)?;
            db::init_schema(&conn)?;
            let Some(sale_id) = db::find_sale(&conn, &sale)? else {
                println!("No sale named '{}'. Run 'import' first.", sale);
                return Ok(());
            };
            let rows = db::fetch_horses(&conn, sale_id, limit)?;
            if rows.is_empty() {
                println!("No horses stored for '{}'.", sale);
                return Ok(());
            }

            println!(
                "{:>4} | {:<3} | {:<18} | {:<18} | {:<16} | {:>5} | {:>5} | {:>5}",
                "Lot", "Sex", "Sire", "Dam", "Consignor", "Ht", "Girth", "Cannon"
            );
            println!("{}", "-".repeat(95));

            for r in &rows {
                let (height, girth, cannon) = if r.absent {
                    ("欠場".to_string(), "-".to_string(), "-".to_string())
                } else {
                    (
                        opt(r.height),
                        opt(r.girth),
                        r.cannon.map(|c| format!("{:.1}", c)).unwrap_or_else(|| "-".into()),
                    )
                };
                println!(
                    "{:>4} | {:<3} | {:<18} | {:<18} | {:<16} | {:>5} | {:>5} | {:>5}",
                    r.lot,
                    r.sex,
                    truncate(&r.sire, 18),
                    truncate(&r.dam, 18),
                    truncate(&r.consignor, 16),
                    height,
                    girth,
                    cannon
                );
            }

            println!("\n{} horses", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cfg.database.path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Sales:      {}", s.sales);
            println!("Horses:     {}", s.horses);
            println!("Measured:   {}", s.measured);
            println!("Absent:     {}", s.absent);
            println!("Unmeasured: {}", s.unmeasured);
            println!("Documents:  {}", s.documents);
            println!("Runs:       {}", s.runs);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn apply_overrides(cfg: &mut ImportConfig, layout: Option<LayoutMode>, lot_count: Option<usize>) {
    if let Some(layout) = layout {
        cfg.measurements.layout = layout;
    }
    if lot_count.is_some() {
        cfg.measurements.lot_count = lot_count;
    }
}

fn opt(v: Option<u32>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
