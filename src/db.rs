use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::merge::HorseRecord;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sales (
            id          INTEGER PRIMARY KEY,
            name        TEXT UNIQUE NOT NULL,
            catalog_url TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS horses (
            id             INTEGER PRIMARY KEY,
            sale_id        INTEGER NOT NULL REFERENCES sales(id),
            lot_number     INTEGER NOT NULL,
            sex            TEXT CHECK(sex IN ('male','female','gelding')),
            color          TEXT,
            birth_date     TEXT,
            birth_date_iso TEXT,
            sire           TEXT,
            dam            TEXT,
            consignor      TEXT,
            breeder        TEXT,
            height         INTEGER,
            girth          INTEGER,
            cannon         REAL,
            absent         BOOLEAN NOT NULL DEFAULT 0,
            imported_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(sale_id, lot_number)
        );
        CREATE INDEX IF NOT EXISTS idx_horses_sale ON horses(sale_id);
        CREATE INDEX IF NOT EXISTS idx_horses_sire ON horses(sire);

        -- Raw fetched bodies, keyed by URL
        CREATE TABLE IF NOT EXISTS documents (
            url        TEXT PRIMARY KEY,
            body       BLOB NOT NULL,
            fetched_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_runs (
            id               INTEGER PRIMARY KEY,
            sale_id          INTEGER NOT NULL REFERENCES sales(id),
            catalog_rows     INTEGER NOT NULL,
            measurement_rows INTEGER NOT NULL,
            merged_rows      INTEGER NOT NULL,
            inserted_rows    INTEGER NOT NULL,
            skipped_rows     INTEGER NOT NULL,
            report           TEXT NOT NULL,
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_runs_sale ON import_runs(sale_id);
        ",
    )?;
    Ok(())
}

// ── Sales ──

/// Id of the sale called `name`, creating it on first use.
pub fn upsert_sale(conn: &Connection, name: &str, catalog_url: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO sales (name, catalog_url) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET catalog_url = COALESCE(excluded.catalog_url, catalog_url)",
        rusqlite::params![name, catalog_url],
    )?;
    let id = conn.query_row("SELECT id FROM sales WHERE name = ?1", [name], |r| r.get(0))?;
    Ok(id)
}

pub fn find_sale(conn: &Connection, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM sales WHERE name = ?1", [name], |r| r.get(0))
        .optional()?;
    Ok(id)
}

// ── Horses ──

/// Insert or refresh every record for `sale_id`. Returns rows written.
pub fn save_horses(conn: &Connection, sale_id: i64, horses: &[HorseRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO horses
             (sale_id, lot_number, sex, color, birth_date, birth_date_iso, sire, dam,
              consignor, breeder, height, girth, cannon, absent)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT(sale_id, lot_number) DO UPDATE SET
               sex = excluded.sex, color = excluded.color,
               birth_date = excluded.birth_date, birth_date_iso = excluded.birth_date_iso,
               sire = excluded.sire, dam = excluded.dam,
               consignor = excluded.consignor, breeder = excluded.breeder,
               height = excluded.height, girth = excluded.girth, cannon = excluded.cannon,
               absent = excluded.absent, imported_at = datetime('now')",
        )?;
        for h in horses {
            let birth_iso = h.birth_date_parsed().map(|d| d.to_string());
            count += stmt.execute(rusqlite::params![
                sale_id,
                h.lot,
                h.sex.map(|s| s.as_str()),
                h.color,
                h.birth_date,
                birth_iso,
                h.sire,
                h.dam,
                h.consignor,
                h.breeder,
                h.height,
                h.girth,
                h.cannon,
                h.absent,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub struct HorseRow {
    pub lot: u32,
    pub sex: String,
    pub sire: String,
    pub dam: String,
    pub consignor: String,
    pub height: Option<u32>,
    pub girth: Option<u32>,
    pub cannon: Option<f64>,
    pub absent: bool,
}

pub fn fetch_horses(conn: &Connection, sale_id: i64, limit: usize) -> Result<Vec<HorseRow>> {
    let mut stmt = conn.prepare(
        "SELECT lot_number, COALESCE(sex,''), COALESCE(sire,''), COALESCE(dam,''),
                COALESCE(consignor,''), height, girth, cannon, absent
         FROM horses
         WHERE sale_id = ?1
         ORDER BY lot_number
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![sale_id, limit as i64], |row| {
            Ok(HorseRow {
                lot: row.get(0)?,
                sex: row.get(1)?,
                sire: row.get(2)?,
                dam: row.get(3)?,
                consignor: row.get(4)?,
                height: row.get(5)?,
                girth: row.get(6)?,
                cannon: row.get(7)?,
                absent: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Document cache ──

/// Cached body for `url` if it was fetched less than `ttl_hours` ago.
pub fn cached_document(conn: &Connection, url: &str, ttl_hours: i64) -> Result<Option<Vec<u8>>> {
    let cutoff = Utc::now().timestamp() - ttl_hours * 3600;
    let body = conn
        .query_row(
            "SELECT body FROM documents WHERE url = ?1 AND fetched_at > ?2",
            rusqlite::params![url, cutoff],
            |r| r.get(0),
        )
        .optional()?;
    Ok(body)
}

pub fn save_document(conn: &Connection, url: &str, body: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO documents (url, body, fetched_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![url, body, Utc::now().timestamp()],
    )?;
    Ok(())
}

/// Drop cached bodies older than `ttl_hours`. Returns rows removed.
pub fn purge_documents(conn: &Connection, ttl_hours: i64) -> Result<usize> {
    let cutoff = Utc::now().timestamp() - ttl_hours * 3600;
    let n = conn.execute("DELETE FROM documents WHERE fetched_at <= ?1", [cutoff])?;
    Ok(n)
}

// ── Import runs ──

pub struct RunRow<'a> {
    pub sale_id: i64,
    pub catalog_rows: usize,
    pub measurement_rows: usize,
    pub merged_rows: usize,
    pub inserted_rows: usize,
    pub skipped_rows: usize,
    pub report_json: &'a str,
}

pub fn save_run(conn: &Connection, run: &RunRow<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_runs
         (sale_id, catalog_rows, measurement_rows, merged_rows, inserted_rows, skipped_rows, report)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            run.sale_id,
            run.catalog_rows,
            run.measurement_rows,
            run.merged_rows,
            run.inserted_rows,
            run.skipped_rows,
            run.report_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Stats ──

pub struct Stats {
    pub sales: usize,
    pub horses: usize,
    pub measured: usize,
    pub absent: usize,
    pub unmeasured: usize,
    pub documents: usize,
    pub runs: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let horses = count("SELECT COUNT(*) FROM horses")?;
    let measured = count("SELECT COUNT(*) FROM horses WHERE height IS NOT NULL")?;
    let absent = count("SELECT COUNT(*) FROM horses WHERE absent = 1")?;
    Ok(Stats {
        sales: count("SELECT COUNT(*) FROM sales")?,
        horses,
        measured,
        absent,
        unmeasured: horses.saturating_sub(measured + absent),
        documents: count("SELECT COUNT(*) FROM documents")?,
        runs: count("SELECT COUNT(*) FROM import_runs")?,
    })
}
