use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::crawl::{CrawlSummary, JobRecord, PersistOutcome, ResultSink, UNKNOWN};
use crate::error::SinkError;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id           INTEGER PRIMARY KEY,
            url          TEXT UNIQUE NOT NULL,
            title        TEXT NOT NULL,
            company      TEXT NOT NULL,
            location     TEXT NOT NULL,
            description  TEXT NOT NULL,
            search_query TEXT,
            scraped_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company);

        CREATE TABLE IF NOT EXISTS crawl_runs (
            id             INTEGER PRIMARY KEY,
            start_url      TEXT NOT NULL,
            outcome        TEXT NOT NULL CHECK(outcome IN ('done','failed')),
            failure        TEXT,
            pages          INTEGER NOT NULL,
            stubs          INTEGER NOT NULL,
            duplicates     INTEGER NOT NULL,
            records        INTEGER NOT NULL,
            degraded       INTEGER NOT NULL,
            persisted      INTEGER NOT NULL,
            already_stored INTEGER NOT NULL,
            persist_errors INTEGER NOT NULL,
            elapsed_ms     INTEGER NOT NULL,
            started_at     TEXT NOT NULL,
            finished_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Result sink ──

/// SQLite-backed store for crawled jobs. Inserts are idempotent on `url`.
pub struct SqliteSink {
    conn: Connection,
    search_query: String,
}

impl SqliteSink {
    pub fn new(conn: Connection, search_query: impl Into<String>) -> Self {
        Self {
            conn,
            search_query: search_query.into(),
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl ResultSink for SqliteSink {
    fn persist(&self, job: &JobRecord) -> Result<PersistOutcome, SinkError> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO jobs (url, title, company, location, description, search_query)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let changed = stmt.execute(rusqlite::params![
            job.url, job.title, job.company, job.location, job.description, self.search_query,
        ])?;
        Ok(if changed == 0 {
            PersistOutcome::AlreadyStored
        } else {
            PersistOutcome::Inserted
        })
    }

    fn known_urls(&self) -> Result<HashSet<String>, SinkError> {
        let mut stmt = self.conn.prepare("SELECT url FROM jobs")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(urls)
    }
}

// ── Runs ──

pub fn record_run(conn: &Connection, s: &CrawlSummary, started_at: DateTime<Utc>) -> Result<i64> {
    let failure = match &s.outcome {
        crate::crawl::WalkOutcome::Failed(reason) => Some(reason.as_str()),
        crate::crawl::WalkOutcome::Done => None,
    };
    conn.execute(
        "INSERT INTO crawl_runs
         (start_url, outcome, failure, pages, stubs, duplicates, records, degraded,
          persisted, already_stored, persist_errors, elapsed_ms, started_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        rusqlite::params![
            s.start_url, s.outcome.as_str(), failure, s.pages as i64, s.stubs as i64,
            s.duplicates as i64, s.records as i64, s.degraded as i64, s.persisted as i64,
            s.already_stored as i64, s.persist_errors as i64, s.elapsed.as_millis() as i64,
            started_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub struct RunRow {
    pub id: i64,
    pub started_at: String,
    pub outcome: String,
    pub failure: Option<String>,
    pub pages: i64,
    pub records: i64,
    pub persisted: i64,
    pub elapsed_ms: i64,
}

pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, started_at, outcome, failure, pages, records, persisted, elapsed_ms
         FROM crawl_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(RunRow {
                id: row.get(0)?,
                started_at: row.get(1)?,
                outcome: row.get(2)?,
                failure: row.get(3)?,
                pages: row.get(4)?,
                records: row.get(5)?,
                persisted: row.get(6)?,
                elapsed_ms: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats & listing ──

pub struct Stats {
    pub jobs: i64,
    pub degraded: i64,
    pub companies: i64,
    pub runs: i64,
    pub last_scraped: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let jobs = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
    let degraded = conn.query_row(
        "SELECT COUNT(*) FROM jobs
         WHERE title = ?1 AND company = ?1 AND location = ?1 AND description = ?1",
        [UNKNOWN],
        |r| r.get(0),
    )?;
    let companies = conn.query_row(
        "SELECT COUNT(DISTINCT company) FROM jobs WHERE company != ?1",
        [UNKNOWN],
        |r| r.get(0),
    )?;
    let runs = conn.query_row("SELECT COUNT(*) FROM crawl_runs", [], |r| r.get(0))?;
    let last_scraped = conn
        .query_row("SELECT MAX(scraped_at) FROM jobs", [], |r| r.get::<_, Option<String>>(0))
        .optional()?
        .flatten();
    Ok(Stats {
        jobs,
        degraded,
        companies,
        runs,
        last_scraped,
    })
}

/// Stored jobs, oldest first, optionally filtered by company substring.
pub fn fetch_jobs(
    conn: &Connection,
    company: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<JobRecord>> {
    let sql = format!(
        "SELECT title, company, location, description, url FROM jobs
         WHERE (?1 IS NULL OR company LIKE '%' || ?1 || '%')
         ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([company], |row| {
            Ok(JobRecord {
                title: row.get(0)?,
                company: row.get(1)?,
                location: row.get(2)?,
                description: row.get(3)?,
                url: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
