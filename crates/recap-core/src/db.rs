use crate::error::{CoreError, Result};
use crate::schema::{Capture, CaptureDescription, CaptureScreenshot, Report, ScreenshotPair};
use rusqlite::{params, Connection};
use std::path::Path;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, apply PRAGMAs and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.apply_pragmas()?;
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.apply_pragmas()?;
        db.run_migrations()?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn run_migrations(&mut self) -> Result<()> {
        embedded::migrations::runner()
            .run(&mut self.conn)
            .map_err(|e| CoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Insert a capture row plus one screenshot row per display surface,
    /// in a single transaction. Returns the new capture id.
    pub fn insert_capture(&mut self, timestamp: i64, screenshots: &[ScreenshotPair]) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO captures (timestamp) VALUES (?1)",
            params![timestamp],
        )?;
        let capture_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO screenshots (capture_id, filename, thumb_filename, description)
                 VALUES (?1, ?2, ?3, NULL)",
            )?;
            for pair in screenshots {
                stmt.execute(params![capture_id, pair.filename, pair.thumb_filename])?;
            }
        }

        tx.commit()?;
        Ok(capture_id)
    }

    /// All screenshots still lacking a description, oldest capture first.
    ///
    /// FIFO ordering: captures are described in the order they were taken,
    /// so a long backlog never starves the oldest entries.
    pub fn get_unprocessed_captures(&self) -> Result<Vec<CaptureScreenshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.capture_id, c.timestamp, s.screenshot_id, s.filename,
                    s.thumb_filename, s.description, s.provider, s.model
             FROM captures c
             INNER JOIN screenshots s ON s.capture_id = c.capture_id
             WHERE s.description IS NULL
             ORDER BY c.timestamp ASC, s.screenshot_id ASC",
        )?;

        let rows = stmt.query_map([], Self::map_capture_screenshot)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Described, not-yet-reported captures since the given unix timestamp,
    /// ascending. Used with a UTC-midnight cutoff for the daily report.
    pub fn get_described_captures_since(&self, cutoff: i64) -> Result<Vec<CaptureDescription>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.capture_id, c.timestamp, s.description
             FROM captures c
             INNER JOIN screenshots s ON s.capture_id = c.capture_id
             WHERE c.report_id IS NULL
               AND c.timestamp >= ?1
               AND s.description IS NOT NULL
             ORDER BY c.timestamp ASC, s.screenshot_id ASC",
        )?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(CaptureDescription {
                capture_id: row.get(0)?,
                timestamp: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Described, not-yet-reported captures from today (UTC).
    pub fn get_described_captures_for_today(&self) -> Result<Vec<CaptureDescription>> {
        self.get_described_captures_since(utc_start_of_today())
    }

    /// Screenshots for an explicit set of capture ids, oldest first.
    pub fn get_captures_by_ids(&self, ids: &[i64]) -> Result<Vec<CaptureScreenshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT c.capture_id, c.timestamp, s.screenshot_id, s.filename,
                    s.thumb_filename, s.description, s.provider, s.model
             FROM captures c
             INNER JOIN screenshots s ON s.capture_id = c.capture_id
             WHERE c.capture_id IN ({placeholders})
             ORDER BY c.timestamp ASC, s.screenshot_id ASC"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(ids.iter()),
            Self::map_capture_screenshot,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Most recent screenshots, newest first.
    pub fn get_recent_captures(&self, limit: i64) -> Result<Vec<CaptureScreenshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.capture_id, c.timestamp, s.screenshot_id, s.filename,
                    s.thumb_filename, s.description, s.provider, s.model
             FROM captures c
             INNER JOIN screenshots s ON s.capture_id = c.capture_id
             ORDER BY c.timestamp DESC, s.screenshot_id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], Self::map_capture_screenshot)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Get a capture row by id.
    pub fn get_capture(&self, capture_id: i64) -> Result<Option<Capture>> {
        let mut stmt = self.conn.prepare(
            "SELECT capture_id, report_id, timestamp FROM captures WHERE capture_id = ?1",
        )?;

        let mut rows = stmt.query_map(params![capture_id], |row| {
            Ok(Capture {
                capture_id: row.get(0)?,
                report_id: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Persist a description and stamp the provider/model that produced it.
    pub fn update_description(
        &self,
        screenshot_id: i64,
        description: &str,
        provider: &str,
        model: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE screenshots
             SET description = ?1, provider = ?2, model = ?3
             WHERE screenshot_id = ?4",
            params![description, provider, model, screenshot_id],
        )?;
        Ok(())
    }

    /// Insert a report row and backlink every contributing capture to it,
    /// in a single transaction. Returns the new report id.
    pub fn log_report(
        &mut self,
        timestamp: i64,
        content: &str,
        capture_ids: &[i64],
        provider: &str,
        model: &str,
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO reports (timestamp, content, provider, model)
             VALUES (?1, ?2, ?3, ?4)",
            params![timestamp, content, provider, model],
        )?;
        let report_id = tx.last_insert_rowid();

        {
            let mut stmt =
                tx.prepare("UPDATE captures SET report_id = ?1 WHERE capture_id = ?2")?;
            for id in capture_ids {
                let updated = stmt.execute(params![report_id, id])?;
                if updated == 0 {
                    // Dropping the transaction rolls back the report insert:
                    // a report row must never exist without its backlinks.
                    return Err(CoreError::Database(
                        rusqlite::Error::QueryReturnedNoRows,
                    ));
                }
            }
        }

        tx.commit()?;
        Ok(report_id)
    }

    /// Most recent reports, newest first.
    pub fn get_reports(&self, limit: i64) -> Result<Vec<Report>> {
        let mut stmt = self.conn.prepare(
            "SELECT report_id, timestamp, content, provider, model
             FROM reports
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], Self::map_report)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Get a report by id.
    pub fn get_report(&self, report_id: i64) -> Result<Option<Report>> {
        let mut stmt = self.conn.prepare(
            "SELECT report_id, timestamp, content, provider, model
             FROM reports WHERE report_id = ?1",
        )?;

        let mut rows = stmt.query_map(params![report_id], Self::map_report)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn map_capture_screenshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<CaptureScreenshot> {
        Ok(CaptureScreenshot {
            capture_id: row.get(0)?,
            timestamp: row.get(1)?,
            screenshot_id: row.get(2)?,
            filename: row.get(3)?,
            thumb_filename: row.get(4)?,
            description: row.get(5)?,
            provider: row.get(6)?,
            model: row.get(7)?,
        })
    }

    fn map_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
        Ok(Report {
            report_id: row.get(0)?,
            timestamp: row.get(1)?,
            content: row.get(2)?,
            provider: row.get(3)?,
            model: row.get(4)?,
        })
    }
}

/// Unix timestamp of today's UTC midnight.
pub fn utc_start_of_today() -> i64 {
    let now = chrono::Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_else(|| now.timestamp())
}
