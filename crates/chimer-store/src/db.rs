//! SQLite-backed job and execution-log store.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};
use uuid::Uuid;

use chimer_core::error::{Error, Result};
use chimer_core::types::{ExecutionLog, ExecutionStatus, Job};

use crate::filter::{JobStats, LogFilter, LogPage, LogStats, Pagination, RuntimeUpdate, StatLine};

const JOB_COLUMNS: &str = "id, name, url, method, headers, body, schedule, schedule_type, \
     is_active, request_timeout_ms, execution_mode, max_concurrent, current_running, \
     execution_count, last_executed_at, created_at, updated_at";

const LOG_COLUMNS: &str = "l.id, l.job_id, l.executed_at, l.status, l.response_code, \
     l.execution_time_ms, l.response_body, l.error_message, l.triggered_manually";

/// Persistence gateway. All access goes through one mutexed connection;
/// calls are short and never held across awaits.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open or create the database file, applying migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::store)?;
            }
        }
        let conn = Connection::open(path).map_err(Error::store)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(Error::store)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Cascade delete of logs relies on this pragma.
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(Error::store)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cronjobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                method TEXT NOT NULL DEFAULT 'GET',
                headers TEXT,
                body TEXT,
                schedule TEXT NOT NULL,
                schedule_type TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                request_timeout_ms INTEGER,
                execution_mode TEXT NOT NULL DEFAULT 'sequential',
                max_concurrent INTEGER NOT NULL DEFAULT 1,
                current_running INTEGER NOT NULL DEFAULT 0,
                execution_count INTEGER NOT NULL DEFAULT 0,
                last_executed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS execution_logs (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES cronjobs(id) ON DELETE CASCADE,
                executed_at TEXT NOT NULL,
                status TEXT NOT NULL,
                response_code INTEGER,
                execution_time_ms INTEGER NOT NULL,
                response_body TEXT,
                error_message TEXT,
                triggered_manually INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS cronjob_tags (
                job_id TEXT NOT NULL REFERENCES cronjobs(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (job_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_logs_job_id ON execution_logs(job_id);
            CREATE INDEX IF NOT EXISTS idx_logs_executed_at ON execution_logs(executed_at);
            CREATE INDEX IF NOT EXISTS idx_logs_status ON execution_logs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_is_active ON cronjobs(is_active);
            CREATE INDEX IF NOT EXISTS idx_jobs_schedule_type ON cronjobs(schedule_type);
            ",
        )
        .map_err(Error::store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-statement;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ── Job CRUD ──────────────────────────────

    pub fn create_job(&self, job: &Job) -> Result<Job> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO cronjobs (id, name, url, method, headers, body, schedule, \
             schedule_type, is_active, request_timeout_ms, execution_mode, max_concurrent, \
             current_running, execution_count, last_executed_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                job.id.to_string(),
                job.name,
                job.url,
                job.method.to_string(),
                job.headers,
                job.body,
                job.schedule,
                job.schedule_type.to_string(),
                job.is_active,
                job.request_timeout,
                job.execution_mode.to_string(),
                job.max_concurrent,
                job.current_running,
                job.execution_count,
                job.last_executed_at.map(|t| t.to_rfc3339()),
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(Error::store)?;
        drop(conn);
        self.get_job(job.id)
    }

    pub fn get_job(&self, id: Uuid) -> Result<Job> {
        let conn = self.lock();
        let sql = format!("SELECT {JOB_COLUMNS} FROM cronjobs WHERE id = ?1");
        match conn.query_row(&sql, params![id.to_string()], job_from_row) {
            Ok(job) => Ok(job),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::NotFound(id)),
            Err(e) => Err(Error::store(e)),
        }
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs(&format!(
            "SELECT {JOB_COLUMNS} FROM cronjobs ORDER BY created_at"
        ))
    }

    pub fn list_active_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs(&format!(
            "SELECT {JOB_COLUMNS} FROM cronjobs WHERE is_active = 1 ORDER BY created_at"
        ))
    }

    fn query_jobs(&self, sql: &str) -> Result<Vec<Job>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql).map_err(Error::store)?;
        let jobs = stmt
            .query_map([], job_from_row)
            .map_err(Error::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::store)?;
        Ok(jobs)
    }

    /// Full-field update of the user-editable columns; bumps `updated_at`.
    pub fn update_job(&self, job: &Job) -> Result<Job> {
        let now = Utc::now();
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE cronjobs SET name=?2, url=?3, method=?4, headers=?5, body=?6, \
                 schedule=?7, schedule_type=?8, is_active=?9, request_timeout_ms=?10, \
                 execution_mode=?11, max_concurrent=?12, updated_at=?13 WHERE id=?1",
                params![
                    job.id.to_string(),
                    job.name,
                    job.url,
                    job.method.to_string(),
                    job.headers,
                    job.body,
                    job.schedule,
                    job.schedule_type.to_string(),
                    job.is_active,
                    job.request_timeout,
                    job.execution_mode.to_string(),
                    job.max_concurrent,
                    now.to_rfc3339(),
                ],
            )
            .map_err(Error::store)?;
        drop(conn);
        if changed == 0 {
            return Err(Error::NotFound(job.id));
        }
        self.get_job(job.id)
    }

    pub fn set_active(&self, id: Uuid, active: bool) -> Result<Job> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE cronjobs SET is_active=?2, updated_at=?3 WHERE id=?1",
                params![id.to_string(), active, Utc::now().to_rfc3339()],
            )
            .map_err(Error::store)?;
        drop(conn);
        if changed == 0 {
            return Err(Error::NotFound(id));
        }
        self.get_job(id)
    }

    /// Delete a job; its logs and tag links cascade.
    pub fn delete_job(&self, id: Uuid) -> Result<()> {
        let conn = self.lock();
        let changed = conn
            .execute("DELETE FROM cronjobs WHERE id=?1", params![id.to_string()])
            .map_err(Error::store)?;
        if changed == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    /// Best-effort runtime counter update used by the engine's finalizer.
    /// Missing rows are not an error; the registry entry may already be gone.
    pub fn update_job_runtime(&self, id: Uuid, update: RuntimeUpdate) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(running) = update.current_running {
            sets.push(format!("current_running = ?{}", values.len() + 2));
            values.push(Value::Integer(i64::from(running)));
        }
        if let Some(at) = update.last_executed_at {
            sets.push(format!("last_executed_at = ?{}", values.len() + 2));
            values.push(Value::Text(at.to_rfc3339()));
        }
        if let Some(count) = update.execution_count {
            sets.push(format!("execution_count = ?{}", values.len() + 2));
            values.push(Value::Integer(count as i64));
        }
        if sets.is_empty() {
            return Ok(());
        }
        let sql = format!("UPDATE cronjobs SET {} WHERE id = ?1", sets.join(", "));
        let mut params_vec: Vec<Value> = vec![Value::Text(id.to_string())];
        params_vec.extend(values);
        let conn = self.lock();
        conn.execute(&sql, params_from_iter(params_vec))
            .map_err(Error::store)?;
        Ok(())
    }

    pub fn count_jobs(&self) -> Result<u64> {
        let conn = self.lock();
        conn.query_row("SELECT COUNT(*) FROM cronjobs", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(Error::store)
    }

    // ── Execution logs ──────────────────────────────

    /// Append-only insert of one execution record.
    pub fn insert_log(&self, log: &ExecutionLog) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO execution_logs (id, job_id, executed_at, status, response_code, \
             execution_time_ms, response_body, error_message, triggered_manually) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.id.to_string(),
                log.job_id.to_string(),
                log.executed_at.to_rfc3339(),
                log.status.to_string(),
                log.response_code,
                log.execution_time,
                log.response_body,
                log.error_message,
                log.triggered_manually,
            ],
        )
        .map_err(Error::store)?;
        Ok(())
    }

    pub fn count_logs(&self, filter: &LogFilter) -> Result<u64> {
        let (where_sql, values) = filter_sql(filter);
        let sql = format!(
            "SELECT COUNT(*) FROM execution_logs l JOIN cronjobs j ON l.job_id = j.id{where_sql}"
        );
        let conn = self.lock();
        conn.query_row(&sql, params_from_iter(values), |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(Error::store)
    }

    /// Delete every log whose `executed_at` is strictly before the cutoff.
    /// Returns the number of rows removed.
    pub fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                "DELETE FROM execution_logs WHERE executed_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(Error::store)?;
        Ok(deleted as u64)
    }

    pub fn list_logs(&self, filter: &LogFilter, page: Pagination) -> Result<LogPage> {
        let total = self.count_logs(filter)?;
        let (where_sql, mut values) = filter_sql(filter);
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs l JOIN cronjobs j ON l.job_id = j.id\
             {where_sql} ORDER BY l.executed_at DESC LIMIT ?{} OFFSET ?{}",
            values.len() + 1,
            values.len() + 2,
        );
        values.push(Value::Integer(i64::from(page.limit)));
        values.push(Value::Integer(page.offset() as i64));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(Error::store)?;
        let logs = stmt
            .query_map(params_from_iter(values), log_from_row)
            .map_err(Error::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::store)?;
        Ok(LogPage {
            logs,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    /// Overall + per-job aggregates over an optional date window.
    pub fn log_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<LogStats> {
        let filter = LogFilter {
            start,
            end,
            ..LogFilter::default()
        };
        let (where_sql, values) = filter_sql(&filter);
        let conn = self.lock();

        let agg = "COUNT(*), \
             COALESCE(SUM(CASE WHEN l.status = 'success' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN l.status = 'failed' THEN 1 ELSE 0 END), 0), \
             MIN(l.execution_time_ms), AVG(l.execution_time_ms), MAX(l.execution_time_ms)";

        let overall_sql = format!(
            "SELECT {agg} FROM execution_logs l JOIN cronjobs j ON l.job_id = j.id{where_sql}"
        );
        let overall = conn
            .query_row(&overall_sql, params_from_iter(values.clone()), |row| {
                stat_line_from_row(row, 0)
            })
            .map_err(Error::store)?;

        let per_job_sql = format!(
            "SELECT l.job_id, j.name, {agg} FROM execution_logs l \
             JOIN cronjobs j ON l.job_id = j.id{where_sql} \
             GROUP BY l.job_id, j.name ORDER BY COUNT(*) DESC"
        );
        let mut stmt = conn.prepare(&per_job_sql).map_err(Error::store)?;
        let per_job = stmt
            .query_map(params_from_iter(values), |row| {
                let job_id: String = row.get(0)?;
                let job_name: String = row.get(1)?;
                let line = stat_line_from_row(row, 2)?;
                Ok(JobStats {
                    job_id: parse_uuid(0, &job_id)?,
                    job_name,
                    line,
                })
            })
            .map_err(Error::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::store)?;

        Ok(LogStats { overall, per_job })
    }

    // ── Tags (export/import support only) ──────────────────────────────

    pub fn list_tag_names(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM tags ORDER BY name")
            .map_err(Error::store)?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(Error::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::store)?;
        Ok(names)
    }

    pub fn tag_names_for_job(&self, job_id: Uuid) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT t.name FROM tags t JOIN cronjob_tags ct ON ct.tag_id = t.id \
                 WHERE ct.job_id = ?1 ORDER BY t.name",
            )
            .map_err(Error::store)?;
        let names = stmt
            .query_map(params![job_id.to_string()], |r| r.get::<_, String>(0))
            .map_err(Error::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::store)?;
        Ok(names)
    }

    /// Replace a job's tag set, creating tags that don't exist yet.
    pub fn set_job_tags(&self, job_id: Uuid, names: &[String]) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM cronjob_tags WHERE job_id = ?1",
            params![job_id.to_string()],
        )
        .map_err(Error::store)?;
        for name in names {
            conn.execute(
                "INSERT OR IGNORE INTO tags (id, name) VALUES (?1, ?2)",
                params![Uuid::new_v4().to_string(), name],
            )
            .map_err(Error::store)?;
            conn.execute(
                "INSERT OR IGNORE INTO cronjob_tags (job_id, tag_id) \
                 SELECT ?1, id FROM tags WHERE name = ?2",
                params![job_id.to_string(), name],
            )
            .map_err(Error::store)?;
        }
        Ok(())
    }
}

// ── Row mapping ──────────────────────────────

fn conversion_failure(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| conversion_failure(idx, e.to_string()))
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e.to_string()))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_kind<T: std::str::FromStr<Err = String>>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|e| conversion_failure(idx, e))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let method: String = row.get(3)?;
    let schedule_type: String = row.get(7)?;
    let execution_mode: String = row.get(10)?;
    let last_executed_at: Option<String> = row.get(14)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;
    Ok(Job {
        id: parse_uuid(0, &id)?,
        name: row.get(1)?,
        url: row.get(2)?,
        method: parse_kind(3, &method)?,
        headers: row.get(4)?,
        body: row.get(5)?,
        schedule: row.get(6)?,
        schedule_type: parse_kind(7, &schedule_type)?,
        is_active: row.get(8)?,
        request_timeout: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        execution_mode: parse_kind(10, &execution_mode)?,
        max_concurrent: row.get::<_, i64>(11)? as u32,
        current_running: row.get::<_, i64>(12)? as u32,
        execution_count: row.get::<_, i64>(13)? as u64,
        last_executed_at: parse_opt_ts(14, last_executed_at)?,
        created_at: parse_ts(15, &created_at)?,
        updated_at: parse_ts(16, &updated_at)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionLog> {
    let id: String = row.get(0)?;
    let job_id: String = row.get(1)?;
    let executed_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(ExecutionLog {
        id: parse_uuid(0, &id)?,
        job_id: parse_uuid(1, &job_id)?,
        executed_at: parse_ts(2, &executed_at)?,
        status: parse_kind::<ExecutionStatus>(3, &status)?,
        response_code: row.get::<_, Option<i64>>(4)?.map(|v| v as u16),
        execution_time: row.get::<_, i64>(5)? as u64,
        response_body: row.get(6)?,
        error_message: row.get(7)?,
        triggered_manually: row.get(8)?,
    })
}

fn stat_line_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<StatLine> {
    let total = row.get::<_, i64>(base)? as u64;
    let success = row.get::<_, i64>(base + 1)? as u64;
    let failed = row.get::<_, i64>(base + 2)? as u64;
    Ok(StatLine {
        total,
        success,
        failed,
        success_rate: StatLine::success_rate_of(success, total),
        min_execution_time: row.get::<_, Option<i64>>(base + 3)?.map(|v| v as u64),
        avg_execution_time: row.get::<_, Option<f64>>(base + 4)?,
        max_execution_time: row.get::<_, Option<i64>>(base + 5)?.map(|v| v as u64),
    })
}

/// Build the WHERE clause + positional values for a log filter.
/// Placeholders start at ?1 in the order the values are pushed.
fn filter_sql(filter: &LogFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(job_id) = filter.job_id {
        values.push(Value::Text(job_id.to_string()));
        clauses.push(format!("l.job_id = ?{}", values.len()));
    }
    if let Some(status) = filter.status {
        values.push(Value::Text(status.to_string()));
        clauses.push(format!("l.status = ?{}", values.len()));
    }
    if let Some(manual) = filter.triggered_manually {
        values.push(Value::Integer(i64::from(manual)));
        clauses.push(format!("l.triggered_manually = ?{}", values.len()));
    }
    if let Some(start) = filter.start {
        values.push(Value::Text(start.to_rfc3339()));
        clauses.push(format!("l.executed_at >= ?{}", values.len()));
    }
    if let Some(end) = filter.end {
        values.push(Value::Text(end.to_rfc3339()));
        clauses.push(format!("l.executed_at <= ?{}", values.len()));
    }
    if let Some(name) = &filter.job_name {
        values.push(Value::Text(format!("%{name}%")));
        clauses.push(format!("j.name LIKE ?{}", values.len()));
    }
    if let Some(content) = &filter.response_content {
        values.push(Value::Text(format!("%{content}%")));
        clauses.push(format!("l.response_body LIKE ?{}", values.len()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimer_core::types::{ExecutionMode, HttpMethod, ScheduleType};
    use chrono::Duration;

    fn store() -> JobStore {
        JobStore::open_in_memory().unwrap()
    }

    fn sample_job(name: &str) -> Job {
        Job::new(
            name.into(),
            "https://api.example.com/ping".into(),
            HttpMethod::Get,
            "5s".into(),
            ScheduleType::Repeat,
        )
    }

    fn sample_log(job_id: Uuid, status: ExecutionStatus, at: DateTime<Utc>) -> ExecutionLog {
        ExecutionLog {
            id: Uuid::new_v4(),
            job_id,
            executed_at: at,
            status,
            response_code: Some(200),
            execution_time: 42,
            response_body: Some("{\"ok\":true}".into()),
            error_message: None,
            triggered_manually: false,
        }
    }

    #[test]
    fn job_crud_roundtrip() {
        let db = store();
        let mut job = sample_job("ping");
        job.headers = Some("{\"X-Key\":\"v\"}".into());
        let created = db.create_job(&job).unwrap();
        assert_eq!(created.name, "ping");
        assert_eq!(created.headers.as_deref(), Some("{\"X-Key\":\"v\"}"));

        let mut updated = created.clone();
        updated.name = "ping2".into();
        updated.execution_mode = ExecutionMode::Parallel;
        updated.max_concurrent = 4;
        let saved = db.update_job(&updated).unwrap();
        assert_eq!(saved.name, "ping2");
        assert_eq!(saved.max_concurrent, 4);
        assert!(saved.updated_at >= created.updated_at);

        db.delete_job(saved.id).unwrap();
        assert!(matches!(db.get_job(saved.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn get_missing_job_is_not_found() {
        let db = store();
        let id = Uuid::new_v4();
        assert!(matches!(db.get_job(id), Err(Error::NotFound(got)) if got == id));
    }

    #[test]
    fn active_listing_excludes_disabled() {
        let db = store();
        let a = db.create_job(&sample_job("a")).unwrap();
        let b = db.create_job(&sample_job("b")).unwrap();
        db.set_active(b.id, false).unwrap();
        let active = db.list_active_jobs().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
        assert_eq!(db.list_jobs().unwrap().len(), 2);
    }

    #[test]
    fn double_toggle_is_identity() {
        let db = store();
        let job = db.create_job(&sample_job("t")).unwrap();
        let original = job.is_active;
        let flipped = db.set_active(job.id, !original).unwrap();
        assert_eq!(flipped.is_active, !original);
        let restored = db.set_active(job.id, !flipped.is_active).unwrap();
        assert_eq!(restored.is_active, original);
    }

    #[test]
    fn runtime_update_is_partial() {
        let db = store();
        let job = db.create_job(&sample_job("r")).unwrap();
        db.update_job_runtime(
            job.id,
            RuntimeUpdate {
                current_running: Some(2),
                execution_count: Some(7),
                ..RuntimeUpdate::default()
            },
        )
        .unwrap();
        let fresh = db.get_job(job.id).unwrap();
        assert_eq!(fresh.current_running, 2);
        assert_eq!(fresh.execution_count, 7);
        assert!(fresh.last_executed_at.is_none());

        // Unknown id is best-effort, not an error.
        db.update_job_runtime(
            Uuid::new_v4(),
            RuntimeUpdate {
                current_running: Some(0),
                ..RuntimeUpdate::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn logs_cascade_with_job() {
        let db = store();
        let job = db.create_job(&sample_job("c")).unwrap();
        db.insert_log(&sample_log(job.id, ExecutionStatus::Success, Utc::now()))
            .unwrap();
        assert_eq!(db.count_logs(&LogFilter::default()).unwrap(), 1);
        db.delete_job(job.id).unwrap();
        assert_eq!(db.count_logs(&LogFilter::default()).unwrap(), 0);
    }

    #[test]
    fn log_filters_and_pagination() {
        let db = store();
        let job = db.create_job(&sample_job("Nightly Report")).unwrap();
        let other = db.create_job(&sample_job("other")).unwrap();
        let now = Utc::now();
        for i in 0..5 {
            db.insert_log(&sample_log(
                job.id,
                ExecutionStatus::Success,
                now - Duration::minutes(i),
            ))
            .unwrap();
        }
        let mut failed = sample_log(other.id, ExecutionStatus::Failed, now);
        failed.error_message = Some("HTTP 404: Not Found".into());
        failed.response_body = None;
        db.insert_log(&failed).unwrap();

        let page = db
            .list_logs(
                &LogFilter {
                    job_id: Some(job.id),
                    ..LogFilter::default()
                },
                Pagination::clamped(1, 2),
            )
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.logs.len(), 2);
        // Newest first.
        assert!(page.logs[0].executed_at >= page.logs[1].executed_at);

        let by_status = db
            .count_logs(&LogFilter {
                status: Some(ExecutionStatus::Failed),
                ..LogFilter::default()
            })
            .unwrap();
        assert_eq!(by_status, 1);

        let by_name = db
            .count_logs(&LogFilter {
                job_name: Some("nightly".into()),
                ..LogFilter::default()
            })
            .unwrap();
        assert_eq!(by_name, 5);

        let by_content = db
            .count_logs(&LogFilter {
                response_content: Some("OK\":TRUE".into()),
                ..LogFilter::default()
            })
            .unwrap();
        assert_eq!(by_content, 5);
    }

    #[test]
    fn retention_cutoff_deletes_only_older() {
        let db = store();
        let job = db.create_job(&sample_job("sweep")).unwrap();
        let now = Utc::now();
        for _ in 0..100 {
            db.insert_log(&sample_log(
                job.id,
                ExecutionStatus::Success,
                now - Duration::days(4),
            ))
            .unwrap();
        }
        for _ in 0..10 {
            db.insert_log(&sample_log(
                job.id,
                ExecutionStatus::Success,
                now - Duration::days(1),
            ))
            .unwrap();
        }
        let deleted = db.delete_logs_before(now - Duration::days(3)).unwrap();
        assert_eq!(deleted, 100);
        assert_eq!(db.count_logs(&LogFilter::default()).unwrap(), 10);
    }

    #[test]
    fn stats_aggregate_per_job() {
        let db = store();
        let a = db.create_job(&sample_job("a")).unwrap();
        let b = db.create_job(&sample_job("b")).unwrap();
        let now = Utc::now();
        db.insert_log(&sample_log(a.id, ExecutionStatus::Success, now))
            .unwrap();
        db.insert_log(&sample_log(a.id, ExecutionStatus::Failed, now))
            .unwrap();
        db.insert_log(&sample_log(b.id, ExecutionStatus::Success, now))
            .unwrap();

        let stats = db.log_stats(None, None).unwrap();
        assert_eq!(stats.overall.total, 3);
        assert_eq!(stats.overall.success, 2);
        assert_eq!(stats.overall.failed, 1);
        assert_eq!(stats.overall.success_rate, 66.67);
        assert_eq!(stats.per_job.len(), 2);
        let a_row = stats.per_job.iter().find(|r| r.job_id == a.id).unwrap();
        assert_eq!(a_row.line.total, 2);
        assert_eq!(a_row.line.success_rate, 50.0);
    }

    #[test]
    fn tags_roundtrip() {
        let db = store();
        let job = db.create_job(&sample_job("tagged")).unwrap();
        db.set_job_tags(job.id, &["prod".into(), "billing".into()])
            .unwrap();
        assert_eq!(
            db.tag_names_for_job(job.id).unwrap(),
            vec!["billing".to_string(), "prod".to_string()]
        );
        // Replacing drops the old links but keeps tag rows.
        db.set_job_tags(job.id, &["prod".into()]).unwrap();
        assert_eq!(db.tag_names_for_job(job.id).unwrap(), vec!["prod"]);
        assert_eq!(db.list_tag_names().unwrap().len(), 2);
    }
}
