//! SQLite implementation of the JobStore trait

use crate::generation::{GenerationError, GenerationJob, JobStatus, JobStore};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GenerationError> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), GenerationError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS generation_jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                output_reference TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Covers the cache probe: user, hash, newest first.
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_cache_probe \
             ON generation_jobs(user_id, content_hash, created_at DESC)",
            [],
        )?;

        info!("Generation job store schema initialized");
        Ok(())
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<GenerationJob> {
        let status_raw: String = row.get(3)?;
        Ok(GenerationJob {
            id: row.get(0)?,
            user_id: row.get(1)?,
            content_hash: row.get(2)?,
            status: JobStatus::parse(&status_raw).unwrap_or(JobStatus::Failed),
            output_reference: row.get(4)?,
            created_at: row
                .get::<_, String>(5)
                .map(|s| parse_timestamp(&s).unwrap_or_else(Utc::now))?,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &GenerationJob) -> Result<(), GenerationError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO generation_jobs (id, user_id, content_hash, status, output_reference, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                job.id,
                job.user_id,
                job.content_hash,
                job.status.as_str(),
                job.output_reference,
                job.created_at.to_rfc3339(),
            ],
        )?;

        debug!("Inserted generation job {} for user {}", job.id, job.user_id);
        Ok(())
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        output_reference: Option<&str>,
    ) -> Result<(), GenerationError> {
        let conn = self.conn.lock().unwrap();

        let updated = conn.execute(
            "UPDATE generation_jobs SET status = ?2, output_reference = ?3 WHERE id = ?1",
            params![job_id, status.as_str(), output_reference],
        )?;
        if updated == 0 {
            warn!("No generation job {job_id} to update");
        }
        Ok(())
    }

    async fn find_completed(
        &self,
        user_id: &str,
        content_hash: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<GenerationJob>, GenerationError> {
        let conn = self.conn.lock().unwrap();

        // RFC3339 timestamps from a single clock compare correctly as text.
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, content_hash, status, output_reference, created_at
            FROM generation_jobs
            WHERE user_id = ?1
              AND content_hash = ?2
              AND status = ?3
              AND output_reference IS NOT NULL
              AND created_at >= ?4
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )?;
        let mut rows = stmt.query_map(
            params![
                user_id,
                content_hash,
                JobStatus::Completed.as_str(),
                cutoff.to_rfc3339(),
            ],
            Self::row_to_job,
        )?;

        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(GenerationError::Database(e.to_string())),
            None => Ok(None),
        }
    }
}
