//! Postgres-backed job store.
//!
//! ## Locking
//!
//! Every mutation runs in one transaction that first takes the row lock
//! (`SELECT ... FOR UPDATE`), applies the state machine in Rust, and writes the
//! whole mutable column set back. Claims use `FOR UPDATE SKIP LOCKED` so that
//! concurrent workers skip rows another worker is already claiming.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `Storage` (or `AlreadyExists` on insert) |
//! | Database (check constraint violation) | `23514` | `Storage` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Other | N/A | `Storage` |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};

use jobforge_core::{
    FailureOutcome, Job, JobError, JobId, JobParts, JobStatus, JobType, JsonMap, NewJob,
};

use super::{JobStore, JobStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_create_jobs.sql");

const JOB_COLUMNS: &str = r#"
    job_id,
    job_type,
    input_metadata,
    status,
    input_file_path,
    output_file_path,
    retry_count,
    max_retries,
    error_message,
    context,
    notifications,
    created_at,
    updated_at,
    next_run_at,
    finished_at
"#;

/// Postgres-backed job store.
///
/// `Send + Sync`; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `jobs` table and its indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        info!("jobs schema ready");
        Ok(())
    }

    /// Lock `job_id`, apply `op` to it, and persist the result in one transaction.
    ///
    /// If `op` fails the transaction is rolled back and the row is untouched.
    async fn update_locked<T, F>(
        &self,
        operation: &'static str,
        job_id: JobId,
        op: F,
    ) -> Result<(Job, T), JobStoreError>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> Result<T, JobError> + Send,
        T: Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(JobStoreError::NotFound(job_id));
        };

        let mut job = decode_job(&row)?;
        let out = match op(&mut job, now()) {
            Ok(out) => out,
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err.into());
            }
        };

        write_job(&mut tx, &job, operation).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok((job, out))
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, new), fields(job_type = %new.job_type), err)]
    async fn create_job(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::create_queued(new, now())?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id,
                job_type,
                input_metadata,
                status,
                input_file_path,
                output_file_path,
                retry_count,
                max_retries,
                error_message,
                context,
                notifications,
                created_at,
                updated_at,
                next_run_at,
                finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.job_id().as_uuid())
        .bind(job.job_type().as_str())
        .bind(JsonValue::Object(job.input_metadata().clone()))
        .bind(job.status().as_str())
        .bind(job.input_file_path())
        .bind(job.output_file_path())
        .bind(to_db_count(job.retry_count())?)
        .bind(to_db_count(job.max_retries())?)
        .bind(job.error_message())
        .bind(JsonValue::Object(job.context().clone()))
        .bind(JsonValue::Object(job.notifications().clone()))
        .bind(job.created_at())
        .bind(job.updated_at())
        .bind(job.next_run_at())
        .bind(job.finished_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.job_id())
            } else {
                map_sqlx_error("insert_job", e)
            }
        })?;

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(decode_job).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, job_id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(decode_job).collect()
    }

    #[instrument(skip(self), err)]
    async fn count_jobs(&self) -> Result<u64, JobStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM jobs")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_jobs", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| JobStoreError::storage(format!("failed to read count: {e}")))?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    #[instrument(skip(self, error_message), fields(job_id = %job_id, status = %to), err)]
    async fn transition(
        &self,
        job_id: JobId,
        to: JobStatus,
        error_message: Option<String>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Job, JobStoreError> {
        let (job, _) = self
            .update_locked("transition", job_id, move |job, now| {
                job.transition_at(to, error_message, next_run_at, now)
            })
            .await?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn complete(&self, job_id: JobId, output_file_path: String) -> Result<Job, JobStoreError> {
        let (job, ()) = self
            .update_locked("complete", job_id, move |job, now| {
                job.complete(output_file_path, now)
            })
            .await?;
        Ok(job)
    }

    #[instrument(skip(self, error), fields(job_id = %job_id), err)]
    async fn handle_failure(
        &self,
        job_id: JobId,
        error: String,
    ) -> Result<(Job, FailureOutcome), JobStoreError> {
        self.update_locked("handle_failure", job_id, move |job, now| job.fail(error, now))
            .await
    }

    #[instrument(skip(self), err)]
    async fn claim_next_job(&self) -> Result<Option<Job>, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let now = now();
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status IN ('QUEUED', 'RETRYING')
                AND (next_run_at IS NULL OR next_run_at <= $1)
            ORDER BY created_at ASC, job_id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next_job", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };

        let mut job = decode_job(&row)?;
        if let Err(err) = job.transition_at(JobStatus::Processing, None, None, now) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err.into());
        }

        write_job(&mut tx, &job, "claim_next_job").await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Some(job))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn requeue(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let (job, _) = self
            .update_locked("requeue", job_id, |job, now| job.retry_manually(now))
            .await?;
        Ok(job)
    }
}

/// Postgres stores microseconds; truncate so returned records match reloads.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn to_db_count(value: u32) -> Result<i32, JobStoreError> {
    i32::try_from(value).map_err(|_| JobStoreError::storage(format!("count {value} exceeds INTEGER")))
}

async fn write_job(
    tx: &mut Transaction<'_, Postgres>,
    job: &Job,
    operation: &'static str,
) -> Result<(), JobStoreError> {
    sqlx::query(
        r#"
        UPDATE jobs SET
            status = $2,
            output_file_path = $3,
            retry_count = $4,
            error_message = $5,
            updated_at = $6,
            next_run_at = $7,
            finished_at = $8
        WHERE job_id = $1
        "#,
    )
    .bind(job.job_id().as_uuid())
    .bind(job.status().as_str())
    .bind(job.output_file_path())
    .bind(to_db_count(job.retry_count())?)
    .bind(job.error_message())
    .bind(job.updated_at())
    .bind(job.next_run_at())
    .bind(job.finished_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;

    Ok(())
}

fn decode_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let row = JobRow::from_row(row)
        .map_err(|e| JobStoreError::storage(format!("failed to deserialize job row: {e}")))?;
    Job::try_from(row)
}

/// Map SQLx errors to `JobStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => JobStoreError::Storage(format!("unique violation: {msg}")),
                Some("23514") => JobStoreError::Storage(format!("check violation: {msg}")),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => {
            JobStoreError::storage(format!("unexpected row not found in {operation}"))
        }
        _ => JobStoreError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    job_id: uuid::Uuid,
    job_type: String,
    input_metadata: JsonValue,
    status: String,
    input_file_path: String,
    output_file_path: Option<String>,
    retry_count: i32,
    max_retries: i32,
    error_message: Option<String>,
    context: JsonValue,
    notifications: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    next_run_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            job_id: row.try_get("job_id")?,
            job_type: row.try_get("job_type")?,
            input_metadata: row.try_get("input_metadata")?,
            status: row.try_get("status")?,
            input_file_path: row.try_get("input_file_path")?,
            output_file_path: row.try_get("output_file_path")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            error_message: row.try_get("error_message")?,
            context: row.try_get("context")?,
            notifications: row.try_get("notifications")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            next_run_at: row.try_get("next_run_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let count = |column: &str, value: i32| {
            u32::try_from(value).map_err(|_| {
                JobError::InvariantViolation(format!("{column} is negative: {value}"))
            })
        };

        let parts = JobParts {
            job_id: JobId::from_uuid(row.job_id),
            job_type: JobType::from_str(&row.job_type)?,
            input_metadata: json_object("input_metadata", row.input_metadata)?,
            status: JobStatus::from_str(&row.status)?,
            input_file_path: row.input_file_path,
            output_file_path: row.output_file_path,
            retry_count: count("retry_count", row.retry_count)?,
            max_retries: count("max_retries", row.max_retries)?,
            error_message: row.error_message,
            context: json_object("context", row.context)?,
            notifications: json_object("notifications", row.notifications)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            next_run_at: row.next_run_at,
            finished_at: row.finished_at,
        };

        Ok(Job::from_parts(parts)?)
    }
}

fn json_object(column: &str, value: JsonValue) -> Result<JsonMap, JobError> {
    match value {
        JsonValue::Object(map) => Ok(map),
        JsonValue::Null => Ok(JsonMap::new()),
        other => Err(JobError::InvariantViolation(format!(
            "{column} is not a JSON object: {other}"
        ))),
    }
}
