use rocket_db_pools::sqlx::{self, PgPool};

use super::{JobError, JobKind, JobResult, JobStatus};

/// Status transitions for the import and export job tables.
///
/// Every update is guarded by a `WHERE status IN (...)` predicate listing the
/// allowed predecessors, so a job that was cancelled or finished concurrently
/// is never moved again. Callers learn whether their update applied from the
/// returned flag.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim the oldest pending job atomically (SELECT FOR UPDATE SKIP LOCKED).
    pub async fn claim_next(&self, kind: JobKind) -> Result<Option<i32>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT id FROM {} WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
            kind.table()
        );
        let job: Option<(i32,)> = sqlx::query_as(&select).fetch_optional(&mut *tx).await?;

        let Some((id,)) = job else {
            return Ok(None);
        };

        let update = format!(
            "UPDATE {} SET status = 'processing', started_at = COALESCE(started_at, NOW()) WHERE id = $1",
            kind.table()
        );
        sqlx::query(&update).bind(id).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(Some(id))
    }

    /// Move a specific job from `pending` to `processing`.
    pub async fn start_job(&self, kind: JobKind, job_id: i32) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "UPDATE {} SET status = 'processing', started_at = COALESCE(started_at, NOW()) WHERE id = $1 AND status = 'pending'",
            kind.table()
        );
        let result = sqlx::query(&sql).bind(job_id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Mark a processing job complete.
    ///
    /// The total is pinned to what was actually processed, so an empty job
    /// finishes at 0% and rows that vanished mid-export don't linger in it.
    pub async fn complete_job(&self, kind: JobKind, job_id: i32) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"UPDATE {} SET status = 'completed',
                   total_records = processed_records,
                   progress_percentage = CASE WHEN processed_records > 0 THEN 100 ELSE 0 END,
                   completed_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
            kind.table()
        );
        let result = sqlx::query(&sql).bind(job_id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Mark a pending or processing job failed, recording the error.
    pub async fn fail_job(
        &self,
        kind: JobKind,
        job_id: i32,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "UPDATE {} SET status = 'failed', error = $2, completed_at = NOW() WHERE id = $1 AND status IN ('pending', 'processing')",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Cancel a job that has not finished yet.
    ///
    /// Fails with [`JobError::NotCancellable`] once the job reached a terminal state.
    pub async fn cancel_job(&self, kind: JobKind, job_id: i32) -> JobResult<()> {
        let sql = format!(
            "UPDATE {} SET status = 'cancelled', error = 'Job cancelled by user', completed_at = NOW() WHERE id = $1 AND status IN ('pending', 'processing')",
            kind.table()
        );
        let result = sqlx::query(&sql).bind(job_id).execute(&self.pool).await?;

        if result.rows_affected() == 1 {
            log::info!("{} job {}: cancelled by user", kind.label(), job_id);
            return Ok(());
        }

        match self.status(kind, job_id).await? {
            None => Err(JobError::NotFound(job_id)),
            Some(status) => Err(JobError::NotCancellable(status)),
        }
    }

    /// Current status of a job, if it exists.
    pub async fn status(&self, kind: JobKind, job_id: i32) -> Result<Option<JobStatus>, sqlx::Error> {
        let sql = format!("SELECT status FROM {} WHERE id = $1", kind.table());
        let row: Option<(JobStatus,)> = sqlx::query_as(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(status,)| status))
    }

    /// Number of jobs in each status, for the dashboard.
    pub async fn counts_by_status(
        &self,
        kind: JobKind,
    ) -> Result<Vec<(JobStatus, i64)>, sqlx::Error> {
        let sql = format!(
            "SELECT status, COUNT(*) FROM {} GROUP BY status ORDER BY status",
            kind.table()
        );
        sqlx::query_as(&sql).fetch_all(&self.pool).await
    }

    /// Check if a job was cancelled (polled between batches).
    pub async fn is_job_cancelled(&self, kind: JobKind, job_id: i32) -> Result<bool, sqlx::Error> {
        Ok(self.status(kind, job_id).await? == Some(JobStatus::Cancelled))
    }
}
