//! Durable FIFO job queue
//!
//! Single-table queue with atomic PENDING -> RUNNING handoff, so a job is
//! only ever seen by one worker. The queue does not execute work; a worker
//! loop outside the core polls, runs and reports back.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;

use crate::db::models::{Job, JobStatus, JobType, JsonMap};
use crate::error::{BoaError, BoaResult};

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a new PENDING job to the queue
    pub async fn enqueue(
        &self,
        job_type: JobType,
        params: JsonMap,
        campaign_id: Option<String>,
    ) -> BoaResult<Job> {
        let job = Job::new(job_type, params, campaign_id);
        sqlx::query(
            "INSERT INTO jobs (id, campaign_id, job_type, status, params_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.campaign_id)
        .bind(job.job_type.to_string())
        .bind(job.status.to_string())
        .bind(serde_json::to_string(&job.params)?)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Enqueued {} job {}", job.job_type, job.id);
        Ok(job)
    }

    /// Take the oldest PENDING job, atomically transitioning it to RUNNING.
    /// Returns None when the queue is empty; never mutates in that case.
    pub async fn dequeue(&self) -> BoaResult<Option<Job>> {
        let now = Utc::now();
        let claimed: Option<(String,)> = sqlx::query_as(
            "UPDATE jobs SET status = 'running', started_at = ?, updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC LIMIT 1
             ) AND status = 'pending'
             RETURNING id",
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some((id,)) => Ok(Some(self.get_or_fail(&id).await?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> BoaResult<Option<Job>> {
        let job = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_or_fail(&self, id: &str) -> BoaResult<Job> {
        self.get(id)
            .await?
            .ok_or_else(|| BoaError::JobNotFound(id.to_string()))
    }

    /// RUNNING -> COMPLETED with optional result; progress snaps to 1
    pub async fn complete(&self, id: &str, result: Option<JsonMap>) -> BoaResult<Job> {
        let job = self.get_or_fail(id).await?;
        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = 'completed', result_json = ?, progress = 1.0, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(now)
        .bind(now)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        self.get_or_fail(id).await
    }

    /// RUNNING -> FAILED with an error message
    pub async fn fail(&self, id: &str, error: &str) -> BoaResult<Job> {
        let job = self.get_or_fail(id).await?;
        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        self.get_or_fail(id).await
    }

    /// Cancel a PENDING job. Fails on RUNNING jobs; no-op on terminal ones.
    pub async fn cancel(&self, id: &str) -> BoaResult<Job> {
        let job = self.get_or_fail(id).await?;

        if job.status == JobStatus::Running {
            return Err(BoaError::JobAlreadyRunning(id.to_string()));
        }
        if job.status.is_terminal() {
            return Ok(job);
        }

        let now = Utc::now();
        // Guard on status so a concurrent dequeue cannot be overwritten
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(now)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let job = self.get_or_fail(id).await?;
            if job.status == JobStatus::Running {
                return Err(BoaError::JobAlreadyRunning(id.to_string()));
            }
            return Ok(job);
        }
        self.get_or_fail(id).await
    }

    /// Update progress, clamped to [0, 1]
    pub async fn update_progress(&self, id: &str, progress: f64) -> BoaResult<Job> {
        let job = self.get_or_fail(id).await?;
        sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(progress.clamp(0.0, 1.0))
            .bind(Utc::now())
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        self.get_or_fail(id).await
    }

    /// List jobs with optional filters, newest first
    pub async fn list(
        &self,
        campaign_id: Option<&str>,
        status: Option<JobStatus>,
        job_type: Option<JobType>,
        limit: i64,
        offset: i64,
    ) -> BoaResult<Vec<Job>> {
        let mut sql = String::from("SELECT * FROM jobs WHERE 1 = 1");
        if campaign_id.is_some() {
            sql.push_str(" AND campaign_id = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if job_type.is_some() {
            sql.push_str(" AND job_type = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as(&sql);
        if let Some(campaign_id) = campaign_id {
            query = query.bind(campaign_id.to_string());
        }
        if let Some(status) = status {
            query = query.bind(status.to_string());
        }
        if let Some(job_type) = job_type {
            query = query.bind(job_type.to_string());
        }
        let jobs = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(jobs)
    }

    pub async fn count_pending(&self, campaign_id: Option<&str>) -> BoaResult<i64> {
        self.count_status("pending", campaign_id).await
    }

    pub async fn count_running(&self, campaign_id: Option<&str>) -> BoaResult<i64> {
        self.count_status("running", campaign_id).await
    }

    async fn count_status(&self, status: &str, campaign_id: Option<&str>) -> BoaResult<i64> {
        let (count,): (i64,) = match campaign_id {
            Some(campaign_id) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM jobs WHERE status = ? AND campaign_id = ?",
                )
                .bind(status)
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = ?")
                    .bind(status)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Mark RUNNING jobs older than `max_age_secs` as FAILED (crashed
    /// workers). Cooperative only; no in-flight interruption is attempted.
    pub async fn cleanup_stale(&self, max_age_secs: u64) -> BoaResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::seconds(max_age_secs as i64);
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = ?, completed_at = ?, updated_at = ?
             WHERE status = 'running' AND started_at < ?",
        )
        .bind(format!("Job timed out after {} seconds", max_age_secs))
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            tracing::warn!("Reclaimed {} stale running jobs as failed", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Remove old terminal jobs, keeping the `keep_last` most recent
    pub async fn cleanup_completed(&self, keep_last: i64) -> BoaResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'cancelled')
             AND id NOT IN (
                 SELECT id FROM jobs WHERE status IN ('completed', 'failed', 'cancelled')
                 ORDER BY completed_at DESC LIMIT ?
             )",
        )
        .bind(keep_last)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    async fn queue() -> (Db, JobQueue) {
        let db = Db::in_memory().await.unwrap();
        let queue = JobQueue::new(db.pool().clone());
        (db, queue)
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (_db, queue) = queue().await;

        let job = queue
            .enqueue(JobType::Propose, JsonMap::new(), None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let running = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(running.id, job.id);
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        let mut result = JsonMap::new();
        result.insert("n".to_string(), serde_json::json!(3));
        let completed = queue.complete(&job.id, Some(result)).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.progress, Some(1.0));
        assert!(completed.completed_at.is_some());

        // Cancel on a terminal job is a no-op
        let cancelled = queue.cancel(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_dequeue_empty_returns_none() {
        let (_db, queue) = queue().await;
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (_db, queue) = queue().await;

        let first = queue
            .enqueue(JobType::Export, JsonMap::new(), None)
            .await
            .unwrap();
        let second = queue
            .enqueue(JobType::Import, JsonMap::new(), None)
            .await
            .unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, first.id);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second.id);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending_and_running() {
        let (_db, queue) = queue().await;

        let job = queue
            .enqueue(JobType::Benchmark, JsonMap::new(), None)
            .await
            .unwrap();
        let cancelled = queue.cancel(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // A cancelled job is never dequeued
        assert!(queue.dequeue().await.unwrap().is_none());

        let job = queue
            .enqueue(JobType::Propose, JsonMap::new(), None)
            .await
            .unwrap();
        queue.dequeue().await.unwrap().unwrap();
        let err = queue.cancel(&job.id).await.unwrap_err();
        assert_eq!(err.code(), "JOB_ALREADY_RUNNING");
    }

    #[tokio::test]
    async fn test_progress_clamped() {
        let (_db, queue) = queue().await;
        let job = queue
            .enqueue(JobType::Propose, JsonMap::new(), None)
            .await
            .unwrap();

        let updated = queue.update_progress(&job.id, 1.7).await.unwrap();
        assert_eq!(updated.progress, Some(1.0));
        let updated = queue.update_progress(&job.id, -0.3).await.unwrap();
        assert_eq!(updated.progress, Some(0.0));
    }

    #[tokio::test]
    async fn test_cleanup_stale_reclaims_running() {
        let (db, queue) = queue().await;
        let job = queue
            .enqueue(JobType::Propose, JsonMap::new(), None)
            .await
            .unwrap();
        queue.dequeue().await.unwrap().unwrap();

        // Age the job past the threshold
        sqlx::query("UPDATE jobs SET started_at = ? WHERE id = ?")
            .bind(Utc::now() - ChronoDuration::hours(2))
            .bind(&job.id)
            .execute(db.pool())
            .await
            .unwrap();

        let reclaimed = queue.cleanup_stale(3600).await.unwrap();
        assert_eq!(reclaimed, 1);
        let failed = queue.get_or_fail(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cleanup_completed_keeps_recent() {
        let (_db, queue) = queue().await;

        for _ in 0..5 {
            let job = queue
                .enqueue(JobType::Export, JsonMap::new(), None)
                .await
                .unwrap();
            queue.dequeue().await.unwrap().unwrap();
            queue.complete(&job.id, None).await.unwrap();
        }

        let removed = queue.cleanup_completed(2).await.unwrap();
        assert_eq!(removed, 3);
        let remaining = queue.list(None, None, None, 100, 0).await.unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (db, queue) = queue().await;

        let processes = crate::db::repository::ProcessRepository::new(db.pool().clone());
        let campaigns = crate::db::repository::CampaignRepository::new(db.pool().clone());
        let process = processes
            .create(crate::db::models::Process::new(
                "p".to_string(),
                "name: p\n".to_string(),
                serde_json::json!({}),
                1,
            ))
            .await
            .unwrap();
        let c1 = campaigns
            .create(crate::db::models::Campaign::new(
                process.id.clone(),
                "c1".to_string(),
            ))
            .await
            .unwrap();
        let c2 = campaigns
            .create(crate::db::models::Campaign::new(
                process.id.clone(),
                "c2".to_string(),
            ))
            .await
            .unwrap();

        queue
            .enqueue(JobType::Propose, JsonMap::new(), Some(c1.id.clone()))
            .await
            .unwrap();
        queue
            .enqueue(JobType::Export, JsonMap::new(), Some(c2.id.clone()))
            .await
            .unwrap();

        let for_c1 = queue.list(Some(&c1.id), None, None, 100, 0).await.unwrap();
        assert_eq!(for_c1.len(), 1);
        let exports = queue
            .list(None, None, Some(JobType::Export), 100, 0)
            .await
            .unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(queue.count_pending(None).await.unwrap(), 2);
        assert_eq!(queue.count_running(None).await.unwrap(), 0);
    }
}
