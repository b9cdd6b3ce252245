//! Shared application state

use boa::db::job_queue::JobQueue;
use boa::db::repository::Repositories;
use boa::BoaConfig;
use sqlx::SqlitePool;

/// State shared by all request handlers and the worker
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: BoaConfig,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: BoaConfig) -> Self {
        Self { pool, config }
    }

    pub fn repos(&self) -> Repositories {
        Repositories::new(self.pool.clone())
    }

    pub fn job_queue(&self) -> JobQueue {
        JobQueue::new(self.pool.clone())
    }
}
