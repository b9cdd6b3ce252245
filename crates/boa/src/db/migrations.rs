//! Database migrations

/// Schema for all BOA tables
pub const MIGRATION_SQL: &str = r#"
-- processes: versioned problem definitions
CREATE TABLE IF NOT EXISTS processes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    spec_yaml TEXT NOT NULL,
    spec_parsed_json TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_processes_name ON processes(name);

-- campaigns: runs against a process version
CREATE TABLE IF NOT EXISTS campaigns (
    id TEXT PRIMARY KEY,
    process_id TEXT NOT NULL REFERENCES processes(id),
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'created',
    strategy_config_json TEXT NOT NULL DEFAULT '{}',
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_campaigns_name ON campaigns(name);
CREATE INDEX IF NOT EXISTS idx_campaigns_process ON campaigns(process_id);
CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status);

-- observations: experiment results
CREATE TABLE IF NOT EXISTS observations (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id),
    x_raw_json TEXT NOT NULL,
    x_encoded_json TEXT,
    y_json TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'user',
    observed_at TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_observations_campaign ON observations(campaign_id);

-- iterations: optimization cycles, 0-based and gap-free per campaign
CREATE TABLE IF NOT EXISTS iterations (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id),
    idx INTEGER NOT NULL,
    dataset_hash TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT,
    UNIQUE(campaign_id, idx)
);
CREATE INDEX IF NOT EXISTS idx_iterations_campaign ON iterations(campaign_id);

-- proposals: one strategy's output within an iteration
CREATE TABLE IF NOT EXISTS proposals (
    id TEXT PRIMARY KEY,
    iteration_id TEXT NOT NULL REFERENCES iterations(id),
    strategy_name TEXT NOT NULL,
    candidates_raw_json TEXT NOT NULL,
    candidates_encoded_json TEXT,
    acq_values_json TEXT,
    predictions_json TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_proposals_iteration ON proposals(iteration_id);
CREATE INDEX IF NOT EXISTS idx_proposals_strategy ON proposals(strategy_name);

-- decisions: at most one per iteration
CREATE TABLE IF NOT EXISTS decisions (
    id TEXT PRIMARY KEY,
    iteration_id TEXT NOT NULL UNIQUE REFERENCES iterations(id),
    accepted_json TEXT NOT NULL,
    notes TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);

-- checkpoints: fitted surrogate snapshots
CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id),
    iteration_id TEXT REFERENCES iterations(id),
    path TEXT NOT NULL,
    file_size_bytes INTEGER,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_campaign ON checkpoints(campaign_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_iteration ON checkpoints(iteration_id);

-- artifacts: generic named files (plots, reports, exports)
CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id),
    iteration_id TEXT REFERENCES iterations(id),
    artifact_type TEXT NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    file_size_bytes INTEGER,
    content_type TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_artifacts_campaign ON artifacts(campaign_id);
CREATE INDEX IF NOT EXISTS idx_artifacts_type ON artifacts(artifact_type);

-- jobs: durable FIFO of background work
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    campaign_id TEXT REFERENCES campaigns(id),
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    params_json TEXT NOT NULL DEFAULT '{}',
    result_json TEXT,
    error TEXT,
    progress REAL,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_campaign ON jobs(campaign_id);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_type ON jobs(job_type);
CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);

-- campaign_locks: mutual exclusion per campaign
CREATE TABLE IF NOT EXISTS campaign_locks (
    campaign_id TEXT PRIMARY KEY REFERENCES campaigns(id),
    locked_by TEXT NOT NULL,
    locked_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_locks_expires ON campaign_locks(expires_at);
"#;

/// Run the migration statement by statement
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<(), sqlx::Error> {
    for statement in MIGRATION_SQL.split(';') {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement).execute(pool).await?;
        }
    }
    Ok(())
}
