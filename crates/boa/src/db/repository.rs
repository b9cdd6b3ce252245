//! Repositories: typed access to all entities
//!
//! Every method either runs a single statement or wraps its steps in its own
//! transaction, so concurrent callers sharing the pool stay consistent.
//! Compositions that must be atomic across entities (the ledger's
//! iteration/decision/observation flows) use the `insert_in`-style helpers
//! against a caller-supplied connection.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{
    Artifact, Campaign, CampaignLock, CampaignStatus, Checkpoint, Decision, Iteration,
    Observation, Process, Proposal,
};
use crate::error::{BoaError, BoaResult};

fn to_json(value: &impl serde::Serialize) -> BoaResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_to_json(value: &Option<impl serde::Serialize>) -> BoaResult<Option<String>> {
    value.as_ref().map(|v| to_json(v)).transpose()
}

fn is_unique_violation(err: &sqlx::Error, needle: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed")
        && db.message().contains(needle))
}

// ========================================
// Processes
// ========================================

/// Repository for versioned process definitions
#[derive(Clone)]
pub struct ProcessRepository {
    pool: SqlitePool,
}

impl ProcessRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a process version. Any prior active version with the same name
    /// is deactivated in the same transaction.
    pub async fn create(&self, process: Process) -> BoaResult<Process> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE processes SET is_active = 0, updated_at = ? WHERE name = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(&process.name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO processes (id, name, description, spec_yaml, spec_parsed_json, version, is_active, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&process.id)
        .bind(&process.name)
        .bind(&process.description)
        .bind(&process.spec_yaml)
        .bind(to_json(&process.spec_parsed)?)
        .bind(process.version)
        .bind(process.is_active)
        .bind(to_json(&process.metadata)?)
        .bind(process.created_at)
        .bind(process.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("Created process {} v{}", process.name, process.version);
        Ok(process)
    }

    pub async fn get(&self, id: &str) -> BoaResult<Option<Process>> {
        let process = sqlx::query_as("SELECT * FROM processes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(process)
    }

    pub async fn get_or_fail(&self, id: &str) -> BoaResult<Process> {
        self.get(id)
            .await?
            .ok_or_else(|| BoaError::not_found("process", id))
    }

    /// Latest active version by name
    pub async fn get_active_by_name(&self, name: &str) -> BoaResult<Option<Process>> {
        let process = sqlx::query_as(
            "SELECT * FROM processes WHERE name = ? AND is_active = 1 ORDER BY version DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(process)
    }

    pub async fn get_by_name_and_version(
        &self,
        name: &str,
        version: i64,
    ) -> BoaResult<Option<Process>> {
        let process = sqlx::query_as("SELECT * FROM processes WHERE name = ? AND version = ?")
            .bind(name)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(process)
    }

    /// Next version number for a process name (1 when unused)
    pub async fn next_version(&self, name: &str) -> BoaResult<i64> {
        let max: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(version) FROM processes WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(max.and_then(|(v,)| v).unwrap_or(0) + 1)
    }

    pub async fn list(
        &self,
        name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> BoaResult<Vec<Process>> {
        let processes = match name {
            Some(name) => {
                sqlx::query_as(
                    "SELECT * FROM processes WHERE name = ? ORDER BY name, version DESC LIMIT ? OFFSET ?",
                )
                .bind(name)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM processes ORDER BY name, version DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(processes)
    }

    /// Update mutable fields (description, metadata). Specs are never
    /// mutated in place; new versions supersede.
    pub async fn update(&self, process: &Process) -> BoaResult<()> {
        sqlx::query(
            "UPDATE processes SET description = ?, metadata_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&process.description)
        .bind(to_json(&process.metadata)?)
        .bind(Utc::now())
        .bind(&process.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a process. Fails with a repository error while campaigns
    /// reference it (foreign keys are enforced).
    pub async fn delete(&self, id: &str) -> BoaResult<bool> {
        let result = sqlx::query("DELETE FROM processes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ========================================
// Campaigns + write lock
// ========================================

/// Repository for campaigns, including the write-lock protocol
#[derive(Clone)]
pub struct CampaignRepository {
    pool: SqlitePool,
}

impl CampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create(&self, campaign: Campaign) -> BoaResult<Campaign> {
        sqlx::query(
            "INSERT INTO campaigns (id, process_id, name, description, status, strategy_config_json, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&campaign.id)
        .bind(&campaign.process_id)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(campaign.status.to_string())
        .bind(to_json(&campaign.strategy_config)?)
        .bind(to_json(&campaign.metadata)?)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!("Created campaign {} ({})", campaign.name, campaign.id);
        Ok(campaign)
    }

    pub async fn get(&self, id: &str) -> BoaResult<Option<Campaign>> {
        let campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(campaign)
    }

    pub async fn get_or_fail(&self, id: &str) -> BoaResult<Campaign> {
        self.get(id)
            .await?
            .ok_or_else(|| BoaError::not_found("campaign", id))
    }

    pub async fn list(
        &self,
        process_id: Option<&str>,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> BoaResult<Vec<Campaign>> {
        let mut sql = String::from("SELECT * FROM campaigns WHERE 1 = 1");
        if process_id.is_some() {
            sql.push_str(" AND process_id = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query_as(&sql);
        if let Some(process_id) = process_id {
            query = query.bind(process_id.to_string());
        }
        if let Some(status) = status {
            query = query.bind(status.to_string());
        }
        let campaigns = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        Ok(campaigns)
    }

    pub async fn update(&self, campaign: &Campaign) -> BoaResult<()> {
        sqlx::query(
            "UPDATE campaigns SET name = ?, description = ?, strategy_config_json = ?, metadata_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(to_json(&campaign.strategy_config)?)
        .bind(to_json(&campaign.metadata)?)
        .bind(Utc::now())
        .bind(&campaign.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition campaign status, enforcing the lifecycle graph.
    pub async fn update_status(&self, id: &str, next: CampaignStatus) -> BoaResult<Campaign> {
        let mut tx = self.pool.begin().await?;
        let campaign = update_status_in(&mut tx, id, next).await?;
        tx.commit().await?;
        Ok(campaign)
    }

    /// Delete a campaign. Fails while iterations, observations or jobs
    /// reference it.
    pub async fn delete(&self, id: &str) -> BoaResult<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ----------------------------------------
    // Write-lock protocol
    // ----------------------------------------

    /// Acquire the campaign write lock.
    ///
    /// Succeeds when no non-expired record exists or the record is already
    /// held by `holder` (re-entry extends the expiry). Fails with
    /// `CampaignLocked` carrying the current holder and expiry otherwise.
    pub async fn acquire_write_lock(
        &self,
        campaign_id: &str,
        holder: &str,
        ttl_secs: f64,
    ) -> BoaResult<CampaignLock> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<CampaignLock> =
            sqlx::query_as("SELECT * FROM campaign_locks WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_optional(&mut *tx)
                .await?;

        let now = Utc::now();
        let expires_at = now + ChronoDuration::milliseconds((ttl_secs * 1000.0) as i64);

        if let Some(lock) = existing {
            if lock.locked_by != holder && !lock.is_expired() {
                return Err(BoaError::CampaignLocked {
                    campaign_id: campaign_id.to_string(),
                    locked_by: lock.locked_by,
                    expires_at: lock.expires_at,
                });
            }
        }

        // Absent, expired, or re-entry by the same holder
        sqlx::query(
            "INSERT INTO campaign_locks (campaign_id, locked_by, locked_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(campaign_id) DO UPDATE SET locked_by = ?, locked_at = ?, expires_at = ?",
        )
        .bind(campaign_id)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CampaignLock {
            campaign_id: campaign_id.to_string(),
            locked_by: holder.to_string(),
            locked_at: now,
            expires_at,
        })
    }

    /// Release the campaign write lock.
    ///
    /// With a holder, the record is only removed when it matches; without,
    /// the record is removed unconditionally. Idempotent.
    pub async fn release_write_lock(
        &self,
        campaign_id: &str,
        holder: Option<&str>,
    ) -> BoaResult<bool> {
        let result = match holder {
            Some(holder) => {
                sqlx::query("DELETE FROM campaign_locks WHERE campaign_id = ? AND locked_by = ?")
                    .bind(campaign_id)
                    .bind(holder)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM campaign_locks WHERE campaign_id = ?")
                    .bind(campaign_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    /// Whether the campaign currently holds a non-expired lock
    pub async fn is_locked(&self, campaign_id: &str) -> BoaResult<(bool, Option<CampaignLock>)> {
        let lock: Option<CampaignLock> =
            sqlx::query_as("SELECT * FROM campaign_locks WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_optional(&self.pool)
                .await?;

        match lock {
            Some(lock) if !lock.is_expired() => Ok((true, Some(lock))),
            other => Ok((false, other)),
        }
    }

    /// Periodic sweep removing expired lock records
    pub async fn cleanup_expired_locks(&self) -> BoaResult<u64> {
        let result = sqlx::query("DELETE FROM campaign_locks WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::debug!("Removed {} expired campaign locks", removed);
        }
        Ok(removed)
    }
}

pub(crate) async fn insert_campaign_in(
    conn: &mut SqliteConnection,
    campaign: &Campaign,
) -> BoaResult<()> {
    sqlx::query(
        "INSERT INTO campaigns (id, process_id, name, description, status, strategy_config_json, metadata_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&campaign.id)
    .bind(&campaign.process_id)
    .bind(&campaign.name)
    .bind(&campaign.description)
    .bind(campaign.status.to_string())
    .bind(to_json(&campaign.strategy_config)?)
    .bind(to_json(&campaign.metadata)?)
    .bind(campaign.created_at)
    .bind(campaign.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Status transition against a caller-supplied connection
pub(crate) async fn update_status_in(
    conn: &mut SqliteConnection,
    id: &str,
    next: CampaignStatus,
) -> BoaResult<Campaign> {
    let mut campaign: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| BoaError::not_found("campaign", id))?;

    if !campaign.status.can_transition_to(next) {
        return Err(BoaError::InvalidStateTransition {
            from: campaign.status.to_string(),
            to: next.to_string(),
        });
    }

    let now = Utc::now();
    sqlx::query("UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ?")
        .bind(next.to_string())
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    tracing::info!("Campaign {} transitioned {} -> {}", id, campaign.status, next);
    campaign.status = next;
    campaign.updated_at = Some(now);
    Ok(campaign)
}

// ========================================
// Iterations
// ========================================

#[derive(Clone)]
pub struct IterationRepository {
    pool: SqlitePool,
}

impl IterationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> BoaResult<Option<Iteration>> {
        let iteration = sqlx::query_as("SELECT * FROM iterations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(iteration)
    }

    pub async fn get_or_fail(&self, id: &str) -> BoaResult<Iteration> {
        self.get(id)
            .await?
            .ok_or_else(|| BoaError::not_found("iteration", id))
    }

    pub async fn list(&self, campaign_id: &str) -> BoaResult<Vec<Iteration>> {
        let iterations =
            sqlx::query_as("SELECT * FROM iterations WHERE campaign_id = ? ORDER BY idx ASC")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(iterations)
    }

    pub async fn latest(&self, campaign_id: &str) -> BoaResult<Option<Iteration>> {
        let iteration = sqlx::query_as(
            "SELECT * FROM iterations WHERE campaign_id = ? ORDER BY idx DESC LIMIT 1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(iteration)
    }

    pub async fn by_index(&self, campaign_id: &str, index: i64) -> BoaResult<Option<Iteration>> {
        let iteration = sqlx::query_as("SELECT * FROM iterations WHERE campaign_id = ? AND idx = ?")
            .bind(campaign_id)
            .bind(index)
            .fetch_optional(&self.pool)
            .await?;
        Ok(iteration)
    }

    pub async fn count(&self, campaign_id: &str) -> BoaResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM iterations WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

pub(crate) async fn insert_iteration_in(
    conn: &mut SqliteConnection,
    iteration: &Iteration,
) -> BoaResult<()> {
    sqlx::query(
        "INSERT INTO iterations (id, campaign_id, idx, dataset_hash, metadata_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&iteration.id)
    .bind(&iteration.campaign_id)
    .bind(iteration.index)
    .bind(&iteration.dataset_hash)
    .bind(to_json(&iteration.metadata)?)
    .bind(iteration.created_at)
    .bind(iteration.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn latest_iteration_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
) -> BoaResult<Option<Iteration>> {
    let iteration =
        sqlx::query_as("SELECT * FROM iterations WHERE campaign_id = ? ORDER BY idx DESC LIMIT 1")
            .bind(campaign_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(iteration)
}

pub(crate) async fn list_iterations_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
) -> BoaResult<Vec<Iteration>> {
    let iterations =
        sqlx::query_as("SELECT * FROM iterations WHERE campaign_id = ? ORDER BY idx ASC")
            .bind(campaign_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(iterations)
}

pub(crate) async fn get_campaign_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> BoaResult<Campaign> {
    let campaign: Option<Campaign> = sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    campaign.ok_or_else(|| BoaError::not_found("campaign", id))
}

pub(crate) async fn list_proposals_in(
    conn: &mut SqliteConnection,
    iteration_id: &str,
) -> BoaResult<Vec<Proposal>> {
    let proposals = sqlx::query_as(
        "SELECT * FROM proposals WHERE iteration_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(iteration_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(proposals)
}

pub(crate) async fn get_decision_in(
    conn: &mut SqliteConnection,
    iteration_id: &str,
) -> BoaResult<Option<Decision>> {
    let decision = sqlx::query_as("SELECT * FROM decisions WHERE iteration_id = ?")
        .bind(iteration_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(decision)
}

pub(crate) async fn list_observations_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
) -> BoaResult<Vec<Observation>> {
    let observations = sqlx::query_as(
        "SELECT * FROM observations WHERE campaign_id = ? ORDER BY observed_at ASC, created_at ASC, rowid ASC",
    )
    .bind(campaign_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(observations)
}

// ========================================
// Proposals
// ========================================

#[derive(Clone)]
pub struct ProposalRepository {
    pool: SqlitePool,
}

impl ProposalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> BoaResult<Option<Proposal>> {
        let proposal = sqlx::query_as("SELECT * FROM proposals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(proposal)
    }

    pub async fn get_or_fail(&self, id: &str) -> BoaResult<Proposal> {
        self.get(id)
            .await?
            .ok_or_else(|| BoaError::not_found("proposal", id))
    }

    pub async fn list(&self, iteration_id: &str) -> BoaResult<Vec<Proposal>> {
        let proposals = sqlx::query_as(
            "SELECT * FROM proposals WHERE iteration_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(iteration_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(proposals)
    }
}

pub(crate) async fn insert_proposal_in(
    conn: &mut SqliteConnection,
    proposal: &Proposal,
) -> BoaResult<()> {
    sqlx::query(
        "INSERT INTO proposals (id, iteration_id, strategy_name, candidates_raw_json, candidates_encoded_json, acq_values_json, predictions_json, metadata_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&proposal.id)
    .bind(&proposal.iteration_id)
    .bind(&proposal.strategy_name)
    .bind(to_json(&proposal.candidates_raw)?)
    .bind(opt_to_json(&proposal.candidates_encoded)?)
    .bind(opt_to_json(&proposal.acq_values)?)
    .bind(opt_to_json(&proposal.predictions)?)
    .bind(to_json(&proposal.metadata)?)
    .bind(proposal.created_at)
    .bind(proposal.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ========================================
// Decisions
// ========================================

#[derive(Clone)]
pub struct DecisionRepository {
    pool: SqlitePool,
}

impl DecisionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_iteration(&self, iteration_id: &str) -> BoaResult<Option<Decision>> {
        let decision = sqlx::query_as("SELECT * FROM decisions WHERE iteration_id = ?")
            .bind(iteration_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(decision)
    }
}

pub(crate) async fn insert_decision_in(
    conn: &mut SqliteConnection,
    decision: &Decision,
) -> BoaResult<()> {
    let result = sqlx::query(
        "INSERT INTO decisions (id, iteration_id, accepted_json, notes, metadata_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&decision.id)
    .bind(&decision.iteration_id)
    .bind(to_json(&decision.accepted)?)
    .bind(&decision.notes)
    .bind(to_json(&decision.metadata)?)
    .bind(decision.created_at)
    .bind(decision.updated_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err, "decisions.iteration_id") => {
            Err(BoaError::DecisionAlreadyExists {
                iteration_id: decision.iteration_id.clone(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

// ========================================
// Observations
// ========================================

#[derive(Clone)]
pub struct ObservationRepository {
    pool: SqlitePool,
}

impl ObservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> BoaResult<Option<Observation>> {
        let observation = sqlx::query_as("SELECT * FROM observations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(observation)
    }

    /// Observations ordered by observed_at, then insertion order
    pub async fn list(&self, campaign_id: &str) -> BoaResult<Vec<Observation>> {
        let observations = sqlx::query_as(
            "SELECT * FROM observations WHERE campaign_id = ? ORDER BY observed_at ASC, created_at ASC, rowid ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(observations)
    }

    pub async fn count(&self, campaign_id: &str) -> BoaResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM observations WHERE campaign_id = ?")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

pub(crate) async fn insert_observation_in(
    conn: &mut SqliteConnection,
    observation: &Observation,
) -> BoaResult<()> {
    sqlx::query(
        "INSERT INTO observations (id, campaign_id, x_raw_json, x_encoded_json, y_json, source, observed_at, metadata_json, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&observation.id)
    .bind(&observation.campaign_id)
    .bind(to_json(&observation.x_raw)?)
    .bind(opt_to_json(&observation.x_encoded)?)
    .bind(to_json(&observation.y)?)
    .bind(&observation.source)
    .bind(observation.observed_at)
    .bind(to_json(&observation.metadata)?)
    .bind(observation.created_at)
    .bind(observation.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ========================================
// Checkpoints & artifacts
// ========================================

#[derive(Clone)]
pub struct CheckpointRepository {
    pool: SqlitePool,
}

impl CheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, checkpoint: Checkpoint) -> BoaResult<Checkpoint> {
        sqlx::query(
            "INSERT INTO checkpoints (id, campaign_id, iteration_id, path, file_size_bytes, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.campaign_id)
        .bind(&checkpoint.iteration_id)
        .bind(&checkpoint.path)
        .bind(checkpoint.file_size_bytes)
        .bind(to_json(&checkpoint.metadata)?)
        .bind(checkpoint.created_at)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(checkpoint)
    }

    pub async fn list(&self, campaign_id: &str) -> BoaResult<Vec<Checkpoint>> {
        let checkpoints = sqlx::query_as(
            "SELECT * FROM checkpoints WHERE campaign_id = ? ORDER BY created_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(checkpoints)
    }
}

#[derive(Clone)]
pub struct ArtifactRepository {
    pool: SqlitePool,
}

impl ArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, artifact: Artifact) -> BoaResult<Artifact> {
        sqlx::query(
            "INSERT INTO artifacts (id, campaign_id, iteration_id, artifact_type, name, path, file_size_bytes, content_type, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&artifact.id)
        .bind(&artifact.campaign_id)
        .bind(&artifact.iteration_id)
        .bind(&artifact.artifact_type)
        .bind(&artifact.name)
        .bind(&artifact.path)
        .bind(artifact.file_size_bytes)
        .bind(&artifact.content_type)
        .bind(to_json(&artifact.metadata)?)
        .bind(artifact.created_at)
        .bind(artifact.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(artifact)
    }

    pub async fn list(&self, campaign_id: &str) -> BoaResult<Vec<Artifact>> {
        let artifacts =
            sqlx::query_as("SELECT * FROM artifacts WHERE campaign_id = ? ORDER BY created_at ASC")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(artifacts)
    }
}

/// Convenience bundle used by the engine and bundle exporter
#[derive(Clone)]
pub struct Repositories {
    pub processes: ProcessRepository,
    pub campaigns: CampaignRepository,
    pub iterations: IterationRepository,
    pub proposals: ProposalRepository,
    pub decisions: DecisionRepository,
    pub observations: ObservationRepository,
    pub checkpoints: CheckpointRepository,
    pub artifacts: ArtifactRepository,
}

impl Repositories {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            processes: ProcessRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool.clone()),
            iterations: IterationRepository::new(pool.clone()),
            proposals: ProposalRepository::new(pool.clone()),
            decisions: DecisionRepository::new(pool.clone()),
            observations: ObservationRepository::new(pool.clone()),
            checkpoints: CheckpointRepository::new(pool.clone()),
            artifacts: ArtifactRepository::new(pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::JsonMap;
    use crate::db::Db;

    async fn setup() -> (Db, Process, Campaign) {
        let db = Db::in_memory().await.unwrap();
        let processes = ProcessRepository::new(db.pool().clone());
        let campaigns = CampaignRepository::new(db.pool().clone());

        let process = processes
            .create(Process::new(
                "proc".to_string(),
                "name: proc\n".to_string(),
                serde_json::json!({}),
                1,
            ))
            .await
            .unwrap();
        let campaign = campaigns
            .create(Campaign::new(process.id.clone(), "camp".to_string()))
            .await
            .unwrap();

        (db, process, campaign)
    }

    #[tokio::test]
    async fn test_process_versioning_deactivates_previous() {
        let (db, first, _) = setup().await;
        let processes = ProcessRepository::new(db.pool().clone());

        let second = processes
            .create(Process::new(
                "proc".to_string(),
                "name: proc\nversion: 2\n".to_string(),
                serde_json::json!({}),
                2,
            ))
            .await
            .unwrap();

        let reloaded_first = processes.get_or_fail(&first.id).await.unwrap();
        assert!(!reloaded_first.is_active);
        let active = processes.get_active_by_name("proc").await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        // Invariant 7: at most one active version per name
        let all = processes.list(Some("proc"), 100, 0).await.unwrap();
        assert_eq!(all.iter().filter(|p| p.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_next_version_monotonic() {
        let (db, _, _) = setup().await;
        let processes = ProcessRepository::new(db.pool().clone());
        assert_eq!(processes.next_version("proc").await.unwrap(), 2);
        assert_eq!(processes.next_version("unknown").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_campaign_status_transitions() {
        let (db, _, campaign) = setup().await;
        let campaigns = CampaignRepository::new(db.pool().clone());

        let updated = campaigns
            .update_status(&campaign.id, CampaignStatus::Active)
            .await
            .unwrap();
        assert_eq!(updated.status, CampaignStatus::Active);
        assert!(updated.updated_at.is_some());

        let err = campaigns
            .update_status(&campaign.id, CampaignStatus::Created)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[tokio::test]
    async fn test_lock_acquire_conflict_and_reentry() {
        let (db, _, campaign) = setup().await;
        let campaigns = CampaignRepository::new(db.pool().clone());

        campaigns
            .acquire_write_lock(&campaign.id, "worker_1", 30.0)
            .await
            .unwrap();

        let err = campaigns
            .acquire_write_lock(&campaign.id, "worker_2", 30.0)
            .await
            .unwrap_err();
        match err {
            BoaError::CampaignLocked { locked_by, .. } => assert_eq!(locked_by, "worker_1"),
            other => panic!("unexpected: {:?}", other),
        }

        // Same holder re-enters and extends the expiry
        let lock = campaigns
            .acquire_write_lock(&campaign.id, "worker_1", 60.0)
            .await
            .unwrap();
        assert_eq!(lock.locked_by, "worker_1");
    }

    #[tokio::test]
    async fn test_lock_release_checks_holder() {
        let (db, _, campaign) = setup().await;
        let campaigns = CampaignRepository::new(db.pool().clone());

        campaigns
            .acquire_write_lock(&campaign.id, "worker_1", 30.0)
            .await
            .unwrap();

        let released = campaigns
            .release_write_lock(&campaign.id, Some("worker_2"))
            .await
            .unwrap();
        assert!(!released);
        let (locked, lock) = campaigns.is_locked(&campaign.id).await.unwrap();
        assert!(locked);
        assert_eq!(lock.unwrap().locked_by, "worker_1");

        let released = campaigns
            .release_write_lock(&campaign.id, Some("worker_1"))
            .await
            .unwrap();
        assert!(released);
        let (locked, _) = campaigns.is_locked(&campaign.id).await.unwrap();
        assert!(!locked);
    }

    #[tokio::test]
    async fn test_expired_lock_is_acquirable_and_swept() {
        let (db, _, campaign) = setup().await;
        let campaigns = CampaignRepository::new(db.pool().clone());

        // TTL in the past makes the lock immediately expired
        campaigns
            .acquire_write_lock(&campaign.id, "worker_1", -1.0)
            .await
            .unwrap();
        let (locked, _) = campaigns.is_locked(&campaign.id).await.unwrap();
        assert!(!locked);

        let lock = campaigns
            .acquire_write_lock(&campaign.id, "worker_2", 30.0)
            .await
            .unwrap();
        assert_eq!(lock.locked_by, "worker_2");

        campaigns
            .acquire_write_lock(&campaign.id, "worker_2", -1.0)
            .await
            .unwrap();
        let removed = campaigns.cleanup_expired_locks().await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_decision_unique_per_iteration() {
        let (db, _, campaign) = setup().await;
        let iteration = Iteration::new(campaign.id.clone(), 0);
        let mut conn = db.pool().acquire().await.unwrap();
        insert_iteration_in(&mut conn, &iteration).await.unwrap();

        let first = Decision::new(iteration.id.clone(), vec![]);
        insert_decision_in(&mut conn, &first).await.unwrap();

        let second = Decision::new(iteration.id.clone(), vec![]);
        let err = insert_decision_in(&mut conn, &second).await.unwrap_err();
        assert_eq!(err.code(), "DECISION_ALREADY_EXISTS");

        // First decision intact
        let decisions = DecisionRepository::new(db.pool().clone());
        let stored = decisions.get_by_iteration(&iteration.id).await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn test_observation_ordering() {
        let (db, _, campaign) = setup().await;
        let observations = ObservationRepository::new(db.pool().clone());
        let mut conn = db.pool().acquire().await.unwrap();

        let mut early = Observation::new(
            campaign.id.clone(),
            JsonMap::new(),
            JsonMap::new(),
            "user".to_string(),
        );
        early.observed_at = Utc::now() - ChronoDuration::hours(1);
        let late = Observation::new(
            campaign.id.clone(),
            JsonMap::new(),
            JsonMap::new(),
            "user".to_string(),
        );

        // Insert out of order; list returns observed_at order
        insert_observation_in(&mut conn, &late).await.unwrap();
        insert_observation_in(&mut conn, &early).await.unwrap();

        let listed = observations.list(&campaign.id).await.unwrap();
        assert_eq!(listed[0].id, early.id);
        assert_eq!(listed[1].id, late.id);
    }
}
