//! Campaign engine
//!
//! Wires repositories, spec loading, strategy executors, the ledger and
//! the checkpointer for one campaign. Every mutating operation acquires
//! the campaign's write lock, runs inside one database transaction,
//! commits, and releases the lock on both success and failure.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::core::analyzer::{CampaignAnalyzer, CampaignMetrics, ParetoPoint};
use crate::core::checkpointer::ModelCheckpointer;
use crate::core::executor::{ExecutionResult, StrategyExecutor};
use crate::core::ledger::{PendingCandidate, ProposalLedger};
use crate::db::models::{
    AcceptedCandidates, Campaign, CampaignStatus, Checkpoint, Iteration, JsonMap, Observation,
    Process, Proposal,
};
use crate::db::repository::Repositories;
use crate::error::{BoaError, BoaResult};
use crate::spec::encoder::MixedSpaceEncoder;
use crate::spec::loader::load_process_spec;
use crate::spec::models::{ProcessSpec, StrategySpec};

/// Default write-lock TTL in seconds
pub const DEFAULT_LOCK_TTL_SECS: f64 = 30.0;

/// Orchestrates one campaign
pub struct CampaignEngine {
    pool: SqlitePool,
    repos: Repositories,
    campaign: Campaign,
    #[allow(dead_code)]
    process: Process,
    spec: ProcessSpec,
    encoder: MixedSpaceEncoder,
    ledger: ProposalLedger,
    checkpoint_dir: Option<PathBuf>,
    lock_ttl_secs: f64,
    /// Lock holder identity for this engine instance
    holder: String,
}

impl CampaignEngine {
    pub async fn new(
        pool: SqlitePool,
        campaign_id: &str,
        checkpoint_dir: Option<PathBuf>,
    ) -> BoaResult<Self> {
        let repos = Repositories::new(pool.clone());
        let campaign = repos.campaigns.get_or_fail(campaign_id).await?;
        let process = repos.processes.get_or_fail(&campaign.process_id).await?;

        // The stored spec was validated when the process was created
        let spec = load_process_spec(&process.spec_yaml, false)?;
        let encoder = MixedSpaceEncoder::new(&spec);
        let ledger = ProposalLedger::new(campaign.id.clone(), spec.clone());

        Ok(Self {
            pool,
            repos,
            campaign,
            process,
            spec,
            encoder,
            ledger,
            checkpoint_dir,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            holder: format!("engine-{}", Uuid::new_v4()),
        })
    }

    pub fn with_lock_ttl(mut self, ttl_secs: f64) -> Self {
        self.lock_ttl_secs = ttl_secs;
        self
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign.id
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn executor_for(&self, strategy: &StrategySpec) -> StrategyExecutor {
        StrategyExecutor::new(&self.spec, strategy.clone())
    }

    fn strategies(&self, names: Option<&[String]>) -> BoaResult<Vec<StrategySpec>> {
        let available = self.spec.effective_strategies();
        match names {
            None => Ok(available),
            Some(names) => {
                let mut selected = Vec::new();
                for name in names {
                    let strategy = available
                        .iter()
                        .find(|s| &s.name == name)
                        .ok_or_else(|| BoaError::not_found("strategy", name.clone()))?;
                    selected.push(strategy.clone());
                }
                Ok(selected)
            }
        }
    }

    async fn acquire_lock(&self) -> BoaResult<()> {
        self.repos
            .campaigns
            .acquire_write_lock(&self.campaign.id, &self.holder, self.lock_ttl_secs)
            .await?;
        Ok(())
    }

    async fn release_lock(&self) {
        if let Err(e) = self
            .repos
            .campaigns
            .release_write_lock(&self.campaign.id, Some(&self.holder))
            .await
        {
            tracing::warn!("Failed to release lock for {}: {}", self.campaign.id, e);
        }
    }

    /// Current training data: encoded inputs and raw objective values, with
    /// NaN for missing objective cells. The analyzer sees raw data; only
    /// the modeling path drops incomplete rows.
    pub async fn training_data(&self) -> BoaResult<(Array2<f64>, Array2<f64>)> {
        let observations = self.repos.observations.list(&self.campaign.id).await?;
        self.build_arrays(&observations)
    }

    fn build_arrays(
        &self,
        observations: &[Observation],
    ) -> BoaResult<(Array2<f64>, Array2<f64>)> {
        let d = self.encoder.n_encoded();
        let p = self.spec.objectives.len();
        let n = observations.len();

        let mut x = Array2::zeros((n, d));
        let mut y = Array2::from_elem((n, p), f64::NAN);
        for (i, obs) in observations.iter().enumerate() {
            let encoded = self.encoder.encode_single(&obs.x_raw)?;
            for j in 0..d {
                x[[i, j]] = encoded[j];
            }
            for (j, obj) in self.spec.objectives.iter().enumerate() {
                if let Some(v) = obs.y.get(&obj.name).and_then(serde_json::Value::as_f64) {
                    y[[i, j]] = v;
                }
            }
        }
        Ok((x, y))
    }

    /// Content hash of the current (X, Y) for reproducibility tracking
    pub async fn compute_dataset_hash(&self) -> BoaResult<String> {
        let (x, y) = self.training_data().await?;
        Ok(dataset_hash(&x, &y))
    }

    /// Run the initial design phase: sampler output recorded as iteration 0
    /// (or the next index) with one proposal.
    pub async fn initial_design(
        &self,
        n_samples: usize,
        strategy_name: Option<&str>,
    ) -> BoaResult<ExecutionResult> {
        let strategies = self.spec.effective_strategies();
        let strategy = match strategy_name {
            Some(name) => strategies
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| BoaError::not_found("strategy", name))?,
            None => strategies[0].clone(),
        };

        self.acquire_lock().await?;
        let result = self.initial_design_locked(n_samples, strategy).await;
        self.release_lock().await;
        result
    }

    async fn initial_design_locked(
        &self,
        n_samples: usize,
        strategy: StrategySpec,
    ) -> BoaResult<ExecutionResult> {
        let executor = self.executor_for(&strategy);
        let result = executor.execute_initial_design(n_samples)?;

        let mut tx = self.pool.begin().await?;
        let iteration = self.ledger.start_iteration(&mut tx, None).await?;
        self.ledger
            .add_proposal(
                &mut tx,
                &iteration,
                &result.strategy_name,
                result.candidates_raw.clone(),
                Some(rows_of(&result.candidates_encoded)),
                None,
                None,
                result.metadata.clone(),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Generated {} initial design samples for campaign {}",
            n_samples,
            self.campaign.id
        );
        Ok(result)
    }

    /// Run one optimization iteration across the requested strategies.
    pub async fn optimization_iteration(
        &self,
        n_candidates: usize,
        strategy_names: Option<&[String]>,
        ref_point: Option<&Array1<f64>>,
    ) -> BoaResult<BTreeMap<String, ExecutionResult>> {
        let strategies = self.strategies(strategy_names)?;

        self.acquire_lock().await?;
        let result = self
            .optimization_iteration_locked(n_candidates, strategies, ref_point)
            .await;
        self.release_lock().await;
        result
    }

    async fn optimization_iteration_locked(
        &self,
        n_candidates: usize,
        strategies: Vec<StrategySpec>,
        ref_point: Option<&Array1<f64>>,
    ) -> BoaResult<BTreeMap<String, ExecutionResult>> {
        let (x, y) = self.training_data().await?;
        if x.nrows() == 0 {
            return Err(BoaError::Validation(
                "No training data. Run initial design first.".to_string(),
            ));
        }
        let hash = dataset_hash(&x, &y);

        // Model fits are CPU-bound; run them before taking the database
        // writer so independent campaigns stay parallel
        let mut executed = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let executor = self.executor_for(&strategy);
            let result = executor.execute_optimization(&x, &y, n_candidates, ref_point)?;
            executed.push((strategy, result));
        }

        let mut tx = self.pool.begin().await?;
        let iteration = self.ledger.start_iteration(&mut tx, Some(hash)).await?;

        let mut results = BTreeMap::new();
        for (strategy, result) in executed {
            let acq_values = result
                .acq_values
                .as_ref()
                .map(|values| values.iter().map(|&v| finite_or_none(v)).collect());
            let predictions = result.predictions.as_ref().map(predictions_to_json);

            self.ledger
                .add_proposal(
                    &mut tx,
                    &iteration,
                    &result.strategy_name,
                    result.candidates_raw.clone(),
                    Some(rows_of(&result.candidates_encoded)),
                    acq_values,
                    predictions,
                    result.metadata.clone(),
                )
                .await?;

            if let (Some(dir), Some(state)) = (&self.checkpoint_dir, &result.model_state) {
                self.write_checkpoint(&mut tx, dir.clone(), &iteration, &strategy, state.clone())
                    .await?;
            }

            results.insert(strategy.name.clone(), result);
        }
        tx.commit().await?;

        tracing::info!(
            "Iteration {}: generated {} candidates from {} strategies",
            iteration.index,
            n_candidates,
            results.len()
        );
        Ok(results)
    }

    async fn write_checkpoint(
        &self,
        tx: &mut sqlx::SqliteConnection,
        dir: PathBuf,
        iteration: &Iteration,
        strategy: &StrategySpec,
        state: serde_json::Value,
    ) -> BoaResult<()> {
        let checkpointer = ModelCheckpointer::new(dir, Some(&self.campaign.id))?;
        let mut metadata = JsonMap::new();
        metadata.insert("model".to_string(), serde_json::json!(strategy.model));
        let path =
            checkpointer.save(state, iteration.index, &strategy.name, metadata.clone())?;

        let mut checkpoint = Checkpoint::new(self.campaign.id.clone(), path.clone());
        checkpoint.iteration_id = Some(iteration.id.clone());
        checkpoint.file_size_bytes = Some(checkpointer.get_file_size(&path) as i64);
        checkpoint.metadata = metadata;

        sqlx::query(
            "INSERT INTO checkpoints (id, campaign_id, iteration_id, path, file_size_bytes, metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.campaign_id)
        .bind(&checkpoint.iteration_id)
        .bind(&checkpoint.path)
        .bind(checkpoint.file_size_bytes)
        .bind(serde_json::to_string(&checkpoint.metadata)?)
        .bind(checkpoint.created_at)
        .execute(&mut *tx)
        .await?;

        tracing::debug!("Saved checkpoint {}", checkpoint.path);
        Ok(())
    }

    /// Record which candidates of the current iteration were accepted.
    pub async fn accept_candidates(
        &self,
        accepted: Vec<AcceptedCandidates>,
        notes: Option<String>,
    ) -> BoaResult<()> {
        self.acquire_lock().await?;
        let result = self.accept_candidates_locked(accepted, notes).await;
        self.release_lock().await;
        result
    }

    async fn accept_candidates_locked(
        &self,
        accepted: Vec<AcceptedCandidates>,
        notes: Option<String>,
    ) -> BoaResult<()> {
        let mut tx = self.pool.begin().await?;
        let iteration = self
            .ledger
            .current_iteration(&mut tx)
            .await?
            .ok_or_else(|| BoaError::Validation("No current iteration".to_string()))?;
        self.ledger
            .record_decision(&mut tx, &iteration, accepted, notes)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Accepted candidates for iteration {} of campaign {}",
            iteration.index,
            self.campaign.id
        );
        Ok(())
    }

    /// Validate, encode and persist one observation.
    pub async fn add_observation(
        &self,
        x_raw: JsonMap,
        y: JsonMap,
        source: &str,
        observed_at: Option<DateTime<Utc>>,
    ) -> BoaResult<Observation> {
        self.acquire_lock().await?;
        let result = self
            .add_observations_locked(vec![(x_raw, y, observed_at)], source)
            .await
            .map(|mut list| list.remove(0));
        self.release_lock().await;
        result
    }

    /// Validate, encode and persist a batch of observations atomically.
    pub async fn add_observations_batch(
        &self,
        observations: Vec<(JsonMap, JsonMap)>,
        source: &str,
    ) -> BoaResult<Vec<Observation>> {
        self.acquire_lock().await?;
        let result = self
            .add_observations_locked(
                observations
                    .into_iter()
                    .map(|(x, y)| (x, y, None))
                    .collect(),
                source,
            )
            .await;
        self.release_lock().await;
        result
    }

    async fn add_observations_locked(
        &self,
        observations: Vec<(JsonMap, JsonMap, Option<DateTime<Utc>>)>,
        source: &str,
    ) -> BoaResult<Vec<Observation>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(observations.len());
        for (x_raw, y, observed_at) in observations {
            let x_encoded = self.encoder.encode_single(&x_raw)?.to_vec();
            created.push(
                self.ledger
                    .add_observation(
                        &mut tx,
                        x_raw,
                        y,
                        Some(x_encoded),
                        source,
                        observed_at,
                        JsonMap::new(),
                    )
                    .await?,
            );
        }
        tx.commit().await?;
        Ok(created)
    }

    /// Campaign metrics over all observations.
    pub async fn analyze(&self, ref_point: Option<Array1<f64>>) -> BoaResult<CampaignMetrics> {
        let observations = self.repos.observations.list(&self.campaign.id).await?;
        let n_iterations = self.repos.iterations.count(&self.campaign.id).await?;
        let analyzer = CampaignAnalyzer::new(&self.spec, observations, ref_point);
        let mut metrics = analyzer.compute_metrics();
        metrics.n_iterations = n_iterations as usize;
        Ok(metrics)
    }

    /// Pareto-optimal observations.
    pub async fn pareto_front(&self) -> BoaResult<Vec<ParetoPoint>> {
        let observations = self.repos.observations.list(&self.campaign.id).await?;
        let analyzer = CampaignAnalyzer::new(&self.spec, observations, None);
        Ok(analyzer.pareto_set())
    }

    /// Accepted-but-unobserved candidates.
    pub async fn pending_candidates(&self) -> BoaResult<Vec<PendingCandidate>> {
        let mut conn = self.pool.acquire().await?;
        self.ledger.pending_candidates(&mut conn).await
    }

    pub async fn iterations(&self) -> BoaResult<Vec<Iteration>> {
        self.repos.iterations.list(&self.campaign.id).await
    }

    pub async fn iteration_proposals(&self, index: i64) -> BoaResult<Vec<Proposal>> {
        let iteration = self
            .repos
            .iterations
            .by_index(&self.campaign.id, index)
            .await?
            .ok_or_else(|| BoaError::not_found("iteration", index.to_string()))?;
        self.repos.proposals.list(&iteration.id).await
    }

    pub async fn pause(&self) -> BoaResult<Campaign> {
        self.transition(CampaignStatus::Paused).await
    }

    pub async fn resume(&self) -> BoaResult<Campaign> {
        self.transition(CampaignStatus::Active).await
    }

    pub async fn complete(&self) -> BoaResult<Campaign> {
        self.transition(CampaignStatus::Completed).await
    }

    async fn transition(&self, next: CampaignStatus) -> BoaResult<Campaign> {
        self.acquire_lock().await?;
        let result = self
            .repos
            .campaigns
            .update_status(&self.campaign.id, next)
            .await;
        self.release_lock().await;
        result
    }
}

/// SHA-256 content hash of the training arrays, truncated to 16 hex chars
pub fn dataset_hash(x: &Array2<f64>, y: &Array2<f64>) -> String {
    let payload = serde_json::json!({
        "X": rows_of(x),
        "Y": rows_of(y),
    });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut hash = hex::encode(digest);
    hash.truncate(16);
    hash
}

fn rows_of(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

fn finite_or_none(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// Predictions as JSON with non-finite cells written as null
fn predictions_to_json(predictions: &crate::core::executor::Predictions) -> serde_json::Value {
    let scrub = |rows: &Vec<Vec<f64>>| -> serde_json::Value {
        serde_json::Value::Array(
            rows.iter()
                .map(|row| {
                    serde_json::Value::Array(
                        row.iter()
                            .map(|&v| match finite_or_none(v) {
                                Some(v) => serde_json::json!(v),
                                None => serde_json::Value::Null,
                            })
                            .collect(),
                    )
                })
                .collect(),
        )
    };
    serde_json::json!({
        "mean": scrub(&predictions.mean),
        "std": scrub(&predictions.std),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_hash_is_stable_and_sensitive() {
        let x = Array2::from_shape_vec((2, 1), vec![0.1, 0.9]).unwrap();
        let y = Array2::from_shape_vec((2, 1), vec![1.0, 81.0]).unwrap();

        let a = dataset_hash(&x, &y);
        let b = dataset_hash(&x, &y);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let y2 = Array2::from_shape_vec((2, 1), vec![1.0, 80.0]).unwrap();
        assert_ne!(a, dataset_hash(&x, &y2));
    }

    #[test]
    fn test_predictions_json_scrubs_nan() {
        let predictions = crate::core::executor::Predictions {
            mean: vec![vec![1.0, f64::NAN]],
            std: vec![vec![0.5, f64::INFINITY]],
        };
        let json = predictions_to_json(&predictions);
        assert_eq!(json["mean"][0][0], 1.0);
        assert!(json["mean"][0][1].is_null());
        assert!(json["std"][0][1].is_null());
    }
}
