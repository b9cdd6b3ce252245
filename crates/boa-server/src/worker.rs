//! Background job worker
//!
//! Polls the durable queue on a fixed interval, executes one job at a
//! time, and reports results or failures back. Also sweeps stale RUNNING
//! jobs and expired campaign locks. Cancellation is cooperative: a job
//! that is already running is never interrupted.

use std::time::Duration;

use boa::bundle::{CampaignExporter, CampaignImporter};
use boa::core::engine::CampaignEngine;
use boa::db::models::{Job, JobType, JsonMap};
use boa::error::{BoaError, BoaResult};
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Sweep stale jobs and expired locks every this many poll cycles
const SWEEP_EVERY: u64 = 60;

/// Run the worker loop until the token is cancelled
pub async fn run(state: AppState, shutdown: CancellationToken) {
    let queue = state.job_queue();
    let poll_interval = Duration::from_secs_f64(state.config.worker_poll_secs.max(0.05));
    let mut cycles: u64 = 0;

    tracing::info!(
        "Job worker started (poll interval {:?})",
        poll_interval
    );

    loop {
        if shutdown.is_cancelled() {
            tracing::info!("Job worker shutting down");
            return;
        }

        cycles += 1;
        if cycles % SWEEP_EVERY == 0 {
            if let Err(e) = queue.cleanup_stale(state.config.job_stale_secs).await {
                tracing::warn!("Stale job sweep failed: {}", e);
            }
            if let Err(e) = state.repos().campaigns.cleanup_expired_locks().await {
                tracing::warn!("Lock sweep failed: {}", e);
            }
        }

        let job = match queue.dequeue().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => continue,
                    _ = shutdown.cancelled() => continue,
                }
            }
            Err(e) => {
                tracing::error!("Dequeue failed: {}", e);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let job_id = job.id.clone();
        tracing::info!("Running {} job {}", job.job_type, job_id);

        match execute(&state, &job).await {
            Ok(result) => {
                if let Err(e) = queue.complete(&job_id, result).await {
                    tracing::error!("Failed to complete job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                tracing::warn!("Job {} failed: {}", job_id, e);
                if let Err(e) = queue.fail(&job_id, &e.to_string()).await {
                    tracing::error!("Failed to mark job {} failed: {}", job_id, e);
                }
            }
        }
    }
}

async fn execute(state: &AppState, job: &Job) -> BoaResult<Option<JsonMap>> {
    match job.job_type {
        JobType::Propose => execute_propose(state, job).await,
        JobType::Export => execute_export(state, job).await,
        JobType::Import => execute_import(state, job).await,
        JobType::Benchmark => execute_benchmark(job).await,
    }
}

fn require_campaign_id(job: &Job) -> BoaResult<String> {
    job.campaign_id
        .clone()
        .or_else(|| {
            job.params
                .get("campaign_id")
                .and_then(Json::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| BoaError::Validation("Job requires a campaign_id".to_string()))
}

async fn execute_propose(state: &AppState, job: &Job) -> BoaResult<Option<JsonMap>> {
    let campaign_id = require_campaign_id(job)?;
    let n_candidates = job
        .params
        .get("n_candidates")
        .and_then(Json::as_u64)
        .unwrap_or(1) as usize;
    let strategies: Option<Vec<String>> = job
        .params
        .get("strategies")
        .and_then(Json::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect()
        });

    let engine = CampaignEngine::new(
        state.pool.clone(),
        &campaign_id,
        Some(state.config.checkpoint_dir.clone()),
    )
    .await?;
    let results = engine
        .optimization_iteration(n_candidates, strategies.as_deref(), None)
        .await?;

    let mut result = JsonMap::new();
    result.insert(
        "strategies".to_string(),
        serde_json::json!(results.keys().collect::<Vec<_>>()),
    );
    result.insert("n_candidates".to_string(), serde_json::json!(n_candidates));
    Ok(Some(result))
}

async fn execute_export(state: &AppState, job: &Job) -> BoaResult<Option<JsonMap>> {
    let campaign_id = require_campaign_id(job)?;
    let bundle = CampaignExporter::new(state.repos())
        .export(&campaign_id)
        .await?;

    let mut result = JsonMap::new();
    result.insert("bundle".to_string(), serde_json::to_value(&bundle)?);
    Ok(Some(result))
}

async fn execute_import(state: &AppState, job: &Job) -> BoaResult<Option<JsonMap>> {
    let bundle = job
        .params
        .get("bundle")
        .ok_or_else(|| BoaError::Validation("Import job requires a bundle param".to_string()))?;
    let campaign_id = CampaignImporter::new(state.repos()).import(bundle).await?;

    let mut result = JsonMap::new();
    result.insert("campaign_id".to_string(), serde_json::json!(campaign_id));
    Ok(Some(result))
}

async fn execute_benchmark(job: &Job) -> BoaResult<Option<JsonMap>> {
    use boa::benchmarks::{
        Benchmark, BenchmarkRunner, Dtlz1, Dtlz2, Dtlz3, Dtlz4, RunConfig, Zdt1, Zdt2, Zdt3,
    };

    let problem = job
        .params
        .get("problem")
        .and_then(Json::as_str)
        .unwrap_or("zdt1")
        .to_string();
    let n_var = job.params.get("n_var").and_then(Json::as_u64).unwrap_or(6) as usize;
    let config = RunConfig {
        n_initial: job
            .params
            .get("n_initial")
            .and_then(Json::as_u64)
            .unwrap_or(10) as usize,
        n_iterations: job
            .params
            .get("n_iterations")
            .and_then(Json::as_u64)
            .unwrap_or(10) as usize,
        n_candidates: job
            .params
            .get("n_candidates")
            .and_then(Json::as_u64)
            .unwrap_or(1) as usize,
        seed: job.params.get("seed").and_then(Json::as_u64),
    };

    // Benchmark runs are CPU-bound; keep them off the async executor
    let result = tokio::task::spawn_blocking(move || -> BoaResult<_> {
        let benchmark: Box<dyn Benchmark> = match problem.as_str() {
            "zdt1" => Box::new(Zdt1::new(n_var)),
            "zdt2" => Box::new(Zdt2::new(n_var)),
            "zdt3" => Box::new(Zdt3::new(n_var)),
            "dtlz1" => Box::new(Dtlz1::new(n_var, 3)),
            "dtlz2" => Box::new(Dtlz2::new(n_var, 3)),
            "dtlz3" => Box::new(Dtlz3::new(n_var, 3)),
            "dtlz4" => Box::new(Dtlz4::new(n_var, 3)),
            other => {
                return Err(BoaError::Validation(format!(
                    "Unknown benchmark problem: {}",
                    other
                )))
            }
        };
        let runner = BenchmarkRunner::new(benchmark.as_ref())?;
        runner.run(None, &config)
    })
    .await
    .map_err(|e| BoaError::Execution {
        plugin: "benchmark".to_string(),
        message: e.to_string(),
    })??;

    let mut output = JsonMap::new();
    output.insert("result".to_string(), serde_json::to_value(&result)?);
    output.insert("summary".to_string(), serde_json::json!(result.summary()));
    Ok(Some(output))
}
