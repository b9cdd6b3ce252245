//! Campaign bundle export/import
//!
//! A bundle is a straight JSON projection of stored state: process,
//! campaign, observations, iterations, proposals (flattened to one record
//! per candidate), decisions and checkpoint descriptors. Model binary
//! state is never embedded. Import refuses unknown bundle versions, reuses
//! an existing process by exact name match, and creates a new campaign
//! with a fresh id.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::db::models::{
    AcceptedCandidates, Campaign, CampaignStatus, Decision, Iteration, JsonMap, Observation,
    Process, Proposal,
};
use crate::db::repository::Repositories;
use crate::error::{BoaError, BoaResult};
use crate::spec::loader::load_process_spec;

/// Supported bundle format version
pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleProcess {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub spec_yaml: String,
    #[serde(default)]
    pub metadata: JsonMap,
}

fn default_version() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleCampaign {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleObservation {
    pub inputs: JsonMap,
    pub outputs: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleIteration {
    pub index: i64,
    #[serde(default)]
    pub acquisition_config: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleProposal {
    pub iteration_index: i64,
    pub candidate_index: usize,
    pub inputs: JsonMap,
    #[serde(default)]
    pub acquisition_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDecision {
    pub iteration_index: i64,
    #[serde(default)]
    pub selected_indices: Vec<usize>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleCheckpoint {
    pub iteration_index: Option<i64>,
    #[serde(default)]
    pub model_type: Option<String>,
}

/// An exported campaign bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub version: String,
    pub process: BundleProcess,
    pub campaign: BundleCampaign,
    #[serde(default)]
    pub observations: Vec<BundleObservation>,
    #[serde(default)]
    pub iterations: Vec<BundleIteration>,
    #[serde(default)]
    pub proposals: Vec<BundleProposal>,
    #[serde(default)]
    pub decisions: Vec<BundleDecision>,
    #[serde(default)]
    pub checkpoints: Vec<BundleCheckpoint>,
    #[serde(default)]
    pub metadata: JsonMap,
}

/// Validate a raw bundle value: version, process and campaign names.
pub fn validate_bundle(data: &Json) -> BoaResult<ExportBundle> {
    let version = data
        .get("version")
        .and_then(Json::as_str)
        .ok_or_else(|| BoaError::Validation("Missing required field: version".to_string()))?;
    if version != BUNDLE_VERSION {
        return Err(BoaError::Validation(format!(
            "Unsupported bundle version: {}",
            version
        )));
    }
    if data.get("process").and_then(|p| p.get("name")).is_none() {
        return Err(BoaError::Validation("Process must have a name".to_string()));
    }
    if data.get("campaign").and_then(|c| c.get("name")).is_none() {
        return Err(BoaError::Validation("Campaign must have a name".to_string()));
    }

    serde_json::from_value(data.clone())
        .map_err(|e| BoaError::Validation(format!("Invalid bundle: {}", e)))
}

/// Exports campaigns to the bundle format
pub struct CampaignExporter {
    repos: Repositories,
}

impl CampaignExporter {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn export(&self, campaign_id: &str) -> BoaResult<ExportBundle> {
        let campaign = self.repos.campaigns.get_or_fail(campaign_id).await?;
        let process = self.repos.processes.get_or_fail(&campaign.process_id).await?;
        let observations = self.repos.observations.list(campaign_id).await?;
        let iterations = self.repos.iterations.list(campaign_id).await?;
        let checkpoints = self.repos.checkpoints.list(campaign_id).await?;

        let mut proposals = Vec::new();
        let mut decisions = Vec::new();
        for iteration in &iterations {
            for proposal in self.repos.proposals.list(&iteration.id).await? {
                for (candidate_index, inputs) in proposal.candidates_raw.iter().enumerate() {
                    proposals.push(BundleProposal {
                        iteration_index: iteration.index,
                        candidate_index,
                        inputs: inputs.clone(),
                        acquisition_value: proposal
                            .acq_values
                            .as_ref()
                            .and_then(|v| v.get(candidate_index).copied())
                            .flatten(),
                    });
                }
            }

            if let Some(decision) = self.repos.decisions.get_by_iteration(&iteration.id).await? {
                decisions.push(BundleDecision {
                    iteration_index: iteration.index,
                    selected_indices: decision
                        .accepted
                        .iter()
                        .flat_map(|a| a.candidate_indices.iter().copied())
                        .collect(),
                    reason: decision.notes.clone(),
                });
            }
        }

        let iteration_by_id: HashMap<&str, i64> = iterations
            .iter()
            .map(|it| (it.id.as_str(), it.index))
            .collect();

        Ok(ExportBundle {
            version: BUNDLE_VERSION.to_string(),
            process: BundleProcess {
                name: process.name,
                version: process.version,
                spec_yaml: process.spec_yaml,
                metadata: process.metadata,
            },
            campaign: BundleCampaign {
                name: campaign.name,
                status: Some(campaign.status.to_string()),
                metadata: campaign.metadata,
            },
            observations: observations
                .into_iter()
                .map(|obs| BundleObservation {
                    inputs: obs.x_raw,
                    outputs: obs.y,
                    metadata: obs.metadata,
                })
                .collect(),
            iterations: iterations
                .iter()
                .map(|it| BundleIteration {
                    index: it.index,
                    acquisition_config: it.metadata.clone(),
                })
                .collect(),
            proposals,
            decisions,
            checkpoints: checkpoints
                .into_iter()
                .map(|cp| BundleCheckpoint {
                    iteration_index: cp
                        .iteration_id
                        .as_deref()
                        .and_then(|id| iteration_by_id.get(id).copied()),
                    model_type: cp
                        .metadata
                        .get("model")
                        .and_then(Json::as_str)
                        .map(str::to_string),
                })
                .collect(),
            metadata: JsonMap::new(),
        })
    }

    pub async fn export_to_file(&self, campaign_id: &str, path: &Path) -> BoaResult<()> {
        let bundle = self.export(campaign_id).await?;
        let json = serde_json::to_string_pretty(&bundle)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Imports campaigns from the bundle format
pub struct CampaignImporter {
    repos: Repositories,
}

impl CampaignImporter {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Import a bundle, returning the created campaign id. The imported
    /// campaign starts ACTIVE regardless of the exported status.
    pub async fn import(&self, data: &Json) -> BoaResult<String> {
        let bundle = validate_bundle(data)?;

        let process = self.get_or_create_process(&bundle.process).await?;

        let mut campaign = Campaign::new(process.id.clone(), bundle.campaign.name.clone());
        campaign.status = CampaignStatus::Active;
        campaign.metadata = bundle.campaign.metadata.clone();

        // Everything below commits or rolls back together
        let pool = self.pool();
        let mut tx = pool.begin().await?;
        crate::db::repository::insert_campaign_in(&mut tx, &campaign).await?;

        for obs_data in &bundle.observations {
            let mut observation = Observation::new(
                campaign.id.clone(),
                obs_data.inputs.clone(),
                obs_data.outputs.clone(),
                "import".to_string(),
            );
            observation.metadata = obs_data.metadata.clone();
            crate::db::repository::insert_observation_in(&mut tx, &observation).await?;
        }

        // Iterations first, then proposals and decisions mapped by index
        let mut iteration_ids: HashMap<i64, String> = HashMap::new();
        for iter_data in &bundle.iterations {
            let mut iteration = Iteration::new(campaign.id.clone(), iter_data.index);
            iteration.metadata = iter_data.acquisition_config.clone();
            crate::db::repository::insert_iteration_in(&mut tx, &iteration).await?;
            iteration_ids.insert(iteration.index, iteration.id.clone());
        }

        // Bundle proposals are per-candidate rows; regroup per iteration
        let mut grouped: HashMap<i64, Vec<&BundleProposal>> = HashMap::new();
        for proposal in &bundle.proposals {
            grouped
                .entry(proposal.iteration_index)
                .or_default()
                .push(proposal);
        }
        let mut proposal_ids: HashMap<i64, String> = HashMap::new();
        for (iteration_index, mut candidates) in grouped {
            let Some(iteration_id) = iteration_ids.get(&iteration_index) else {
                continue;
            };
            candidates.sort_by_key(|c| c.candidate_index);
            let mut proposal = Proposal::new(
                iteration_id.clone(),
                "import".to_string(),
                candidates.iter().map(|c| c.inputs.clone()).collect(),
            );
            proposal.acq_values = Some(
                candidates
                    .iter()
                    .map(|c| c.acquisition_value)
                    .collect(),
            );
            crate::db::repository::insert_proposal_in(&mut tx, &proposal).await?;
            proposal_ids.insert(iteration_index, proposal.id.clone());
        }

        for dec_data in &bundle.decisions {
            let Some(iteration_id) = iteration_ids.get(&dec_data.iteration_index) else {
                continue;
            };
            let accepted = match proposal_ids.get(&dec_data.iteration_index) {
                Some(proposal_id) => vec![AcceptedCandidates {
                    proposal_id: proposal_id.clone(),
                    candidate_indices: dec_data.selected_indices.clone(),
                }],
                None => Vec::new(),
            };
            let mut decision = Decision::new(iteration_id.clone(), accepted);
            decision.notes = dec_data.reason.clone();
            crate::db::repository::insert_decision_in(&mut tx, &decision).await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Imported campaign {} with {} observations",
            campaign.id,
            bundle.observations.len()
        );
        Ok(campaign.id)
    }

    pub async fn import_from_file(&self, path: &Path) -> BoaResult<String> {
        let content = std::fs::read_to_string(path)?;
        let data: Json = serde_json::from_str(&content)?;
        self.import(&data).await
    }

    async fn get_or_create_process(&self, process_data: &BundleProcess) -> BoaResult<Process> {
        // Reuse an existing process by exact name match
        if let Some(existing) = self
            .repos
            .processes
            .get_active_by_name(&process_data.name)
            .await?
        {
            return Ok(existing);
        }

        // Parse so the stored spec_parsed stays consistent with the YAML
        let spec_parsed = match load_process_spec(&process_data.spec_yaml, false) {
            Ok(spec) => serde_json::to_value(&spec)?,
            Err(_) => serde_json::json!({}),
        };

        let mut process = Process::new(
            process_data.name.clone(),
            process_data.spec_yaml.clone(),
            spec_parsed,
            process_data.version,
        );
        process.metadata = process_data.metadata.clone();
        self.repos.processes.create(process).await
    }

    fn pool(&self) -> sqlx::SqlitePool {
        self.repos.campaigns.pool().clone()
    }
}
