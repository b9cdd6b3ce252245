//! Proposal ledger
//!
//! The authoritative sequence of iterations, proposals, decisions and
//! observations for one campaign. Every operation takes a caller-supplied
//! connection so the engine can run a whole mutating operation inside one
//! transaction under the campaign write lock.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db::models::{
    AcceptedCandidates, CampaignStatus, Decision, Iteration, JsonMap, Observation, Proposal,
};
use crate::db::repository::{
    get_campaign_in, get_decision_in, insert_decision_in, insert_iteration_in,
    insert_observation_in, insert_proposal_in, latest_iteration_in, list_iterations_in,
    list_observations_in, list_proposals_in, update_status_in,
};
use crate::error::{BoaError, BoaResult};
use crate::spec::models::ProcessSpec;
use serde::Serialize;

/// An accepted-but-unobserved candidate
#[derive(Debug, Clone, Serialize)]
pub struct PendingCandidate {
    pub x_raw: JsonMap,
    pub iteration_index: i64,
    pub strategy_name: String,
}

/// Ledger over one campaign
pub struct ProposalLedger {
    campaign_id: String,
    spec: ProcessSpec,
}

impl ProposalLedger {
    pub fn new(campaign_id: String, spec: ProcessSpec) -> Self {
        Self { campaign_id, spec }
    }

    /// Most recent iteration, or none
    pub async fn current_iteration(
        &self,
        conn: &mut SqliteConnection,
    ) -> BoaResult<Option<Iteration>> {
        latest_iteration_in(conn, &self.campaign_id).await
    }

    /// Create the next iteration with index = previous + 1 (or 0). A CREATED
    /// campaign is promoted to ACTIVE in the same transaction.
    pub async fn start_iteration(
        &self,
        conn: &mut SqliteConnection,
        dataset_hash: Option<String>,
    ) -> BoaResult<Iteration> {
        let campaign = get_campaign_in(conn, &self.campaign_id).await?;
        if !campaign.status.accepts_writes() {
            return Err(BoaError::Validation(format!(
                "Campaign {} is {} and does not accept new iterations",
                self.campaign_id, campaign.status
            )));
        }

        let current = latest_iteration_in(conn, &self.campaign_id).await?;
        let next_index = current.map(|it| it.index + 1).unwrap_or(0);

        let mut iteration = Iteration::new(self.campaign_id.clone(), next_index);
        iteration.dataset_hash = dataset_hash;
        insert_iteration_in(conn, &iteration).await?;

        if campaign.status == CampaignStatus::Created {
            update_status_in(conn, &self.campaign_id, CampaignStatus::Active).await?;
        }

        tracing::info!(
            "Started iteration {} for campaign {}",
            next_index,
            self.campaign_id
        );
        Ok(iteration)
    }

    /// Append a proposal to an iteration. Multiple proposals per iteration
    /// are permitted (one per strategy run).
    #[allow(clippy::too_many_arguments)]
    pub async fn add_proposal(
        &self,
        conn: &mut SqliteConnection,
        iteration: &Iteration,
        strategy_name: &str,
        candidates_raw: Vec<JsonMap>,
        candidates_encoded: Option<Vec<Vec<f64>>>,
        acq_values: Option<Vec<Option<f64>>>,
        predictions: Option<serde_json::Value>,
        metadata: JsonMap,
    ) -> BoaResult<Proposal> {
        let campaign = get_campaign_in(conn, &self.campaign_id).await?;
        if !campaign.status.accepts_writes() {
            return Err(BoaError::Validation(format!(
                "Campaign {} is {} and does not accept proposals",
                self.campaign_id, campaign.status
            )));
        }

        let n_candidates = candidates_raw.len();
        let mut proposal = Proposal::new(
            iteration.id.clone(),
            strategy_name.to_string(),
            candidates_raw,
        );
        proposal.candidates_encoded = candidates_encoded;
        proposal.acq_values = acq_values;
        proposal.predictions = predictions;
        proposal.metadata = metadata;

        insert_proposal_in(conn, &proposal).await?;
        tracing::info!(
            "Added proposal from {} with {} candidates",
            strategy_name,
            n_candidates
        );
        Ok(proposal)
    }

    pub async fn proposals(
        &self,
        conn: &mut SqliteConnection,
        iteration_id: &str,
    ) -> BoaResult<Vec<Proposal>> {
        list_proposals_in(conn, iteration_id).await
    }

    /// Record the single decision for an iteration. Candidate indices must
    /// be in range of the referenced proposal's candidate list.
    pub async fn record_decision(
        &self,
        conn: &mut SqliteConnection,
        iteration: &Iteration,
        accepted: Vec<AcceptedCandidates>,
        notes: Option<String>,
    ) -> BoaResult<Decision> {
        if let Some(existing) = get_decision_in(conn, &iteration.id).await? {
            return Err(BoaError::DecisionAlreadyExists {
                iteration_id: existing.iteration_id,
            });
        }

        let proposals = list_proposals_in(conn, &iteration.id).await?;
        for accept in &accepted {
            let proposal = proposals
                .iter()
                .find(|p| p.id == accept.proposal_id)
                .ok_or_else(|| BoaError::not_found("proposal", accept.proposal_id.clone()))?;
            for &idx in &accept.candidate_indices {
                if idx >= proposal.candidates_raw.len() {
                    return Err(BoaError::Validation(format!(
                        "Candidate index {} out of range for proposal {} ({} candidates)",
                        idx,
                        proposal.id,
                        proposal.candidates_raw.len()
                    )));
                }
            }
        }

        let mut decision = Decision::new(iteration.id.clone(), accepted);
        decision.notes = notes;
        insert_decision_in(conn, &decision).await?;

        tracing::info!("Recorded decision for iteration {}", iteration.index);
        Ok(decision)
    }

    /// Validate and persist one observation. The input map must cover every
    /// input active under it; the output map must cover every objective.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_observation(
        &self,
        conn: &mut SqliteConnection,
        x_raw: JsonMap,
        y: JsonMap,
        x_encoded: Option<Vec<f64>>,
        source: &str,
        observed_at: Option<DateTime<Utc>>,
        metadata: JsonMap,
    ) -> BoaResult<Observation> {
        let campaign = get_campaign_in(conn, &self.campaign_id).await?;
        if !campaign.status.accepts_writes() {
            return Err(BoaError::Validation(format!(
                "Campaign {} is {} and does not accept observations",
                self.campaign_id, campaign.status
            )));
        }

        self.validate_observation(&x_raw, &y)?;

        let mut observation = Observation::new(
            self.campaign_id.clone(),
            x_raw,
            y,
            source.to_string(),
        );
        observation.x_encoded = x_encoded;
        if let Some(observed_at) = observed_at {
            observation.observed_at = observed_at;
        }
        observation.metadata = metadata;

        insert_observation_in(conn, &observation).await?;

        if campaign.status == CampaignStatus::Created {
            update_status_in(conn, &self.campaign_id, CampaignStatus::Active).await?;
        }

        tracing::debug!("Added observation for campaign {}", self.campaign_id);
        Ok(observation)
    }

    /// Validate and persist a batch. The caller's transaction makes the
    /// batch atomic; one bad observation rejects the whole list.
    pub async fn add_observations_batch(
        &self,
        conn: &mut SqliteConnection,
        observations: Vec<(JsonMap, JsonMap, Option<Vec<f64>>)>,
        source: &str,
    ) -> BoaResult<Vec<Observation>> {
        for (x_raw, y, _) in &observations {
            self.validate_observation(x_raw, y)?;
        }

        let mut created = Vec::with_capacity(observations.len());
        for (x_raw, y, x_encoded) in observations {
            created.push(
                self.add_observation(conn, x_raw, y, x_encoded, source, None, JsonMap::new())
                    .await?,
            );
        }

        tracing::info!("Added {} observations", created.len());
        Ok(created)
    }

    pub async fn observations(&self, conn: &mut SqliteConnection) -> BoaResult<Vec<Observation>> {
        list_observations_in(conn, &self.campaign_id).await
    }

    /// Accepted-but-unobserved candidates, matched by the canonicalized
    /// rendering of their raw inputs.
    pub async fn pending_candidates(
        &self,
        conn: &mut SqliteConnection,
    ) -> BoaResult<Vec<PendingCandidate>> {
        let iterations = list_iterations_in(conn, &self.campaign_id).await?;
        let observations = list_observations_in(conn, &self.campaign_id).await?;

        let observed: std::collections::HashSet<String> = observations
            .iter()
            .map(|o| canonical_key(&o.x_raw))
            .collect();

        let mut pending = Vec::new();
        for iteration in &iterations {
            let Some(decision) = get_decision_in(conn, &iteration.id).await? else {
                continue;
            };
            let proposals = list_proposals_in(conn, &iteration.id).await?;

            for accept in &decision.accepted {
                let Some(proposal) = proposals.iter().find(|p| p.id == accept.proposal_id)
                else {
                    continue;
                };
                for &idx in &accept.candidate_indices {
                    let Some(candidate) = proposal.candidates_raw.get(idx) else {
                        continue;
                    };
                    if !observed.contains(&canonical_key(candidate)) {
                        pending.push(PendingCandidate {
                            x_raw: candidate.clone(),
                            iteration_index: iteration.index,
                            strategy_name: proposal.strategy_name.clone(),
                        });
                    }
                }
            }
        }

        Ok(pending)
    }

    fn validate_observation(&self, x_raw: &JsonMap, y: &JsonMap) -> BoaResult<()> {
        let mut missing_inputs = Vec::new();
        for input in &self.spec.inputs {
            if self.spec.is_input_active(input, x_raw) && !x_raw.contains_key(input.name()) {
                missing_inputs.push(input.name().to_string());
            }
        }
        if !missing_inputs.is_empty() {
            return Err(BoaError::Validation(format!(
                "Observation is missing active inputs: {:?}",
                missing_inputs
            )));
        }

        let missing_objectives: Vec<&str> = self
            .spec
            .objectives
            .iter()
            .filter(|o| !y.contains_key(&o.name))
            .map(|o| o.name.as_str())
            .collect();
        if !missing_objectives.is_empty() {
            return Err(BoaError::Validation(format!(
                "Observation is missing objectives: {:?}",
                missing_objectives
            )));
        }

        Ok(())
    }
}

/// Canonical sorted-key rendering of a raw input map, used for pending
/// candidate matching. Exact value comparison; re-serialized floats may
/// miss (accepted).
pub fn canonical_key(x_raw: &JsonMap) -> String {
    let mut entries: Vec<(&String, &serde_json::Value)> = x_raw.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Campaign, Process};
    use crate::db::repository::{CampaignRepository, ProcessRepository};
    use crate::db::Db;
    use crate::spec::loader::load_process_spec;

    const SPEC_YAML: &str = "name: t\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 10]\nobjectives: [y]\n";

    async fn setup() -> (Db, ProposalLedger, Campaign) {
        let db = Db::in_memory().await.unwrap();
        let processes = ProcessRepository::new(db.pool().clone());
        let campaigns = CampaignRepository::new(db.pool().clone());

        let process = processes
            .create(Process::new(
                "t".to_string(),
                SPEC_YAML.to_string(),
                serde_json::json!({}),
                1,
            ))
            .await
            .unwrap();
        let campaign = campaigns
            .create(Campaign::new(process.id.clone(), "c".to_string()))
            .await
            .unwrap();

        let spec = load_process_spec(SPEC_YAML, false).unwrap();
        let ledger = ProposalLedger::new(campaign.id.clone(), spec);
        (db, ledger, campaign)
    }

    fn point(x: f64) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("x".to_string(), serde_json::json!(x));
        map
    }

    fn outcome(y: f64) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("y".to_string(), serde_json::json!(y));
        map
    }

    #[tokio::test]
    async fn test_iteration_indices_are_sequential() {
        let (db, ledger, _) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        assert!(ledger.current_iteration(&mut conn).await.unwrap().is_none());

        let first = ledger.start_iteration(&mut conn, None).await.unwrap();
        assert_eq!(first.index, 0);
        let second = ledger.start_iteration(&mut conn, None).await.unwrap();
        assert_eq!(second.index, 1);

        let current = ledger.current_iteration(&mut conn).await.unwrap().unwrap();
        assert_eq!(current.index, 1);
    }

    #[tokio::test]
    async fn test_start_iteration_promotes_created_campaign() {
        let (db, ledger, campaign) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        ledger.start_iteration(&mut conn, None).await.unwrap();
        let reloaded = get_campaign_in(&mut conn, &campaign.id).await.unwrap();
        assert_eq!(reloaded.status, CampaignStatus::Active);
    }

    #[tokio::test]
    async fn test_decision_validates_candidate_indices() {
        let (db, ledger, _) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let iteration = ledger.start_iteration(&mut conn, None).await.unwrap();
        let proposal = ledger
            .add_proposal(
                &mut conn,
                &iteration,
                "default",
                vec![point(1.0), point(2.0)],
                None,
                None,
                None,
                JsonMap::new(),
            )
            .await
            .unwrap();

        let err = ledger
            .record_decision(
                &mut conn,
                &iteration,
                vec![AcceptedCandidates {
                    proposal_id: proposal.id.clone(),
                    candidate_indices: vec![0, 5],
                }],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        ledger
            .record_decision(
                &mut conn,
                &iteration,
                vec![AcceptedCandidates {
                    proposal_id: proposal.id.clone(),
                    candidate_indices: vec![0, 1],
                }],
                Some("run both".to_string()),
            )
            .await
            .unwrap();

        let err = ledger
            .record_decision(&mut conn, &iteration, vec![], None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DECISION_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_observation_coverage_validation() {
        let (db, ledger, _) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let err = ledger
            .add_observation(
                &mut conn,
                JsonMap::new(),
                outcome(1.0),
                None,
                "user",
                None,
                JsonMap::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing active inputs"));

        let err = ledger
            .add_observation(
                &mut conn,
                point(1.0),
                JsonMap::new(),
                None,
                "user",
                None,
                JsonMap::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing objectives"));

        ledger
            .add_observation(
                &mut conn,
                point(1.0),
                outcome(1.0),
                None,
                "user",
                None,
                JsonMap::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_conditional_input_not_required_when_inactive() {
        let db = Db::in_memory().await.unwrap();
        let yaml = r#"
name: cond
inputs:
  - name: additive
    type: categorical
    categories: [none, MACl]
  - name: conc
    type: continuous
    bounds: [0.01, 0.5]
    active_if:
      additive: [MACl]
objectives: [y]
"#;
        let processes = ProcessRepository::new(db.pool().clone());
        let campaigns = CampaignRepository::new(db.pool().clone());
        let process = processes
            .create(Process::new(
                "cond".to_string(),
                yaml.to_string(),
                serde_json::json!({}),
                1,
            ))
            .await
            .unwrap();
        let campaign = campaigns
            .create(Campaign::new(process.id.clone(), "c".to_string()))
            .await
            .unwrap();
        let ledger = ProposalLedger::new(
            campaign.id.clone(),
            load_process_spec(yaml, false).unwrap(),
        );
        let mut conn = db.pool().acquire().await.unwrap();

        // additive = none deactivates conc, so conc may be omitted
        let mut x = JsonMap::new();
        x.insert("additive".to_string(), serde_json::json!("none"));
        ledger
            .add_observation(&mut conn, x, outcome(1.0), None, "user", None, JsonMap::new())
            .await
            .unwrap();

        // additive = MACl activates conc, so conc is required
        let mut x = JsonMap::new();
        x.insert("additive".to_string(), serde_json::json!("MACl"));
        let err = ledger
            .add_observation(&mut conn, x, outcome(1.0), None, "user", None, JsonMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("conc"));
    }

    #[tokio::test]
    async fn test_pending_candidates() {
        let (db, ledger, _) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();

        let iteration = ledger.start_iteration(&mut conn, None).await.unwrap();
        let proposal = ledger
            .add_proposal(
                &mut conn,
                &iteration,
                "default",
                vec![point(1.0), point(2.0)],
                None,
                None,
                None,
                JsonMap::new(),
            )
            .await
            .unwrap();
        ledger
            .record_decision(
                &mut conn,
                &iteration,
                vec![AcceptedCandidates {
                    proposal_id: proposal.id.clone(),
                    candidate_indices: vec![0, 1],
                }],
                None,
            )
            .await
            .unwrap();

        let pending = ledger.pending_candidates(&mut conn).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].iteration_index, 0);
        assert_eq!(pending[0].strategy_name, "default");

        // Observing the first candidate clears it from the pending list
        ledger
            .add_observation(
                &mut conn,
                point(1.0),
                outcome(1.0),
                None,
                "user",
                None,
                JsonMap::new(),
            )
            .await
            .unwrap();
        let pending = ledger.pending_candidates(&mut conn).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].x_raw["x"].as_f64().unwrap(), 2.0);
    }

    #[test]
    fn test_canonical_key_is_order_insensitive() {
        let mut a = JsonMap::new();
        a.insert("b".to_string(), serde_json::json!(2));
        a.insert("a".to_string(), serde_json::json!(1));
        let mut b = JsonMap::new();
        b.insert("a".to_string(), serde_json::json!(1));
        b.insert("b".to_string(), serde_json::json!(2));
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }
}
