//! End-to-end campaign lifecycle tests: engine orchestration, write-lock
//! serialization, decision uniqueness and bundle round-trips.

use boa::bundle::{CampaignExporter, CampaignImporter};
use boa::core::engine::CampaignEngine;
use boa::db::models::{AcceptedCandidates, Campaign, CampaignStatus, JsonMap, Process};
use boa::db::repository::{CampaignRepository, ProcessRepository, Repositories};
use boa::db::Db;
use boa::spec::loader::load_process_spec;

const SPEC_YAML: &str = r#"
name: quadratic
version: 1
inputs:
  - name: x
    type: continuous
    bounds: [0, 10]
objectives:
  - name: y
    direction: maximize
strategies:
  default:
    sampler: lhs
    model: gp_rbf
    acquisition: expected_improvement
    sampler_params:
      seed: 7
    acquisition_params:
      seed: 7
      raw_samples: 64
      refine_steps: 8
"#;

async fn open_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boa.db");
    let db = Db::open_file(&path, 5).await.unwrap();
    (dir, db)
}

async fn create_campaign(db: &Db) -> Campaign {
    let spec = load_process_spec(SPEC_YAML, true).unwrap();
    let processes = ProcessRepository::new(db.pool().clone());
    let campaigns = CampaignRepository::new(db.pool().clone());

    let process = processes
        .create(Process::new(
            spec.name.clone(),
            SPEC_YAML.to_string(),
            serde_json::to_value(&spec).unwrap(),
            spec.version,
        ))
        .await
        .unwrap();
    campaigns
        .create(Campaign::new(process.id.clone(), "run-1".to_string()))
        .await
        .unwrap()
}

fn observation(x: f64, y: f64) -> (JsonMap, JsonMap) {
    let mut x_map = JsonMap::new();
    x_map.insert("x".to_string(), serde_json::json!(x));
    let mut y_map = JsonMap::new();
    y_map.insert("y".to_string(), serde_json::json!(y));
    (x_map, y_map)
}

#[tokio::test]
async fn test_full_campaign_flow() {
    let (_dir, db) = open_db().await;
    let campaign = create_campaign(&db).await;
    let engine = CampaignEngine::new(db.pool().clone(), &campaign.id, None)
        .await
        .unwrap();

    // Initial design opens iteration 0 with one proposal
    let initial = engine.initial_design(4, None).await.unwrap();
    assert_eq!(initial.candidates_raw.len(), 4);
    let iterations = engine.iterations().await.unwrap();
    assert_eq!(iterations.len(), 1);
    assert_eq!(iterations[0].index, 0);

    // The first write promotes the campaign to ACTIVE
    let campaigns = CampaignRepository::new(db.pool().clone());
    let reloaded = campaigns.get_or_fail(&campaign.id).await.unwrap();
    assert_eq!(reloaded.status, CampaignStatus::Active);

    // Record observations from the seed scenario
    for (x, y) in [(1.0, 1.0), (5.0, 25.0), (3.0, 9.0), (9.0, 81.0)] {
        let (x_map, y_map) = observation(x, y);
        engine.add_observation(x_map, y_map, "user", None).await.unwrap();
    }

    let metrics = engine.analyze(None).await.unwrap();
    assert_eq!(metrics.n_observations, 4);
    assert_eq!(metrics.best_values["y"], 81.0);
    assert_eq!(metrics.improvement_history, vec![1.0, 25.0, 25.0, 81.0]);

    // Optimization opens iteration 1 with a dataset hash and a proposal
    let results = engine.optimization_iteration(2, None, None).await.unwrap();
    assert_eq!(results.len(), 1);
    let iterations = engine.iterations().await.unwrap();
    assert_eq!(iterations.len(), 2);
    assert_eq!(iterations[1].index, 1);
    assert!(iterations[1].dataset_hash.is_some());

    let proposals = engine.iteration_proposals(1).await.unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].candidates_raw.len(), 2);

    // Accept the first candidate and see it pending
    engine
        .accept_candidates(
            vec![AcceptedCandidates {
                proposal_id: proposals[0].id.clone(),
                candidate_indices: vec![0],
            }],
            Some("looks promising".to_string()),
        )
        .await
        .unwrap();
    let pending = engine.pending_candidates().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].iteration_index, 1);

    // Lifecycle to completion
    engine.pause().await.unwrap();
    engine.resume().await.unwrap();
    let completed = engine.complete().await.unwrap();
    assert_eq!(completed.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_decision_is_unique_per_iteration() {
    let (_dir, db) = open_db().await;
    let campaign = create_campaign(&db).await;
    let engine = CampaignEngine::new(db.pool().clone(), &campaign.id, None)
        .await
        .unwrap();

    engine.initial_design(2, None).await.unwrap();
    let proposals = engine.iteration_proposals(0).await.unwrap();
    let accepted = vec![AcceptedCandidates {
        proposal_id: proposals[0].id.clone(),
        candidate_indices: vec![0],
    }];

    engine.accept_candidates(accepted.clone(), None).await.unwrap();
    let err = engine.accept_candidates(accepted, None).await.unwrap_err();
    assert_eq!(err.code(), "DECISION_ALREADY_EXISTS");
}

#[tokio::test]
async fn test_concurrent_iteration_start_is_serialized() {
    let (_dir, db) = open_db().await;
    let campaign = create_campaign(&db).await;
    let campaigns = CampaignRepository::new(db.pool().clone());

    let engine = CampaignEngine::new(db.pool().clone(), &campaign.id, None)
        .await
        .unwrap();
    engine.initial_design(2, None).await.unwrap();

    // Another caller holds the write lock
    campaigns
        .acquire_write_lock(&campaign.id, "other-worker", 30.0)
        .await
        .unwrap();

    let (x_map, y_map) = observation(1.0, 1.0);
    let err = engine
        .add_observation(x_map, y_map, "user", None)
        .await
        .unwrap_err();
    match err {
        boa::BoaError::CampaignLocked { locked_by, .. } => {
            assert_eq!(locked_by, "other-worker");
        }
        other => panic!("expected CampaignLocked, got {:?}", other),
    }

    // After release the engine proceeds and indices stay sequential
    campaigns
        .release_write_lock(&campaign.id, Some("other-worker"))
        .await
        .unwrap();
    let (x_map, y_map) = observation(1.0, 1.0);
    engine.add_observation(x_map, y_map, "user", None).await.unwrap();
    engine.optimization_iteration(1, None, None).await.unwrap();

    let iterations = engine.iterations().await.unwrap();
    let indices: Vec<i64> = iterations.iter().map(|it| it.index).collect();
    assert_eq!(indices, vec![0, 1]);
}

#[tokio::test]
async fn test_checkpoints_written_during_optimization() {
    let (_dir, db) = open_db().await;
    let campaign = create_campaign(&db).await;
    let checkpoint_dir = tempfile::tempdir().unwrap();

    let engine = CampaignEngine::new(
        db.pool().clone(),
        &campaign.id,
        Some(checkpoint_dir.path().to_path_buf()),
    )
    .await
    .unwrap();

    engine.initial_design(3, None).await.unwrap();
    for (x, y) in [(1.0, 1.0), (5.0, 25.0), (9.0, 81.0)] {
        let (x_map, y_map) = observation(x, y);
        engine.add_observation(x_map, y_map, "user", None).await.unwrap();
    }
    engine.optimization_iteration(1, None, None).await.unwrap();

    let repos = Repositories::new(db.pool().clone());
    let checkpoints = repos.checkpoints.list(&campaign.id).await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert!(checkpoints[0].file_size_bytes.unwrap() > 0);

    let file = checkpoint_dir
        .path()
        .join(&checkpoints[0].path);
    assert!(file.exists());
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let (_dir, db) = open_db().await;
    let campaign = create_campaign(&db).await;
    let engine = CampaignEngine::new(db.pool().clone(), &campaign.id, None)
        .await
        .unwrap();

    engine.initial_design(2, None).await.unwrap();
    for (x, y) in [(1.0, 1.0), (5.0, 25.0), (9.0, 81.0)] {
        let (x_map, y_map) = observation(x, y);
        engine.add_observation(x_map, y_map, "user", None).await.unwrap();
    }
    engine.optimization_iteration(1, None, None).await.unwrap();

    let repos = Repositories::new(db.pool().clone());
    let bundle = CampaignExporter::new(repos.clone())
        .export(&campaign.id)
        .await
        .unwrap();
    assert_eq!(bundle.version, "1.0");
    assert_eq!(bundle.observations.len(), 3);
    assert_eq!(bundle.iterations.len(), 2);

    // Import into a fresh store
    let (_fresh_dir, fresh) = open_db().await;
    let fresh_repos = Repositories::new(fresh.pool().clone());
    let bundle_json = serde_json::to_value(&bundle).unwrap();
    let imported_id = CampaignImporter::new(fresh_repos.clone())
        .import(&bundle_json)
        .await
        .unwrap();
    assert_ne!(imported_id, campaign.id);

    let imported = fresh_repos.campaigns.get_or_fail(&imported_id).await.unwrap();
    assert_eq!(imported.status, CampaignStatus::Active);
    assert_eq!(imported.name, "run-1");

    let observations = fresh_repos.observations.list(&imported_id).await.unwrap();
    assert_eq!(observations.len(), 3);
    let iterations = fresh_repos.iterations.list(&imported_id).await.unwrap();
    let indices: Vec<i64> = iterations.iter().map(|it| it.index).collect();
    assert_eq!(indices, vec![0, 1]);

    // Importing again reuses the process by name
    let re_imported = CampaignImporter::new(fresh_repos.clone())
        .import(&bundle_json)
        .await
        .unwrap();
    let second = fresh_repos.campaigns.get_or_fail(&re_imported).await.unwrap();
    assert_eq!(second.process_id, imported.process_id);
}

#[tokio::test]
async fn test_optimization_requires_training_data() {
    let (_dir, db) = open_db().await;
    let campaign = create_campaign(&db).await;
    let engine = CampaignEngine::new(db.pool().clone(), &campaign.id, None)
        .await
        .unwrap();

    let err = engine.optimization_iteration(1, None, None).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("initial design"));
}
