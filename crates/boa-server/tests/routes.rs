//! Route-level tests driving the router directly

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use boa::db::Db;
use boa::BoaConfig;
use boa_server::{routes, AppState};

const SPEC_YAML: &str = "name: line\ninputs:\n  - name: x\n    type: continuous\n    bounds: [0, 10]\nobjectives:\n  - name: y\n    direction: maximize\nstrategies:\n  default:\n    sampler: lhs\n    model: gp_rbf\n    acquisition: expected_improvement\n";

async fn test_app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open_file(dir.path().join("boa.db"), 5).await.unwrap();
    let mut config = BoaConfig::default();
    config.checkpoint_dir = dir.path().join("artifacts");
    let app = routes::router(AppState::new(db.pool().clone(), config));
    (dir, app)
}

async fn json_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (_dir, app) = test_app().await;
    let (status, body) = json_request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_process_and_campaign_flow() {
    let (_dir, app) = test_app().await;

    // Create a process from its YAML spec
    let (status, process) = json_request(
        &app,
        "POST",
        "/processes",
        Some(serde_json::json!({"spec_yaml": SPEC_YAML})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(process["name"], "line");
    assert_eq!(process["version"], 1);
    let process_id = process["id"].as_str().unwrap().to_string();

    // Re-posting the same name bumps the version
    let (_, second) = json_request(
        &app,
        "POST",
        "/processes",
        Some(serde_json::json!({"spec_yaml": SPEC_YAML})),
    )
    .await;
    assert_eq!(second["version"], 2);

    // Create a campaign bound to the first version
    let (status, campaign) = json_request(
        &app,
        "POST",
        "/campaigns",
        Some(serde_json::json!({"process_id": process_id, "name": "run"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campaign["status"], "created");
    let campaign_id = campaign["id"].as_str().unwrap().to_string();

    // Initial design opens iteration 0
    let (status, design) = json_request(
        &app,
        "POST",
        &format!("/campaigns/{}/initial-design", campaign_id),
        Some(serde_json::json!({"n_samples": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(design["candidates"].as_array().unwrap().len(), 3);

    let (_, iterations) = json_request(
        &app,
        "GET",
        &format!("/campaigns/{}/iterations", campaign_id),
        None,
    )
    .await;
    assert_eq!(iterations.as_array().unwrap().len(), 1);

    // Record observations and read metrics
    for (x, y) in [(1.0, 1.0), (5.0, 25.0), (9.0, 81.0)] {
        let (status, _) = json_request(
            &app,
            "POST",
            &format!("/campaigns/{}/observations", campaign_id),
            Some(serde_json::json!({"x": {"x": x}, "y": {"y": y}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, metrics) = json_request(
        &app,
        "GET",
        &format!("/campaigns/{}/metrics", campaign_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["n_observations"], 3);
    assert_eq!(metrics["best_values"]["y"], 81.0);

    // Export carries the observations
    let (status, bundle) = json_request(
        &app,
        "GET",
        &format!("/campaigns/{}/export", campaign_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bundle["version"], "1.0");
    assert_eq!(bundle["observations"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_invalid_spec_is_rejected() {
    let (_dir, app) = test_app().await;
    let bad = "name: bad\ninputs:\n  - name: x\n    type: continuous\n    bounds: [5, 5]\nobjectives: [y]\n";
    let (status, body) = json_request(
        &app,
        "POST",
        "/processes",
        Some(serde_json::json!({"spec_yaml": bad})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SPEC_VALIDATION_ERROR");
}

#[tokio::test]
async fn test_missing_campaign_is_404() {
    let (_dir, app) = test_app().await;
    let (status, body) = json_request(&app, "GET", "/campaigns/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_job_routes() {
    let (_dir, app) = test_app().await;

    let (status, job) = json_request(
        &app,
        "POST",
        "/jobs",
        Some(serde_json::json!({"job_type": "benchmark", "params": {"problem": "zdt1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "pending");
    let job_id = job["id"].as_str().unwrap().to_string();

    let (status, cancelled) =
        json_request(&app, "POST", &format!("/jobs/{}/cancel", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, listed) = json_request(&app, "GET", "/jobs?status=cancelled", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
