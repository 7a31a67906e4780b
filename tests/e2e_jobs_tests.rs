//! End-to-end tests for the background job endpoints

mod common;

use common::{TestClient, TestServer, CLEANUP_JOB, ECHO_JOB};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Poll the job status until its latest execution reaches a terminal state.
async fn wait_for_terminal(client: &TestClient, job: &str) -> Value {
    for _ in 0..100 {
        let status: Value = client.get_job(job).await.json().await.unwrap();
        let state = status["last_execution"]["status"].as_str().unwrap_or("");
        if state == "completed" || state == "failed" {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish in time", job);
}

#[tokio::test]
async fn test_health_is_public() {
    let server = TestServer::spawn().await;
    let client = TestClient::anonymous(&server);

    let response = client.health().await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ws_connections"], 0);
    assert_eq!(body["worker_pool"]["running"], true);
    assert_eq!(body["worker_pool"]["workers"], 2);
}

#[tokio::test]
async fn test_job_routes_require_token() {
    let server = TestServer::spawn().await;
    let client = TestClient::anonymous(&server);

    assert_eq!(client.list_jobs().await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        client.trigger_job(ECHO_JOB).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let forged = TestClient::with_token(&server, Some("not-a-jwt".to_string()));
    let response = forged.list_jobs().await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Invalid token"));
}

#[tokio::test]
async fn test_list_jobs() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(&server);

    let response = client.list_jobs().await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let jobs = body["jobs"].as_array().unwrap();
    let names: Vec<&str> = jobs.iter().map(|j| j["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec![ECHO_JOB, CLEANUP_JOB]);

    let echo = &jobs[0];
    assert!(echo.get("schedule").is_none());
    assert_eq!(echo["lockable"], false);

    let cleanup = &jobs[1];
    assert_eq!(cleanup["schedule"], "0 30 3 * * *");
    assert_eq!(cleanup["lockable"], true);
}

#[tokio::test]
async fn test_trigger_runs_job_and_records_history() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(&server);

    let response = client.trigger_job(ECHO_JOB).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    let execution_id = body["execution_id"].as_str().unwrap().to_string();

    let status = wait_for_terminal(&client, ECHO_JOB).await;
    assert_eq!(status["name"], ECHO_JOB);
    assert_eq!(status["last_execution"]["id"], execution_id);
    assert_eq!(status["last_execution"]["status"], "completed");
    assert_eq!(status["last_execution"]["result"]["echo"], true);

    let response = client.job_history(ECHO_JOB, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["job_name"], ECHO_JOB);
    assert_eq!(body["executions"].as_array().unwrap().len(), 1);
    assert_eq!(body["executions"][0]["id"], execution_id);
}

#[tokio::test]
async fn test_history_limit() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(&server);

    for _ in 0..3 {
        assert_eq!(
            client.trigger_job(ECHO_JOB).await.status(),
            StatusCode::ACCEPTED
        );
    }

    let body: Value = client
        .job_history(ECHO_JOB, Some(2))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["executions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(&server);

    assert_eq!(client.get_job("nope").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        client.job_history("nope", None).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        client.trigger_job("nope").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_metrics_after_run() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(&server);

    client.trigger_job(ECHO_JOB).await;
    wait_for_terminal(&client, ECHO_JOB).await;

    // The monitor is updated before the execution row is completed.
    let body: Value = client.job_metrics().await.json().await.unwrap();
    let metrics = body["metrics"].as_array().unwrap();
    let echo = metrics
        .iter()
        .find(|m| m["job_name"] == ECHO_JOB)
        .expect("echo job metrics should be reported");
    assert_eq!(echo["total_runs"], 1);
    assert_eq!(echo["success_count"], 1);
}
