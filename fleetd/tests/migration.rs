mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use reqwest::{Client, StatusCode};

use helpers::{TestNode, dead_port, wait_for_job};

const JOB_TIMEOUT: Duration = Duration::from_secs(10);

fn migration_to(node_id: &str, delete_source: bool) -> serde_json::Value {
    serde_json::json!({
        "kind": "container",
        "workload_id": "web",
        "destination": {"type": "peer", "node_id": node_id},
        "delete_source": delete_source,
    })
}

fn phase_outcomes(job: &serde_json::Value) -> Vec<(String, bool)> {
    job["phases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| {
            (
                p["phase"].as_str().unwrap().to_string(),
                p["ok"].as_bool().unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn full_migration_to_peer() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let b = TestNode::new("b", "default").await?;
    let client = Client::new();
    a.register_peer(&client, &b).await?;

    let resp = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("b", true))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let job: serde_json::Value = resp.json().await?;
    let job_id = job["job_id"].as_str().unwrap().to_string();
    assert_eq!(job["state"], "running");
    assert_eq!(job["source_node"], "a");

    let job = wait_for_job(&client, &a.url, &job_id, JOB_TIMEOUT).await?;
    assert_eq!(job["state"], "completed");
    assert_eq!(
        phase_outcomes(&job),
        vec![
            ("stop".to_string(), true),
            ("export".to_string(), true),
            ("transfer".to_string(), true),
            ("import".to_string(), true),
            ("cleanup".to_string(), true),
        ]
    );

    assert_eq!(*a.runtime.stopped.lock().unwrap(), vec!["web"]);
    assert_eq!(*a.runtime.removed.lock().unwrap(), vec!["web"]);
    assert_eq!(b.runtime.imported.lock().unwrap().len(), 1);

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn large_archives_arrive_intact() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let b = TestNode::new("b", "default").await?;
    let client = Client::new();
    a.register_peer(&client, &b).await?;

    // well past any default HTTP body limit
    let archive_len: usize = 8 * 1024 * 1024;
    a.runtime
        .export_bytes
        .store(archive_len as u32, Ordering::SeqCst);

    let job: serde_json::Value = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("b", false))
        .send()
        .await?
        .json()
        .await?;
    let job = wait_for_job(&client, &a.url, job["job_id"].as_str().unwrap(), JOB_TIMEOUT).await?;

    assert_eq!(job["state"], "completed");
    assert_eq!(*b.runtime.imported_sizes.lock().unwrap(), vec![archive_len]);

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn source_survives_when_delete_is_not_requested() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let b = TestNode::new("b", "default").await?;
    let client = Client::new();
    a.register_peer(&client, &b).await?;

    let job: serde_json::Value = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("b", false))
        .send()
        .await?
        .json()
        .await?;
    let job = wait_for_job(&client, &a.url, job["job_id"].as_str().unwrap(), JOB_TIMEOUT).await?;

    assert_eq!(job["state"], "completed");
    assert!(a.runtime.removed.lock().unwrap().is_empty());

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn stop_failure_ends_the_job_immediately() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let b = TestNode::new("b", "default").await?;
    let client = Client::new();
    a.register_peer(&client, &b).await?;
    a.runtime.fail_stop.store(true, Ordering::SeqCst);

    let job: serde_json::Value = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("b", true))
        .send()
        .await?
        .json()
        .await?;
    let job = wait_for_job(&client, &a.url, job["job_id"].as_str().unwrap(), JOB_TIMEOUT).await?;

    assert_eq!(job["state"], "failed");
    assert_eq!(phase_outcomes(&job), vec![("stop".to_string(), false)]);
    assert!(b.runtime.imported.lock().unwrap().is_empty());
    assert!(a.runtime.removed.lock().unwrap().is_empty());

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn transfer_failure_never_reaches_import_or_cleanup() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let client = Client::new();
    a.register_raw(&client, "dead", "default", dead_port().await?)
        .await?;

    let job: serde_json::Value = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("dead", true))
        .send()
        .await?
        .json()
        .await?;
    let job = wait_for_job(&client, &a.url, job["job_id"].as_str().unwrap(), JOB_TIMEOUT).await?;

    assert_eq!(job["state"], "failed");
    assert_eq!(
        phase_outcomes(&job),
        vec![
            ("stop".to_string(), true),
            ("export".to_string(), true),
            ("transfer".to_string(), false),
        ]
    );
    // delete_source was requested, but cleanup never ran
    assert!(a.runtime.removed.lock().unwrap().is_empty());

    a.shutdown().await
}

#[tokio::test]
async fn import_failure_preserves_the_source_workload() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let b = TestNode::new("b", "default").await?;
    let client = Client::new();
    a.register_peer(&client, &b).await?;
    b.runtime.fail_import.store(true, Ordering::SeqCst);

    let job: serde_json::Value = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("b", true))
        .send()
        .await?
        .json()
        .await?;
    let job = wait_for_job(&client, &a.url, job["job_id"].as_str().unwrap(), JOB_TIMEOUT).await?;

    assert_eq!(job["state"], "failed");
    assert_eq!(
        phase_outcomes(&job),
        vec![
            ("stop".to_string(), true),
            ("export".to_string(), true),
            ("transfer".to_string(), true),
            ("import".to_string(), false),
        ]
    );
    assert!(a.runtime.removed.lock().unwrap().is_empty());
    assert!(b.runtime.imported.lock().unwrap().is_empty());

    a.shutdown().await?;
    b.shutdown().await
}

#[tokio::test]
async fn request_validation() -> anyhow::Result<()> {
    let a = TestNode::new("a", "default").await?;
    let client = Client::new();

    // destination must exist
    let resp = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("ghost", false))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // and must not be the source itself
    let resp = client
        .post(format!("{}/migrations", a.url))
        .json(&migration_to("a", false))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let mut req = migration_to("a", false);
    req["workload_id"] = serde_json::json!("");
    let resp = client
        .post(format!("{}/migrations", a.url))
        .json(&req)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = client
        .get(format!("{}/migrations/ghost", a.url))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    a.shutdown().await
}

#[tokio::test]
async fn transfer_endpoints_enforce_the_token() -> anyhow::Result<()> {
    let b = TestNode::new("b", "default").await?;
    let client = Client::new();
    let receive_url = format!("{}/internal/migrations/receive?kind=container", b.url);

    // no token at all
    let resp = client
        .post(&receive_url)
        .body("archive bytes")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // a made-up token
    let resp = client
        .post(&receive_url)
        .bearer_auth("forged")
        .body("archive bytes")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let token: serde_json::Value = client
        .post(format!("{}/migrations/token", b.url))
        .send()
        .await?
        .json()
        .await?;
    let token = token["token"].as_str().unwrap().to_string();

    let resp = client
        .post(&receive_url)
        .bearer_auth(&token)
        .body("archive bytes")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let received: serde_json::Value = resp.json().await?;
    let transfer_id = received["transfer_id"].as_str().unwrap().to_string();
    let import_token = received["import_token"].as_str().unwrap().to_string();
    assert_eq!(received["size"], "archive bytes".len());

    // the transfer token was spent delivering the archive
    let resp = client
        .post(&receive_url)
        .bearer_auth(&token)
        .body("archive bytes")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // and it does not double as the import credential
    let resp = client
        .post(format!("{}/internal/migrations/import", b.url))
        .bearer_auth(&token)
        .json(&serde_json::json!({"transfer_id": transfer_id}))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .post(format!("{}/internal/migrations/import", b.url))
        .bearer_auth(&import_token)
        .json(&serde_json::json!({"transfer_id": transfer_id}))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // the import credential is good for exactly one take
    let resp = client
        .post(format!("{}/internal/migrations/import", b.url))
        .bearer_auth(&import_token)
        .json(&serde_json::json!({"transfer_id": transfer_id}))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    b.shutdown().await
}
