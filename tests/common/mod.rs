//! Mock vault backends and daemon helpers shared by the integration tests.

#![allow(dead_code)]

use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
use omnisearch_companion::config::Config;
use omnisearch_companion::models::Vault;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Queries a mock vault has received, in arrival order.
pub type Received = Arc<Mutex<Vec<String>>>;

pub fn note(basename: &str, score: f64) -> Value {
    json!({
        "score": score,
        "vault": "",
        "path": format!("notes/{}.md", basename),
        "basename": basename,
        "foundWords": [basename],
        "matches": [{ "match": basename, "offset": 0 }],
        "excerpt": format!("all about {}", basename),
    })
}

/// Serves `GET /search` answering every query with `notes`.
pub async fn spawn_vault(notes: Vec<Value>) -> (u16, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    let app = Router::new().route(
        "/search",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let notes = notes.clone();
            let log = log.clone();
            async move {
                if let Some(q) = params.get("q") {
                    log.lock().unwrap().push(q.clone());
                }
                Json(Value::Array(notes))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, received)
}

/// Serves `GET /search` with a 500 for every request.
pub async fn spawn_failing_vault() -> u16 {
    let app = Router::new().route(
        "/search",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "index locked") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

pub fn vault(name: &str, port: u16) -> Vault {
    Vault {
        name: name.to_string(),
        port,
        active: true,
    }
}

/// A config with its database in a fresh temp dir, reaching vaults on
/// 127.0.0.1 with a short timeout.
pub fn test_config(vaults: Vec<Vault>) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path());
    config.backend.host = "127.0.0.1".to_string();
    config.backend.timeout_secs = Some(5);
    config.defaults.vaults = vaults;
    (tmp, config)
}

/// Polls `GET /health` until the daemon answers.
pub async fn wait_for_server(base: &str) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/health", base)).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("daemon at {} did not come up", base);
}

/// Polls `GET /snapshot` until its cycle reaches `cycle`.
pub async fn wait_for_cycle(base: &str, cycle: u64) -> Value {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        let snap: Value = client
            .get(format!("{}/snapshot", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if snap["cycle"].as_u64().unwrap_or(0) >= cycle {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("snapshot never reached cycle {}", cycle);
}
