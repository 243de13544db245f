//! Daemon HTTP surface, served in-process on an ephemeral port.

mod common;

use common::{note, spawn_failing_vault, spawn_vault, test_config, vault, wait_for_cycle, wait_for_server};
use futures::StreamExt;
use omnisearch_companion::config::Config;
use omnisearch_companion::server;
use omnisearch_companion::storage::{KeyValueStore, MemoryStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};

async fn start_daemon(config: Config) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    tokio::spawn(async move {
        server::serve(&config, kv, listener).await.unwrap();
    });
    wait_for_server(&base).await;
    base
}

/// Next text frame as JSON, or `None` if nothing arrives within `wait`.
async fn next_json<S>(ws: &mut S, wait: Duration) -> Option<Value>
where
    S: futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next()).await.ok()??.unwrap();
        if msg.is_text() {
            return Some(serde_json::from_str(msg.to_text().unwrap()).unwrap());
        }
    }
}

async fn post_event(base: &str, event: Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/events", base))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
}

#[tokio::test]
async fn test_health() {
    let (_tmp, config) = test_config(Vec::new());
    let base = start_daemon(config).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_snapshot_before_any_event_is_empty() {
    let (_tmp, config) = test_config(vec![vault("a", 51999)]);
    let base = start_daemon(config).await;

    let snap: Value = reqwest::get(format!("{}/snapshot", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snap["cycle"], 0);
    assert!(snap["query"].is_null());
    assert!(snap["notes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_port_is_rejected_and_not_stored() {
    let (_tmp, config) = test_config(vec![vault("a", 51400)]);
    let base = start_daemon(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{}/vaults", base))
        .json(&json!([
            { "name": "a", "port": 51400, "active": true },
            { "name": "b", "port": 51400, "active": true }
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_settings");

    let stored: Value = client
        .get(format!("{}/vaults", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored, json!([{ "name": "a", "port": 51400, "active": true }]));
}

#[tokio::test]
async fn test_settings_partial_update() {
    let (_tmp, config) = test_config(Vec::new());
    let base = start_daemon(config).await;
    let client = reqwest::Client::new();

    let updated: Value = client
        .put(format!("{}/settings", base))
        .json(&json!({ "searchType": "Partial URL", "theme": "dark" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["searchType"], "Partial URL");
    assert_eq!(updated["theme"], "dark");
    assert_eq!(updated["notesShown"], 25);

    let resp = client
        .put(format!("{}/settings", base))
        .json(&json!({ "notesScore": 250 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_event_runs_pipeline_and_settings_change_reruns() {
    let (ok, _) = spawn_vault(vec![note("alpha", 40.0), note("beta", 30.0)]).await;
    let bad = spawn_failing_vault().await;
    let (_tmp, config) = test_config(vec![vault("ok", ok), vault("bad", bad)]);
    let base = start_daemon(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/events", base))
        .json(&json!({ "type": "contextMenuClicked", "selectionText": "greek letters" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let snap = wait_for_cycle(&base, 1).await;
    assert_eq!(snap["query"], "greek letters");
    assert_eq!(snap["notes"].as_array().unwrap().len(), 2);
    assert_eq!(snap["notes"][0]["basename"], "alpha");
    assert_eq!(snap["errors"], json!([{ "name": "bad", "port": bad, "active": true }]));

    // Narrowing the result count re-runs the last trigger
    client
        .put(format!("{}/settings", base))
        .json(&json!({ "notesShown": 1 }))
        .send()
        .await
        .unwrap();

    let snap = wait_for_cycle(&base, 2).await;
    assert_eq!(snap["query"], "greek letters");
    assert_eq!(snap["notes"].as_array().unwrap().len(), 1);
    assert_eq!(snap["rawNotes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let (_tmp, config) = test_config(Vec::new());
    let base = start_daemon(config).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/events", base))
        .json(&json!({ "type": "bookmarkCreated" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn test_popup_socket_gets_snapshot_then_push() {
    let (ok, _) = spawn_vault(vec![note("sockets", 25.0)]).await;
    let (_tmp, config) = test_config(vec![vault("ok", ok)]);
    let base = start_daemon(config).await;

    let url = format!("{}/popup", base.replacen("http", "ws", 1));
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let first = next_json(&mut ws, Duration::from_secs(5))
        .await
        .expect("snapshot on connect");
    assert_eq!(first["type"], "snapshot");
    assert_eq!(first["cycle"], 0);
    assert!(first["query"].is_null());

    post_event(
        &base,
        json!({ "type": "contextMenuClicked", "selectionText": "websockets" }),
    )
    .await;

    let pushed = next_json(&mut ws, Duration::from_secs(10))
        .await
        .expect("push after run");
    assert_eq!(pushed["type"], "snapshot");
    assert_eq!(pushed["cycle"], 1);
    assert_eq!(pushed["query"], "websockets");
    assert_eq!(pushed["notes"][0]["basename"], "sockets");
    assert_eq!(pushed["notes"][0]["vault"], "ok");
}

#[tokio::test]
async fn test_host_socket_gets_open_popup_and_badge() {
    let (ok, _) = spawn_vault(vec![note("alpha", 40.0), note("beta", 30.0)]).await;
    let bad = spawn_failing_vault().await;
    let (_tmp, config) = test_config(vec![vault("ok", ok), vault("bad", bad)]);
    let base = start_daemon(config).await;

    let url = format!("{}/host", base.replacen("http", "ws", 1));
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    // The server subscribes after the handshake; resend until something arrives
    let event = json!({ "type": "contextMenuClicked", "selectionText": "letters" });
    let mut seen = Vec::new();
    for _ in 0..20 {
        post_event(&base, event.clone()).await;
        if let Some(msg) = next_json(&mut ws, Duration::from_millis(500)).await {
            seen.push(msg);
            break;
        }
    }
    assert!(!seen.is_empty(), "host socket never received a command");

    while !(seen.iter().any(|m| m["type"] == "openPopup")
        && seen.iter().any(|m| m["type"] == "setBadge"))
    {
        let msg = next_json(&mut ws, Duration::from_secs(10))
            .await
            .expect("host command");
        seen.push(msg);
    }

    let badge = seen.iter().find(|m| m["type"] == "setBadge").unwrap();
    assert_eq!(badge["text"], "2");
    assert_eq!(badge["error"], true);
}
