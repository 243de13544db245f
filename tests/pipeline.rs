//! End-to-end pipeline runs against mock vault backends.

mod common;

use common::{note, spawn_failing_vault, spawn_vault, test_config, vault};
use omnisearch_companion::coordinator::{BrowserEvent, Coordinator, HostCommand};
use omnisearch_companion::fetch::VaultFetcher;
use omnisearch_companion::models::{SearchType, SettingsPatch, Tab, TabStatus, Trigger};
use omnisearch_companion::publish::Publisher;
use omnisearch_companion::search::Pipeline;
use omnisearch_companion::storage::{KeyValueStore, MemoryStore, SettingsStore, SqliteStore};
use std::sync::Arc;

fn pipeline(config: &omnisearch_companion::config::Config, kv: Arc<dyn KeyValueStore>) -> Pipeline {
    Pipeline::new(
        SettingsStore::new(kv, config.defaults.clone()),
        VaultFetcher::new(&config.backend).unwrap(),
    )
}

#[tokio::test]
async fn test_failing_vault_is_reported_alongside_results() {
    let (ok_port, _) = spawn_vault(vec![note("ownership", 42.0)]).await;
    let bad_port = spawn_failing_vault().await;
    let (_tmp, config) = test_config(vec![vault("personal", ok_port), vault("work", bad_port)]);

    let p = pipeline(&config, Arc::new(MemoryStore::new()));
    let outcome = p.run(&Trigger::Text("ownership".into())).await.unwrap();

    assert_eq!(outcome.ranked.errors, vec![vault("work", bad_port)]);
    assert_eq!(outcome.ranked.notes.len(), 1);
    assert_eq!(outcome.ranked.notes[0].basename, "ownership");
    // Backend left vault blank; filled with the vault name
    assert_eq!(outcome.ranked.notes[0].vault, "personal");
}

#[tokio::test]
async fn test_scores_sum_across_vaults_and_threshold_applies() {
    let (a, _) = spawn_vault(vec![note("rust", 6.0), note("minor", 3.0)]).await;
    let (b, _) = spawn_vault(vec![note("rust", 7.0)]).await;
    let (_tmp, config) = test_config(vec![vault("a", a), vault("b", b)]);

    let p = pipeline(&config, Arc::new(MemoryStore::new()));
    let outcome = p.run(&Trigger::Text("rust".into())).await.unwrap();

    assert_eq!(outcome.ranked.raw_notes.len(), 2);
    assert_eq!(outcome.ranked.notes.len(), 1);
    assert_eq!(outcome.ranked.notes[0].basename, "rust");
    assert!((outcome.ranked.notes[0].score - 13.0).abs() < 1e-9);
    assert!(outcome.ranked.errors.is_empty());
}

#[tokio::test]
async fn test_inactive_vaults_are_not_queried() {
    let (on, on_log) = spawn_vault(vec![note("x", 50.0)]).await;
    let (off, off_log) = spawn_vault(vec![note("y", 50.0)]).await;
    let mut disabled = vault("off", off);
    disabled.active = false;
    let (_tmp, config) = test_config(vec![vault("on", on), disabled]);

    let p = pipeline(&config, Arc::new(MemoryStore::new()));
    p.run(&Trigger::Text("anything".into())).await.unwrap();

    assert_eq!(on_log.lock().unwrap().len(), 1);
    assert!(off_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_mode_sends_every_candidate() {
    let (port, log) = spawn_vault(Vec::new()).await;
    let (_tmp, config) = test_config(vec![vault("v", port)]);

    let p = pipeline(&config, Arc::new(MemoryStore::new()));
    let outcome = p
        .run(&Trigger::Tab(Tab {
            url: Some("https://en.wikipedia.org/wiki/Rust".into()),
            title: Some("Rust - Wikipedia".into()),
            active: true,
            ..Default::default()
        }))
        .await
        .unwrap();

    let mut received = log.lock().unwrap().clone();
    received.sort();
    let mut expected = vec![
        "https://en.wikipedia.org/wiki/Rust".to_string(),
        "wikipedia".to_string(),
        "Rust - Wikipedia".to_string(),
    ];
    expected.sort();
    assert_eq!(received, expected);
    assert_eq!(
        outcome.query().as_deref(),
        Some("https://en.wikipedia.org/wiki/Rust | wikipedia | Rust - Wikipedia")
    );
}

#[tokio::test]
async fn test_search_query_param_is_decoded_before_sending() {
    let (port, log) = spawn_vault(Vec::new()).await;
    let (_tmp, config) = test_config(vec![vault("v", port)]);
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let p = pipeline(&config, kv);
    p.settings()
        .update_settings(&SettingsPatch {
            search_type: Some(SearchType::Query),
            ..Default::default()
        })
        .await
        .unwrap();

    p.run(&Trigger::Tab(Tab {
        url: Some("https://www.google.com/search?q=borrow+checker%26lifetimes".into()),
        active: true,
        ..Default::default()
    }))
    .await
    .unwrap();

    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["borrow checker&lifetimes".to_string()]
    );
}

#[tokio::test]
async fn test_coordinator_publishes_and_badges_from_sqlite_store() {
    let (ok, _) = spawn_vault(vec![note("async", 20.0), note("await", 15.0)]).await;
    let bad = spawn_failing_vault().await;
    let (_tmp, config) = test_config(vec![vault("ok", ok), vault("bad", bad)]);

    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config).await.unwrap());
    let publisher = Arc::new(Publisher::open(kv.clone()).await.unwrap());
    let coordinator = Coordinator::new(pipeline(&config, kv.clone()), publisher.clone());
    let mut host = coordinator.subscribe_host();

    let cycle = coordinator
        .handle(BrowserEvent::TabUpdated {
            tab: Tab {
                id: Some(7),
                url: Some("https://tokio.rs/tokio/tutorial".into()),
                title: Some("Tutorial".into()),
                active: true,
                status: Some(TabStatus::Complete),
            },
        })
        .await
        .unwrap();
    assert_eq!(cycle, Some(1));

    assert_eq!(
        host.recv().await.unwrap(),
        HostCommand::SetBadge {
            text: "2".into(),
            error: true
        }
    );

    // A fresh publisher on the same store restores the snapshot
    let reopened = Publisher::open(kv.clone()).await.unwrap();
    let snap = reopened.snapshot().await;
    assert_eq!(snap.cycle, 1);
    assert_eq!(snap.notes.len(), 2);
    assert_eq!(snap.errors, vec![vault("bad", bad)]);
    assert_eq!(snap.active_vault_count(), 2);
}
