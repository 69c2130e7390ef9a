//! Full pipeline runs: check handler → batcher → forwarder → transaction
//! manager → check handler, against an in-process intake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use receptor_core::{AgentConfig, Component, Instance, Stream};
use receptor_forwarder::{Transport, TransportError};
use receptor_handler::{CheckHandler, HandlerError, Pipeline};
use receptor_txn::TransactionStatus;
use serde_json::{Value, json};
use tempfile::TempDir;

#[derive(Default)]
struct Intake {
    posts: Mutex<Vec<Value>>,
    rejected: Mutex<usize>,
    reject: AtomicBool,
}

impl Intake {
    fn posts(&self) -> Vec<Value> {
        self.posts.lock().unwrap().clone()
    }

    fn rejected(&self) -> usize {
        *self.rejected.lock().unwrap()
    }
}

impl Transport for Intake {
    async fn post(&self, _path: &str, body: Vec<u8>) -> Result<(), TransportError> {
        if self.reject.load(Ordering::SeqCst) {
            *self.rejected.lock().unwrap() += 1;
            return Err(TransportError::Status { code: 400 });
        }
        self.posts
            .lock()
            .unwrap()
            .push(serde_json::from_slice(&body).unwrap());
        Ok(())
    }
}

struct Agent {
    pipeline: Pipeline,
    intake: Arc<Intake>,
    dir: TempDir,
}

fn base_config(dir: &TempDir) -> AgentConfig {
    AgentConfig {
        check_state_root_path: dir.path().to_path_buf(),
        batcher_flush_interval: Duration::from_secs(3600),
        transaction_tick_interval: Duration::from_secs(3600),
        hostname: "agent-host".to_string(),
        ..AgentConfig::default()
    }
}

fn agent_with(configure: impl FnOnce(&mut AgentConfig)) -> Agent {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    configure(&mut config);
    let intake = Arc::new(Intake::default());
    let pipeline = Pipeline::start(&config, intake.clone());
    Agent {
        pipeline,
        intake,
        dir,
    }
}

fn agent() -> Agent {
    agent_with(|_| {})
}

fn instance() -> Instance {
    Instance::new("s", "u")
}

fn component(id: &str) -> Component {
    Component::new(id, "t", json!({}))
}

fn components(post: &Value) -> Vec<String> {
    post["topologies"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|t| t["components"].as_array().unwrap().iter())
        .map(|c| c["externalId"].as_str().unwrap().to_string())
        .collect()
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn status(agent: &Agent, transaction_id: &str) -> Option<TransactionStatus> {
    agent
        .pipeline
        .transactions
        .get_transaction(transaction_id)
        .ok()
        .map(|t| t.status)
}

/// Wait until the handler has opened `transaction_id`.
async fn opened(handler: &CheckHandler, transaction_id: &str) {
    eventually("transaction to open", || {
        handler.current_transaction().as_deref() == Some(transaction_id)
    })
    .await;
}

/// Wait until the manager reports `expected` and the handler is idle again.
async fn finished(agent: &Agent, handler: &CheckHandler, transaction_id: &str, expected: TransactionStatus) {
    eventually("transaction to finish", || {
        status(agent, transaction_id) == Some(expected) && handler.current_transaction().is_none()
    })
    .await;
}

async fn snapshot_of_one(handler: &CheckHandler, id: &str) {
    handler.submit_start_snapshot(instance()).await.unwrap();
    handler
        .submit_component(instance(), component(id))
        .await
        .unwrap();
    handler.submit_stop_snapshot(instance()).await.unwrap();
}

#[tokio::test]
async fn happy_path_sends_one_payload_and_completes() {
    let agent = agent();
    let handler = agent.pipeline.checks.register("check", "", "").await;
    assert!(handler.is_transactional());

    let tx = handler.start_transaction().await.unwrap();
    snapshot_of_one(&handler, "c1").await;
    handler.stop_transaction().await.unwrap();

    finished(&agent, &handler, &tx, TransactionStatus::Succeeded).await;
    let posts = agent.intake.posts();
    assert_eq!(posts.len(), 1);
    let topologies = posts[0]["topologies"].as_array().unwrap();
    assert_eq!(topologies.len(), 1);
    assert_eq!(topologies[0]["start_snapshot"], true);
    assert_eq!(topologies[0]["stop_snapshot"], true);
    assert_eq!(topologies[0]["instance"], json!({"type": "s", "url": "u"}));
    assert_eq!(components(&posts[0]), vec!["c1"]);
    assert_eq!(posts[0]["internalHostname"], "agent-host");

    // No state was staged, so nothing was written.
    assert_eq!(std::fs::read_dir(agent.dir.path()).unwrap().count(), 0);

    agent.pipeline.shutdown().await;
}

#[tokio::test]
async fn staged_state_is_committed_on_success() {
    let agent = agent();
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let tx = handler.start_transaction().await.unwrap();
    handler
        .set_transaction_state("check:key", r#"{"x":1}"#)
        .await
        .unwrap();
    handler
        .submit_component(instance(), component("c1"))
        .await
        .unwrap();
    handler.stop_transaction().await.unwrap();

    finished(&agent, &handler, &tx, TransactionStatus::Succeeded).await;
    assert_eq!(agent.pipeline.state.get("check:key").unwrap(), r#"{"x":1}"#);
    assert_eq!(handler.get_state("check:key"), r#"{"x":1}"#);
    let on_disk = std::fs::read_to_string(agent.dir.path().join("check").join("key")).unwrap();
    assert_eq!(on_disk, r#"{"x":1}"#);
}

#[tokio::test]
async fn rejected_payload_rolls_back_and_next_transaction_proceeds() {
    let agent = agent();
    agent.intake.reject.store(true, Ordering::SeqCst);
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let tx = handler.start_transaction().await.unwrap();
    handler
        .set_transaction_state("check:key", "never")
        .await
        .unwrap();
    snapshot_of_one(&handler, "c1").await;
    handler.stop_transaction().await.unwrap();

    finished(&agent, &handler, &tx, TransactionStatus::Failed).await;
    assert_eq!(agent.intake.rejected(), 1);
    assert!(agent.pipeline.batcher.inspect("check").await.unwrap().is_none());
    assert_eq!(handler.get_state("check:key"), "{}");
    assert!(!agent.dir.path().join("check").join("key").exists());

    agent.intake.reject.store(false, Ordering::SeqCst);
    let next = handler.start_transaction().await.unwrap();
    snapshot_of_one(&handler, "c2").await;
    handler.stop_transaction().await.unwrap();

    finished(&agent, &handler, &next, TransactionStatus::Succeeded).await;
    let posts = agent.intake.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(components(&posts[0]), vec!["c2"]);
}

#[tokio::test]
async fn unacknowledged_action_fails_the_transaction() {
    let agent = agent();
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let tx = handler.start_transaction().await.unwrap();
    opened(&handler, &tx).await;
    agent
        .pipeline
        .transactions
        .commit_action(&tx, "A")
        .await
        .unwrap();
    agent
        .pipeline
        .transactions
        .complete_transaction(&tx)
        .await
        .unwrap();

    finished(&agent, &handler, &tx, TransactionStatus::Failed).await;
    assert!(agent.intake.posts().is_empty());
}

#[tokio::test]
async fn idle_transaction_goes_stale_then_is_evicted() {
    let agent = agent_with(|config| {
        config.transaction_tick_interval = Duration::from_millis(20);
        config.transaction_timeout = Duration::from_millis(60);
        config.transaction_eviction_timeout = Duration::from_millis(300);
    });
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let tx = handler.start_transaction().await.unwrap();
    opened(&handler, &tx).await;

    eventually("transaction to go stale", || {
        status(&agent, &tx) == Some(TransactionStatus::Stale)
    })
    .await;
    assert_eq!(handler.current_transaction().as_deref(), Some(tx.as_str()));

    eventually("transaction to be evicted", || {
        status(&agent, &tx).is_none() && handler.current_transaction().is_none()
    })
    .await;
}

#[tokio::test]
async fn capacity_splits_a_transaction_into_several_payloads() {
    let agent = agent_with(|config| {
        config.batcher_max_capacity = 2;
        config.batcher_max_message_size = 64 * 1024 * 1024;
    });
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let tx = handler.start_transaction().await.unwrap();
    for i in 0..5 {
        handler
            .submit_component(instance(), component(&format!("c{i}")))
            .await
            .unwrap();
    }

    eventually("two capacity flushes", || agent.intake.posts().len() >= 2).await;
    assert_eq!(status(&agent, &tx), Some(TransactionStatus::InProgress));
    assert_eq!(handler.current_transaction().as_deref(), Some(tx.as_str()));

    handler.stop_transaction().await.unwrap();
    finished(&agent, &handler, &tx, TransactionStatus::Succeeded).await;

    let posts = agent.intake.posts();
    assert!(posts.len() >= 3, "expected at least three posts, got {}", posts.len());
    assert!(posts.iter().all(|p| components(p).len() <= 2));
    let all: Vec<String> = posts.iter().flat_map(components).collect();
    assert_eq!(all, vec!["c0", "c1", "c2", "c3", "c4"]);
    let transaction = agent.pipeline.transactions.get_transaction(&tx).unwrap();
    assert_eq!(transaction.actions.len(), posts.len());
    assert!(transaction.all_acknowledged());
}

#[tokio::test]
async fn second_transaction_waits_for_the_first() {
    let agent = agent();
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let first = handler.start_transaction().await.unwrap();
    handler
        .submit_component(instance(), component("first"))
        .await
        .unwrap();
    handler.stop_transaction().await.unwrap();

    let second = handler.start_transaction().await.unwrap();
    handler
        .submit_component(instance(), component("second"))
        .await
        .unwrap();
    handler.stop_transaction().await.unwrap();

    finished(&agent, &handler, &second, TransactionStatus::Succeeded).await;
    assert_eq!(status(&agent, &first), Some(TransactionStatus::Succeeded));
    let posts = agent.intake.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(components(&posts[0]), vec!["first"]);
    assert_eq!(components(&posts[1]), vec!["second"]);
}

#[tokio::test]
async fn failed_state_commit_discards_the_transaction() {
    let agent = agent();
    // A file where the state directory should be makes every write fail.
    std::fs::write(agent.dir.path().join("check"), "not a directory").unwrap();
    let handler = agent.pipeline.checks.register("check", "", "").await;

    let tx = handler.start_transaction().await.unwrap();
    handler
        .set_transaction_state("check:key", "value")
        .await
        .unwrap();
    handler
        .submit_component(instance(), component("c1"))
        .await
        .unwrap();
    handler.stop_transaction().await.unwrap();

    finished(&agent, &handler, &tx, TransactionStatus::Failed).await;
    assert!(agent.pipeline.batcher.inspect("check").await.unwrap().is_none());
    assert_eq!(handler.get_state("check:key"), "{}");

    // The handler accepts new work afterwards.
    let next = handler.start_transaction().await.unwrap();
    opened(&handler, &next).await;
}

#[tokio::test]
async fn unknown_check_gets_a_non_transactional_handler() {
    let agent = agent();
    let handler = agent.pipeline.checks.get("adhoc").await;
    assert!(!handler.is_transactional());
    assert!(matches!(
        handler.start_transaction().await,
        Err(HandlerError::TransactionsUnsupported)
    ));

    handler
        .submit_health_start_snapshot(Stream::new("urn:health:adhoc"), 30, 60)
        .await
        .unwrap();
    handler
        .submit_health_check_data(
            Stream::new("urn:health:adhoc"),
            json!({"checkStateId": "id", "health": "CLEAR"}).into(),
        )
        .await
        .unwrap();
    handler.submit_complete().await.unwrap();

    eventually("non-transactional flush", || agent.intake.posts().len() == 1).await;
    let post = &agent.intake.posts()[0];
    assert_eq!(post["health"][0]["stream"]["urn"], "urn:health:adhoc");
    assert_eq!(post["health"][0]["start_snapshot"]["repeat_interval_s"], 30);
    assert_eq!(post["health"][0]["check_states"][0]["health"], "CLEAR");

    // The same handler is handed out on the next lookup.
    assert_eq!(agent.pipeline.checks.len().await, 1);
    assert!(!agent.pipeline.checks.get("adhoc").await.is_transactional());
}

#[tokio::test]
async fn direct_state_api_bypasses_transactions() {
    let agent = agent();
    let handler = agent.pipeline.checks.get("adhoc").await;

    assert_eq!(handler.get_state("adhoc:cursor"), "{}");
    handler.set_state("adhoc:cursor", "42").await.unwrap();
    assert_eq!(handler.get_state("adhoc:cursor"), "42");
    assert_eq!(
        std::fs::read_to_string(agent.dir.path().join("adhoc").join("cursor")).unwrap(),
        "42"
    );
}

#[tokio::test]
async fn handler_can_be_made_transactional() {
    let agent = agent_with(|config| config.check_transactionality_enabled = true);
    let checks = &agent.pipeline.checks;
    let plain = checks.get("check").await;
    assert!(!plain.is_transactional());

    let upgraded = checks.make_transactional("check").await.unwrap();
    assert!(upgraded.is_transactional());
    assert!(checks.get("check").await.is_transactional());
    assert!(matches!(
        plain.submit_complete().await,
        Err(HandlerError::Stopped)
    ));

    assert!(checks.make_transactional("missing").await.is_none());
}

#[tokio::test]
async fn disabled_transactionality_hands_out_non_transactional_handlers() {
    let agent = agent_with(|config| config.check_transactionality_enabled = false);
    let checks = &agent.pipeline.checks;

    let handler = checks.register("check", "instance: 1", "init: 1").await;
    assert!(!handler.is_transactional());
    assert_eq!(handler.config().config, "instance: 1");
    assert_eq!(handler.config().init_config, "init: 1");

    let kept = checks.make_transactional("check").await.unwrap();
    assert!(!kept.is_transactional());
}

#[tokio::test]
async fn unregister_and_stop_end_handlers() {
    let agent = agent();
    let checks = &agent.pipeline.checks;

    let first = checks.register("first", "", "").await;
    let second = checks.register("second", "", "").await;
    let tx = second.start_transaction().await.unwrap();
    opened(&second, &tx).await;

    checks.unregister("first").await;
    assert!(!first.is_running());
    assert!(matches!(
        first.start_transaction().await,
        Err(HandlerError::Stopped)
    ));
    assert_eq!(checks.len().await, 1);

    checks.stop().await;
    assert!(checks.is_empty().await);
    assert!(!second.is_running());
    eventually("open transaction to be discarded", || {
        status(&agent, &tx) == Some(TransactionStatus::Failed)
    })
    .await;
}
