//! Transaction lifecycle driven through the public handle: unacknowledged
//! completion, staleness, eviction and cleanup of finished transactions.

use std::time::Duration;

use receptor_txn::{TransactionManager, TransactionManagerConfig, TransactionStatus, TxNotification};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config(tick_ms: u64, timeout_ms: u64, eviction_ms: u64) -> TransactionManagerConfig {
    TransactionManagerConfig {
        channel_buffer: 16,
        tick_interval: Duration::from_millis(tick_ms),
        timeout: Duration::from_millis(timeout_ms),
        eviction_timeout: Duration::from_millis(eviction_ms),
    }
}

async fn wait_for<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn complete_with_unacked_action_rolls_back() {
    let manager = TransactionManager::start(config(60_000, 60_000, 60_000));
    let (notify_tx, mut notify_rx) = mpsc::channel(8);
    manager.start_transaction("check", "T", notify_tx).await.unwrap();

    manager.commit_action("T", "A").await.unwrap();
    manager.complete_transaction("T").await.unwrap();

    let n = timeout(Duration::from_secs(2), notify_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match n {
        TxNotification::Rollback {
            transaction_id,
            reason,
        } => {
            assert_eq!(transaction_id, "T");
            assert!(reason.contains("not all acknowledged"), "reason: {reason}");
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(
        manager.get_transaction("T").unwrap().status,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn idle_transaction_goes_stale_then_is_evicted() {
    let manager = TransactionManager::start(config(20, 50, 200));
    let (notify_tx, mut notify_rx) = mpsc::channel(8);
    manager.start_transaction("check", "T", notify_tx).await.unwrap();

    wait_for(|| {
        manager
            .get_transaction("T")
            .map(|t| t.status == TransactionStatus::Stale)
            .unwrap_or(false)
    })
    .await;

    let n = timeout(Duration::from_secs(2), notify_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        n,
        TxNotification::Evicted {
            transaction_id: "T".to_string()
        }
    );
    assert!(manager.get_transaction("T").is_err());
    assert_eq!(manager.transaction_count(), 0);
}

#[tokio::test]
async fn traffic_revives_stale_transaction() {
    let manager = TransactionManager::start(config(20, 50, 60_000));
    let (notify_tx, _notify_rx) = mpsc::channel(8);
    manager.start_transaction("check", "T", notify_tx).await.unwrap();

    wait_for(|| {
        manager
            .get_transaction("T")
            .map(|t| t.status == TransactionStatus::Stale)
            .unwrap_or(false)
    })
    .await;

    manager.commit_action("T", "A").await.unwrap();
    wait_for(|| {
        manager
            .get_transaction("T")
            .map(|t| t.status == TransactionStatus::InProgress && t.actions.contains_key("A"))
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn finished_transactions_are_removed_on_tick() {
    let manager = TransactionManager::start(config(20, 60_000, 60_000));
    let (notify_tx, mut notify_rx) = mpsc::channel(8);
    manager.start_transaction("check", "T", notify_tx).await.unwrap();
    manager.commit_action("T", "A").await.unwrap();
    manager.ack_action("T", "A").await.unwrap();
    manager.complete_transaction("T").await.unwrap();

    assert!(matches!(
        notify_rx.recv().await.unwrap(),
        TxNotification::Complete { .. }
    ));
    wait_for(|| manager.transaction_count() == 0).await;
}
