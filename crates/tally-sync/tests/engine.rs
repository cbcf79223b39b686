//! End-to-end engine behavior against the mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tally_core::{Backorder, Patch, RecordRef, StockIn, SyncMapping, SyncRecord};
use tally_sync::ConnectivityEvent;

use common::{engine_with, sale, MockServer};

#[tokio::test]
async fn create_then_sync_results_in_exactly_one_record() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await; // pull initial server state

    let local_id = engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();

    let summary = engine.trigger_sync().await;
    assert!(summary.errors.is_empty());
    assert_eq!(summary.total_processed(), 1);

    // Exactly one server record, exactly one reconciled record.
    assert_eq!(server.stock_out_count(), 1);
    let view = engine.stock_outs().read_reconciled(|_| true).await.unwrap();
    assert_eq!(view.len(), 1);
    assert!(view[0].server_id.is_some());
    // The local id linkage survives reconciliation.
    assert_eq!(view[0].local_id, local_id);

    // The local id never reappears in the add queue.
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);

    // A second sync does not re-submit anything.
    engine.trigger_sync().await;
    assert_eq!(server.create_calls(), 1);
    assert_eq!(server.stock_out_count(), 1);
}

#[tokio::test]
async fn concurrent_triggers_share_one_pass() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);
    server.set_delay_ms(100);

    let engine = engine_with(&server).await;
    engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(engine.trigger_sync(), engine.trigger_sync());

    // Both callers observed the same pass: the one that actually processed
    // the queued add. The server saw the create exactly once.
    assert_eq!(first.total_processed(), 1);
    assert_eq!(second.total_processed(), 1);
    assert_eq!(server.create_calls(), 1);
    assert!(first.errors.is_empty() && second.errors.is_empty());
}

#[tokio::test]
async fn deleting_an_already_deleted_record_is_success() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    let local_id = engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();
    engine.trigger_sync().await;

    // The record disappears server-side behind the engine's back.
    let view = engine.stock_outs().read_reconciled(|_| true).await.unwrap();
    let server_id = view[0].server_id.clone().unwrap();
    server.remove_stock_out(&server_id);

    // Local delete, then sync: the 404 is treated as success.
    engine
        .stock_outs()
        .submit_delete(RecordRef::Local(local_id))
        .await
        .unwrap();
    let summary = engine.trigger_sync().await;

    assert!(summary.errors.is_empty());
    assert_eq!(summary.total_evicted(), 0);
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);
    assert!(engine
        .stock_outs()
        .read_reconciled(|_| true)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn offline_sale_quantities_converge_after_sync() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    // Offline: ring up a sale of 3.
    engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();

    // The overlay shows 7 while the confirmed quantity stays 10.
    let view = engine.stock_ins().read_reconciled(|_| true).await.unwrap();
    assert_eq!(view[0].quantity, 10);
    assert_eq!(view[0].offline_quantity, Some(7));
    assert_eq!(engine.available_quantity("si-1").await.unwrap(), Some(7));

    // Back online: sync.
    let summary = engine.trigger_sync().await;
    assert_eq!(summary.total_processed(), 1);

    // Server confirmed 7; the overlay is gone.
    assert_eq!(server.stock_in_quantity("si-1"), Some(7));
    let view = engine.stock_ins().read_reconciled(|_| true).await.unwrap();
    assert_eq!(view[0].quantity, 7);
    assert_eq!(view[0].offline_quantity, None);
    assert_eq!(engine.available_quantity("si-1").await.unwrap(), Some(7));
}

#[tokio::test]
async fn five_failures_evict_the_mutation_and_report_it() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    server.fail_next_creates(u32::MAX);
    let local_id = engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();

    // Four failing passes keep it queued.
    for pass in 1..5 {
        let summary = engine.trigger_sync().await;
        assert_eq!(summary.total_failed(), 1, "pass {pass} should fail and retry");
        assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 1);
    }

    // The fifth failure evicts - reported, never silent.
    let summary = engine.trigger_sync().await;
    let evicted: Vec<_> = summary.evicted().collect();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].key, local_id);
    assert!(evicted[0].last_error.is_some());

    // Gone from the queue, gone from the status, quantity hold released.
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);
    assert_eq!(engine.sync_status().await.unwrap().pending_count, 0);
    assert_eq!(engine.available_quantity("si-1").await.unwrap(), Some(10));
    assert_eq!(server.stock_out_count(), 0);
}

#[tokio::test]
async fn rapid_duplicate_submission_is_collapsed_at_sync() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    // The same sale rung up twice in quick succession.
    engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();
    engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();

    let summary = engine.trigger_sync().await;

    // One reached the server; the other was recognized as a content
    // duplicate inside the window and discarded.
    assert_eq!(server.stock_out_count(), 1);
    assert_eq!(summary.total_processed(), 1);
    assert!(summary.total_skipped() >= 1);
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn existing_mapping_skips_resubmission() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    let local_id = engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();

    // Simulate a crash after acknowledgement but before queue cleanup: the
    // mapping exists, the add row survived.
    let store = engine.store().clone();
    let mappings = store.mappings(tally_core::EntityKind::StockOut);
    let mut tx = store.begin().await.unwrap();
    mappings
        .put_tx(
            &mut tx,
            &SyncMapping {
                local_id: local_id.clone(),
                server_id: "srv-ghost".to_string(),
                synced_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let summary = engine.trigger_sync().await;

    // The add was dropped without touching the server.
    assert!(summary.total_skipped() >= 1);
    assert_eq!(server.create_calls(), 0);
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn update_of_synced_record_reaches_the_server() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    let local_id = engine
        .stock_outs()
        .submit_create(sale("si-1", 3, "Ada"))
        .await
        .unwrap();
    engine.trigger_sync().await;

    // Edit by local id: the mapping resolves it to the server id.
    engine
        .stock_outs()
        .submit_update(
            RecordRef::Local(local_id),
            Patch::from_value(json!({"customer": "Bea"})).unwrap(),
        )
        .await
        .unwrap();
    let summary = engine.trigger_sync().await;
    assert_eq!(summary.total_processed(), 1);

    let view = engine.stock_outs().read_reconciled(|_| true).await.unwrap();
    let server_id = view[0].server_id.clone().unwrap();
    assert_eq!(view[0].customer, "Bea");
    assert_eq!(server.stock_out_customer(&server_id).as_deref(), Some("Bea"));
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn backorders_sync_without_touching_the_ledger() {
    let server = MockServer::new();
    let engine = engine_with(&server).await;

    let local_id = engine
        .backorders()
        .submit_create(Backorder::new("Beans", 5, "Ada"))
        .await
        .unwrap();

    let summary = engine.trigger_sync().await;
    assert!(summary.errors.is_empty());

    let view = engine.backorders().read_reconciled(|_| true).await.unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].local_id, local_id);
    assert!(view[0].server_id.is_some());
    assert!(view[0].quantity_effect().is_none());
}

#[tokio::test]
async fn monitor_online_event_drains_the_queue() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    engine
        .stock_outs()
        .submit_create(sale("si-1", 2, "Ada"))
        .await
        .unwrap();
    assert_eq!(engine.sync_status().await.unwrap().pending_count, 1);
    assert!(!engine.sync_status().await.unwrap().is_online);

    let monitor = engine.start_monitor();
    monitor.notify(ConnectivityEvent::Online).await.unwrap();

    // The monitor triggers asynchronously; give it a moment.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = engine.sync_status().await.unwrap();
    assert!(status.is_online);
    assert_eq!(status.pending_count, 0);
    assert!(status.last_sync_at.is_some());
    assert_eq!(server.stock_out_count(), 1);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_fetch_does_not_fail_the_pass() {
    let server = MockServer::new();
    server.seed_stock_in("si-1", 10);

    let engine = engine_with(&server).await;
    engine.trigger_sync().await;

    engine
        .stock_outs()
        .submit_create(sale("si-1", 2, "Ada"))
        .await
        .unwrap();

    // Everything fails while unreachable; the pass completes and the
    // mutation stays queued for the next trigger.
    server.set_offline(true);
    let summary = engine.trigger_sync().await;
    assert!(summary.errors.is_empty());
    assert_eq!(summary.total_failed(), 1);
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 1);

    // Back online: it drains.
    server.set_offline(false);
    let summary = engine.trigger_sync().await;
    assert_eq!(summary.total_processed(), 1);
    assert_eq!(engine.stock_outs().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn offline_created_stock_in_chain_syncs_in_order() {
    let server = MockServer::new();
    let engine = engine_with(&server).await;

    // Everything created offline: a stock-in and a sale against it.
    let si_local = engine
        .stock_ins()
        .submit_create(StockIn::new(
            "Beans",
            "BEAN-1",
            8,
            tally_core::Money::from_cents(500),
        ))
        .await
        .unwrap();
    engine
        .stock_outs()
        .submit_create(sale(&si_local, 5, "Ada"))
        .await
        .unwrap();

    assert_eq!(engine.available_quantity(&si_local).await.unwrap(), Some(3));

    // Stock-ins drain before the sale references them remotely: the
    // engine rewrites the local reference through the new mapping.
    let summary = engine.trigger_sync().await;
    assert!(summary.errors.is_empty());
    assert_eq!(summary.total_processed(), 2);

    let sis = engine.stock_ins().read_reconciled(|_| true).await.unwrap();
    assert_eq!(sis.len(), 1);
    let si_server = sis[0].server_id.clone().unwrap();

    let sos = engine.stock_outs().read_reconciled(|_| true).await.unwrap();
    assert_eq!(sos.len(), 1);
    assert_eq!(sos[0].stock_in_id, si_server);

    // Server applied the sale to the synced stock-in.
    assert_eq!(server.stock_in_quantity(&si_server), Some(3));
}
