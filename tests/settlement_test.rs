mod common;

use chrono::{Duration, Utc};

use common::{payment, setup_with_participants, ALICE, BOB};
use upi_switch::bank::{BankOperation, Behaviour};
use upi_switch::domain::{BatchStatus, TransactionStatus};
use upi_switch::error::AppError;
use upi_switch::ports::{SwitchStore, TransactionRepository};
use upi_switch::services::LockManager;
use upi_switch::validation::MAX_AMOUNT;

#[tokio::test]
async fn test_batch_nets_positions_per_bank() {
    let ts = setup_with_participants(&[]).await;
    let engine = &ts.switch.state.engine;
    engine.process(payment("TXN-S1", 10_000)).await.unwrap();
    engine.process(payment("TXN-S2", 5_000)).await.unwrap();
    let mut back = payment("TXN-S3", 3_000);
    back.payer_vpa = BOB.to_string();
    back.payee_vpa = ALICE.to_string();
    engine.process(back).await.unwrap();

    let today = Utc::now().date_naive();
    let view = ts.switch.state.settlement.create_batch(today).await.unwrap();

    assert_eq!(view.batch.status, BatchStatus::Completed);
    assert_eq!(view.batch.total_transactions, 3);
    assert_eq!(view.batch.total_amount, 18_000);
    assert!(view.batch.batch_id.starts_with("STL"));

    let hdfc = view.bank_settlements.iter().find(|r| r.bank_code == "HDFC").unwrap();
    assert_eq!(hdfc.debit_amount, 15_000);
    assert_eq!(hdfc.credit_amount, 3_000);
    assert_eq!(hdfc.net_amount, -12_000);
    let icici = view.bank_settlements.iter().find(|r| r.bank_code == "ICICI").unwrap();
    assert_eq!(icici.net_amount, 12_000);

    let net: i64 = view.bank_settlements.iter().map(|r| r.net_amount).sum();
    assert_eq!(net, 0);

    let row = ts.store.get_transaction("TXN-S1").await.unwrap().unwrap();
    assert_eq!(row.settlement_id.as_deref(), Some(view.batch.batch_id.as_str()));
}

#[tokio::test]
async fn test_rerun_returns_completed_batch_without_double_settling() {
    let ts = setup_with_participants(&[]).await;
    ts.switch.state.engine.process(payment("TXN-ONCE", 2_000)).await.unwrap();
    let settlement = &ts.switch.state.settlement;
    let today = Utc::now().date_naive();

    let first = settlement.create_batch(today).await.unwrap();
    let second = settlement.create_batch(today).await.unwrap();

    assert_eq!(first.batch.batch_id, second.batch.batch_id);
    assert_eq!(settlement.list_batches(today).await.unwrap().len(), 1);

    // Late arrivals go into a new batch; earlier transactions are never re-settled.
    ts.switch.state.engine.process(payment("TXN-LATE", 700)).await.unwrap();
    let third = settlement.create_batch(today).await.unwrap();
    assert_ne!(third.batch.batch_id, first.batch.batch_id);
    assert_eq!(third.batch.total_transactions, 1);
    assert_eq!(third.batch.total_amount, 700);
}

#[tokio::test]
async fn test_concurrent_builds_settle_once() {
    let ts = setup_with_participants(&[]).await;
    ts.switch.state.engine.process(payment("TXN-CC", 1_500)).await.unwrap();
    let settlement = ts.switch.state.settlement.clone();
    let other = settlement.clone();
    let today = Utc::now().date_naive();

    let (a, b) = tokio::join!(settlement.create_batch(today), other.create_batch(today));

    let mut batch_ids = Vec::new();
    for result in [a, b] {
        match result {
            Ok(view) => batch_ids.push(view.batch.batch_id),
            Err(AppError::SettlementInProgress(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(!batch_ids.is_empty());
    batch_ids.dedup();
    assert_eq!(batch_ids.len(), 1);
    assert_eq!(settlement.list_batches(today).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_held_lock_reports_settlement_in_progress() {
    let ts = setup_with_participants(&[]).await;
    let today = Utc::now().date_naive();
    let store: std::sync::Arc<dyn SwitchStore> = ts.store.clone();
    let elsewhere = LockManager::new(store, "another-instance");
    let guard = elsewhere
        .try_acquire(&format!("settlement:{}", today), Duration::minutes(5))
        .await
        .unwrap()
        .expect("lock is free");

    let err = ts.switch.state.settlement.create_batch(today).await.unwrap_err();
    assert!(matches!(err, AppError::SettlementInProgress(_)));

    guard.release().await.unwrap();
    assert!(ts.switch.state.settlement.create_batch(today).await.is_ok());
}

#[tokio::test]
async fn test_report_reconciles_and_exports_csv() {
    let ts = setup_with_participants(&[]).await;
    ts.switch.state.engine.process(payment("TXN-R1", 4_000)).await.unwrap();
    ts.switch.state.engine.process(payment("TXN-R2", 6_000)).await.unwrap();
    let settlement = &ts.switch.state.settlement;
    let view = settlement.create_batch(Utc::now().date_naive()).await.unwrap();
    let batch_id = view.batch.batch_id.clone();

    let report = settlement.report(&batch_id, None).await.unwrap();
    assert!(report.reconciliation.balanced);
    assert!(report.reconciliation.mismatches.is_empty());
    assert_eq!(report.reconciliation.recomputed_transactions, 2);
    assert_eq!(report.reconciliation.recomputed_amount, 10_000);

    let filtered = settlement.report(&batch_id, Some("ICICI")).await.unwrap();
    assert_eq!(filtered.bank_settlements.len(), 1);
    assert_eq!(filtered.bank_settlements[0].credit_amount, 10_000);

    let csv = settlement.report_csv(&batch_id, None).await.unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("batch_id,settlement_date,bank_code"));
    assert!(lines.iter().any(|l| l.contains("HDFC") && l.contains("-10000")));
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let ts = setup_with_participants(&[]).await;
    let err = ts.switch.state.settlement.get_batch("STL20250101DEADBEEF").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_largest_payments_settle_without_overflow() {
    let ts = setup_with_participants(&[]).await;
    let engine = &ts.switch.state.engine;
    engine.process(payment("TXN-MAX-1", MAX_AMOUNT)).await.unwrap();
    engine.process(payment("TXN-MAX-2", MAX_AMOUNT)).await.unwrap();

    let view = ts
        .switch
        .state
        .settlement
        .create_batch(Utc::now().date_naive())
        .await
        .unwrap();

    assert_eq!(view.batch.status, BatchStatus::Completed);
    assert_eq!(view.batch.total_amount, 2 * MAX_AMOUNT);
    let hdfc = view.bank_settlements.iter().find(|r| r.bank_code == "HDFC").unwrap();
    assert_eq!(hdfc.net_amount, -2 * MAX_AMOUNT);
}

#[tokio::test]
async fn test_compensation_refunds_are_closed_out_without_positions() {
    let ts = setup_with_participants(&[]).await;
    let engine = &ts.switch.state.engine;
    engine.process(payment("TXN-PAID", 2_000)).await.unwrap();
    ts.bank.script(BankOperation::Credit, Behaviour::Decline("ACCOUNT_CLOSED".to_string()));
    let failed = engine.process(payment("TXN-UNDONE", 9_000)).await.unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);

    let settlement = &ts.switch.state.settlement;
    let view = settlement.create_batch(Utc::now().date_naive()).await.unwrap();

    assert_eq!(view.batch.total_transactions, 1);
    assert_eq!(view.batch.total_amount, 2_000);
    let hdfc = view.bank_settlements.iter().find(|r| r.bank_code == "HDFC").unwrap();
    assert_eq!(hdfc.debit_amount, 2_000);
    assert_eq!(hdfc.credit_amount, 0);

    // The refund is tagged so later batches never pick it up again.
    let refund = ts.store.get_transaction("TXN-UNDONE_REVERSAL").await.unwrap().unwrap();
    assert_eq!(refund.settlement_id.as_deref(), Some(view.batch.batch_id.as_str()));

    let report = settlement.report(&view.batch.batch_id, None).await.unwrap();
    assert!(report.reconciliation.balanced);
}
