use migration::gate::GateState;
use migration::orchestrator::MigrationOrchestrator;
use migration::store::memory::MemoryStore;
use migration::test_utils::migration::{
    actor_state_key, actor_state_value, seed_actor_states, test_migration_config,
};
use migration::types::{MigrationPhase, MigrationStatus};
use migration::verification::VerificationReport;
use migration_service::routes::ErrorMessage;
use migration_telemetry::init_test_tracing;
use reqwest::StatusCode;

use crate::support::test_app::{new_partition_id, spawn_destination_app, spawn_source_app};

mod support;

#[tokio::test(flavor = "multi_thread")]
async fn status_is_not_found_before_a_migration_starts() {
    init_test_tracing();
    let source = spawn_source_app().await;
    let destination = spawn_destination_app(new_partition_id(), &source, MemoryStore::new()).await;

    let response = destination.get("/RcMigration/GetMigrationStatus").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let message: ErrorMessage = response.json().await.unwrap();
    assert_eq!(message.error_code, "MissingMigrationStatus");
}

#[tokio::test(flavor = "multi_thread")]
async fn verification_reports_a_mismatch_without_changing_either_side() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 20).await;
    let store = MemoryStore::new();
    let destination = spawn_destination_app(new_partition_id(), &source, store.clone()).await;

    let report: VerificationReport = destination
        .put("/RcMigration/VerifyMigration")
        .await
        .json()
        .await
        .unwrap();

    assert!(!report.is_match);
    assert_eq!(report.source.record_count, 20);
    assert_eq!(report.destination.record_count, 0);
    assert_eq!(store.record_count().await, 0);
    assert_eq!(source.service.gate_state(), GateState::AcceptingWrites);
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_over_http_completes_and_is_reported() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 500).await;
    for index in (0..500).step_by(5) {
        source.service.delete(&actor_state_key(index)).await.unwrap();
    }
    source
        .service
        .put(actor_state_key(1), actor_state_value(1, 1))
        .await
        .unwrap();

    let partition_id = new_partition_id();
    let store = MemoryStore::new();
    let destination = spawn_destination_app(partition_id, &source, store.clone()).await;

    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(4),
        source.client(),
        store.clone(),
    )
    .unwrap();
    let status = orchestrator.run().await.unwrap();
    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(source.service.gate_state(), GateState::RejectingWrites);
    assert_eq!(store.live_records().await.len(), 400);

    let response = destination.get("/RcMigration/GetMigrationStatus").await;
    assert!(response.status().is_success());
    let reported: MigrationStatus = response.json().await.unwrap();
    assert_eq!(reported, status);

    let report: VerificationReport = destination
        .put("/RcMigration/VerifyMigration")
        .await
        .json()
        .await
        .unwrap();
    assert!(report.is_match);
    assert_eq!(report.source.record_count, 400);

    let resumed: bool = destination
        .put("/RcMigration/ResumeWritesOnKVSService")
        .await
        .json()
        .await
        .unwrap();
    assert!(resumed);
    assert_eq!(source.service.gate_state(), GateState::AcceptingWrites);
    assert_eq!(source.restarter.restarts(), 1);
}
