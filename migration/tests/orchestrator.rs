mod common;

use migration::error::ErrorKind;
use migration::gate::GateState;
use migration::orchestrator::MigrationOrchestrator;
use migration::source::base::SequenceStore;
use migration::source::log::KvsLog;
use migration::store::base::{DestinationStore, StatusStore};
use migration::store::memory::MemoryStore;
use migration::test_utils::destination::FaultInjectingDestinationStore;
use migration::test_utils::migration::{
    actor_state_key, actor_state_value, seed_actor_states, spawn_source_replica,
    test_migration_config,
};
use migration::test_utils::source::FaultInjectingSequenceStore;
use migration::types::{MigrationPhase, MigrationStatus, SequenceRange, WorkerStatus};
use migration::workers::migration::RoundKind;
use migration::workers::partition::partition_sequence_range;
use migration_telemetry::init_test_tracing;
use std::time::Duration;

use crate::common::{assert_destination_matches_source, new_partition_id};

#[tokio::test(flavor = "multi_thread")]
async fn migration_copies_every_live_record_and_completes() {
    init_test_tracing();
    let (service, restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 1_000).await;
    for index in (0..1_000).step_by(10) {
        service.delete(&actor_state_key(index)).await.unwrap();
    }

    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());
    let orchestrator = MigrationOrchestrator::new(
        new_partition_id(),
        test_migration_config(4),
        service.clone(),
        store.clone(),
    )
    .unwrap();

    let status = orchestrator.run().await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(
        store.phase_history().await,
        vec![
            MigrationPhase::Provisioning,
            MigrationPhase::Copying,
            MigrationPhase::CatchingUp,
            MigrationPhase::Downtime,
            MigrationPhase::Verifying,
            MigrationPhase::Completed,
        ]
    );
    assert_destination_matches_source(&service, store.inner()).await;
    assert_eq!(store.inner().live_records().await.len(), 900);

    // Writes stay rejected once the partition moved to the destination.
    assert_eq!(service.gate_state(), GateState::RejectingWrites);
    assert_eq!(
        service
            .put(actor_state_key(0), b"late".to_vec())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::WritesRejected
    );
    assert_eq!(restarter.restarts(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn migration_catches_up_with_concurrent_writes() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 2_000).await;

    let writer = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut revision = 1;
            loop {
                for index in (0..2_000).step_by(7) {
                    let result = if index % 3 == 0 {
                        service.delete(&actor_state_key(index)).await.map(|_| ())
                    } else {
                        service
                            .put(actor_state_key(index), actor_state_value(index, revision))
                            .await
                            .map(|_| ())
                    };

                    match result {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::WritesRejected => return revision,
                        Err(err) => panic!("unexpected write failure: {err}"),
                    }
                }

                revision += 1;
                if revision > 20 {
                    return revision;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let store = MemoryStore::new();
    let mut config = test_migration_config(3);
    config.chunk_size = 64;
    config.items_per_enumeration = 256;
    let orchestrator =
        MigrationOrchestrator::new(new_partition_id(), config, service.clone(), store.clone())
            .unwrap();

    let status = orchestrator.run().await.unwrap();
    writer.await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(
        status.applied_sequence_number,
        service.get_last_sequence_number().await.unwrap()
    );
    assert_destination_matches_source(&service, &store).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried_during_copy() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 500).await;

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    source.fail_next_sequence_reads(4);
    source.fail_next_enumerations(6);
    source.corrupt_next_pages(2);

    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());
    store.fail_next_applies(5);

    let orchestrator = MigrationOrchestrator::new(
        new_partition_id(),
        test_migration_config(2),
        source.clone(),
        store.clone(),
    )
    .unwrap();

    let status = orchestrator.run().await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert!(source.enumeration_calls() > 6);
    assert_destination_matches_source(&service, store.inner()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn verification_mismatch_rolls_back_and_resumes_writes() {
    init_test_tracing();
    let (service, restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 300).await;

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());
    store.corrupt_digest();

    let orchestrator = MigrationOrchestrator::new(
        new_partition_id(),
        test_migration_config(4),
        source.clone(),
        store.clone(),
    )
    .unwrap();

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
    let status = store.get_migration_status().await.unwrap().unwrap();
    assert_eq!(status.current_migration_phase, MigrationPhase::RolledBack);

    assert_eq!(source.reject_calls(), 1);
    assert_eq!(source.resume_calls(), 1);
    assert_eq!(restarter.restarts(), 1);
    assert_eq!(service.gate_state(), GateState::AcceptingWrites);
    service
        .put(actor_state_key(0), b"after rollback".to_vec())
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_to_reject_writes_rolls_back() {
    init_test_tracing();
    let (service, restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 100).await;

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    source.fail_next_rejects(u32::MAX);
    let store = MemoryStore::new();

    let orchestrator = MigrationOrchestrator::new(
        new_partition_id(),
        test_migration_config(2),
        source.clone(),
        store.clone(),
    )
    .unwrap();

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WritesDrainFailed);
    // The first attempt plus the configured three retries.
    assert_eq!(source.reject_calls(), 4);
    assert_eq!(source.resume_calls(), 1);
    assert_eq!(restarter.restarts(), 0);

    let status = store.get_migration_status().await.unwrap().unwrap();
    assert_eq!(status.current_migration_phase, MigrationPhase::RolledBack);
    assert_eq!(service.gate_state(), GateState::AcceptingWrites);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejection_is_retried_until_writes_drain() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 100).await;

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    source.fail_next_rejects(2);
    let store = MemoryStore::new();

    let orchestrator = MigrationOrchestrator::new(
        new_partition_id(),
        test_migration_config(2),
        source.clone(),
        store.clone(),
    )
    .unwrap();

    let status = orchestrator.run().await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(source.reject_calls(), 3);
    assert_eq!(source.resume_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_downtime_transition_leaves_source_writes_alone() {
    init_test_tracing();
    let (service, restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 100).await;

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());
    store.fail_status_writes_in(MigrationPhase::Downtime, u32::MAX).await;

    let orchestrator = MigrationOrchestrator::new(
        new_partition_id(),
        test_migration_config(2),
        source.clone(),
        store.clone(),
    )
    .unwrap();

    let err = orchestrator.run().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationIoError);
    let status = store.get_migration_status().await.unwrap().unwrap();
    assert_eq!(status.current_migration_phase, MigrationPhase::CatchingUp);
    assert!(!store.phase_history().await.contains(&MigrationPhase::RolledBack));

    // The source was never asked to reject writes, so nothing is resumed.
    assert_eq!(source.reject_calls(), 0);
    assert_eq!(source.resume_calls(), 0);
    assert_eq!(restarter.restarts(), 0);
    assert_eq!(service.gate_state(), GateState::AcceptingWrites);
}

fn catching_up_status(
    partition_id: migration::types::PartitionId,
    kvs_lsn: i64,
    watermark: i64,
) -> MigrationStatus {
    let mut status = MigrationStatus::new(partition_id, chrono::Utc::now());
    status.set_phase(MigrationPhase::CatchingUp, chrono::Utc::now());
    status.kvs_lsn = kvs_lsn;
    status.copy_end_sequence_number = watermark;
    status.applied_sequence_number = watermark;

    status
}

/// Resumes a migration in catch-up with the destination applied through
/// `watermark` while the source log is frozen at sequence number 1000.
async fn resume_catch_up_at(watermark: i64) -> (MigrationStatus, Vec<MigrationPhase>) {
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 1_001).await;
    assert_eq!(service.get_last_sequence_number().await.unwrap(), 1_000);

    let partition_id = new_partition_id();
    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());
    let applied = service
        .log()
        .read_range(0, watermark, usize::MAX, false)
        .await
        .unwrap();
    store.inner().apply_records(applied).await.unwrap();
    store
        .store_migration_status(catching_up_status(partition_id, 1_000, watermark))
        .await
        .unwrap();

    let mut config = test_migration_config(2);
    config.downtime_threshold = 50;
    let orchestrator =
        MigrationOrchestrator::new(partition_id, config, service.clone(), store.clone()).unwrap();

    let status = orchestrator.run().await.unwrap();
    assert_destination_matches_source(&service, store.inner()).await;

    (status, store.phase_history().await)
}

#[tokio::test(flavor = "multi_thread")]
async fn lag_within_threshold_enters_downtime_directly() {
    init_test_tracing();

    let (status, phases) = resume_catch_up_at(960).await;

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(status.catch_up_rounds, 0);
    assert_eq!(
        phases,
        vec![
            MigrationPhase::CatchingUp,
            MigrationPhase::Downtime,
            MigrationPhase::Verifying,
            MigrationPhase::Completed,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn lag_above_threshold_runs_another_catch_up_round() {
    init_test_tracing();

    let (status, phases) = resume_catch_up_at(900).await;

    // The extra round closes the gap before writes are rejected.
    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(status.catch_up_rounds, 1);
    assert_eq!(phases[0], MigrationPhase::CatchingUp);
    assert_eq!(phases[1], MigrationPhase::Downtime);
}

fn copying_status(
    partition_id: migration::types::PartitionId,
    first: i64,
    last: i64,
    worker_count: u16,
) -> MigrationStatus {
    let mut status = MigrationStatus::new(partition_id, chrono::Utc::now());
    status.set_phase(MigrationPhase::Copying, chrono::Utc::now());
    status.kvs_lsn = last;
    status.copy_end_sequence_number = last;
    status.applied_sequence_number = first - 1;
    status.worker_statuses = partition_sequence_range(first, last, worker_count)
        .into_iter()
        .enumerate()
        .map(|(index, range)| WorkerStatus::new(RoundKind::Copy.worker_id(index), range))
        .collect();

    status
}

#[tokio::test(flavor = "multi_thread")]
async fn truncated_source_aborts_the_migration() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 1_000).await;

    let partition_id = new_partition_id();
    let store = MemoryStore::new();
    store
        .store_migration_status(copying_status(partition_id, 0, 999, 4))
        .await
        .unwrap();

    // The source dropped history the first worker still has to copy.
    service.log().truncate_through(199).await;

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(4),
        source.clone(),
        store.clone(),
    )
    .unwrap();

    let err = orchestrator.run().await.unwrap_err();

    assert!(err.has_kind(ErrorKind::DataLoss));
    let status = store.get_migration_status().await.unwrap().unwrap();
    assert_eq!(status.current_migration_phase, MigrationPhase::Aborted);
    // Writes were never rejected, so there is nothing to resume.
    assert_eq!(source.resume_calls(), 0);
    assert_eq!(service.gate_state(), GateState::AcceptingWrites);
}

#[tokio::test(flavor = "multi_thread")]
async fn copy_resumes_from_persisted_worker_watermarks() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 1_000).await;

    let partition_id = new_partition_id();
    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());

    // The first worker finished its range before the previous run stopped.
    let mut status = copying_status(partition_id, 0, 999, 4);
    let first_range: SequenceRange = status.worker_statuses[0].range();
    status.worker_statuses[0].first_applied_seq_num = first_range.start;
    status.worker_statuses[0].last_applied_seq_num = first_range.end;
    store.store_migration_status(status).await.unwrap();

    let copied = service
        .log()
        .read_range(first_range.start, first_range.end, usize::MAX, false)
        .await
        .unwrap();
    store.inner().apply_records(copied).await.unwrap();

    let source = FaultInjectingSequenceStore::wrap(service.clone());
    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(4),
        source,
        store.clone(),
    )
    .unwrap();

    let status = orchestrator.run().await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(store.applied_records(), 1_000 - first_range.len() as u64);
    assert_destination_matches_source(&service, store.inner()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reapplying_copied_ranges_is_harmless() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 400).await;

    let partition_id = new_partition_id();
    let store = FaultInjectingDestinationStore::wrap(MemoryStore::new());
    store
        .store_migration_status(copying_status(partition_id, 0, 399, 2))
        .await
        .unwrap();

    // Everything was applied, but the checkpoint recorded none of it.
    let copied = service.log().read_range(0, 399, usize::MAX, false).await.unwrap();
    store.inner().apply_records(copied).await.unwrap();

    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(2),
        service.clone(),
        store.clone(),
    )
    .unwrap();

    let status = orchestrator.run().await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_eq!(store.applied_records(), 400);
    assert_eq!(store.inner().record_count().await, 400);
    assert_destination_matches_source(&service, store.inner()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_keeps_the_phase_and_a_new_run_finishes() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 200).await;

    let partition_id = new_partition_id();
    let store = MemoryStore::new();

    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(2),
        service.clone(),
        store.clone(),
    )
    .unwrap();
    orchestrator.shutdown_tx().shutdown().unwrap();

    let status = orchestrator.run().await.unwrap();
    assert_eq!(status.current_migration_phase, MigrationPhase::Provisioning);
    assert_eq!(
        store
            .get_migration_status()
            .await
            .unwrap()
            .unwrap()
            .current_migration_phase,
        MigrationPhase::Provisioning
    );

    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(2),
        service.clone(),
        store.clone(),
    )
    .unwrap();
    let status = orchestrator.run().await.unwrap();

    assert_eq!(status.current_migration_phase, MigrationPhase::Completed);
    assert_destination_matches_source(&service, &store).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_migration_returns_immediately() {
    init_test_tracing();
    let (service, _restarter) = spawn_source_replica().await;
    seed_actor_states(&service, 10).await;

    let partition_id = new_partition_id();
    let source = FaultInjectingSequenceStore::wrap(service.clone());
    let store = MemoryStore::new();

    let mut completed = MigrationStatus::new(partition_id, chrono::Utc::now());
    completed.set_phase(MigrationPhase::Completed, chrono::Utc::now());
    store.store_migration_status(completed.clone()).await.unwrap();

    let orchestrator = MigrationOrchestrator::new(
        partition_id,
        test_migration_config(2),
        source.clone(),
        store.clone(),
    )
    .unwrap();
    let status = orchestrator.run().await.unwrap();

    assert_eq!(status, completed);
    assert_eq!(source.enumeration_calls(), 0);
    assert_eq!(source.reject_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_is_rejected() {
    let (service, _restarter) = spawn_source_replica().await;
    let mut config = test_migration_config(2);
    config.worker_count = 0;

    let err = MigrationOrchestrator::new(new_partition_id(), config, service, MemoryStore::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}
