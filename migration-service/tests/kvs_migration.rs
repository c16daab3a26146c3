use futures::TryStreamExt;
use migration::error::ErrorKind;
use migration::gate::GateState;
use migration::source::base::SequenceStore;
use migration::test_utils::migration::{actor_state_key, actor_state_value, seed_actor_states};
use migration::types::{EnumerationRequest, EnumerationResponse, SequenceNumber};
use migration_service::routes::ErrorMessage;
use migration_telemetry::init_test_tracing;
use reqwest::StatusCode;

use crate::support::test_app::spawn_source_app;

mod support;

async fn collect_pages<S: SequenceStore>(
    source: &S,
    request: EnumerationRequest,
) -> Vec<EnumerationResponse> {
    source
        .enumerate(request)
        .await
        .expect("failed to start enumeration")
        .try_collect()
        .await
        .expect("failed to read enumeration pages")
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_numbers_are_served_as_json() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 25).await;

    let first: SequenceNumber = source
        .app
        .get("/KvsMigration/GetFirstSequenceNumber")
        .await
        .json()
        .await
        .unwrap();
    let last: SequenceNumber = source
        .app
        .get("/KvsMigration/GetLastSequenceNumber")
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(first, 0);
    assert_eq!(last, 24);
}

#[tokio::test(flavor = "multi_thread")]
async fn enumeration_streams_every_page_to_the_client() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 1_000).await;

    let pages = collect_pages(
        &source.client(),
        EnumerationRequest::new(0, 999, 100, 10, false),
    )
    .await;

    assert_eq!(pages.len(), 10);
    for page in &pages {
        page.verify_integrity().unwrap();
        assert_eq!(page.key_value_pairs.len(), 100);
    }
    assert!(pages.iter().take(9).all(|page| !page.end_sequence_number_reached));
    assert!(pages[9].end_sequence_number_reached);

    let versions: Vec<_> = pages
        .iter()
        .flat_map(|page| page.key_value_pairs.iter().map(|record| record.version))
        .collect();
    assert_eq!(versions, (0..1_000).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn tombstones_are_only_served_by_the_tombstone_route() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 10).await;
    source.service.delete(&actor_state_key(3)).await.unwrap();
    let client = source.client();

    let live = collect_pages(&client, EnumerationRequest::new(0, 10, 100, 1, false)).await;
    let with_deletes = collect_pages(&client, EnumerationRequest::new(0, 10, 100, 1, true)).await;

    assert_eq!(live[0].key_value_pairs.len(), 9);
    assert!(live[0].key_value_pairs.iter().all(|record| !record.is_deleted));

    assert_eq!(with_deletes[0].key_value_pairs.len(), 10);
    let tombstone = with_deletes[0].key_value_pairs.last().unwrap();
    assert!(tombstone.is_deleted);
    assert_eq!(tombstone.key, actor_state_key(3));
    assert_eq!(tombstone.version, 10);
    assert_eq!(tombstone.value, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn actor_ids_are_resolved_on_request() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 3).await;

    let mut request = EnumerationRequest::new(0, 2, 100, 1, false);
    request.resolve_actor_ids_for_state_kv_pairs = true;
    let pages = collect_pages(&source.client(), request).await;

    let actor_ids: Vec<_> = pages[0]
        .key_value_pairs
        .iter()
        .map(|record| record.actor_id.clone())
        .collect();
    assert_eq!(
        actor_ids,
        vec![
            Some("actor-0".to_string()),
            Some("actor-1".to_string()),
            Some("actor-2".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_enumeration_requests_are_bad_requests() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 10).await;

    let response = source
        .app
        .get_with_json(
            "/KvsMigration/EnumerateBySequenceNumber",
            &EnumerationRequest::new(8, 2, 100, 1, false),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message: ErrorMessage = response.json().await.unwrap();
    assert_eq!(message.error_code, "InvalidRequest");

    let response = source
        .app
        .get_with_raw_json(
            "/KvsMigration/EnumerateBySequenceNumber",
            r#"{"StartSequenceNumber":"abc"}"#,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let message: ErrorMessage = response.json().await.unwrap();
    assert_eq!(message.error_code, "InvalidRequest");

    let response = source
        .app
        .get("/KvsMigration/EnumerateKeysAndTombstones")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn truncated_ranges_surface_as_data_loss_in_the_client() {
    init_test_tracing();
    let source = spawn_source_app().await;
    seed_actor_states(&source.service, 100).await;
    source.service.log().truncate_through(49).await;

    let err = source
        .client()
        .enumerate(EnumerationRequest::new(0, 99, 10, 10, false))
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::DataLoss);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_writes_fail_until_writes_are_resumed() {
    init_test_tracing();
    let source = spawn_source_app().await;
    let key = actor_state_key(1);

    let response = source.app.put_bytes(&format!("/Kvs/{key}"), actor_state_value(1, 0)).await;
    assert!(response.status().is_success());

    let rejected: bool = source
        .app
        .put("/KvsMigration/TryAbortExistingTransactionsAndRejectWrites")
        .await
        .json()
        .await
        .unwrap();
    assert!(rejected);
    assert_eq!(source.service.gate_state(), GateState::RejectingWrites);

    let response = source.app.put_bytes(&format!("/Kvs/{key}"), actor_state_value(1, 1)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let message: ErrorMessage = response.json().await.unwrap();
    assert_eq!(message.error_code, "WritesRejected");

    let response = source.app.delete(&format!("/Kvs/{key}")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Reads are served while writes are rejected.
    let response = source.app.get(&format!("/Kvs/{key}")).await;
    assert!(response.status().is_success());
    assert_eq!(response.bytes().await.unwrap().to_vec(), actor_state_value(1, 0));

    let resumed: bool = source
        .app
        .put("/KvsMigration/ResumeWrites")
        .await
        .json()
        .await
        .unwrap();
    assert!(resumed);
    assert_eq!(source.restarter.restarts(), 1);

    let response = source.app.put_bytes(&format!("/Kvs/{key}"), actor_state_value(1, 1)).await;
    assert!(response.status().is_success());
    assert_eq!(
        source.service.get(&key).await.unwrap(),
        Some(actor_state_value(1, 1))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_keys_are_not_found() {
    init_test_tracing();
    let source = spawn_source_app().await;

    let response = source.app.get("/Kvs/actor-7_state").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
