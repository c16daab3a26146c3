use migration::controller::MigrationController;
use migration::source::client::KvsServiceClient;
use migration::store::memory::MemoryStore;
use migration::test_utils::migration::{
    MemoryKvsService, spawn_source_replica, test_migration_config,
};
use migration::test_utils::restarter::CountingReplicaRestarter;
use migration::types::PartitionId;
use migration_service::control::{KvsControl, MigrationControl};
use migration_service::startup::{ControlServices, run};
use serde::Serialize;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    server_handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestApp {
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.api_client
            .get(format!("{}{path}", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn get_with_json<B: Serialize>(&self, path: &str, body: &B) -> reqwest::Response {
        self.api_client
            .get(format!("{}{path}", &self.address))
            .json(body)
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn get_with_raw_json(&self, path: &str, body: &'static str) -> reqwest::Response {
        self.api_client
            .get(format!("{}{path}", &self.address))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn put(&self, path: &str) -> reqwest::Response {
        self.api_client
            .put(format!("{}{path}", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn put_bytes(&self, path: &str, body: Vec<u8>) -> reqwest::Response {
        self.api_client
            .put(format!("{}{path}", &self.address))
            .body(body)
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.api_client
            .delete(format!("{}{path}", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

async fn spawn_test_app(services: ControlServices) -> TestApp {
    let base_address = "127.0.0.1";
    let listener =
        TcpListener::bind(format!("{base_address}:0")).expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let server = run(listener, services).expect("failed to bind address");
    let server_handle = tokio::spawn(server);

    TestApp {
        address: format!("http://{base_address}:{port}"),
        api_client: reqwest::Client::new(),
        server_handle,
    }
}

/// A source replica served over HTTP together with the replica itself.
pub struct SourceApp {
    pub app: TestApp,
    pub service: MemoryKvsService,
    pub restarter: Arc<CountingReplicaRestarter>,
}

impl SourceApp {
    pub fn client(&self) -> KvsServiceClient {
        KvsServiceClient::new(&self.app.address, Duration::from_secs(5))
            .expect("failed to build the source client")
    }
}

pub async fn spawn_source_app() -> SourceApp {
    let (service, restarter) = spawn_source_replica().await;
    let control = Arc::new(service.clone()) as Arc<dyn KvsControl>;
    let app = spawn_test_app(ControlServices::Source(control)).await;

    SourceApp {
        app,
        service,
        restarter,
    }
}

pub fn new_partition_id() -> PartitionId {
    Uuid::new_v4()
}

/// A destination replica reading from `source` and keeping its records in `store`.
pub async fn spawn_destination_app(
    partition_id: PartitionId,
    source: &SourceApp,
    store: MemoryStore,
) -> TestApp {
    let mut config = test_migration_config(4);
    config.kvs_endpoint = source.app.address.clone();

    let controller = MigrationController::new(partition_id, config, source.client(), store);
    let control = Arc::new(controller) as Arc<dyn MigrationControl>;

    spawn_test_app(ControlServices::Destination(control)).await
}
