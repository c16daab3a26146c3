use actix_web::{App, HttpServer, dev::Server, dev::ServerHandle, web};
use migration_config::shared::ApplicationConfig;
use std::net::TcpListener;
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

use crate::control::{KvsControl, MigrationControl};
use crate::routes::{
    health_check::health_check,
    kvs::{delete_value, get_value, put_value},
    kvs_migration::{
        enumerate_by_sequence_number, enumerate_keys_and_tombstones, get_first_sequence_number,
        get_last_sequence_number, json_config, resume_writes,
        try_abort_existing_transactions_and_reject_writes,
    },
    rc_migration::{get_migration_status, resume_writes_on_kvs_service, verify_migration},
};

/// Components served by a listener, one variant per service role.
#[derive(Clone)]
pub enum ControlServices {
    Source(Arc<dyn KvsControl>),
    Destination(Arc<dyn MigrationControl>),
}

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub fn build(listener: TcpListener, services: ControlServices) -> Result<Self, anyhow::Error> {
        let port = listener.local_addr()?.port();
        let server = run(listener, services)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn bind(config: &ApplicationConfig) -> Result<TcpListener, std::io::Error> {
    let address = format!("{}:{}", config.host, config.port);

    TcpListener::bind(address)
}

pub fn run(listener: TcpListener, services: ControlServices) -> Result<Server, anyhow::Error> {
    let server = HttpServer::new(move || {
        let app = App::new()
            .wrap(TracingLogger::default())
            .service(health_check);

        match services.clone() {
            ControlServices::Source(kvs) => app
                .app_data(web::Data::from(kvs))
                .app_data(json_config())
                //migration
                .service(get_first_sequence_number)
                .service(get_last_sequence_number)
                .service(enumerate_by_sequence_number)
                .service(enumerate_keys_and_tombstones)
                .service(try_abort_existing_transactions_and_reject_writes)
                .service(resume_writes)
                //client traffic
                .service(get_value)
                .service(put_value)
                .service(delete_value),
            ControlServices::Destination(control) => app
                .app_data(web::Data::from(control))
                .service(get_migration_status)
                .service(verify_migration)
                .service(resume_writes_on_kvs_service),
        }
    })
    .listen(listener)?
    .run();

    Ok(server)
}
