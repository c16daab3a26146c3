//! Routes of a destination replica.

use actix_web::{
    Responder, get, put,
    web::{Data, Json},
};

use crate::control::MigrationControl;
use crate::routes::ApiError;

#[get("/RcMigration/GetMigrationStatus")]
pub async fn get_migration_status(
    control: Data<dyn MigrationControl>,
) -> Result<impl Responder, ApiError> {
    let status = control.migration_status().await?;

    Ok(Json(status))
}

/// Compares both sides without changing either of them.
#[put("/RcMigration/VerifyMigration")]
pub async fn verify_migration(
    control: Data<dyn MigrationControl>,
) -> Result<impl Responder, ApiError> {
    let report = control.verify_migration().await?;

    Ok(Json(report))
}

#[put("/RcMigration/ResumeWritesOnKVSService")]
pub async fn resume_writes_on_kvs_service(
    control: Data<dyn MigrationControl>,
) -> Result<impl Responder, ApiError> {
    let resumed = control.resume_writes_on_source().await?;

    Ok(Json(resumed))
}
