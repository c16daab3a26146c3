//! Routes of a source replica consumed by the destination during a migration.

use actix_web::{
    HttpRequest, HttpResponse, Responder, get, put,
    web::{Bytes, Data, Json, JsonConfig},
};
use futures::StreamExt;
use migration::error::{ErrorKind, MigrationError};
use migration::migration_error;
use migration::types::EnumerationRequest;

use crate::control::KvsControl;
use crate::routes::{ApiError, ErrorMessage};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// JSON body extractor settings answering malformed enumeration requests with
/// [`ErrorKind::InvalidRequest`].
pub fn json_config() -> JsonConfig {
    JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        ApiError::from(migration_error!(
            ErrorKind::InvalidRequest,
            "Malformed enumeration request",
            err
        ))
        .into()
    })
}

#[get("/KvsMigration/GetFirstSequenceNumber")]
pub async fn get_first_sequence_number(
    kvs: Data<dyn KvsControl>,
) -> Result<impl Responder, ApiError> {
    Ok(Json(kvs.first_sequence_number().await?))
}

#[get("/KvsMigration/GetLastSequenceNumber")]
pub async fn get_last_sequence_number(
    kvs: Data<dyn KvsControl>,
) -> Result<impl Responder, ApiError> {
    Ok(Json(kvs.last_sequence_number().await?))
}

#[get("/KvsMigration/EnumerateBySequenceNumber")]
pub async fn enumerate_by_sequence_number(
    kvs: Data<dyn KvsControl>,
    request: Json<EnumerationRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut request = request.into_inner();
    request.include_deletes = false;

    stream_pages(kvs.get_ref(), request).await
}

#[get("/KvsMigration/EnumerateKeysAndTombstones")]
pub async fn enumerate_keys_and_tombstones(
    kvs: Data<dyn KvsControl>,
    request: Json<EnumerationRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut request = request.into_inner();
    request.include_deletes = true;

    stream_pages(kvs.get_ref(), request).await
}

#[put("/KvsMigration/TryAbortExistingTransactionsAndRejectWrites")]
pub async fn try_abort_existing_transactions_and_reject_writes(
    kvs: Data<dyn KvsControl>,
) -> Result<impl Responder, ApiError> {
    Ok(Json(kvs.reject_writes().await?))
}

#[put("/KvsMigration/ResumeWrites")]
pub async fn resume_writes(kvs: Data<dyn KvsControl>) -> Result<impl Responder, ApiError> {
    Ok(Json(kvs.resume_writes().await?))
}

/// Streams the pages of an enumeration as newline-delimited JSON.
///
/// Errors raised before the first page get an error status. Later errors are
/// written as a final `{Message, ErrorCode}` line, since the status is already
/// sent by then.
async fn stream_pages(
    kvs: &dyn KvsControl,
    request: EnumerationRequest,
) -> Result<HttpResponse, ApiError> {
    let pages = kvs.enumerate(request).await?;

    let body = pages.map(|page| {
        let mut line = match page {
            Ok(page) => serde_json::to_vec(&page)?,
            Err(err) => error_line(&err)?,
        };
        line.push(b'\n');

        Ok::<_, serde_json::Error>(Bytes::from(line))
    });

    Ok(HttpResponse::Ok()
        .content_type(NDJSON_CONTENT_TYPE)
        .streaming(body))
}

fn error_line(err: &MigrationError) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ErrorMessage::from(err))
}
