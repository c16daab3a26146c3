//! Client traffic of a source replica. Writes go through the write gate.

use actix_web::{
    HttpResponse, Responder, delete, get, put,
    web::{Bytes, Data, Json, Path},
};

use crate::control::KvsControl;
use crate::routes::ApiError;

#[get("/Kvs/{key}")]
pub async fn get_value(
    kvs: Data<dyn KvsControl>,
    key: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let response = match kvs.get(&key).await? {
        Some(value) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(value),
        None => HttpResponse::NotFound().finish(),
    };

    Ok(response)
}

/// Writes the request body under `key` and returns the sequence number of the write.
#[put("/Kvs/{key}")]
pub async fn put_value(
    kvs: Data<dyn KvsControl>,
    key: Path<String>,
    value: Bytes,
) -> Result<impl Responder, ApiError> {
    let sequence_number = kvs.put(key.into_inner(), value.to_vec()).await?;

    Ok(Json(sequence_number))
}

#[delete("/Kvs/{key}")]
pub async fn delete_value(
    kvs: Data<dyn KvsControl>,
    key: Path<String>,
) -> Result<impl Responder, ApiError> {
    let sequence_number = kvs.delete(&key).await?;

    Ok(Json(sequence_number))
}
