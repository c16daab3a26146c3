use futures::{StreamExt, TryStreamExt, stream};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::error::{ErrorKind, MigrationError, MigrationResult};
use crate::migration_error;
use crate::source::base::{EnumerationStream, SequenceStore};
use crate::types::{EnumerationRequest, EnumerationResponse, SequenceNumber};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error body returned by the control surface.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorMessage {
    message: String,
    error_code: String,
}

impl ErrorMessage {
    fn into_error(self) -> MigrationError {
        let kind = ErrorKind::from_code(&self.error_code).unwrap_or(ErrorKind::SourceRequestFailed);
        migration_error!(kind, "Source service returned an error", self.message)
    }
}

/// A line of an enumeration response body. Enumeration failures after the first
/// page are reported in-band since the response status is already sent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageLine {
    Page(EnumerationResponse),
    Error(ErrorMessage),
}

/// [`SequenceStore`] served by a remote source replica over HTTP.
#[derive(Debug, Clone)]
pub struct KvsServiceClient {
    client: reqwest::Client,
    endpoint: String,
}

impl KvsServiceClient {
    /// Builds a client of the replica at `endpoint`.
    ///
    /// A request still running after `request_timeout` fails as
    /// [`ErrorKind::SourceUnavailable`], so a stalled source is retried like an
    /// unreachable one.
    pub fn new(endpoint: &str, request_timeout: Duration) -> MigrationResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/KvsMigration/{operation}", self.endpoint)
    }

    async fn send(&self, method: Method, operation: &str) -> MigrationResult<reqwest::Response> {
        let response = self
            .client
            .request(method, self.url(operation))
            .send()
            .await?;

        check_status(response).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        operation: &str,
    ) -> MigrationResult<T> {
        let response = self.send(method, operation).await?;

        Ok(response.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> MigrationResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await?;
    if let Ok(message) = serde_json::from_slice::<ErrorMessage>(&body) {
        return Err(message.into_error());
    }

    let kind = if status == StatusCode::SERVICE_UNAVAILABLE {
        ErrorKind::SourceUnavailable
    } else {
        ErrorKind::SourceRequestFailed
    };

    Err(migration_error!(
        kind,
        "Source service returned an error",
        format!("status {status}: {}", String::from_utf8_lossy(&body))
    ))
}

fn parse_line(line: &[u8]) -> MigrationResult<Option<EnumerationResponse>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    match serde_json::from_slice::<PageLine>(line)? {
        PageLine::Page(page) => Ok(Some(page)),
        PageLine::Error(message) => Err(message.into_error()),
    }
}

impl SequenceStore for KvsServiceClient {
    async fn get_first_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.call(Method::GET, "GetFirstSequenceNumber").await
    }

    async fn get_last_sequence_number(&self) -> MigrationResult<SequenceNumber> {
        self.call(Method::GET, "GetLastSequenceNumber").await
    }

    async fn enumerate(&self, request: EnumerationRequest) -> MigrationResult<EnumerationStream> {
        let operation = if request.include_deletes {
            "EnumerateKeysAndTombstones"
        } else {
            "EnumerateBySequenceNumber"
        };

        debug!(
            operation,
            start = request.start_sequence_number,
            end = request.end_sequence_number,
            "requesting enumeration from source service"
        );

        let response = self
            .client
            .get(self.url(operation))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body = response.bytes_stream().map_err(MigrationError::from).boxed();
        let pages = stream::try_unfold(
            (body, Vec::new(), false),
            |(mut body, mut buffer, mut body_finished)| async move {
                loop {
                    if let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=position).collect();
                        if let Some(page) = parse_line(&line)? {
                            return Ok(Some((page, (body, buffer, body_finished))));
                        }
                        continue;
                    }

                    if body_finished {
                        return Ok(None);
                    }

                    match body.try_next().await? {
                        Some(chunk) => buffer.extend_from_slice(&chunk),
                        None => {
                            body_finished = true;
                            // The last line may miss its trailing newline.
                            let rest = std::mem::take(&mut buffer);
                            if let Some(page) = parse_line(&rest)? {
                                return Ok(Some((page, (body, buffer, body_finished))));
                            }
                        }
                    }
                }
            },
        );

        Ok(pages.boxed())
    }

    async fn try_abort_existing_transactions_and_reject_writes(&self) -> MigrationResult<bool> {
        self.call(Method::PUT, "TryAbortExistingTransactionsAndRejectWrites")
            .await
    }

    async fn resume_writes(&self) -> MigrationResult<bool> {
        self.call(Method::PUT, "ResumeWrites").await
    }
}
