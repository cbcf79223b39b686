//! # Remote API Client
//!
//! The seam to the authoritative server: a small trait the orchestrator
//! drains against, plus the production HTTP implementation.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Remote API Contract                            │
//! │                                                                     │
//! │  create(record, idempotency_key) → ServerRecord | Conflict         │
//! │  update(id, patch, base_version, idempotency_key) → ServerRecord   │
//! │  delete(id, idempotency_key)     → Ack | NotFound                  │
//! │  list_all()                      → [ServerRecord]                  │
//! │                                                                     │
//! │  The server honors the idempotency key: re-submitting the same     │
//! │  logical operation answers Conflict (or the original result), not  │
//! │  a second record. The engine treats Conflict as SUCCESS.           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tests substitute their own implementation; nothing above this module
//! knows whether the other side is HTTP, a fixture or a closure.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use tally_core::{IdempotencyKey, Patch, SyncRecord};

use crate::config::ServerSettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Error
// =============================================================================

/// Failure modes of a remote call, as the orchestrator distinguishes them.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server already applied an equivalent idempotent operation.
    /// Treated as success by every caller.
    #[error("Server reports duplicate/conflict for this operation")]
    Conflict,

    /// The target no longer exists. Success for deletes, terminal for
    /// updates.
    #[error("Record not found on server")]
    NotFound,

    /// Network trouble or a server-side 5xx: worth retrying, up to the cap.
    #[error("Transient sync failure: {0}")]
    Transient(String),

    /// The server understood the request and refused it (4xx). Retrying an
    /// identical payload cannot succeed.
    #[error("Rejected by server: {0}")]
    Rejected(String),
}

impl ApiError {
    /// Only transient failures consume a retry attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

// =============================================================================
// RemoteApi Trait
// =============================================================================

/// The authoritative server, as seen by one entity kind's orchestrator.
///
/// All calls accept an idempotency key; the implementation must pass it
/// through so repeated submissions of the same logical mutation collapse.
#[async_trait]
pub trait RemoteApi<R: SyncRecord>: Send + Sync {
    /// Creates a record; returns the server's authoritative copy.
    async fn create(&self, record: &R, key: &IdempotencyKey) -> Result<R, ApiError>;

    /// Patches a record by server id; returns the updated copy.
    async fn update(
        &self,
        server_id: &str,
        patch: &Patch,
        base_version: i64,
        key: &IdempotencyKey,
    ) -> Result<R, ApiError>;

    /// Deletes a record by server id.
    async fn delete(&self, server_id: &str, key: &IdempotencyKey) -> Result<(), ApiError>;

    /// Lists the entire collection (reconciliation fetch).
    async fn list_all(&self) -> Result<Vec<R>, ApiError>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// Header carrying the idempotency key.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Header carrying the version an update patch was based on.
const BASE_VERSION_HEADER: &str = "X-Base-Version";

/// JSON-over-HTTP client for one entity kind's collection.
///
/// Collections live under `{base_url}/{kind path}`, e.g.
/// `https://pos.example.com/api/stock-outs`.
pub struct HttpRemoteApi<R: SyncRecord> {
    client: reqwest::Client,
    base_url: String,
    _marker: PhantomData<fn() -> R>,
}

impl<R: SyncRecord> HttpRemoteApi<R> {
    /// Builds the client from server settings.
    pub fn new(settings: &ServerSettings) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self::with_client(client, &settings.base_url))
    }

    /// Builds the client around an existing `reqwest::Client` (shared
    /// connection pool across entity kinds).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        HttpRemoteApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            _marker: PhantomData,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, R::KIND.api_path())
    }

    fn record_url(&self, server_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, R::KIND.api_path(), server_id)
    }

    /// Maps an HTTP response to the orchestrator's error taxonomy and
    /// decodes the body on success.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ApiError::Transient(format!("invalid response body: {e}")));
        }

        Err(Self::status_error(status, response).await)
    }

    async fn status_error(status: reqwest::StatusCode, response: reqwest::Response) -> ApiError {
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            409 => ApiError::Conflict,
            404 => ApiError::NotFound,
            code if status.is_server_error() => {
                ApiError::Transient(format!("HTTP {code}: {body}"))
            }
            code => ApiError::Rejected(format!("HTTP {code}: {body}")),
        }
    }

    fn transport_error(err: reqwest::Error) -> ApiError {
        // Anything that never produced a response (DNS, refused connection,
        // timeout) is by definition transient.
        ApiError::Transient(err.to_string())
    }
}

#[async_trait]
impl<R: SyncRecord> RemoteApi<R> for HttpRemoteApi<R> {
    async fn create(&self, record: &R, key: &IdempotencyKey) -> Result<R, ApiError> {
        debug!(entity = %R::KIND, key = %key, "POST create");

        let response = self
            .client
            .post(self.collection_url())
            .header(IDEMPOTENCY_HEADER, key.to_string())
            .json(record)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::decode(response).await
    }

    async fn update(
        &self,
        server_id: &str,
        patch: &Patch,
        base_version: i64,
        key: &IdempotencyKey,
    ) -> Result<R, ApiError> {
        debug!(entity = %R::KIND, server_id = %server_id, "PATCH update");

        let response = self
            .client
            .patch(self.record_url(server_id))
            .header(IDEMPOTENCY_HEADER, key.to_string())
            .header(BASE_VERSION_HEADER, base_version)
            .json(patch)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::decode(response).await
    }

    async fn delete(&self, server_id: &str, key: &IdempotencyKey) -> Result<(), ApiError> {
        debug!(entity = %R::KIND, server_id = %server_id, "DELETE");

        let response = self
            .client
            .delete(self.record_url(server_id))
            .header(IDEMPOTENCY_HEADER, key.to_string())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Self::status_error(status, response).await)
    }

    async fn list_all(&self) -> Result<Vec<R>, ApiError> {
        debug!(entity = %R::KIND, "GET list_all");

        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::decode(response).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
