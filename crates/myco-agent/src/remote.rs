//! The remote sync boundary.
//!
//! [`SyncTransport`] is the logical contract with the system of record:
//! submit a batch keyed by each entry's `local_id`, get a per-item verdict
//! back. The trait keeps the transport swappable (HTTP today, a push
//! transport later) without touching the engine or ledger contracts. The
//! remote is required to treat a repeated `local_id` as a no-op re-ack —
//! network partitions make duplicate submissions unavoidable.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use myco_types::{SyncItem, SyncOutcome};

/// How a sync attempt failed, from the agent's point of view.
///
/// Transient failures are retried with backoff; permanent ones are
/// surfaced immediately and never retried automatically.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network trouble, timeout, or a server-side (5xx) error.
    #[error("transient sync failure: {0}")]
    Transient(String),

    /// The endpoint itself rejected the request (4xx).
    #[error("permanent sync failure: {0}")]
    Permanent(String),
}

/// Request body for one batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    /// Entries keyed by their idempotency keys.
    pub items: Vec<SyncItem>,
}

/// Response body for one batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    /// One verdict per submitted item.
    pub results: Vec<SyncOutcome>,
}

/// Something that can deliver a batch to the system of record.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Submit one batch and return per-item verdicts.
    ///
    /// # Errors
    ///
    /// A whole-batch [`SyncError`] means no item got a verdict; the caller
    /// treats every item as transiently failed.
    async fn submit(&self, items: &[SyncItem]) -> Result<Vec<SyncOutcome>, SyncError>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    async fn submit(&self, items: &[SyncItem]) -> Result<Vec<SyncOutcome>, SyncError> {
        (**self).submit(items).await
    }
}

/// HTTP transport against the remote batch endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a transport with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Permanent`] when the client cannot be built;
    /// that is a configuration problem, not a network one.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Permanent(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn submit(&self, items: &[SyncItem]) -> Result<Vec<SyncOutcome>, SyncError> {
        let batch = SyncBatch {
            items: items.to_vec(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&batch)
            .send()
            .await
            .map_err(|e| {
                // Timeouts and connection failures are the normal offline
                // case, not errors worth more than a retry.
                SyncError::Transient(e.to_string())
            })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(SyncError::Permanent(format!("endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(SyncError::Transient(format!("endpoint returned {status}")));
        }

        let parsed: SyncResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Transient(format!("invalid response body: {e}")))?;

        debug!(
            submitted = items.len(),
            results = parsed.results.len(),
            "batch submitted"
        );
        Ok(parsed.results)
    }
}

/// In-memory transport simulating an idempotent remote for tests.
///
/// Accepts everything by default, remembers which `local_id`s it has
/// stored, and re-acks duplicates with the original `backend_id` instead
/// of creating a second record. Failures are scripted per item (HTTP-style
/// codes) or per batch (transient outages).
#[derive(Debug, Default)]
pub struct MemoryTransport {
    stored: Mutex<BTreeMap<Uuid, String>>,
    item_codes: Mutex<BTreeMap<Uuid, u16>>,
    failing_batches: AtomicU32,
    submissions: AtomicU32,
    next_id: AtomicU64,
}

impl MemoryTransport {
    /// Create a transport that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an HTTP-style code for one item; 4xx rejects permanently,
    /// 5xx rejects transiently.
    pub fn set_item_code(&self, local_id: Uuid, code: u16) {
        self.item_codes
            .lock()
            .expect("item_codes lock")
            .insert(local_id, code);
    }

    /// Clear a previously scripted item code.
    pub fn clear_item_code(&self, local_id: Uuid) {
        self.item_codes
            .lock()
            .expect("item_codes lock")
            .remove(&local_id);
    }

    /// Make the next `n` whole submissions fail transiently.
    pub fn fail_batches(&self, n: u32) {
        self.failing_batches.store(n, Ordering::SeqCst);
    }

    /// How many submissions were attempted.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of logical records stored server-side.
    pub fn stored_count(&self) -> usize {
        self.stored.lock().expect("stored lock").len()
    }

    /// The backend id a local id was stored under, if any.
    pub fn backend_id_of(&self, local_id: Uuid) -> Option<String> {
        self.stored.lock().expect("stored lock").get(&local_id).cloned()
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn submit(&self, items: &[SyncItem]) -> Result<Vec<SyncOutcome>, SyncError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if self.failing_batches.load(Ordering::SeqCst) > 0 {
            self.failing_batches.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::Transient("injected outage".to_string()));
        }

        let mut stored = self.stored.lock().expect("stored lock");
        let codes = self.item_codes.lock().expect("item_codes lock");

        let results = items
            .iter()
            .map(|item| {
                if let Some(&code) = codes.get(&item.local_id) {
                    return SyncOutcome::rejected(item.local_id, code);
                }
                // Idempotency: a known local_id is re-acked, not re-stored.
                let backend_id = stored.entry(item.local_id).or_insert_with(|| {
                    format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
                });
                SyncOutcome::accepted(item.local_id, backend_id.clone())
            })
            .collect();

        Ok(results)
    }
}
