//! Durable per-room stores for pending deliveries and resume records.
//!
//! Each room owns two keyed stores:
//!
//! - `pending:{toPeerId}:{deliveryId}` → [`PendingDelivery`]
//! - `resume:{token}` → [`ResumeRecord`]
//!
//! The [`RoomStore`] trait is the seam between the room actor and its
//! backing storage. A failed delivery persist aborts the admission (the
//! sender sees `error{code=STORAGE}`), so the error path is first-class.
//! [`MemoryStore`] is the in-process implementation; iteration order is the
//! key order of the underlying `BTreeMap`, which is what replay relies on.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A signaling message awaiting recipient confirmation.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub delivery_id: String,
    pub from_peer_id: String,
    pub from_user_id: String,
    pub to_peer_id: String,
    /// Opaque payload, forwarded verbatim.
    pub payload: serde_json::Value,
    /// Epoch milliseconds, wire-visible.
    pub sent_at: i64,
    /// Number of times the frame was actually written toward the recipient.
    pub attempts: u32,
    pub next_retry_at: Instant,
    pub expires_at: Instant,
}

/// Ledger row that makes a disconnected peer resumable.
#[derive(Debug, Clone)]
pub struct ResumeRecord {
    pub token: String,
    pub peer_id: String,
    pub user_id: String,
    pub room_id: String,
    pub alias: Option<String>,
    pub expires_at: Instant,
}

/// Error type for store operations.
#[derive(Debug, Error)]
#[error("storage backend error: {0}")]
pub struct StoreError(pub String);

/// Keyed storage owned by one room.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn put_delivery(&self, delivery: &PendingDelivery) -> Result<(), StoreError>;
    async fn get_delivery(
        &self,
        to_peer_id: &str,
        delivery_id: &str,
    ) -> Result<Option<PendingDelivery>, StoreError>;
    async fn delete_delivery(&self, to_peer_id: &str, delivery_id: &str)
        -> Result<(), StoreError>;
    /// Deliveries addressed to one peer, in storage-iteration order.
    async fn deliveries_for(&self, to_peer_id: &str) -> Result<Vec<PendingDelivery>, StoreError>;
    async fn all_deliveries(&self) -> Result<Vec<PendingDelivery>, StoreError>;

    async fn put_resume(&self, record: &ResumeRecord) -> Result<(), StoreError>;
    async fn get_resume(&self, token: &str) -> Result<Option<ResumeRecord>, StoreError>;
    async fn delete_resume(&self, token: &str) -> Result<(), StoreError>;
    async fn all_resume(&self) -> Result<Vec<ResumeRecord>, StoreError>;
}

fn delivery_key(to_peer_id: &str, delivery_id: &str) -> String {
    format!("pending:{to_peer_id}:{delivery_id}")
}

fn resume_key(token: &str) -> String {
    format!("resume:{token}")
}

#[derive(Default)]
struct MemoryStoreInner {
    deliveries: BTreeMap<String, PendingDelivery>,
    resume: BTreeMap<String, ResumeRecord>,
}

/// In-process `RoomStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn put_delivery(&self, delivery: &PendingDelivery) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.deliveries.insert(
            delivery_key(&delivery.to_peer_id, &delivery.delivery_id),
            delivery.clone(),
        );
        Ok(())
    }

    async fn get_delivery(
        &self,
        to_peer_id: &str,
        delivery_id: &str,
    ) -> Result<Option<PendingDelivery>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deliveries
            .get(&delivery_key(to_peer_id, delivery_id))
            .cloned())
    }

    async fn delete_delivery(
        &self,
        to_peer_id: &str,
        delivery_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .deliveries
            .remove(&delivery_key(to_peer_id, delivery_id));
        Ok(())
    }

    async fn deliveries_for(&self, to_peer_id: &str) -> Result<Vec<PendingDelivery>, StoreError> {
        let prefix = format!("pending:{to_peer_id}:");
        let inner = self.inner.lock().await;
        Ok(inner
            .deliveries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn all_deliveries(&self) -> Result<Vec<PendingDelivery>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.deliveries.values().cloned().collect())
    }

    async fn put_resume(&self, record: &ResumeRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .resume
            .insert(resume_key(&record.token), record.clone());
        Ok(())
    }

    async fn get_resume(&self, token: &str) -> Result<Option<ResumeRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.resume.get(&resume_key(token)).cloned())
    }

    async fn delete_resume(&self, token: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.resume.remove(&resume_key(token));
        Ok(())
    }

    async fn all_resume(&self) -> Result<Vec<ResumeRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.resume.values().cloned().collect())
    }
}
