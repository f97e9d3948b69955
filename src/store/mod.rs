/// Store adapter boundary: load / commit / subscribe against whatever backend
/// holds the shared document. The commit path is the single serialization
/// point for all clients.
// region:    --- Imports
use crate::document::AuctionDocument;
use crate::notification::Notification;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
// endregion: --- Imports

// region:    --- Contract

/// A pure state transformation. Commit re-evaluates the transform against the
/// latest persisted document, never against the submitter's local copy, so a
/// transform whose preconditions no longer hold must return its input
/// unchanged.
pub type Transform = Arc<dyn Fn(AuctionDocument) -> AuctionDocument + Send + Sync>;

/// One authoritative update fanned out to every subscriber, including the
/// committing client.
#[derive(Debug, Clone)]
pub struct RemoteChange {
    pub document: AuctionDocument,
    pub notification: Option<Notification>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Fetches the current document, structurally repairing malformed or
    /// partial data. Never rejects a readable row.
    async fn load(&self) -> Result<AuctionDocument, StoreError>;

    /// Atomically applies `transform` to the latest persisted document, bumps
    /// the version and persists the result. On any I/O failure nothing is
    /// written. Successful commits reach all subscribers.
    async fn commit(
        &self,
        transform: Transform,
        notification: Option<Notification>,
    ) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange>;
}

// endregion: --- Contract
