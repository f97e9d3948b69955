/// In-process store used when no database is configured, and by the test
/// suite. Keeps the same commit/subscribe semantics as the Postgres adapter:
/// the transform runs under the lock against the latest document.
// region:    --- Imports
use crate::document::AuctionDocument;
use crate::notification::Notification;
use crate::store::{RemoteChange, StoreAdapter, StoreError, Transform};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
// endregion: --- Imports

// region:    --- Memory Store

pub struct MemoryStore {
    document: Mutex<AuctionDocument>,
    changes: broadcast::Sender<RemoteChange>,
}

impl MemoryStore {
    pub fn new(initial: AuctionDocument) -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            document: Mutex::new(initial),
            changes,
        })
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn load(&self) -> Result<AuctionDocument, StoreError> {
        Ok(self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn commit(
        &self,
        transform: Transform,
        notification: Option<Notification>,
    ) -> Result<(), StoreError> {
        let mut guard = self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = transform(guard.clone());
        next.version = guard.version + 1;
        *guard = next.clone();
        // Broadcast while still holding the lock so subscribers observe
        // commits in version order. No receivers is fine; viewers may not
        // have attached yet.
        let _ = self.changes.send(RemoteChange {
            document: next,
            notification,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}

// endregion: --- Memory Store
