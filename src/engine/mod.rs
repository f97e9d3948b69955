/// Transaction manager: applies pure transforms with an instant local
/// preview, commits them through the store adapter, and resynchronizes from
/// the authoritative document when a commit fails.
// region:    --- Imports
use crate::document::AuctionDocument;
use crate::notification::Notification;
use crate::store::{StoreAdapter, StoreError, Transform};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
// endregion: --- Imports

// region:    --- Engine Events

/// What the engine fans out to presentation consumers (the SSE relay):
/// document snapshots (optimistic previews and authoritative deliveries
/// alike) and transient notifications.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Document(AuctionDocument),
    Notification(Notification),
}

// endregion: --- Engine Events

// region:    --- Sync Engine

pub struct SyncEngine {
    store: Arc<dyn StoreAdapter>,
    local: watch::Sender<AuctionDocument>,
    events: broadcast::Sender<EngineEvent>,
    /// Per-process throttle for terminal actions (sell / unsold / RTM). A
    /// latency optimization only: commit-time re-validation is what actually
    /// keeps duplicate finalizes harmless.
    finalizing: AtomicBool,
    /// Id of the notification this process last emitted optimistically, so
    /// its authoritative echo is not forwarded to event consumers twice.
    emitted_notification: Mutex<Option<String>>,
}

impl SyncEngine {
    /// Loads the initial document and spawns the subscription loop that keeps
    /// the local view authoritative.
    pub async fn start(store: Arc<dyn StoreAdapter>) -> Result<Arc<Self>, StoreError> {
        let initial = store.load().await?;
        info!(
            "{:<12} --> synchronized at version {}",
            "Engine", initial.version
        );
        let (local, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(256);
        let engine = Arc::new(Self {
            store,
            local,
            events,
            finalizing: AtomicBool::new(false),
            emitted_notification: Mutex::new(None),
        });
        engine.clone().spawn_subscription();
        Ok(engine)
    }

    fn spawn_subscription(self: Arc<Self>) {
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        // Broadcast deliveries can arrive out of order; an
                        // older document must never replace a newer local
                        // view.
                        let stale =
                            change.document.version < self.local.borrow().version;
                        if !stale {
                            // Remote deliveries supersede any optimistic
                            // preview and release the terminal-action
                            // throttle.
                            self.local.send_replace(change.document.clone());
                            self.finalizing.store(false, Ordering::Release);
                            let _ = self.events.send(EngineEvent::Document(change.document));
                        }
                        if let Some(n) = change.notification {
                            if !self.already_emitted(&n.id) {
                                let _ = self.events.send(EngineEvent::Notification(n));
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("{:<12} --> lagged {skipped} updates, resyncing", "Engine");
                        if let Ok(fresh) = self.store.load().await {
                            self.local.send_replace(fresh.clone());
                            let _ = self.events.send(EngineEvent::Document(fresh));
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// The engine's one public mutation path. Publishes the optimistic
    /// preview synchronously, then commits the *same transform* so it is
    /// re-evaluated against whatever the authoritative state turns out to be.
    /// On failure the preview is discarded and the local view replaced by a
    /// fresh load; there is no partial undo.
    pub async fn apply(&self, transform: Transform, notification: Option<Notification>) {
        let preview = transform(self.local.borrow().clone());
        self.local.send_replace(preview.clone());
        let _ = self.events.send(EngineEvent::Document(preview));
        if let Some(n) = &notification {
            self.record_emitted(Some(n.id.clone()));
            let _ = self.events.send(EngineEvent::Notification(n.clone()));
        }

        match self.store.commit(transform, notification).await {
            Ok(()) => {
                self.finalizing.store(false, Ordering::Release);
            }
            Err(e) => {
                warn!("{:<12} --> commit failed, rolling back: {e}", "Engine");
                self.finalizing.store(false, Ordering::Release);
                // The echo will never arrive.
                self.record_emitted(None);
                match self.store.load().await {
                    Ok(fresh) => {
                        self.local.send_replace(fresh.clone());
                        let _ = self.events.send(EngineEvent::Document(fresh));
                    }
                    Err(e) => error!("{:<12} --> resynchronization failed: {e}", "Engine"),
                }
            }
        }
    }

    fn record_emitted(&self, id: Option<String>) {
        *self
            .emitted_notification
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = id;
    }

    /// True exactly once for the id recorded by `apply`; notifications from
    /// other processes are never suppressed.
    fn already_emitted(&self, id: &str) -> bool {
        let mut emitted = self
            .emitted_notification
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if emitted.as_deref() == Some(id) {
            *emitted = None;
            true
        } else {
            false
        }
    }

    /// Snapshot of the current local view (optimistic or authoritative).
    pub fn document(&self) -> AuctionDocument {
        self.local.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AuctionDocument> {
        self.local.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Claims the terminal-action throttle; `false` means another finalize
    /// from this process is still in flight.
    pub fn try_begin_finalize(&self) -> bool {
        self.finalizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_finalize(&self) {
        self.finalizing.store(false, Ordering::Release);
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::Acquire)
    }
}

// endregion: --- Sync Engine
