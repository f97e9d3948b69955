/// Postgres-backed store. The whole document lives in a single JSONB row;
/// commits take a row lock so the transform always sees the latest persisted
/// state, and `pg_notify` inside the same transaction fans the change out to
/// every connected process.
// region:    --- Imports
use crate::document::{ensure_structure, AuctionDocument};
use crate::notification::Notification;
use crate::store::{RemoteChange, StoreAdapter, StoreError, Transform};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
// endregion: --- Imports

// region:    --- Postgres Store

const CHANGE_CHANNEL: &str = "auction_document_changed";

/// Payload carried on the NOTIFY channel. The document itself is not inlined;
/// subscribers reload it, which also heals any structural drift.
#[derive(Debug, Serialize, Deserialize)]
struct ChangePayload {
    version: u64,
    notification: Option<Notification>,
}

pub struct PostgresStore {
    pool: PgPool,
    changes: broadcast::Sender<RemoteChange>,
}

impl PostgresStore {
    /// Connects, bootstraps the schema, seeds the document row if missing and
    /// starts the listener task.
    pub async fn connect(database_url: &str) -> Result<Arc<Self>, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let schema = include_str!("../sql/01-create-schema.sql");
        for statement in schema.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&pool).await?;
            }
        }

        sqlx::query(
            "INSERT INTO auction_document (id, data) VALUES (1, $1)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(serde_json::to_value(AuctionDocument::default())?)
        .execute(&pool)
        .await?;

        let (changes, _) = broadcast::channel(64);
        let store = Arc::new(Self { pool, changes });
        store.clone().spawn_listener(database_url.to_string());
        info!("{:<12} --> connected, document row ready", "Store");
        Ok(store)
    }

    /// Listener loop; reconnects with a short backoff when the connection is
    /// lost so subscribers keep receiving authoritative updates.
    fn spawn_listener(self: Arc<Self>, database_url: String) {
        tokio::spawn(async move {
            loop {
                let mut listener = match PgListener::connect(&database_url).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("{:<12} --> listener connect failed: {e}", "Store");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                if let Err(e) = listener.listen(CHANGE_CHANNEL).await {
                    error!("{:<12} --> LISTEN failed: {e}", "Store");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                info!("{:<12} --> listening on {CHANGE_CHANNEL}", "Store");

                loop {
                    match listener.recv().await {
                        Ok(message) => {
                            let notification = serde_json::from_str::<ChangePayload>(
                                message.payload(),
                            )
                            .map(|p| p.notification)
                            .unwrap_or_else(|e| {
                                warn!("{:<12} --> undecodable payload: {e}", "Store");
                                None
                            });
                            match self.load().await {
                                Ok(document) => {
                                    let _ = self.changes.send(RemoteChange {
                                        document,
                                        notification,
                                    });
                                }
                                Err(e) => {
                                    error!("{:<12} --> reload after notify failed: {e}", "Store")
                                }
                            }
                        }
                        Err(e) => {
                            warn!("{:<12} --> listener dropped, reconnecting: {e}", "Store");
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl StoreAdapter for PostgresStore {
    async fn load(&self) -> Result<AuctionDocument, StoreError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM auction_document WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((value,)) => Ok(ensure_structure(value)),
            None => {
                // Row vanished (manual truncation); reseed rather than fail.
                let default = AuctionDocument::default();
                sqlx::query(
                    "INSERT INTO auction_document (id, data) VALUES (1, $1)
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(serde_json::to_value(&default)?)
                .execute(&self.pool)
                .await?;
                Ok(default)
            }
        }
    }

    async fn commit(
        &self,
        transform: Transform,
        notification: Option<Notification>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let (value,): (serde_json::Value,) =
            sqlx::query_as("SELECT data FROM auction_document WHERE id = 1 FOR UPDATE")
                .fetch_one(&mut *tx)
                .await?;

        let current = ensure_structure(value);
        let current_version = current.version;
        let mut next = transform(current);
        next.version = current_version + 1;

        sqlx::query("UPDATE auction_document SET data = $1, updated_at = now() WHERE id = 1")
            .bind(serde_json::to_value(&next)?)
            .execute(&mut *tx)
            .await?;

        let payload = serde_json::to_string(&ChangePayload {
            version: next.version,
            notification,
        })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteChange> {
        self.changes.subscribe()
    }
}

// endregion: --- Postgres Store
