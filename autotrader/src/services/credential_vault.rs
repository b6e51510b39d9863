//! Resolves broker sessions per (user, mode).
//!
//! There is no process-wide broker client: every component that needs the
//! broker asks the vault for a session scoped to the strategy's user and mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use shared::entity::credential_sets;
use shared::TradingMode;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::{BrokerConnector, BrokerCredential, BrokerSession};
use crate::error::{TradingError, TradingResult};

/// Credential material as handed in by operator tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCredential {
    pub user_id: i64,
    pub provider: String,
    pub mode: TradingMode,
    pub app_key: String,
    pub app_secret: String,
    pub account_no: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub struct CredentialVault {
    db: Arc<DatabaseConnection>,
    connector: Arc<dyn BrokerConnector>,
    broker_timeout: Duration,
    sessions: RwLock<HashMap<(i64, TradingMode), BrokerSession>>,
}

impl CredentialVault {
    pub fn new(
        db: Arc<DatabaseConnection>,
        connector: Arc<dyn BrokerConnector>,
        broker_timeout: Duration,
    ) -> Self {
        Self {
            db,
            connector,
            broker_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the session for the single active credential set of `(user_id, mode)`.
    pub async fn resolve(&self, user_id: i64, mode: TradingMode) -> TradingResult<BrokerSession> {
        if let Some(session) = self.sessions.read().await.get(&(user_id, mode)) {
            return Ok(session.clone());
        }

        let mut active = credential_sets::Entity::find()
            .filter(credential_sets::Column::UserId.eq(user_id))
            .filter(credential_sets::Column::Mode.eq(mode))
            .filter(credential_sets::Column::Active.eq(true))
            .all(self.db.as_ref())
            .await?;

        let credential = match active.len() {
            0 => {
                return Err(TradingError::Credential(format!(
                    "user {} has no active {} credential set",
                    user_id, mode
                )))
            }
            1 => active.remove(0),
            n => {
                return Err(TradingError::Credential(format!(
                    "user {} has {} active {} credential sets",
                    user_id, n, mode
                )))
            }
        };
        // The query filtered on mode already; a stored row that disagrees is corrupt.
        if credential.mode != mode {
            return Err(TradingError::ModeMismatch {
                requested: mode,
                actual: credential.mode,
            });
        }

        let broker_credential = BrokerCredential {
            credential_id: credential.id.clone(),
            user_id,
            provider: credential.provider.clone(),
            mode: credential.mode,
            app_key: credential.app_key.clone(),
            app_secret: credential.app_secret.clone(),
            account_no: credential.account_no.clone(),
        };
        let broker = self
            .connector
            .connect(&broker_credential)
            .map_err(|e| TradingError::Credential(e.to_string()))?;
        if broker.mode() != mode {
            return Err(TradingError::ModeMismatch {
                requested: mode,
                actual: broker.mode(),
            });
        }

        let fingerprint = fingerprint(&credential.app_key, &credential.account_no);
        debug!(
            "Opened {} broker session for user {} (credential {})",
            mode, user_id, fingerprint
        );
        let session = BrokerSession::new(broker, user_id, mode, fingerprint, self.broker_timeout);

        let mut sessions = self.sessions.write().await;
        Ok(sessions.entry((user_id, mode)).or_insert(session).clone())
    }

    /// Creates or replaces the credential set for `(user, provider, mode)`.
    pub async fn register(&self, credential: NewCredential) -> TradingResult<credential_sets::Model> {
        if credential.app_key.trim().is_empty() || credential.app_secret.trim().is_empty() {
            return Err(TradingError::Credential("app key and secret are required".to_string()));
        }

        let now = Utc::now();
        let existing = credential_sets::Entity::find()
            .filter(credential_sets::Column::UserId.eq(credential.user_id))
            .filter(credential_sets::Column::Provider.eq(credential.provider.as_str()))
            .filter(credential_sets::Column::Mode.eq(credential.mode))
            .one(self.db.as_ref())
            .await?;

        let saved = match existing {
            Some(row) => {
                let mut row: credential_sets::ActiveModel = row.into();
                row.app_key = Set(credential.app_key);
                row.app_secret = Set(credential.app_secret);
                row.account_no = Set(credential.account_no);
                row.active = Set(credential.active);
                row.updated_at = Set(now);
                row.update(self.db.as_ref()).await?
            }
            None => {
                credential_sets::ActiveModel {
                    id: Set(Uuid::new_v4().to_string()),
                    user_id: Set(credential.user_id),
                    provider: Set(credential.provider),
                    mode: Set(credential.mode),
                    app_key: Set(credential.app_key),
                    app_secret: Set(credential.app_secret),
                    account_no: Set(credential.account_no),
                    active: Set(credential.active),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(self.db.as_ref())
                .await?
            }
        };

        self.invalidate(saved.user_id).await;
        info!(
            "Registered {} credential set {} for user {} ({})",
            saved.mode,
            fingerprint(&saved.app_key, &saved.account_no),
            saved.user_id,
            saved.provider
        );
        Ok(saved)
    }

    /// Drops cached sessions so the next call re-reads the store.
    pub async fn invalidate(&self, user_id: i64) {
        self.sessions
            .write()
            .await
            .retain(|(cached_user, _), _| *cached_user != user_id);
    }
}

/// Short, non-reversible tag for a credential set, safe to log.
pub fn fingerprint(app_key: &str, account_no: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app_key.as_bytes());
    hasher.update(b":");
    hasher.update(account_no.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}
