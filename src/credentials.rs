//! Credential Resolver (C3)
//!
//! Looks up per-sender mailbox credentials from the relational store,
//! decrypts at-rest fields, and persists refreshed OAuth access tokens.
//! The relational store itself is out of scope (spec §1) — only the
//! narrow `CredentialStore` port and a thin Postgres-backed implementation
//! are provided here.

use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::PgPool;

use crate::crypto::EncryptionKey;
use crate::errors::AppResult;

/// Raw row as stored in `WarmupEmailServiceEmailCredential` (spec §6).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredCredentialRow {
    pub service: String,
    pub password_ciphertext: Option<String>,
    pub access_token_ciphertext: Option<String>,
    pub refresh_token_ciphertext: Option<String>,
}

/// Port onto the relational credential table.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, email: &str) -> AppResult<Option<StoredCredentialRow>>;
    async fn persist_refreshed_access(&self, email: &str, access_token_ciphertext: &str) -> AppResult<()>;
}

/// Postgres-backed `CredentialStore`.
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self, email: &str) -> AppResult<Option<StoredCredentialRow>> {
        sqlx::query_as::<_, StoredCredentialRow>(
            "SELECT service, password_ciphertext, access_token_ciphertext, refresh_token_ciphertext \
             FROM \"WarmupEmailServiceEmailCredential\" WHERE \"emailId\" = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| crate::errors::AppError::Transient(format!("credential lookup failed: {e}")))
    }

    async fn persist_refreshed_access(&self, email: &str, access_token_ciphertext: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE \"WarmupEmailServiceEmailCredential\" SET access_token_ciphertext = $2 WHERE \"emailId\" = $1",
        )
        .bind(email)
        .bind(access_token_ciphertext)
        .execute(&self.pool)
        .await
        .map_err(|e| crate::errors::AppError::Transient(format!("credential update failed: {e}")))?;
        Ok(())
    }
}

/// Decrypted credentials for one sender mailbox.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub service: String,
    pub smtp_password: Option<SecretString>,
    pub oauth_access: Option<SecretString>,
    pub oauth_refresh: Option<SecretString>,
}

impl ResolvedCredentials {
    /// Whether this mailbox has everything the vendor-API path needs: a
    /// Gmail service tag plus both OAuth tokens (spec §4.4 step 1).
    pub fn supports_vendor_api(&self, oauth_client_configured: bool) -> bool {
        self.service == "gmail"
            && self.oauth_access.is_some()
            && self.oauth_refresh.is_some()
            && oauth_client_configured
    }
}

/// Resolves and decrypts sender credentials, re-resolving on every call
/// (spec §5: "no credential cache ... acceptable because C3 caches at the
/// backing store").
pub struct CredentialResolver<S: CredentialStore> {
    store: S,
    key: EncryptionKey,
}

impl<S: CredentialStore> CredentialResolver<S> {
    pub fn new(store: S, key: EncryptionKey) -> Self {
        Self { store, key }
    }

    /// Fetch and decrypt credentials for `addr`.
    ///
    /// A field that fails to decrypt (bad padding, malformed hex) is
    /// treated as absent, not as an error for the whole lookup (spec §4.3).
    pub async fn get_credentials(&self, addr: &str) -> AppResult<Option<ResolvedCredentials>> {
        let Some(row) = self.store.get(addr).await? else {
            return Ok(None);
        };

        let decrypt_field = |ciphertext: &Option<String>| -> Option<SecretString> {
            ciphertext
                .as_deref()
                .and_then(|blob| self.key.decrypt_to_string(blob).ok())
                .map(SecretString::from)
        };

        Ok(Some(ResolvedCredentials {
            service: row.service,
            smtp_password: decrypt_field(&row.password_ciphertext),
            oauth_access: decrypt_field(&row.access_token_ciphertext),
            oauth_refresh: decrypt_field(&row.refresh_token_ciphertext),
        }))
    }

    /// Re-encrypt and persist a freshly refreshed access token.
    ///
    /// Failure here is non-fatal: the refreshed token still lives in the
    /// caller's process for the rest of this tick (spec §4.3).
    pub async fn persist_refreshed_access(&self, addr: &str, token: &str) {
        let ciphertext = self.key.encrypt_str(token);
        if let Err(e) = self.store.persist_refreshed_access(addr, &ciphertext).await {
            tracing::warn!(sender = addr, error = %e, "failed to persist refreshed access token");
        }
    }
}
