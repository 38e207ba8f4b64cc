//! Warmup log and critical-issue sinks
//!
//! Two narrow write-only ports onto the relational store's logical schema
//! (spec §6): one row per successful reply (`WarmupEmailLogs`), and one
//! row per uncaught/critical failure (`Issue`), read later by operators.
//! Like `credentials.rs`, only the port and a thin Postgres writer are
//! provided — the relational store's read/query surface is out of scope.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuePriority {
    Low,
    Medium,
    High,
}

impl IssuePriority {
    fn as_str(self) -> &'static str {
        match self {
            IssuePriority::Low => "LOW",
            IssuePriority::Medium => "MEDIUM",
            IssuePriority::High => "HIGH",
        }
    }
}

/// Port onto the worker's two relational log sinks.
#[async_trait]
pub trait WarmupLogStore: Send + Sync {
    /// Record a successful reply delivery.
    async fn record_replied(&self, warmup_id: &str, recipient_email: &str) -> AppResult<()>;
    /// Record a critical/uncaught failure for operator triage.
    async fn record_issue(
        &self,
        title: &str,
        description: &str,
        service: &str,
        priority: IssuePriority,
        probable_cause: &[String],
        context: &str,
    ) -> AppResult<()>;
}

/// Postgres-backed `WarmupLogStore`.
pub struct PgWarmupLogStore {
    pool: PgPool,
}

impl PgWarmupLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WarmupLogStore for PgWarmupLogStore {
    async fn record_replied(&self, warmup_id: &str, recipient_email: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO \"WarmupEmailLogs\" (\"warmupId\", \"recipientEmail\", status, \"sentAt\") \
             VALUES ($1, $2, 'REPLIED', now())",
        )
        .bind(warmup_id)
        .bind(recipient_email)
        .execute(&self.pool)
        .await
        .map_err(|e| crate::errors::AppError::Transient(format!("failed to write warmup log: {e}")))?;
        Ok(())
    }

    async fn record_issue(
        &self,
        title: &str,
        description: &str,
        service: &str,
        priority: IssuePriority,
        probable_cause: &[String],
        context: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO \"Issue\" (title, description, service, priority, \"probableCause\", context) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(title)
        .bind(description)
        .bind(service)
        .bind(priority.as_str())
        .bind(probable_cause)
        .bind(context)
        .execute(&self.pool)
        .await
        .map_err(|e| crate::errors::AppError::Transient(format!("failed to write issue row: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeLogStore {
        pub replied: Mutex<Vec<(String, String)>>,
        pub issues: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WarmupLogStore for FakeLogStore {
        async fn record_replied(&self, warmup_id: &str, recipient_email: &str) -> AppResult<()> {
            self.replied.lock().unwrap().push((warmup_id.to_string(), recipient_email.to_string()));
            Ok(())
        }

        async fn record_issue(
            &self,
            title: &str,
            _description: &str,
            _service: &str,
            _priority: IssuePriority,
            _probable_cause: &[String],
            _context: &str,
        ) -> AppResult<()> {
            self.issues.lock().unwrap().push(title.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeLogStore;
    use super::*;

    #[tokio::test]
    async fn records_replied_row() {
        let store = FakeLogStore::default();
        store.record_replied("w1", "b@y.com").await.unwrap();
        assert_eq!(store.replied.lock().unwrap().as_slice(), [("w1".to_string(), "b@y.com".to_string())]);
    }

    #[tokio::test]
    async fn records_issue_row() {
        let store = FakeLogStore::default();
        store
            .record_issue("panic in batch tick", "details", "batch-processor", IssuePriority::High, &[], "{}")
            .await
            .unwrap();
        assert_eq!(store.issues.lock().unwrap().as_slice(), ["panic in batch tick".to_string()]);
    }
}
