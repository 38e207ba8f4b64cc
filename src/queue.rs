//! Queue Adapter (C1)
//!
//! A generic SQS-style durable queue: long-poll receive with a receive
//! count, permanent delete, delayed re-publish (capped at 900s), and
//! visibility extension (used to park a poisoned message for 12h).
//! `scheduleFuture` is a thin convenience built from `delayRequeue`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::QueueConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{QueueEnvelope, MAX_DELAY_SECONDS};

/// Port onto the durable work queue.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Long-poll for up to `max_messages` envelopes.
    async fn receive(&self, max_messages: u32) -> AppResult<Vec<QueueEnvelope>>;
    /// Permanently remove a message by receipt handle. Idempotent.
    async fn delete(&self, receipt_handle: &str) -> AppResult<()>;
    /// Publish a copy of `body` with a delivery delay, capped at 900s.
    async fn delay_requeue(&self, body: &str, delay_seconds: i64) -> AppResult<()>;
    /// Extend the visibility timeout of an in-flight message.
    async fn hide(&self, receipt_handle: &str, seconds: i64) -> AppResult<()>;
}

/// Convenience built on `delay_requeue`: stamp `scheduled_for = ts` into the
/// payload and requeue with `delay_seconds`, capped at 900s. Ingest recomputes
/// this on every tick, so a `scheduled_for` further out than 900s away simply
/// gets re-deferred until wall-clock time catches up (spec §4.6 step 3).
pub async fn schedule_future(
    queue: &dyn QueueAdapter,
    mut request: crate::models::WarmupRequest,
    ts_ms: i64,
    delay_seconds: i64,
) -> AppResult<()> {
    request.scheduled_for = Some(ts_ms);
    let body = request.to_json()?;
    queue.delay_requeue(&body, delay_seconds.min(MAX_DELAY_SECONDS)).await
}

/// HTTP-based client for a generic SQS-style endpoint.
///
/// The wire protocol (`ReceiveMessage`/`DeleteMessage`/`SendMessage`/
/// `ChangeMessageVisibility`) is spelled out in spec §6; this client speaks
/// it over plain JSON-over-HTTPS rather than depending on a vendor SDK, so
/// it works against SQS-compatible endpoints interchangeably.
pub struct SqsQueueAdapter {
    http: Client,
    config: QueueConfig,
}

#[derive(Debug, Deserialize)]
struct ReceiveResponseMessage {
    body: String,
    receipt_handle: String,
    approximate_receive_count: u32,
}

impl SqsQueueAdapter {
    pub fn new(config: QueueConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn classify_status(status: reqwest::StatusCode, context: &str) -> AppError {
        if status.is_client_error() && status.as_u16() != 429 {
            AppError::Malformed(format!("{context}: permanent queue error ({status})"))
        } else {
            AppError::Transient(format!("{context}: queue error ({status})"))
        }
    }
}

#[async_trait]
impl QueueAdapter for SqsQueueAdapter {
    async fn receive(&self, max_messages: u32) -> AppResult<Vec<QueueEnvelope>> {
        let resp = self
            .http
            .get(format!("{}/messages", self.config.url))
            .query(&[("maxMessages", max_messages.to_string())])
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("receive request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Self::classify_status(resp.status(), "receive"));
        }

        let messages: Vec<ReceiveResponseMessage> = resp
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("receive response decode failed: {e}")))?;

        Ok(messages
            .into_iter()
            .map(|m| QueueEnvelope {
                body: m.body,
                receipt_handle: m.receipt_handle,
                approximate_receive_count: m.approximate_receive_count,
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> AppResult<()> {
        let resp = self
            .http
            .delete(format!("{}/messages/{receipt_handle}", self.config.url))
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("delete request failed: {e}")))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Self::classify_status(resp.status(), "delete"));
        }
        Ok(())
    }

    async fn delay_requeue(&self, body: &str, delay_seconds: i64) -> AppResult<()> {
        let delay = delay_seconds.clamp(0, MAX_DELAY_SECONDS);
        let resp = self
            .http
            .post(format!("{}/messages", self.config.url))
            .json(&serde_json::json!({ "body": body, "delaySeconds": delay }))
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("delayRequeue request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Self::classify_status(resp.status(), "delayRequeue"));
        }
        Ok(())
    }

    async fn hide(&self, receipt_handle: &str, seconds: i64) -> AppResult<()> {
        let resp = self
            .http
            .put(format!("{}/messages/{receipt_handle}/visibility", self.config.url))
            .json(&serde_json::json!({ "visibilityTimeout": seconds }))
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("hide request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Self::classify_status(resp.status(), "hide"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Records every call so ingest-loop tests can assert on them.
    #[derive(Default)]
    pub struct FakeQueueAdapter {
        pub deleted: Mutex<Vec<String>>,
        pub hidden: Mutex<Vec<(String, i64)>>,
        pub requeued: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl QueueAdapter for FakeQueueAdapter {
        async fn receive(&self, _max_messages: u32) -> AppResult<Vec<QueueEnvelope>> {
            Ok(vec![])
        }
        async fn delete(&self, receipt_handle: &str) -> AppResult<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }
        async fn delay_requeue(&self, body: &str, delay_seconds: i64) -> AppResult<()> {
            self.requeued.lock().unwrap().push((body.to_string(), delay_seconds));
            Ok(())
        }
        async fn hide(&self, receipt_handle: &str, seconds: i64) -> AppResult<()> {
            self.hidden.lock().unwrap().push((receipt_handle.to_string(), seconds));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeQueueAdapter;
    use super::*;
    use crate::models::WarmupRequest;

    fn sample_request() -> WarmupRequest {
        WarmupRequest {
            to: "b@y.com".to_string(),
            original_subject: "Hi".to_string(),
            body: "hello".to_string(),
            keyword: None,
            warmup_id: "w1".to_string(),
            reference_id: None,
            in_reply_to: None,
            reply_from: "a@x.com".to_string(),
            custom_mail_id: "TAG".to_string(),
            should_reply: true,
            scheduled_for: None,
        }
    }

    #[tokio::test]
    async fn schedule_future_caps_delay_and_stamps_scheduled_for() {
        let queue = FakeQueueAdapter::default();
        schedule_future(&queue, sample_request(), 999_999_999, 999_999).await.unwrap();

        let requeued = queue.requeued.lock().unwrap();
        assert_eq!(requeued.len(), 1);
        let (body, delay) = &requeued[0];
        assert_eq!(*delay, MAX_DELAY_SECONDS);
        let parsed = WarmupRequest::parse(body).unwrap();
        assert_eq!(parsed.scheduled_for, Some(999_999_999));
    }

    #[tokio::test]
    async fn schedule_future_passes_through_small_delay_uncapped() {
        let queue = FakeQueueAdapter::default();
        schedule_future(&queue, sample_request(), 999_999_999, 30).await.unwrap();

        let requeued = queue.requeued.lock().unwrap();
        let (_, delay) = &requeued[0];
        assert_eq!(*delay, 30);
    }
}
