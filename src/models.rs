//! Wire payload, queue envelope, and hour-bucket data types
//!
//! `RawWarmupRequest` mirrors the untyped JSON the queue delivers;
//! `WarmupRequest::try_from_raw` is the single validation boundary that
//! turns it into the strongly-typed record the rest of the worker uses.
//! Optional fields stay `Option<T>` end to end so an absent value is never
//! confused with an empty string.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Untyped shape of a queue message body, as received from the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWarmupRequest {
    pub to: Option<String>,
    #[serde(rename = "originalSubject")]
    pub original_subject: Option<String>,
    pub body: Option<String>,
    pub keyword: Option<String>,
    #[serde(rename = "warmupId")]
    pub warmup_id: Option<String>,
    #[serde(rename = "referenceId")]
    pub reference_id: Option<String>,
    #[serde(rename = "inReplyTo")]
    pub in_reply_to: Option<String>,
    #[serde(rename = "replyFrom")]
    pub reply_from: Option<String>,
    #[serde(rename = "customMailId")]
    pub custom_mail_id: Option<String>,
    #[serde(rename = "shouldReply")]
    pub should_reply: Option<bool>,
    #[serde(rename = "scheduledFor")]
    pub scheduled_for: Option<i64>,
}

/// A validated warmup reply request.
///
/// Required fields per spec: `to`, `original_subject`, `body`, `warmup_id`,
/// `reply_from`, `custom_mail_id`. `reference_id`/`in_reply_to` thread the
/// reply to the original warmup message; `scheduled_for` defers admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupRequest {
    pub to: String,
    #[serde(rename = "originalSubject")]
    pub original_subject: String,
    pub body: String,
    pub keyword: Option<String>,
    #[serde(rename = "warmupId")]
    pub warmup_id: String,
    #[serde(rename = "referenceId")]
    pub reference_id: Option<String>,
    #[serde(rename = "inReplyTo")]
    pub in_reply_to: Option<String>,
    #[serde(rename = "replyFrom")]
    pub reply_from: String,
    #[serde(rename = "customMailId")]
    pub custom_mail_id: String,
    #[serde(rename = "shouldReply")]
    pub should_reply: bool,
    #[serde(rename = "scheduledFor")]
    pub scheduled_for: Option<i64>,
}

impl WarmupRequest {
    /// Parse and validate a raw queue body in one step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Malformed` if the body is not valid JSON or is
    /// missing any required field. Malformed messages must be deleted, not
    /// retried (spec §4.6 step 2, §7).
    pub fn parse(body: &str) -> Result<Self, AppError> {
        let raw: RawWarmupRequest = serde_json::from_str(body)
            .map_err(|e| AppError::Malformed(format!("invalid JSON body: {e}")))?;
        Self::try_from_raw(raw)
    }

    fn try_from_raw(raw: RawWarmupRequest) -> Result<Self, AppError> {
        fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
            match value {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(AppError::Malformed(format!("missing required field `{field}`"))),
            }
        }

        Ok(Self {
            to: required("to", raw.to)?,
            original_subject: required("originalSubject", raw.original_subject)?,
            body: required("body", raw.body)?,
            keyword: raw.keyword,
            warmup_id: required("warmupId", raw.warmup_id)?,
            reference_id: raw.reference_id,
            in_reply_to: raw.in_reply_to,
            reply_from: required("replyFrom", raw.reply_from)?,
            custom_mail_id: required("customMailId", raw.custom_mail_id)?,
            should_reply: raw.should_reply.unwrap_or(true),
            scheduled_for: raw.scheduled_for,
        })
    }

    /// Re-serialize back to the wire JSON shape, e.g. for `delayRequeue`.
    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("failed to serialize warmup request: {e}")))
    }
}

/// An envelope as returned by the queue adapter.
#[derive(Debug, Clone)]
pub struct QueueEnvelope {
    pub body: String,
    pub receipt_handle: String,
    pub approximate_receive_count: u32,
}

/// An entry sitting in an hour bucket, owned exclusively by the batch
/// processor while it is being handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    #[serde(flatten)]
    pub request: WarmupRequest,
    pub receipt_handle: String,
    pub added_at: i64,
    pub receive_count: u32,
}

impl BatchEntry {
    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("failed to serialize batch entry: {e}")))
    }

    pub fn from_json(body: &str) -> Result<Self, AppError> {
        serde_json::from_str(body)
            .map_err(|e| AppError::Internal(format!("failed to deserialize batch entry: {e}")))
    }
}

/// Duration of one hour bucket, in milliseconds.
pub const HOUR_MS: i64 = 3_600_000;

/// Bucket TTL: two hours, so the in-progress hour and the one being drained
/// overlap (spec §3).
pub const BUCKET_TTL_SECONDS: i64 = 2 * 3_600;

/// Auth-failure block TTL: 8 hours.
pub const BLOCK_TTL_SECONDS: i64 = 8 * 3_600;

/// Extended cooldown TTL: 2 days.
pub const COOLDOWN_TTL_SECONDS: i64 = 2 * 24 * 3_600;

/// Maximum queue delay accepted by `delayRequeue`/visibility changes: 900s.
pub const MAX_DELAY_SECONDS: i64 = 900;

/// Visibility extension used to park a poisoned/blocked message: 12 hours.
pub const HIDE_SECONDS: i64 = 12 * 3_600;

/// Compute the hour-bucket index for a given wall-clock millisecond time.
pub fn hour_bucket_index(now_ms: i64) -> i64 {
    now_ms.div_euclid(HOUR_MS)
}

/// Redis key for the hash holding one hour's coalesced entries.
pub fn hour_bucket_key(now_ms: i64) -> String {
    format!("email_batch:{}", hour_bucket_index(now_ms))
}

/// Dedup field name within an hour bucket hash: `"<replyFrom>-><to>"`.
pub fn dedup_field(reply_from: &str, to: &str) -> String {
    format!("{reply_from}->{to}")
}

/// Split a dedup field name back into its `reply_from` component.
///
/// Used by `readBucket`/`removeSenders` to regroup fields by sender; returns
/// `None` if the field does not contain the `->` separator this worker
/// always writes.
pub fn sender_of_field(field: &str) -> Option<&str> {
    field.split_once("->").map(|(sender, _)| sender)
}

/// Redis key for an auth-failure block flag.
pub fn block_key(addr: &str) -> String {
    format!("auth_fail:{addr}")
}

/// Redis key for an extended cooldown flag.
pub fn cooldown_key(addr: &str) -> String {
    format!("warmup_cooldown:{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_valid_request() {
        let body = r#"{
            "to": "b@y.com",
            "originalSubject": "Hello",
            "body": "hi there",
            "warmupId": "w1",
            "replyFrom": "a@x.com",
            "customMailId": "TAG42"
        }"#;
        let req = WarmupRequest::parse(body).unwrap();
        assert_eq!(req.to, "b@y.com");
        assert!(req.should_reply);
        assert!(req.reference_id.is_none());
        assert!(req.scheduled_for.is_none());
    }

    #[test]
    fn rejects_missing_required_field() {
        let body = r#"{"to": "b@y.com", "originalSubject": "Hello", "body": "hi",
            "replyFrom": "a@x.com", "customMailId": "TAG42"}"#;
        let err = WarmupRequest::parse(body).unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = WarmupRequest::parse("not json").unwrap_err();
        assert!(matches!(err, AppError::Malformed(_)));
    }

    #[test]
    fn optional_fields_distinguished_from_empty_string() {
        let body = r#"{
            "to": "b@y.com", "originalSubject": "Hello", "body": "hi",
            "warmupId": "w1", "replyFrom": "a@x.com", "customMailId": "TAG42",
            "referenceId": "", "scheduledFor": 123
        }"#;
        let req = WarmupRequest::parse(body).unwrap();
        assert_eq!(req.reference_id.as_deref(), Some(""));
        assert_eq!(req.scheduled_for, Some(123));
        assert!(req.in_reply_to.is_none());
    }

    #[test]
    fn hour_bucket_key_groups_by_hour() {
        let t0 = 10 * HOUR_MS;
        let t1 = 10 * HOUR_MS + 59 * 60_000;
        let t2 = 11 * HOUR_MS;
        assert_eq!(hour_bucket_key(t0), hour_bucket_key(t1));
        assert_ne!(hour_bucket_key(t1), hour_bucket_key(t2));
        assert_eq!(hour_bucket_key(t0), "email_batch:10");
    }

    #[test]
    fn dedup_field_roundtrips_sender() {
        let field = dedup_field("a@x.com", "b@y.com");
        assert_eq!(field, "a@x.com->b@y.com");
        assert_eq!(sender_of_field(&field), Some("a@x.com"));
    }

    #[test]
    fn flag_keys_match_spec_prefixes() {
        assert_eq!(block_key("a@x.com"), "auth_fail:a@x.com");
        assert_eq!(cooldown_key("a@x.com"), "warmup_cooldown:a@x.com");
    }
}
