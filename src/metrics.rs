//! In-process Prometheus counters
//!
//! No HTTP `/metrics` endpoint is exposed — this worker is headless — but
//! the counters are kept so an operator tool or sidecar can scrape the
//! process's default registry if wired up externally. Mirrors the counter
//! set `oferchen-arena`'s `email.rs` keeps for its SMTP sending path.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};

pub static ENVELOPES_INGESTED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("warmup_envelopes_ingested_total", "Queue envelopes admitted to a bucket").unwrap());
pub static ENVELOPES_MALFORMED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("warmup_envelopes_malformed_total", "Queue envelopes dropped as malformed").unwrap());
pub static REPLIES_SENT: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("warmup_replies_sent_total", "Replies sent successfully").unwrap());
pub static REPLIES_FAILED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("warmup_replies_failed_total", "Reply attempts that failed").unwrap());
pub static RESCUES_RUN: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("warmup_rescues_run_total", "Spam-folder rescues attempted").unwrap());
pub static SENDERS_BLOCKED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("warmup_senders_blocked_total", "Senders marked blocked after an auth failure").unwrap());
