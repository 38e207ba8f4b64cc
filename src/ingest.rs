//! Ingest Loop (C6)
//!
//! Every tick: drain the queue, validate each envelope, defer anything
//! scheduled for the future, and admit the rest into the current hour's
//! bucket — skipping senders currently blocked or in cooldown. All
//! envelope handlers run concurrently and the tick only completes once
//! every one of them has resolved (spec §4.6).

use futures::future::join_all;

use crate::cooldown::CooldownStore;
use crate::metrics;
use crate::models::{BatchEntry, QueueEnvelope, WarmupRequest, HIDE_SECONDS, MAX_DELAY_SECONDS};
use crate::queue::{schedule_future, QueueAdapter};

/// Run one ingest tick against the given collaborators.
#[tracing::instrument(skip(queue, cooldown))]
pub async fn run_ingest_tick(queue: &dyn QueueAdapter, cooldown: &dyn CooldownStore, now_ms: i64, max_messages: u32) {
    let envelopes = match queue.receive(max_messages).await {
        Ok(envelopes) => envelopes,
        Err(e) => {
            tracing::warn!(error = %e, "ingest receive failed");
            return;
        }
    };

    let handlers = envelopes.into_iter().map(|envelope| handle_envelope(queue, cooldown, envelope, now_ms));
    join_all(handlers).await;
}

async fn handle_envelope(queue: &dyn QueueAdapter, cooldown: &dyn CooldownStore, envelope: QueueEnvelope, now_ms: i64) {
    let request = match WarmupRequest::parse(&envelope.body) {
        Ok(request) => request,
        Err(e) => {
            metrics::ENVELOPES_MALFORMED.inc();
            tracing::warn!(error = %e, "dropping malformed warmup request");
            if let Err(e) = queue.delete(&envelope.receipt_handle).await {
                tracing::warn!(error = %e, "failed to delete malformed envelope");
            }
            return;
        }
    };

    if let Some(scheduled_for) = request.scheduled_for {
        if scheduled_for > now_ms {
            let delay = ((scheduled_for - now_ms) / 1000).min(MAX_DELAY_SECONDS);
            if let Err(e) = schedule_future(queue, request, scheduled_for, delay).await {
                tracing::warn!(error = %e, delay, "failed to requeue scheduled warmup request");
                return;
            }
            if let Err(e) = queue.delete(&envelope.receipt_handle).await {
                tracing::warn!(error = %e, "failed to delete original envelope after scheduling");
            }
            return;
        }
    }

    let reply_from = request.reply_from.clone();

    match cooldown.is_in_cooldown(&reply_from).await {
        Ok(true) => {
            if envelope.approximate_receive_count >= 2 {
                let _ = queue.delete(&envelope.receipt_handle).await;
            } else {
                let _ = queue.hide(&envelope.receipt_handle, HIDE_SECONDS).await;
            }
            return;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "cooldown check failed, leaving envelope for retry");
            return;
        }
    }

    match cooldown.is_blocked(&reply_from).await {
        Ok(true) => {
            let _ = queue.delete(&envelope.receipt_handle).await;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "block check failed, leaving envelope for retry");
            return;
        }
    }

    let entry = BatchEntry {
        request,
        receipt_handle: envelope.receipt_handle.clone(),
        added_at: now_ms,
        receive_count: envelope.approximate_receive_count,
    };

    match cooldown.add_to_bucket(&reply_from, &entry, now_ms).await {
        Ok(_) => {
            metrics::ENVELOPES_INGESTED.inc();
            // Both a fresh insert and a dedup collision mean the queue
            // message's job is done: either it now lives in the bucket,
            // or an equivalent entry already does.
            if let Err(e) = queue.delete(&envelope.receipt_handle).await {
                tracing::warn!(error = %e, "failed to delete envelope after bucket admission");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "addToBucket failed, leaving envelope for retry");
        }
    }
}
