//! Batch Processor (C7)
//!
//! Every tick: drain the current hour's bucket, and for each sender run
//! one spam-rescue plus a dispatch pass over its coalesced entries. Auth
//! failures detected anywhere mark both cooldown tiers and abort the rest
//! of that sender's work for the tick (spec §4.7).

use futures::future::join_all;

use crate::cooldown::CooldownStore;
use crate::credentials::CredentialStore;
use crate::dispatcher::{DispatchOutcome, MailDispatcher};
use crate::log_sink::WarmupLogStore;
use crate::metrics;
use crate::models::BatchEntry;
use crate::queue::QueueAdapter;

/// Run one batch-processor tick against the given collaborators.
#[tracing::instrument(skip(queue, cooldown, dispatcher, log_store))]
pub async fn run_batch_tick<S: CredentialStore>(
    queue: &dyn QueueAdapter,
    cooldown: &dyn CooldownStore,
    dispatcher: &MailDispatcher<S>,
    log_store: &dyn WarmupLogStore,
    now_ms: i64,
) {
    let batch = match cooldown.read_bucket(now_ms).await {
        Ok(batch) if batch.is_empty() => {
            tracing::info!("batch tick: bucket is empty, nothing to process");
            return;
        }
        Ok(batch) => batch,
        Err(e) => {
            tracing::warn!(error = %e, "batch tick: readBucket failed");
            return;
        }
    };

    let handlers = batch
        .into_iter()
        .map(|(sender, entries)| handle_sender(queue, cooldown, dispatcher, log_store, sender, entries));
    let processed: Vec<String> = join_all(handlers).await;

    if let Err(e) = cooldown.remove_senders(now_ms, &processed).await {
        tracing::warn!(error = %e, "batch tick: removeSenders failed");
    }
}

#[tracing::instrument(skip(queue, cooldown, dispatcher, log_store, entries), fields(entries = entries.len()))]
async fn handle_sender<S: CredentialStore>(
    queue: &dyn QueueAdapter,
    cooldown: &dyn CooldownStore,
    dispatcher: &MailDispatcher<S>,
    log_store: &dyn WarmupLogStore,
    sender: String,
    entries: Vec<BatchEntry>,
) -> String {
    if matches!(cooldown.is_blocked(&sender).await, Ok(true)) {
        for entry in &entries {
            let _ = queue.delete(&entry.receipt_handle).await;
        }
        return sender;
    }

    if let Some(first) = entries.first() {
        metrics::RESCUES_RUN.inc();
        let rescue_outcome = dispatcher.rescue_sender(&first.request.custom_mail_id, &sender).await;
        if rescue_outcome == crate::rescue::RescueOutcome::AuthFailure {
            mark_auth_failure(cooldown, &sender).await;
            for entry in &entries {
                hide_or_delete(queue, entry).await;
            }
            return sender;
        }
    }

    for entry in entries {
        if !entry.request.should_reply {
            let _ = queue.delete(&entry.receipt_handle).await;
            continue;
        }

        match dispatcher.send_reply(&entry).await {
            DispatchOutcome::Success => {
                metrics::REPLIES_SENT.inc();
                if let Err(e) = log_store.record_replied(&entry.request.warmup_id, &entry.request.to).await {
                    tracing::warn!(error = %e, "failed to record REPLIED log row");
                }
                let _ = queue.delete(&entry.receipt_handle).await;
            }
            DispatchOutcome::AuthFailure => {
                metrics::REPLIES_FAILED.inc();
                mark_auth_failure(cooldown, &sender).await;
                hide_or_delete(queue, &entry).await;
                break;
            }
            DispatchOutcome::TransientFailure => {
                metrics::REPLIES_FAILED.inc();
                // Leave the handle alone; the queue's visibility timeout
                // re-delivers it on a later ingest tick.
            }
        }
    }

    sender
}

async fn hide_or_delete(queue: &dyn QueueAdapter, entry: &BatchEntry) {
    if entry.receive_count >= 2 {
        let _ = queue.delete(&entry.receipt_handle).await;
    } else {
        let _ = queue.hide(&entry.receipt_handle, crate::models::HIDE_SECONDS).await;
    }
}

async fn mark_auth_failure(cooldown: &dyn CooldownStore, sender: &str) {
    metrics::SENDERS_BLOCKED.inc();
    let (cooldown_result, block_result) = tokio::join!(cooldown.mark_cooldown(sender), cooldown.mark_blocked(sender));
    if let Err(e) = cooldown_result {
        tracing::warn!(sender, error = %e, "markCooldown failed");
    }
    if let Err(e) = block_result {
        tracing::warn!(sender, error = %e, "markBlocked failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::fake::FakeCooldownStore;
    use crate::credentials::{CredentialResolver, CredentialStore, StoredCredentialRow};
    use crate::crypto::EncryptionKey;
    use crate::gmail::GmailClient;
    use crate::log_sink::fake::FakeLogStore;
    use crate::models::{WarmupRequest, HOUR_MS};
    use crate::queue::fake::FakeQueueAdapter;
    use async_trait::async_trait;

    struct NoCredsStore;

    #[async_trait]
    impl CredentialStore for NoCredsStore {
        async fn get(&self, _email: &str) -> crate::errors::AppResult<Option<StoredCredentialRow>> {
            Ok(None)
        }
        async fn persist_refreshed_access(&self, _email: &str, _access_token_ciphertext: &str) -> crate::errors::AppResult<()> {
            Ok(())
        }
    }

    fn test_dispatcher() -> MailDispatcher<NoCredsStore> {
        let key = EncryptionKey::from_hex(&secrecy::SecretString::from(hex::encode([4u8; 32]))).unwrap();
        let resolver = CredentialResolver::new(NoCredsStore, key);
        let oauth_config = crate::config::OAuthConfig {
            client_id: Some("dummy".to_string()),
            client_secret: Some(secrecy::SecretString::from("dummy".to_string())),
            redirect_uri: None,
        };
        let gmail = GmailClient::new(&oauth_config).unwrap();
        MailDispatcher::new(resolver, gmail)
    }

    fn sample_entry(reply_from: &str, to: &str, receipt_handle: &str, receive_count: u32, should_reply: bool) -> BatchEntry {
        BatchEntry {
            request: WarmupRequest {
                to: to.to_string(),
                original_subject: "Hi".to_string(),
                body: "hello".to_string(),
                keyword: None,
                warmup_id: "w1".to_string(),
                reference_id: None,
                in_reply_to: None,
                reply_from: reply_from.to_string(),
                custom_mail_id: "TAG".to_string(),
                should_reply,
                scheduled_for: None,
            },
            receipt_handle: receipt_handle.to_string(),
            added_at: 0,
            receive_count,
        }
    }

    #[tokio::test]
    async fn blocked_sender_deletes_all_entries_without_dispatch() {
        let queue = FakeQueueAdapter::default();
        let cooldown = FakeCooldownStore::default();
        let dispatcher = test_dispatcher();
        let log_store = FakeLogStore::default();
        cooldown.mark_blocked("a@x.com").await.unwrap();

        let entries = vec![sample_entry("a@x.com", "b@y.com", "rh-1", 1, true)];
        let sender = handle_sender(&queue, &cooldown, &dispatcher, &log_store, "a@x.com".to_string(), entries).await;

        assert_eq!(sender, "a@x.com");
        assert_eq!(queue.deleted.lock().unwrap().as_slice(), ["rh-1".to_string()]);
        assert!(log_store.replied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_is_treated_as_auth_failure_and_hides_low_receive_count() {
        let queue = FakeQueueAdapter::default();
        let cooldown = FakeCooldownStore::default();
        let dispatcher = test_dispatcher();
        let log_store = FakeLogStore::default();

        let entries = vec![sample_entry("a@x.com", "b@y.com", "rh-1", 1, true)];
        handle_sender(&queue, &cooldown, &dispatcher, &log_store, "a@x.com".to_string(), entries).await;

        assert!(cooldown.is_blocked("a@x.com").await.unwrap());
        assert!(cooldown.is_in_cooldown("a@x.com").await.unwrap());
        assert_eq!(queue.hidden.lock().unwrap().len(), 1);
        assert!(queue.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reply_false_entries_are_deleted_without_dispatch() {
        let queue = FakeQueueAdapter::default();
        let cooldown = FakeCooldownStore::default();
        let dispatcher = test_dispatcher();
        let log_store = FakeLogStore::default();

        // Block the sender so rescue/dispatch is skipped entirely and we
        // can isolate the shouldReply=false deletion behavior — a
        // credential-less dispatch would otherwise mask it as auth failure.
        cooldown.mark_blocked("a@x.com").await.unwrap();
        let entries = vec![sample_entry("a@x.com", "b@y.com", "rh-1", 1, false)];
        handle_sender(&queue, &cooldown, &dispatcher, &log_store, "a@x.com".to_string(), entries).await;
        assert_eq!(queue.deleted.lock().unwrap().as_slice(), ["rh-1".to_string()]);
    }

    #[tokio::test]
    async fn empty_bucket_tick_is_a_no_op() {
        let queue = FakeQueueAdapter::default();
        let cooldown = FakeCooldownStore::default();
        let dispatcher = test_dispatcher();
        let log_store = FakeLogStore::default();
        run_batch_tick(&queue, &cooldown, &dispatcher, &log_store, 10 * HOUR_MS).await;
        assert!(queue.deleted.lock().unwrap().is_empty());
    }
}
