//! warmup-worker: headless warmup-reply background worker
//!
//! Two independent tick loops share only the cooldown store: an ingest
//! loop drains the durable queue every few minutes, and a batch processor
//! dispatches coalesced replies (and runs spam rescue) on a longer cycle.
//! There is no network listener — this process is driven entirely by its
//! own timers and a shutdown signal.
//!
//! # Architecture
//!
//! - [`main`]: process entry point, wiring, and the two supervised loops
//! - [`config`]: environment-driven configuration for every collaborator
//! - [`errors`]: application error model and failure-substring classifier
//! - [`models`]: wire payload, queue envelope, and hour-bucket types
//! - [`queue`]: durable SQS-style queue adapter (C1)
//! - [`cooldown`]: Redis-style cooldown/block/hour-bucket store (C2)
//! - [`crypto`]: AES-256-CBC at-rest credential encryption
//! - [`credentials`]: relational credential lookup and decryption (C3)
//! - [`provider`]: per-mailbox-provider connection constants
//! - [`gmail`]: Gmail vendor-API REST client
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`dispatcher`]: mail dispatcher, VendorAPI/SMTP selection (C4)
//! - [`rescue`]: spam-folder rescue, IMAP/VendorAPI backends (C5)
//! - [`log_sink`]: relational REPLIED-log and Issue sinks
//! - [`ingest`]: ingest loop tick (C6)
//! - [`batch`]: batch processor tick (C7)
//! - [`metrics`]: in-process Prometheus counters

mod batch;
mod config;
mod cooldown;
mod credentials;
mod crypto;
mod dispatcher;
mod errors;
mod gmail;
mod imap;
mod ingest;
mod log_sink;
mod metrics;
mod models;
mod provider;
mod queue;
mod rescue;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::WorkerConfig;
use cooldown::RedisCooldownStore;
use credentials::{CredentialResolver, PgCredentialStore};
use crypto::EncryptionKey;
use dispatcher::MailDispatcher;
use gmail::GmailClient;
use log_sink::{IssuePriority, PgWarmupLogStore, WarmupLogStore};
use queue::SqsQueueAdapter;

const INGEST_BATCH_SIZE: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let (panic_tx, panic_rx) = mpsc::unbounded_channel::<String>();
    install_panic_hook(panic_tx);

    let config = WorkerConfig::load()?;
    let queue = SqsQueueAdapter::new(config.queue.clone())?;
    let cooldown = RedisCooldownStore::connect(&config.kv.url).await?;

    let db_pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(secrecy::ExposeSecret::expose_secret(&config.db.url))
        .await?;

    let key = EncryptionKey::from_hex(&config.crypto.key_hex)?;
    let credential_store = PgCredentialStore::new(db_pool.clone());
    let resolver = CredentialResolver::new(credential_store, key);
    let gmail = GmailClient::new(&config.oauth)?;
    let dispatcher = MailDispatcher::new(resolver, gmail);
    let log_store = Arc::new(PgWarmupLogStore::new(db_pool));

    tokio::spawn(drain_panic_issues(panic_rx, log_store.clone()));

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    tracing::info!("warmup-worker starting up");
    run_loops(&queue, &cooldown, &dispatcher, log_store.as_ref(), &config, shutdown).await;
    tracing::info!("warmup-worker shut down cleanly");
    Ok(())
}

/// Drain panic messages forwarded by [`install_panic_hook`] and persist
/// each as a critical `Issue` row. Runs for the life of the process; the
/// sending half is held by the panic hook, so this task only ends when
/// the process itself is tearing down.
async fn drain_panic_issues(mut panics: mpsc::UnboundedReceiver<String>, log_store: Arc<PgWarmupLogStore>) {
    while let Some(message) = panics.recv().await {
        let outcome = log_store
            .record_issue("uncaught panic in warmup-worker", &message, "warmup-worker", IssuePriority::High, &[], "{}")
            .await;
        if let Err(e) = outcome {
            tracing::error!(error = %e, "failed to record panic as an Issue row");
        }
    }
}

/// Drive the ingest and batch tick loops concurrently until `shutdown` is
/// cancelled. Each loop always lets its current tick's fan-out finish
/// before checking for cancellation again (spec §5).
async fn run_loops(
    queue: &SqsQueueAdapter,
    cooldown: &RedisCooldownStore,
    dispatcher: &MailDispatcher<PgCredentialStore>,
    log_store: &dyn WarmupLogStore,
    config: &WorkerConfig,
    shutdown: CancellationToken,
) {
    let ingest_loop = async {
        let mut ticker = tokio::time::interval(config.timing.ingest_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now_ms = wall_clock_ms();
                    ingest::run_ingest_tick(queue, cooldown, now_ms, INGEST_BATCH_SIZE).await;
                }
            }
        }
    };

    let batch_loop = async {
        let mut ticker = tokio::time::interval(config.timing.batch_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let now_ms = wall_clock_ms();
                    batch::run_batch_tick(queue, cooldown, dispatcher, log_store, now_ms).await;
                }
            }
        }
    };

    tokio::join!(ingest_loop, batch_loop);
}

fn wall_clock_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received, draining in-flight ticks");
        shutdown.cancel();
    });
}

/// Forward an uncaught panic to [`drain_panic_issues`] for recording as a
/// critical `Issue` row, then run the default hook so the panic message
/// still reaches stderr. The channel send is synchronous and does not
/// depend on the tokio runtime, so it is safe to call from inside
/// `std::panic::set_hook`; an unbounded send only fails if the receiving
/// task has already ended, in which case the panic is still logged below.
fn install_panic_hook(panic_tx: mpsc::UnboundedSender<String>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "uncaught panic in warmup-worker");
        let _ = panic_tx.send(info.to_string());
        default_hook(info);
    }));
}
