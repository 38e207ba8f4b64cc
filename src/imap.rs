//! IMAP transport and session operations
//!
//! Provides timeout-bounded wrappers around `async-imap` operations. All
//! network calls are enforced to use TLS, and timeouts are derived from
//! `ImapParams`. Used by the spam rescuer (`rescue.rs`) to drive the
//! IMAP backend against whichever mailbox owns the sender address.

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::errors::{AppError, AppResult};

/// Type alias for an authenticated IMAP session over TLS.
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Connection parameters for one mailbox. Timeouts default to values
/// comfortable for a 993/TLS IMAP round trip; callers rarely need to
/// override them.
#[derive(Debug, Clone)]
pub struct ImapParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: SecretString,
    pub connect_timeout: Duration,
    pub greeting_timeout: Duration,
    pub socket_timeout: Duration,
}

impl ImapParams {
    pub fn new(host: String, port: u16, user: String, pass: SecretString) -> Self {
        Self {
            host,
            port,
            user,
            pass,
            connect_timeout: Duration::from_secs(10),
            greeting_timeout: Duration::from_secs(10),
            socket_timeout: Duration::from_secs(30),
        }
    }
}

/// Connect to the IMAP server and authenticate.
///
/// Performs: TCP connect, TLS handshake with system root certificates,
/// greeting read, then `LOGIN`. Each phase is individually bounded by a
/// timeout so a hung server cannot stall the rescue tick indefinitely.
pub async fn connect_authenticated(params: &ImapParams) -> AppResult<ImapSession> {
    let tcp = timeout(params.connect_timeout, TcpStream::connect((params.host.as_str(), params.port)))
        .await
        .map_err(|_| AppError::Transient("tcp connect timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(params.host.clone())
        .map_err(|_| AppError::Malformed("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(params.greeting_timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Transient("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(params.greeting_timeout, client.read_response())
        .await
        .map_err(|_| AppError::Transient("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Transient("IMAP server closed connection before greeting".to_owned()));
    }

    let pass = params.pass.expose_secret();
    let session = timeout(params.greeting_timeout, client.login(params.user.as_str(), pass))
        .await
        .map_err(|_| AppError::Transient("IMAP login timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|(e, _)| {
                let msg = e.to_string();
                if crate::errors::classify_mail_error(&msg) == crate::errors::MailFailure::Auth {
                    AppError::Auth(msg)
                } else {
                    AppError::Transient(msg)
                }
            })
        })?;

    Ok(session)
}

/// Log out and close the connection, bounded by `watchdog`. A hung
/// `LOGOUT` is logged and otherwise ignored — the TCP connection is
/// dropped regardless once the session value goes out of scope.
pub async fn logout(session: &mut ImapSession, watchdog: Duration) {
    if timeout(watchdog, session.logout()).await.is_err() {
        tracing::warn!("IMAP LOGOUT timed out; dropping connection");
    }
}

/// Select mailbox in read-write mode via `SELECT`.
pub async fn select_mailbox_readwrite(session: &mut ImapSession, mailbox: &str, socket_timeout: Duration) -> AppResult<()> {
    timeout(socket_timeout, session.select(mailbox))
        .await
        .map_err(|_| AppError::Transient(format!("SELECT timed out for mailbox '{mailbox}'")))
        .and_then(|r| r.map_err(|e| AppError::NotFound(format!("cannot select mailbox '{mailbox}': {e}"))))?;
    Ok(())
}

/// Search for messages matching `query` via `UID SEARCH`.
pub async fn uid_search(session: &mut ImapSession, query: &str, socket_timeout: Duration) -> AppResult<Vec<u32>> {
    let set = timeout(socket_timeout, session.uid_search(query))
        .await
        .map_err(|_| AppError::Transient("UID SEARCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("uid search failed: {e}"))))?;
    let mut uids: Vec<u32> = set.into_iter().collect();
    uids.sort_unstable();
    Ok(uids)
}

/// Store flags on a message via `UID STORE`. Use `+FLAGS.SILENT (\Seen)`
/// to mark read.
pub async fn uid_store(session: &mut ImapSession, uid: u32, query: &str, socket_timeout: Duration) -> AppResult<()> {
    let stream = timeout(socket_timeout, session.uid_store(uid.to_string(), query))
        .await
        .map_err(|_| AppError::Transient("UID STORE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("uid store failed: {e}"))))?;
    let _: Vec<Fetch> = timeout(socket_timeout, stream.try_collect())
        .await
        .map_err(|_| AppError::Transient("UID STORE stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("uid store stream failed: {e}"))))?;
    Ok(())
}

/// Move a message to another mailbox via `UID MOVE` (RFC 6851).
pub async fn uid_move(session: &mut ImapSession, uid: u32, mailbox: &str, socket_timeout: Duration) -> AppResult<()> {
    timeout(socket_timeout, session.uid_mv(uid.to_string(), mailbox))
        .await
        .map_err(|_| AppError::Transient("UID MOVE timed out".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Transient(format!("UID MOVE failed: {e}"))))
}
