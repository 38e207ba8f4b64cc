//! Application error model
//!
//! A single error enum carries every failure mode the worker needs to branch
//! on: malformed input (permanent delete), transient I/O (leave for retry),
//! and authentication failure (cooldown + block). `classify_mail_error`
//! implements the substring-based classification shared by the dispatcher
//! and the spam rescuer.

use thiserror::Error;

/// Application error type
///
/// Every fallible operation in the worker returns one of these variants so
/// the ingest/batch loops can apply the right queue/cooldown policy without
/// inspecting error text a second time.
#[derive(Debug, Error)]
pub enum AppError {
    /// Payload failed JSON parsing or schema validation — permanent delete.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Queue, store, or socket I/O that should be retried by the caller.
    #[error("transient error: {0}")]
    Transient(String),
    /// SMTP/IMAP/OAuth authentication failure — triggers block + cooldown.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Resource not found (account, mailbox, message, credential).
    #[error("not found: {0}")]
    NotFound(String),
    /// Unexpected internal failure, not retryable by policy.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Type alias for fallible return values throughout the worker.
pub type AppResult<T> = Result<T, AppError>;

/// Classify a raw mail-protocol error message as auth vs. transient.
///
/// Per spec: any of `auth`, `authentication`, `invalid credentials`,
/// `login failed`, `535`, `534` (case-insensitive substring match) means
/// the credentials are bad and no retry will help. Everything else is
/// transient.
pub fn classify_mail_error(message: &str) -> MailFailure {
    const AUTH_MARKERS: [&str; 6] = [
        "auth",
        "authentication",
        "invalid credentials",
        "login failed",
        "535",
        "534",
    ];
    let lower = message.to_ascii_lowercase();
    if AUTH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        MailFailure::Auth
    } else {
        MailFailure::Transient
    }
}

/// Outcome of classifying a dispatch or rescue failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailFailure {
    Auth,
    Transient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_auth_substrings() {
        for msg in [
            "535 5.7.8 Authentication failed",
            "534-5.7.9 Application-specific password required",
            "Invalid credentials supplied",
            "login failed: bad password",
            "AUTH not accepted",
        ] {
            assert_eq!(classify_mail_error(msg), MailFailure::Auth, "{msg}");
        }
    }

    #[test]
    fn classifies_everything_else_as_transient() {
        for msg in [
            "connection reset by peer",
            "timed out waiting for greeting",
            "451 4.3.0 mailbox temporarily unavailable",
        ] {
            assert_eq!(classify_mail_error(msg), MailFailure::Transient, "{msg}");
        }
    }
}
