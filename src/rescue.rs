//! Spam Rescuer (C5)
//!
//! Finds the warmup reply that landed in the sender's own spam folder
//! (tagged by `customMailId` in the subject) and moves it to the inbox.
//! Every failure is logged and swallowed except authentication failure,
//! which bubbles to the batch processor so it can update the cooldown
//! store the same way C4 does.

use std::time::Duration;

use crate::credentials::ResolvedCredentials;
use crate::errors::{classify_mail_error, MailFailure};
use crate::gmail::GmailClient;
use crate::imap::{self, ImapParams};
use crate::provider::provider_info;

const LOGOUT_WATCHDOG: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescueOutcome {
    Done,
    AuthFailure,
}

/// `rescue(customMailId, senderAddr) -> void`, selecting the IMAP or
/// vendor-API backend the same way C4 selects its send path.
pub async fn rescue(custom_mail_id: &str, sender_addr: &str, creds: &ResolvedCredentials, gmail: &GmailClient) -> RescueOutcome {
    let result = if creds.supports_vendor_api(true) {
        rescue_via_vendor_api(custom_mail_id, creds, gmail).await
    } else {
        rescue_via_imap(custom_mail_id, sender_addr, creds).await
    };

    match result {
        Ok(()) => RescueOutcome::Done,
        Err(message) => {
            if classify_mail_error(&message) == MailFailure::Auth {
                RescueOutcome::AuthFailure
            } else {
                tracing::warn!(sender = sender_addr, error = %message, "spam rescue failed, continuing");
                RescueOutcome::Done
            }
        }
    }
}

async fn rescue_via_imap(custom_mail_id: &str, sender_addr: &str, creds: &ResolvedCredentials) -> Result<(), String> {
    let password = creds.smtp_password.as_ref().ok_or("missing mailbox password for IMAP rescue")?;
    let provider = provider_info(&creds.service);
    let params = ImapParams::new(provider.imap_host.to_string(), provider.imap_port, sender_addr.to_string(), password.clone());

    let mut session = imap::connect_authenticated(&params).await.map_err(|e| e.to_string())?;

    let outcome = async {
        imap::select_mailbox_readwrite(&mut session, provider.spam_folder, params.socket_timeout)
            .await
            .map_err(|e| e.to_string())?;

        let query = format!("HEADER Subject \"{custom_mail_id}\" UNSEEN");
        let uids = imap::uid_search(&mut session, &query, params.socket_timeout).await.map_err(|e| e.to_string())?;

        // All matching UIDs are collected above before any further IMAP
        // command runs; issuing MOVE/STORE while still iterating a fetch
        // stream would deadlock the connection.
        for uid in uids {
            imap::uid_move(&mut session, uid, provider.inbox_folder, params.socket_timeout)
                .await
                .map_err(|e| e.to_string())?;
            imap::uid_store(&mut session, uid, "+FLAGS.SILENT (\\Seen)", params.socket_timeout)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
    .await;

    imap::logout(&mut session, LOGOUT_WATCHDOG).await;
    outcome
}

async fn rescue_via_vendor_api(custom_mail_id: &str, creds: &ResolvedCredentials, gmail: &GmailClient) -> Result<(), String> {
    let refresh = creds.oauth_refresh.as_ref().ok_or("missing OAuth refresh token for vendor rescue")?;
    let access_token = gmail.refresh_access_token(refresh).await.map_err(|e| e.to_string())?;
    let ids = gmail.list_spam_by_subject_tag(&access_token, custom_mail_id).await.map_err(|e| e.to_string())?;
    gmail.rescue_from_spam(&access_token, &ids).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failure_message_classifies_to_auth_outcome() {
        let message = "authentication failed: invalid credentials".to_string();
        assert_eq!(classify_mail_error(&message), MailFailure::Auth);
    }
}
