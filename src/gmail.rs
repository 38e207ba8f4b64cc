//! Gmail vendor-API client
//!
//! Thin REST client over `reqwest`, used by the Mail Dispatcher (C4) to
//! send threaded replies and by the Spam Rescuer (C5) to search/relabel
//! spam-folder messages, when a sender mailbox has OAuth credentials
//! (spec §4.4 step 1, §6). Token refresh uses the `oauth2` crate's
//! refresh-token grant against Google's token endpoint.

use base64::Engine;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::OAuthConfig;
use crate::errors::{AppError, AppResult};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail REST client bound to one sender mailbox's OAuth tokens.
pub struct GmailClient {
    http: Client,
    oauth: BasicClient,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDetail {
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    subject: Option<String>,
}

impl GmailClient {
    pub fn new(oauth_config: &OAuthConfig) -> AppResult<Self> {
        let client_id = oauth_config
            .client_id
            .clone()
            .ok_or_else(|| AppError::Internal("Gmail OAuth client_id is not configured".to_string()))?;
        let client_secret = oauth_config
            .client_secret
            .clone()
            .ok_or_else(|| AppError::Internal("Gmail OAuth client_secret is not configured".to_string()))?;

        let oauth = BasicClient::new(
            ClientId::new(client_id),
            Some(ClientSecret::new(client_secret.expose_secret().to_string())),
            AuthUrl::new(AUTH_URL.to_string())
                .map_err(|e| AppError::Internal(format!("invalid Gmail auth url: {e}")))?,
            Some(
                TokenUrl::new(TOKEN_URL.to_string())
                    .map_err(|e| AppError::Internal(format!("invalid Gmail token url: {e}")))?,
            ),
        );

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, oauth })
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn refresh_access_token(&self, refresh_token: &SecretString) -> AppResult<SecretString> {
        let token = self
            .oauth
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose_secret().to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| classify_oauth_error(&e.to_string()))?;
        Ok(SecretString::from(token.access_token().secret().clone()))
    }

    /// Look up the Gmail thread id for a message carrying the given
    /// RFC-5322 `Message-ID` (spec §4.4 step 3: "RFC-822 message-id lookup").
    pub async fn find_thread_id(&self, access_token: &SecretString, message_id: &str) -> AppResult<Option<String>> {
        let query = format!("rfc822msgid:{message_id}");
        let url = format!("{API_BASE}/messages?q={}", urlencoding::encode(&query));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail thread lookup failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_to_app_error(resp.status(), "Gmail thread lookup"));
        }

        let listed: MessageListResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail thread lookup decode failed: {e}")))?;

        Ok(listed.messages.into_iter().next().and_then(|m| m.thread_id))
    }

    /// Send an RFC-2822 blob as a reply, attaching `thread_id` when known
    /// so the message threads correctly in the recipient's conversation.
    pub async fn send_raw(
        &self,
        access_token: &SecretString,
        rfc2822: &[u8],
        thread_id: Option<&str>,
    ) -> AppResult<()> {
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(rfc2822);
        let mut body = json!({ "raw": raw });
        if let Some(tid) = thread_id {
            body["threadId"] = json!(tid);
        }

        let resp = self
            .http
            .post(format!("{API_BASE}/messages/send"))
            .bearer_auth(access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail send failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_to_app_error(resp.status(), "Gmail send"));
        }
        Ok(())
    }

    /// List spam-folder messages whose subject carries `tag` (spec §4.5:
    /// `in:spam subject:"<tag>"`, filtered client-side by exact substring).
    pub async fn list_spam_by_subject_tag(
        &self,
        access_token: &SecretString,
        tag: &str,
    ) -> AppResult<Vec<String>> {
        let query = format!("in:spam subject:\"{tag}\"");
        let url = format!("{API_BASE}/messages?q={}", urlencoding::encode(&query));
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail spam search failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_to_app_error(resp.status(), "Gmail spam search"));
        }

        let listed: MessageListResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail spam search decode failed: {e}")))?;

        let mut matching = Vec::new();
        for msg_ref in listed.messages {
            let detail = self.get_message(access_token, &msg_ref.id).await?;
            if detail.subject.as_deref().is_some_and(|s| s.contains(tag)) {
                matching.push(msg_ref.id);
            }
        }
        Ok(matching)
    }

    async fn get_message(&self, access_token: &SecretString, id: &str) -> AppResult<MessageDetail> {
        let resp = self
            .http
            .get(format!("{API_BASE}/messages/{id}?format=metadata&metadataHeaders=Subject"))
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail get message failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_to_app_error(resp.status(), "Gmail get message"));
        }

        #[derive(Debug, Deserialize)]
        struct Payload {
            #[serde(default)]
            headers: Vec<Header>,
        }
        #[derive(Debug, Deserialize)]
        struct Header {
            name: String,
            value: String,
        }
        #[derive(Debug, Deserialize)]
        struct Raw {
            #[serde(rename = "threadId")]
            thread_id: Option<String>,
            payload: Option<Payload>,
        }

        let raw: Raw = resp
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail get message decode failed: {e}")))?;
        let subject = raw
            .payload
            .map(|p| p.headers)
            .unwrap_or_default()
            .into_iter()
            .find(|h| h.name.eq_ignore_ascii_case("subject"))
            .map(|h| h.value);

        Ok(MessageDetail { thread_id: raw.thread_id, subject })
    }

    /// Move spam-folder messages out of spam and into the inbox, marking
    /// them read, by removing the `SPAM` label and adding `INBOX`.
    pub async fn rescue_from_spam(&self, access_token: &SecretString, message_ids: &[String]) -> AppResult<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let resp = self
            .http
            .post(format!("{API_BASE}/messages/batchModify"))
            .bearer_auth(access_token.expose_secret())
            .json(&json!({
                "ids": message_ids,
                "removeLabelIds": ["SPAM", "UNREAD"],
                "addLabelIds": ["INBOX"],
            }))
            .send()
            .await
            .map_err(|e| AppError::Transient(format!("Gmail batchModify failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_to_app_error(resp.status(), "Gmail batchModify"));
        }
        Ok(())
    }
}

fn status_to_app_error(status: reqwest::StatusCode, context: &str) -> AppError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        AppError::Auth(format!("{context}: {status}"))
    } else {
        AppError::Transient(format!("{context}: {status}"))
    }
}

fn classify_oauth_error(message: &str) -> AppError {
    match crate::errors::classify_mail_error(message) {
        crate::errors::MailFailure::Auth => AppError::Auth(message.to_string()),
        crate::errors::MailFailure::Transient => AppError::Transient(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_to_app_error_classifies_401_403_as_auth() {
        assert!(matches!(
            status_to_app_error(reqwest::StatusCode::UNAUTHORIZED, "x"),
            AppError::Auth(_)
        ));
        assert!(matches!(
            status_to_app_error(reqwest::StatusCode::FORBIDDEN, "x"),
            AppError::Auth(_)
        ));
        assert!(matches!(
            status_to_app_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "x"),
            AppError::Transient(_)
        ));
    }

    #[test]
    fn classify_oauth_error_detects_invalid_grant_style_messages() {
        assert!(matches!(
            classify_oauth_error("invalid_grant: Token has been expired or revoked (authentication failed)"),
            AppError::Auth(_)
        ));
        assert!(matches!(classify_oauth_error("connection reset"), AppError::Transient(_)));
    }
}
