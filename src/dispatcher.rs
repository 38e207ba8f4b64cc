//! Mail Dispatcher (C4)
//!
//! Sends the reply for one batch entry, selecting between the Gmail
//! vendor API and plain SMTP depending on what credentials are available,
//! and classifies every failure into `Success | AuthFailure |
//! TransientFailure` so the batch processor (C7) can drive the cooldown
//! and block flags.

use std::time::Duration;

use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use crate::credentials::{CredentialResolver, CredentialStore, ResolvedCredentials};
use crate::errors::{classify_mail_error, AppError, AppResult, MailFailure};
use crate::gmail::GmailClient;
use crate::models::{BatchEntry, WarmupRequest};
use crate::provider::provider_info;

/// Outcome of one send attempt, mirrored on the spam-rescue path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    AuthFailure,
    TransientFailure,
}

impl From<MailFailure> for DispatchOutcome {
    fn from(failure: MailFailure) -> Self {
        match failure {
            MailFailure::Auth => DispatchOutcome::AuthFailure,
            MailFailure::Transient => DispatchOutcome::TransientFailure,
        }
    }
}

struct InReplyTo(String);
impl Header for InReplyTo {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("In-Reply-To")
    }
    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }
    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

struct References(String);
impl Header for References {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("References")
    }
    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }
    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

fn build_message(req: &WarmupRequest) -> AppResult<Message> {
    let from: Mailbox = req
        .reply_from
        .parse()
        .map_err(|e| AppError::Malformed(format!("invalid replyFrom address: {e}")))?;
    let to: Mailbox = req.to.parse().map_err(|e| AppError::Malformed(format!("invalid to address: {e}")))?;

    let mut builder = Message::builder().from(from).to(to).subject(format!("Re: {}", req.original_subject));
    if let Some(in_reply_to) = &req.in_reply_to {
        builder = builder.header(InReplyTo(in_reply_to.clone()));
    }
    if let Some(references) = &req.reference_id {
        builder = builder.header(References(references.clone()));
    }

    builder
        .body(req.body.clone())
        .map_err(|e| AppError::Internal(format!("failed to build reply message: {e}")))
}

/// Sends replies for a single sender mailbox, resolving credentials fresh
/// on every call (spec §5: no credential cache at this layer).
pub struct MailDispatcher<S: CredentialStore> {
    resolver: CredentialResolver<S>,
    gmail: GmailClient,
}

impl<S: CredentialStore> MailDispatcher<S> {
    pub fn new(resolver: CredentialResolver<S>, gmail: GmailClient) -> Self {
        Self { resolver, gmail }
    }

    /// Run one spam-rescue for `sender_addr`, resolving its credentials
    /// the same way `send_reply` does. Returns `AuthFailure` on detected
    /// authentication failure, `Done` otherwise (non-auth failures are
    /// already logged and swallowed inside `rescue::rescue`).
    pub async fn rescue_sender(&self, custom_mail_id: &str, sender_addr: &str) -> crate::rescue::RescueOutcome {
        let creds = match self.resolver.get_credentials(sender_addr).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(sender = sender_addr, "no credentials on file, skipping spam rescue");
                return crate::rescue::RescueOutcome::Done;
            }
            Err(e) => {
                tracing::warn!(sender = sender_addr, error = %e, "credential lookup failed, skipping spam rescue");
                return crate::rescue::RescueOutcome::Done;
            }
        };
        crate::rescue::rescue(custom_mail_id, sender_addr, &creds, &self.gmail).await
    }

    /// `sendReply(entry) -> Success | AuthFailure | TransientFailure`.
    pub async fn send_reply(&self, entry: &BatchEntry) -> DispatchOutcome {
        let creds = match self.resolver.get_credentials(&entry.request.reply_from).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::warn!(sender = %entry.request.reply_from, "no credentials on file for sender");
                return DispatchOutcome::AuthFailure;
            }
            Err(e) => {
                tracing::warn!(sender = %entry.request.reply_from, error = %e, "credential lookup failed");
                return DispatchOutcome::TransientFailure;
            }
        };

        if creds.supports_vendor_api(true) {
            match self.send_via_vendor_api(&entry.request, &creds).await {
                Ok(()) => DispatchOutcome::Success,
                Err(e) => classify_mail_error(&e.to_string()).into(),
            }
        } else {
            match self.send_via_smtp(&entry.request, &creds).await {
                Ok(()) => DispatchOutcome::Success,
                Err(e) => classify_mail_error(&e.to_string()).into(),
            }
        }
    }

    async fn send_via_vendor_api(&self, req: &WarmupRequest, creds: &ResolvedCredentials) -> AppResult<()> {
        let refresh = creds
            .oauth_refresh
            .as_ref()
            .ok_or_else(|| AppError::Auth("missing OAuth refresh token".to_string()))?;
        let access_token = self.gmail.refresh_access_token(refresh).await?;
        self.resolver.persist_refreshed_access(&req.reply_from, access_token.expose_secret()).await;

        let thread_id = if let Some(msg_id) = req.in_reply_to.as_deref().or(req.reference_id.as_deref()) {
            self.gmail.find_thread_id(&access_token, msg_id).await.unwrap_or(None)
        } else {
            None
        };

        let message = build_message(req)?;
        self.gmail.send_raw(&access_token, &message.formatted(), thread_id.as_deref()).await
    }

    fn build_smtp_transport(
        &self,
        reply_from: &str,
        creds: &ResolvedCredentials,
    ) -> AppResult<AsyncSmtpTransport<Tokio1Executor>> {
        let password = creds
            .smtp_password
            .as_ref()
            .ok_or_else(|| AppError::Auth("missing SMTP password".to_string()))?;
        let provider = provider_info(&creds.service);

        let tls_params = TlsParameters::builder(provider.smtp_host.to_string())
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build TLS parameters: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(provider.smtp_host)
            .port(provider.smtp_starttls_port)
            .tls(Tls::Required(tls_params))
            .credentials(Credentials::new(reply_from.to_string(), password.expose_secret().to_string()))
            .build();
        Ok(transport)
    }

    async fn send_over_transport(
        &self,
        transport: &AsyncSmtpTransport<Tokio1Executor>,
        req: &WarmupRequest,
    ) -> AppResult<()> {
        let message = build_message(req)?;
        match transport.send(message.clone()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let failure = classify_mail_error(&e.to_string());
                if failure == MailFailure::Auth {
                    return Err(AppError::Auth(e.to_string()));
                }
                tokio::time::sleep(Duration::from_secs(2)).await;
                transport
                    .send(message)
                    .await
                    .map(|_| ())
                    .map_err(|e2| AppError::Transient(e2.to_string()))
            }
        }
    }

    async fn send_via_smtp(&self, req: &WarmupRequest, creds: &ResolvedCredentials) -> AppResult<()> {
        let transport = self.build_smtp_transport(&req.reply_from, creds)?;
        self.send_over_transport(&transport, req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> WarmupRequest {
        WarmupRequest {
            to: "b@y.com".to_string(),
            original_subject: "Hi".to_string(),
            body: "hello".to_string(),
            keyword: None,
            warmup_id: "w1".to_string(),
            reference_id: Some("<orig@x.com>".to_string()),
            in_reply_to: Some("<orig@x.com>".to_string()),
            reply_from: "a@x.com".to_string(),
            custom_mail_id: "TAG".to_string(),
            should_reply: true,
            scheduled_for: None,
        }
    }

    #[test]
    fn build_message_preserves_threading_headers() {
        let req = sample_request();
        let message = build_message(&req).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Re: Hi"));
        assert!(raw.contains("In-Reply-To: <orig@x.com>"));
        assert!(raw.contains("References: <orig@x.com>"));
    }

    #[test]
    fn build_message_rejects_invalid_address() {
        let mut req = sample_request();
        req.to = "not-an-address".to_string();
        assert!(build_message(&req).is_err());
    }
}
