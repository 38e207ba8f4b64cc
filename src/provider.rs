//! Mailbox provider lookup table
//!
//! The dispatcher and spam rescuer both need provider-specific connection
//! details keyed off the `service` column on a credential row. This is a
//! small static table rather than a trait object hierarchy — there are
//! exactly three known providers and none of them carry behavior beyond
//! these constants.

/// Connection constants for one mailbox provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderInfo {
    pub smtp_host: &'static str,
    pub smtp_starttls_port: u16,
    pub smtp_ssl_port: u16,
    pub imap_host: &'static str,
    pub imap_port: u16,
    pub spam_folder: &'static str,
    pub inbox_folder: &'static str,
}

const GMAIL: ProviderInfo = ProviderInfo {
    smtp_host: "smtp.gmail.com",
    smtp_starttls_port: 587,
    smtp_ssl_port: 465,
    imap_host: "imap.gmail.com",
    imap_port: 993,
    spam_folder: "[Gmail]/Spam",
    inbox_folder: "INBOX",
};

const OUTLOOK: ProviderInfo = ProviderInfo {
    smtp_host: "smtp.office365.com",
    smtp_starttls_port: 587,
    smtp_ssl_port: 465,
    imap_host: "outlook.office365.com",
    imap_port: 993,
    spam_folder: "Spam",
    inbox_folder: "Inbox",
};

const SKYFUNNEL: ProviderInfo = ProviderInfo {
    smtp_host: "smtp.skyfunnel.ai",
    smtp_starttls_port: 587,
    smtp_ssl_port: 465,
    imap_host: "imap.skyfunnel.ai",
    imap_port: 993,
    spam_folder: "SPAM",
    inbox_folder: "INBOX",
};

/// Look up connection constants by credential `service` tag. Unknown
/// services fall back to the Gmail table, the most common mailbox type.
pub fn provider_info(service: &str) -> ProviderInfo {
    match service {
        "outlook" => OUTLOOK,
        "skyfunnel" => SKYFUNNEL,
        _ => GMAIL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_resolve() {
        assert_eq!(provider_info("gmail").spam_folder, "[Gmail]/Spam");
        assert_eq!(provider_info("outlook").spam_folder, "Spam");
        assert_eq!(provider_info("skyfunnel").spam_folder, "SPAM");
    }

    #[test]
    fn unknown_service_falls_back_to_gmail() {
        assert_eq!(provider_info("unknown").imap_host, GMAIL.imap_host);
    }
}
