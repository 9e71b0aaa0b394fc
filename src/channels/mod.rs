//! Mailbox adapters: where unread mail comes from and where replies go.
//!
//! Both providers implement [`MessageSource`] and [`MessageSink`] on a single
//! struct so they can share a connection or token cache; the poll loop only
//! ever sees the two trait objects returned by [`create_mailbox`].

pub mod email;
pub mod gmail;
pub mod imap;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{MailProviderConfig, RunConfig};
use crate::error::{AuthError, ProviderError};
use crate::pipeline::types::Message;

pub use gmail::GmailMailbox;
pub use imap::ImapMailbox;

/// Fetches unread inbox messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Unread messages, oldest first, at most the configured limit. Ids in
    /// `exclude` are dropped before the limit applies, so messages this
    /// process already handled never crowd out newer mail.
    /// Fetching never marks anything as read.
    async fn fetch_unread(&self, exclude: &HashSet<String>) -> Result<Vec<Message>, ProviderError>;

    /// Release any open connection. Called once when the run ends.
    async fn close(&self) {}
}

/// Delivers replies and marks answered messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send `reply_text` as a threaded reply to `original`.
    async fn send_reply(&self, original: &Message, reply_text: &str) -> Result<(), ProviderError>;

    /// Mark `original` as read so it no longer shows up as unread.
    async fn mark_handled(&self, original: &Message) -> Result<(), ProviderError>;
}

/// Build the configured provider once at startup.
pub fn create_mailbox(
    config: &RunConfig,
) -> Result<(Arc<dyn MessageSource>, Arc<dyn MessageSink>), AuthError> {
    match &config.mail {
        MailProviderConfig::Gmail(gmail) => {
            let mailbox = Arc::new(GmailMailbox::new(
                gmail,
                &config.email_address,
                config.max_messages,
            )?);
            tracing::info!(address = %config.email_address, "Using Gmail API mailbox");
            Ok((mailbox.clone(), mailbox))
        }
        MailProviderConfig::Imap(imap) => {
            let mailbox = Arc::new(ImapMailbox::new(
                imap.clone(),
                &config.email_address,
                config.max_messages,
            ));
            tracing::info!(
                imap = %imap.imap_host,
                smtp = %imap.smtp_host,
                "Using IMAP/SMTP mailbox"
            );
            Ok((mailbox.clone(), mailbox))
        }
    }
}
