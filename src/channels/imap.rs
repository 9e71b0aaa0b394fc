//! IMAP/SMTP adapter.
//!
//! Unread mail is found with `UID SEARCH UNSEEN` and pulled with
//! `BODY.PEEK[]` so fetching leaves the `\Seen` flag alone. Replies go out
//! through lettre's async SMTP transport; answered messages are then flagged
//! `\Seen` over IMAP.
//!
//! One IMAP session is kept between cycles and dropped after any error so the
//! next operation reconnects. It is logged out when the run ends.

use std::collections::HashSet;
use std::sync::Arc;

use async_imap::types::Fetch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

use super::email::{build_reply, parse_message};
use super::{MessageSink, MessageSource};
use crate::config::ImapConfig;
use crate::error::{AuthError, ProviderError};
use crate::pipeline::types::Message;

type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

const MAILBOX: &str = "INBOX";

/// Mailbox reached over IMAP (read) and SMTP (send).
pub struct ImapMailbox {
    config: ImapConfig,
    address: String,
    max_messages: u32,
    session: Mutex<Option<ImapSession>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig, address: &str, max_messages: u32) -> Self {
        Self {
            config,
            address: address.to_string(),
            max_messages,
            session: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<ImapSession, ProviderError> {
        let tcp = TcpStream::connect((self.config.imap_host.as_str(), self.config.imap_port))
            .await
            .map_err(|e| imap_connection(format!("TCP connect failed: {e}")))?;

        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(self.config.imap_host.clone())
            .map_err(|e| imap_connection(format!("invalid server name: {e}")))?;

        let tls = TlsConnector::from(Arc::new(tls_config))
            .connect(server_name, tcp)
            .await
            .map_err(|e| imap_connection(format!("TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls.compat());
        let session = client
            .login(&self.config.username, self.config.password.expose_secret())
            .await
            .map_err(|(e, _)| {
                ProviderError::Auth(AuthError::LoginRejected {
                    provider: "imap".into(),
                    reason: e.to_string(),
                })
            })?;

        info!(host = %self.config.imap_host, "IMAP session opened");
        Ok(session)
    }

    /// Take the cached session or open a new one. Callers put it back only
    /// after a successful operation.
    async fn checkout(&self, slot: &mut Option<ImapSession>) -> Result<ImapSession, ProviderError> {
        match slot.take() {
            Some(session) => Ok(session),
            None => self.connect().await,
        }
    }

    fn smtp_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ProviderError> {
        let credentials = SmtpCredentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let builder = if self.config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
        }
        .map_err(|e| ProviderError::Connection {
            provider: "smtp".into(),
            reason: format!("SMTP relay error: {e}"),
        })?;

        Ok(builder
            .credentials(credentials)
            .port(self.config.smtp_port)
            .build())
    }
}

#[async_trait]
impl MessageSource for ImapMailbox {
    async fn fetch_unread(&self, exclude: &HashSet<String>) -> Result<Vec<Message>, ProviderError> {
        let mut slot = self.session.lock().await;
        let mut session = self.checkout(&mut slot).await?;

        match fetch_unseen(&mut session, exclude, self.max_messages).await {
            Ok(messages) => {
                *slot = Some(session);
                debug!(count = messages.len(), "Fetched unseen IMAP messages");
                Ok(messages)
            }
            Err(e) => {
                warn!(error = %e, "IMAP fetch failed, session dropped");
                Err(imap_request(e))
            }
        }
    }

    async fn close(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        match session.logout().await {
            Ok(()) => info!(host = %self.config.imap_host, "IMAP session logged out"),
            Err(e) => warn!(error = %e, "IMAP LOGOUT failed"),
        }
    }
}

#[async_trait]
impl MessageSink for ImapMailbox {
    async fn send_reply(&self, original: &Message, reply_text: &str) -> Result<(), ProviderError> {
        let email = build_reply("smtp", &self.address, original, reply_text)?;
        self.smtp_transport()?.send(email).await.map_err(|e| {
            if e.status().is_some_and(|code| code.to_string() == "535") {
                ProviderError::Auth(AuthError::LoginRejected {
                    provider: "smtp".into(),
                    reason: e.to_string(),
                })
            } else {
                ProviderError::SendFailed {
                    provider: "smtp".into(),
                    reason: e.to_string(),
                }
            }
        })?;
        info!(message_id = %original.id, to = %original.sender, "Reply sent via SMTP");
        Ok(())
    }

    async fn mark_handled(&self, original: &Message) -> Result<(), ProviderError> {
        let mut slot = self.session.lock().await;
        let mut session = self.checkout(&mut slot).await?;

        match mark_seen(&mut session, &original.id).await {
            Ok(()) => {
                *slot = Some(session);
                debug!(uid = %original.id, "Flagged \\Seen");
                Ok(())
            }
            Err(e) => {
                warn!(uid = %original.id, error = %e, "IMAP STORE failed, session dropped");
                Err(imap_request(e))
            }
        }
    }
}

/// Unseen messages in INBOX that are not in `exclude`, oldest UID first,
/// capped at `limit`.
async fn fetch_unseen(
    session: &mut ImapSession,
    exclude: &HashSet<String>,
    limit: u32,
) -> Result<Vec<Message>, async_imap::error::Error> {
    session.select(MAILBOX).await?;

    let found = session.uid_search("UNSEEN").await?;
    let uids = pending_uids(found, exclude, limit);
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let seq = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let fetches: Vec<Fetch> = session
        .uid_fetch(&seq, "(UID BODY.PEEK[])")
        .await?
        .try_collect()
        .await?;

    let mut parsed: Vec<(u32, Message)> = fetches
        .iter()
        .filter_map(|fetch| {
            let uid = fetch.uid?;
            let Some(body) = fetch.body() else {
                warn!(uid, "FETCH returned no body");
                return None;
            };
            let id = uid.to_string();
            match parse_message(body, &id, &id) {
                Some(message) => Some((uid, message)),
                None => {
                    warn!(uid, "Unparseable message skipped");
                    None
                }
            }
        })
        .collect();
    parsed.sort_by_key(|(uid, _)| *uid);

    Ok(parsed.into_iter().map(|(_, m)| m).collect())
}

/// Oldest `limit` UIDs not already handled. Handled UIDs are filtered first
/// so a backlog of skipped mail cannot fill the window.
fn pending_uids(
    found: impl IntoIterator<Item = u32>,
    exclude: &HashSet<String>,
    limit: u32,
) -> Vec<u32> {
    let mut uids: Vec<u32> = found
        .into_iter()
        .filter(|uid| !exclude.contains(&uid.to_string()))
        .collect();
    uids.sort_unstable();
    uids.truncate(limit as usize);
    uids
}

async fn mark_seen(session: &mut ImapSession, uid: &str) -> Result<(), async_imap::error::Error> {
    session.select(MAILBOX).await?;
    let _: Vec<Fetch> = session
        .uid_store(uid, "+FLAGS (\\Seen)")
        .await?
        .try_collect()
        .await?;
    Ok(())
}

fn imap_connection(reason: String) -> ProviderError {
    ProviderError::Connection {
        provider: "imap".into(),
        reason,
    }
}

fn imap_request(e: async_imap::error::Error) -> ProviderError {
    ProviderError::RequestFailed {
        provider: "imap".into(),
        reason: e.to_string(),
    }
}
