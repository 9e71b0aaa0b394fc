//! Gmail REST adapter.
//!
//! Lists unread inbox ids, paging past ids the caller already handled, then
//! pulls each message as raw RFC 822 and parses it with the shared helpers. Replies are built with lettre and posted back
//! base64url-encoded on the original thread.

use std::collections::HashSet;

use base64::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use super::email::{build_reply, parse_message};
use super::{MessageSink, MessageSource};
use crate::config::GmailConfig;
use crate::error::{AuthError, ProviderError};
use crate::google_auth::TokenProvider;
use crate::pipeline::types::Message;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const PROVIDER: &str = "gmail";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    thread_id: Option<String>,
    raw: String,
}

/// Gmail mailbox reached over the REST API.
pub struct GmailMailbox {
    http: reqwest::Client,
    tokens: TokenProvider,
    base_url: String,
    address: String,
    max_messages: u32,
}

impl GmailMailbox {
    pub fn new(config: &GmailConfig, address: &str, max_messages: u32) -> Result<Self, AuthError> {
        let http = reqwest::Client::new();
        let tokens =
            TokenProvider::authorized_user(&config.token_path, &config.credentials_path, http.clone())?;
        Ok(Self::with_tokens(http, tokens, address, max_messages))
    }

    /// Build from an existing token provider.
    pub fn with_tokens(
        http: reqwest::Client,
        tokens: TokenProvider,
        address: &str,
        max_messages: u32,
    ) -> Self {
        Self {
            http,
            tokens,
            base_url: GMAIL_API_BASE.to_string(),
            address: address.to_string(),
            max_messages,
        }
    }

    /// Point the adapter at a different API root (`.../users/me`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(connection_error)?;
        self.handle_response(response).await
    }

    async fn post<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ProviderError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(connection_error)?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => {
                    self.tokens.invalidate().await;
                    ProviderError::Auth(AuthError::GrantRejected {
                        provider: PROVIDER.into(),
                        reason: format!("{status}: {body}"),
                    })
                }
                429 => ProviderError::RateLimited {
                    provider: PROVIDER.into(),
                },
                _ => ProviderError::RequestFailed {
                    provider: PROVIDER.into(),
                    reason: format!("{status}: {body}"),
                },
            });
        }

        response.json().await.map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })
    }

    async fn fetch_one(&self, id: &str) -> Result<Option<Message>, ProviderError> {
        let detail: RawMessage = self.get(&format!("/messages/{id}?format=raw")).await?;
        let bytes = decode_raw(&detail.raw).ok_or_else(|| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("message {id} has invalid base64 payload"),
        })?;
        let thread_id = detail.thread_id.unwrap_or_else(|| detail.id.clone());
        Ok(parse_message(&bytes, &detail.id, &thread_id))
    }
}

#[async_trait]
impl MessageSource for GmailMailbox {
    async fn fetch_unread(&self, exclude: &HashSet<String>) -> Result<Vec<Message>, ProviderError> {
        let wanted = self.max_messages as usize;
        let mut pending: Vec<MessageRef> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut path = format!(
                "/messages?labelIds=INBOX&labelIds=UNREAD&maxResults={}",
                self.max_messages
            );
            if let Some(token) = &page_token {
                path.push_str("&pageToken=");
                path.push_str(token);
            }
            let list: ListResponse = self.get(&path).await?;
            pending.extend(
                list.messages
                    .into_iter()
                    .filter(|entry| !exclude.contains(&entry.id)),
            );
            match list.next_page_token {
                Some(token) if pending.len() < wanted => page_token = Some(token),
                _ => break,
            }
        }
        pending.truncate(wanted);

        let mut messages = Vec::with_capacity(pending.len());
        for entry in pending {
            match self.fetch_one(&entry.id).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => warn!(message_id = %entry.id, "Unparseable message skipped"),
                Err(e) if e.is_auth_failure() => return Err(e),
                Err(e) => warn!(
                    message_id = %entry.id,
                    thread_id = ?entry.thread_id,
                    error = %e,
                    "Failed to fetch message details, skipping"
                ),
            }
        }

        // The list endpoint returns newest first.
        messages.sort_by_key(|m| m.received_at);
        debug!(count = messages.len(), "Fetched unread Gmail messages");
        Ok(messages)
    }
}

#[async_trait]
impl MessageSink for GmailMailbox {
    async fn send_reply(&self, original: &Message, reply_text: &str) -> Result<(), ProviderError> {
        let reply = build_reply(PROVIDER, &self.address, original, reply_text)?;
        let raw = BASE64_URL_SAFE.encode(reply.formatted());

        let sent = self
            .post(
                "/messages/send",
                &serde_json::json!({ "raw": raw, "threadId": original.thread_id }),
            )
            .await
            .map_err(|e| match e {
                ProviderError::RequestFailed { reason, .. } => ProviderError::SendFailed {
                    provider: PROVIDER.into(),
                    reason,
                },
                other => other,
            })?;

        info!(
            message_id = %original.id,
            sent_id = sent.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
            "Reply sent via Gmail API"
        );
        Ok(())
    }

    async fn mark_handled(&self, original: &Message) -> Result<(), ProviderError> {
        self.post(
            &format!("/messages/{}/modify", original.id),
            &serde_json::json!({ "removeLabelIds": ["UNREAD"] }),
        )
        .await?;
        debug!(message_id = %original.id, "Removed UNREAD label");
        Ok(())
    }
}

/// Gmail emits base64url, with or without padding.
fn decode_raw(raw: &str) -> Option<Vec<u8>> {
    BASE64_URL_SAFE
        .decode(raw)
        .or_else(|_| BASE64_URL_SAFE_NO_PAD.decode(raw))
        .ok()
}

fn connection_error(e: reqwest::Error) -> ProviderError {
    ProviderError::Connection {
        provider: PROVIDER.into(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_raw_accepts_both_paddings() {
        let padded = BASE64_URL_SAFE.encode(b"Subject: x\r\n\r\nhi");
        let unpadded = BASE64_URL_SAFE_NO_PAD.encode(b"Subject: x\r\n\r\nhi");
        assert_eq!(decode_raw(&padded).unwrap(), b"Subject: x\r\n\r\nhi");
        assert_eq!(decode_raw(&unpadded).unwrap(), b"Subject: x\r\n\r\nhi");
        assert!(decode_raw("not base64 !!").is_none());
    }

    #[test]
    fn empty_list_response_has_no_messages() {
        let list: ListResponse = serde_json::from_str(r#"{"resultSizeEstimate":0}"#).unwrap();
        assert!(list.messages.is_empty());
        assert!(list.next_page_token.is_none());
    }
}
