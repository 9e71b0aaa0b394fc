//! Shared types for the reply pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters kept from a body or reply in an interaction record.
pub const SNIPPET_CHARS: usize = 200;

// ── Inbound message ─────────────────────────────────────────────────

/// A normalized unread message from any mailbox provider.
///
/// Built once by the provider adapter and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Provider-native id (Gmail message id, IMAP UID).
    pub id: String,
    /// Provider thread id (Gmail thread id; the UID again for IMAP).
    pub thread_id: String,
    /// RFC 5322 `Message-ID`, used for `In-Reply-To` on the reply.
    pub message_id: Option<String>,
    /// Raw `References` header of the inbound message.
    pub references: Option<String>,
    /// Bare sender address.
    pub sender: String,
    /// Sender display name, if present.
    pub sender_name: Option<String>,
    pub subject: String,
    /// Readable body text (plain text preferred, HTML stripped otherwise).
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub headers: HeaderFlags,
}

/// Headers that mark list, bulk or machine-generated mail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFlags {
    /// `List-Unsubscribe` present.
    pub list_unsubscribe: bool,
    /// `List-Id` present.
    pub list_id: bool,
    /// `Auto-Submitted` value, if present.
    pub auto_submitted: Option<String>,
    /// `Precedence` value, if present.
    pub precedence: Option<String>,
}

impl HeaderFlags {
    /// Whether the headers indicate a mailing list or bulk/auto-submitted origin.
    pub fn indicates_bulk(&self) -> bool {
        if self.list_unsubscribe || self.list_id {
            return true;
        }
        if let Some(auto) = &self.auto_submitted
            && !auto.trim().eq_ignore_ascii_case("no")
        {
            return true;
        }
        self.precedence.as_deref().is_some_and(|p| {
            matches!(
                p.trim().to_ascii_lowercase().as_str(),
                "bulk" | "list" | "junk"
            )
        })
    }
}

// ── Reply decision ──────────────────────────────────────────────────

/// Why a message was (or was not) answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    Eligible,
    SkipNoReply,
    SkipList,
    SkipAlreadyReplied,
    SkipSelfSent,
    SkipOptOut,
}

impl DecisionReason {
    pub fn label(&self) -> &'static str {
        match self {
            DecisionReason::Eligible => "ELIGIBLE",
            DecisionReason::SkipNoReply => "SKIP_NO_REPLY",
            DecisionReason::SkipList => "SKIP_LIST",
            DecisionReason::SkipAlreadyReplied => "SKIP_ALREADY_REPLIED",
            DecisionReason::SkipSelfSent => "SKIP_SELF_SENT",
            DecisionReason::SkipOptOut => "SKIP_OPT_OUT",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of the reply filter. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyDecision {
    pub eligible: bool,
    pub reason: DecisionReason,
}

impl ReplyDecision {
    pub fn from_reason(reason: DecisionReason) -> Self {
        Self {
            eligible: reason == DecisionReason::Eligible,
            reason,
        }
    }
}

// ── Interaction record ──────────────────────────────────────────────

/// Final outcome of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Sent,
    Skipped,
    Failed,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Sent => "SENT",
            Outcome::Skipped => "SKIPPED",
            Outcome::Failed => "FAILED",
        }
    }
}

/// One append-only row in the interaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub sender: String,
    /// The assistant's own address.
    pub recipient: String,
    pub subject: String,
    /// Truncated inbound body.
    pub body_snippet: String,
    /// Reply text as sent (full text; sinks truncate for display).
    pub reply: Option<String>,
    pub summary: Option<String>,
    pub outcome: Outcome,
    /// Skip reason or failure message.
    pub detail: Option<String>,
}

impl InteractionRecord {
    fn base(message: &Message, recipient: &str, outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            recipient: recipient.to_string(),
            subject: message.subject.clone(),
            body_snippet: snippet(&message.body),
            reply: None,
            summary: None,
            outcome,
            detail: None,
        }
    }

    pub fn sent(message: &Message, recipient: &str, reply: String, summary: Option<String>) -> Self {
        Self {
            reply: Some(reply),
            summary,
            ..Self::base(message, recipient, Outcome::Sent)
        }
    }

    pub fn skipped(message: &Message, recipient: &str, reason: DecisionReason) -> Self {
        Self {
            detail: Some(reason.label().to_string()),
            ..Self::base(message, recipient, Outcome::Skipped)
        }
    }

    pub fn failed(
        message: &Message,
        recipient: &str,
        reply: Option<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            reply,
            detail: Some(error.to_string()),
            ..Self::base(message, recipient, Outcome::Failed)
        }
    }

    /// Column values in sink order, with body and reply truncated.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.message_id.clone(),
            self.sender.clone(),
            self.recipient.clone(),
            self.subject.clone(),
            self.body_snippet.clone(),
            self.reply.as_deref().map(snippet).unwrap_or_default(),
            self.summary.clone().unwrap_or_default(),
            self.outcome.label().to_string(),
            self.detail.clone().unwrap_or_default(),
        ]
    }
}

/// Column headers matching [`InteractionRecord::to_row`].
pub const RECORD_HEADERS: [&str; 10] = [
    "Timestamp",
    "Message ID",
    "Sender",
    "Recipient",
    "Subject",
    "Original Snippet",
    "Reply Snippet",
    "Summary",
    "Outcome",
    "Detail",
];

/// Truncate to [`SNIPPET_CHARS`] characters, appending `...` when cut.
pub fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
