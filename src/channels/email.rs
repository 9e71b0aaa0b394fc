//! Provider-independent RFC 5322 helpers: parse fetched mail into a
//! [`Message`] with mail-parser, build replies with lettre.
//!
//! Gmail (`format=raw`) and IMAP (`BODY.PEEK[]`) both hand us the raw bytes,
//! so both providers normalize through [`parse_message`].

use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use mail_parser::{MessageParser, MimeHeaders};

use crate::error::ProviderError;
use crate::pipeline::types::{HeaderFlags, Message};

/// Parse raw RFC 822 bytes into a normalized message.
///
/// Returns `None` when the bytes are not a parseable message.
pub fn parse_message(raw: &[u8], id: &str, thread_id: &str) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let (sender, sender_name) = extract_sender(&parsed);
    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let body = extract_text(&parsed);

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let headers = HeaderFlags {
        list_unsubscribe: parsed.header_raw("List-Unsubscribe").is_some(),
        list_id: parsed.header_raw("List-Id").is_some(),
        auto_submitted: raw_header(&parsed, "Auto-Submitted"),
        precedence: raw_header(&parsed, "Precedence"),
    };

    Some(Message {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        message_id: parsed.message_id().map(|s| s.to_string()),
        references: raw_header(&parsed, "References"),
        sender,
        sender_name,
        subject,
        body,
        received_at,
        headers,
    })
}

/// Build the reply as an RFC 5322 message threaded onto `original`.
pub fn build_reply(
    provider: &str,
    from_address: &str,
    original: &Message,
    reply_text: &str,
) -> Result<lettre::Message, ProviderError> {
    let send_failed = |reason: String| ProviderError::SendFailed {
        provider: provider.to_string(),
        reason,
    };

    let from: Mailbox = from_address
        .parse()
        .map_err(|e| send_failed(format!("Invalid from address: {e}")))?;
    let to: Mailbox = original
        .sender
        .parse()
        .map_err(|e| send_failed(format!("Invalid to address: {e}")))?;

    let mut builder = lettre::Message::builder()
        .from(from)
        .to(to)
        .subject(reply_subject(&original.subject))
        .header(ContentType::TEXT_PLAIN);

    if let Some(id) = &original.message_id {
        let id = bracketed(id);
        let references = match original.references.as_deref() {
            Some(existing) if !existing.trim().is_empty() => format!("{} {id}", existing.trim()),
            _ => id.clone(),
        };
        builder = builder.in_reply_to(id).references(references);
    }

    builder
        .body(reply_text.to_string())
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

/// `Re: <subject>`, without stacking prefixes on an existing reply.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn bracketed(id: &str) -> String {
    let id = id.trim();
    if id.starts_with('<') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

fn raw_header(parsed: &mail_parser::Message, name: &str) -> Option<String> {
    parsed
        .header_raw(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Bare address and display name of the sender.
fn extract_sender(parsed: &mail_parser::Message) -> (String, Option<String>) {
    let first = parsed.from().and_then(|addr| addr.first());
    let address = first
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());
    let name = first.and_then(|a| a.name()).map(|s| s.to_string());
    (address, name)
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            let name = MimeHeaders::attachment_name(part).unwrap_or("file");
            return format!("[Attachment: {name}]\n{text}");
        }
    }
    "(no readable content)".to_string()
}
