//! Prompt templates for reply drafting and interaction summaries.

use crate::pipeline::types::Message;

/// Inbound bodies are cut to this many characters before prompting.
const MAX_BODY_CHARS: usize = 8_000;

/// System preamble for the reply agent.
pub fn reply_preamble(persona: &str) -> String {
    format!(
        "You are an AI assistant managing an email inbox with the following persona: {persona}\n\
         \n\
         Draft a polite and helpful reply that addresses the content of the email.\n\
         If it is a simple query you can answer, do so thoroughly.\n\
         If it is complex or needs a human, politely acknowledge the email and say it \
         will be forwarded to the appropriate person.\n\
         Be concise but friendly. Reply with the email body only: no subject line, \
         no placeholders, no commentary."
    )
}

pub const SUMMARY_PREAMBLE: &str =
    "You summarize email interactions for an activity log. Extract the key points only, \
     in one or two sentences.";

/// User prompt carrying the inbound message.
pub fn reply_prompt(message: &Message) -> String {
    let from = match &message.sender_name {
        Some(name) => format!("{name} <{}>", message.sender),
        None => message.sender.clone(),
    };
    format!(
        "You've received the following email:\n\
         From: {from}\n\
         Subject: {}\n\
         \n\
         Body:\n\
         {}",
        message.subject,
        truncate_body(&message.body),
    )
}

pub fn summary_prompt(message: &Message, reply_text: &str) -> String {
    format!(
        "Original email subject: {}\n\
         Original email: {}\n\
         \n\
         Reply sent: {reply_text}\n\
         \n\
         Summary:",
        message.subject,
        truncate_body(&message.body),
    )
}

/// Summary used when none can be generated.
pub fn fallback_summary(message: &Message) -> String {
    format!("Interaction regarding: {}", message.subject)
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
