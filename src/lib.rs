//! Inbox responder: polls a mailbox, drafts replies with an LLM, sends them
//! and logs every interaction.

pub mod channels;
pub mod config;
pub mod error;
pub mod google_auth;
pub mod interactions;
pub mod llm;
pub mod pipeline;
pub mod shutdown;
