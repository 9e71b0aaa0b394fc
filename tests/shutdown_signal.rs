//! A termination signal raised while a message is being handled must wait
//! for the cycle to finish. Runs in its own test binary because it signals
//! the whole process.
#![cfg(unix)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use inbox_responder::channels::{MessageSink, MessageSource};
use inbox_responder::config::AssistantConfig;
use inbox_responder::error::{LlmError, LogError, ProviderError};
use inbox_responder::interactions::InteractionLogger;
use inbox_responder::llm::ResponseGenerator;
use inbox_responder::pipeline::types::{HeaderFlags, InteractionRecord, Message, Outcome};
use inbox_responder::pipeline::{Adapters, PollLoop, RunMode};
use inbox_responder::shutdown::ShutdownSignal;

#[derive(Default)]
struct Mailbox {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageSource for Mailbox {
    async fn fetch_unread(&self, exclude: &HashSet<String>) -> Result<Vec<Message>, ProviderError> {
        let message = Message {
            id: "1".into(),
            thread_id: "1".into(),
            message_id: Some("<hours@example.org>".into()),
            references: None,
            sender: "alice@example.org".into(),
            sender_name: None,
            subject: "Opening hours".into(),
            body: "Are you open on Saturday?".into(),
            received_at: Utc::now(),
            headers: HeaderFlags::default(),
        };
        Ok(if exclude.contains(&message.id) {
            Vec::new()
        } else {
            vec![message]
        })
    }
}

#[async_trait]
impl MessageSink for Mailbox {
    async fn send_reply(&self, original: &Message, _reply_text: &str) -> Result<(), ProviderError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.sent.lock().unwrap().push(original.id.clone());
        Ok(())
    }

    async fn mark_handled(&self, _original: &Message) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Sends SIGTERM to this process while drafting.
struct TerminatingGenerator;

#[async_trait]
impl ResponseGenerator for TerminatingGenerator {
    async fn generate_reply(&self, _message: &Message) -> Result<String, LlmError> {
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("Yes, 10 to 4.".into())
    }

    async fn summarize(&self, _message: &Message, _reply_text: &str) -> Result<String, LlmError> {
        Ok("Asked about Saturday hours".into())
    }
}

#[derive(Default)]
struct Rows(Mutex<Vec<InteractionRecord>>);

#[async_trait]
impl InteractionLogger for Rows {
    async fn append(&self, record: &InteractionRecord) -> Result<(), LogError> {
        self.0.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[tokio::test]
async fn sigterm_during_a_cycle_lets_the_cycle_finish() {
    let shutdown = ShutdownSignal::install().unwrap();

    let mailbox = Arc::new(Mailbox::default());
    let rows = Arc::new(Rows::default());
    let mut poll = PollLoop::new(
        Adapters {
            source: mailbox.clone(),
            sink: mailbox.clone(),
            generator: Arc::new(TerminatingGenerator),
            logger: rows.clone(),
        },
        "assistant@example.com",
        &AssistantConfig {
            persona: "Front desk".into(),
            summarize: true,
            opt_out_markers: Vec::new(),
        },
    );

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        poll.run(RunMode::Continuous(Duration::from_secs(3600)), shutdown.recv()),
    )
    .await
    .expect("shutdown was not observed after the cycle")
    .unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(summary.totals.sent, 1);
    assert_eq!(*mailbox.sent.lock().unwrap(), vec!["1"]);
    let rows = rows.0.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, Outcome::Sent);
}
