//! The poll loop: fetch unread mail, filter, reply, record.
//!
//! One message is handled at a time, in fetch order. Every message the loop
//! touches goes into the already-handled set, so no message is attempted
//! twice in one process. Shutdown is only observed between cycles.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::{MessageSink, MessageSource};
use crate::config::AssistantConfig;
use crate::error::Error;
use crate::interactions::InteractionLogger;
use crate::llm::{ResponseGenerator, prompts};
use crate::pipeline::filter::ReplyFilter;
use crate::pipeline::types::{DecisionReason, InteractionRecord, Message};

/// How long the loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One cycle, then return.
    SinglePass,
    /// Cycle forever, sleeping this long after each cycle completes.
    Continuous(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Processing,
    Sleeping,
}

/// Counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub totals: CycleReport,
}

impl RunSummary {
    fn add(&mut self, report: CycleReport) {
        self.cycles += 1;
        self.totals.fetched += report.fetched;
        self.totals.sent += report.sent;
        self.totals.skipped += report.skipped;
        self.totals.failed += report.failed;
    }
}

/// The provider-specific pieces, chosen once at startup.
#[derive(Clone)]
pub struct Adapters {
    pub source: Arc<dyn MessageSource>,
    pub sink: Arc<dyn MessageSink>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub logger: Arc<dyn InteractionLogger>,
}

enum Handled {
    Sent,
    Failed(Error),
}

pub struct PollLoop {
    adapters: Adapters,
    filter: ReplyFilter,
    own_address: String,
    summarize: bool,
    handled: HashSet<String>,
    state: PollState,
}

impl PollLoop {
    pub fn new(adapters: Adapters, own_address: &str, assistant: &AssistantConfig) -> Self {
        Self {
            adapters,
            filter: ReplyFilter::new(own_address, &assistant.opt_out_markers),
            own_address: own_address.to_string(),
            summarize: assistant.summarize,
            handled: HashSet::new(),
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Ids processed so far in this process.
    pub fn handled(&self) -> &HashSet<String> {
        &self.handled
    }

    /// Run cycles according to `mode` until done, `shutdown` resolves, or an
    /// auth failure aborts the run. The source is closed either way.
    pub async fn run<S>(&mut self, mode: RunMode, shutdown: S) -> Result<RunSummary, Error>
    where
        S: Future<Output = ()>,
    {
        let result = self.run_cycles(mode, shutdown).await;
        self.adapters.source.close().await;
        result
    }

    async fn run_cycles<S>(&mut self, mode: RunMode, shutdown: S) -> Result<RunSummary, Error>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();

        loop {
            let report = self.run_cycle().await?;
            summary.add(report);
            info!(
                cycle = summary.cycles,
                fetched = report.fetched,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                "Cycle complete"
            );

            let RunMode::Continuous(interval) = mode else {
                break;
            };

            self.state = PollState::Sleeping;
            debug!(secs = interval.as_secs(), "Sleeping until next cycle");
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.state = PollState::Idle;
        Ok(summary)
    }

    /// One fetch-and-process cycle.
    ///
    /// Per-message failures are recorded and skipped past. Only auth failures
    /// are returned as errors; a transient fetch failure ends the cycle with
    /// an empty report.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, Error> {
        let mut report = CycleReport::default();

        self.state = PollState::Fetching;
        let messages = match self.adapters.source.fetch_unread(&self.handled).await {
            Ok(messages) => messages,
            Err(e) if e.is_auth_failure() => {
                self.state = PollState::Idle;
                error!(error = %e, "Mailbox authentication failed");
                return Err(e.into());
            }
            Err(e) => {
                self.state = PollState::Idle;
                warn!(error = %e, "Fetch failed, ending cycle early");
                return Ok(report);
            }
        };
        report.fetched = messages.len();
        if !messages.is_empty() {
            info!(count = messages.len(), "Fetched unread messages");
        }

        self.state = PollState::Processing;
        for message in &messages {
            let decision = self.filter.decide(message, &self.handled);

            match decision.reason {
                DecisionReason::SkipAlreadyReplied => {
                    // The earlier attempt already wrote this message's row.
                    info!(message_id = %message.id, reason = %decision.reason, "Skipping message");
                    report.skipped += 1;
                }
                reason if !decision.eligible => {
                    self.handled.insert(message.id.clone());
                    info!(
                        message_id = %message.id,
                        sender = %message.sender,
                        reason = %reason,
                        "Skipping message"
                    );
                    let record = InteractionRecord::skipped(message, &self.own_address, reason);
                    self.record(&record).await?;
                    report.skipped += 1;
                }
                _ => {
                    self.handled.insert(message.id.clone());
                    match self.reply_to(message).await? {
                        Handled::Sent => report.sent += 1,
                        Handled::Failed(e) if e.is_auth_failure() => {
                            self.state = PollState::Idle;
                            error!(message_id = %message.id, error = %e, "Authentication failed, aborting run");
                            return Err(e);
                        }
                        Handled::Failed(_) => report.failed += 1,
                    }
                }
            }
        }

        self.state = PollState::Idle;
        Ok(report)
    }

    /// Draft, send, mark and record one eligible message. Errors from the
    /// interaction log itself are the only ones propagated directly.
    async fn reply_to(&self, message: &Message) -> Result<Handled, Error> {
        let reply = match self.adapters.generator.generate_reply(message).await {
            Ok(reply) => reply,
            Err(e) => {
                let e = Error::from(e);
                return self.record_failure(message, None, e).await;
            }
        };

        if let Err(e) = self.adapters.sink.send_reply(message, &reply).await {
            return self.record_failure(message, Some(reply), e.into()).await;
        }

        if let Err(e) = self.adapters.sink.mark_handled(message).await {
            warn!(message_id = %message.id, error = %e, "Reply sent but message not marked read");
        }

        let summary = if self.summarize {
            Some(
                match self.adapters.generator.summarize(message, &reply).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        warn!(message_id = %message.id, error = %e, "Summary failed, using fallback");
                        prompts::fallback_summary(message)
                    }
                },
            )
        } else {
            None
        };

        info!(
            message_id = %message.id,
            sender = %message.sender,
            outcome = "SENT",
            "Reply sent"
        );
        let record = InteractionRecord::sent(message, &self.own_address, reply, summary);
        self.record(&record).await?;
        Ok(Handled::Sent)
    }

    async fn record_failure(
        &self,
        message: &Message,
        reply: Option<String>,
        error: Error,
    ) -> Result<Handled, Error> {
        warn!(
            message_id = %message.id,
            sender = %message.sender,
            outcome = "FAILED",
            error = %error,
            "Failed to reply"
        );
        let record = InteractionRecord::failed(message, &self.own_address, reply, &error);
        self.record(&record).await?;
        Ok(Handled::Failed(error))
    }

    /// Append a record. Sink failures are logged and swallowed unless the
    /// sink's credentials were rejected.
    async fn record(&self, record: &InteractionRecord) -> Result<(), Error> {
        match self.adapters.logger.append(record).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let e = Error::from(e);
                if e.is_auth_failure() {
                    error!(error = %e, "Interaction log authentication failed");
                    return Err(e);
                }
                warn!(message_id = %record.message_id, error = %e, "Failed to record interaction");
                Ok(())
            }
        }
    }
}
