//! Message processing pipeline.
//!
//! Every unread message flows through:
//! 1. `MessageSource::fetch_unread()`: provider-specific I/O, minus handled ids
//! 2. `ReplyFilter::decide()`: header and sender rules, no LLM
//! 3. `ResponseGenerator::generate_reply()` then `MessageSink::send_reply()`
//! 4. `InteractionLogger::append()`: one row per outcome

pub mod filter;
pub mod poll_loop;
pub mod types;

pub use filter::ReplyFilter;
pub use poll_loop::{Adapters, CycleReport, PollLoop, PollState, RunMode, RunSummary};
