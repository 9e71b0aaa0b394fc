//! Reply filter: decides whether a message gets an automated reply.
//!
//! Rules run in a fixed order and the first match wins:
//! 1. already handled this run → `SkipAlreadyReplied`
//! 2. no-reply sender → `SkipNoReply`
//! 3. list / bulk / auto-submitted headers → `SkipList`
//! 4. sent from the assistant's own address → `SkipSelfSent`
//! 5. opt-out marker in the subject → `SkipOptOut`
//!
//! Idempotence comes first so a noisy header heuristic can never lead to a
//! duplicate reply. The filter is pure: no I/O, no clock, no mutation.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::{DecisionReason, Message, ReplyDecision};

/// Sender patterns that never expect an answer.
const NO_REPLY_PATTERN: &str = r"(?i)no[-_]?reply";

/// Pure, deterministic reply eligibility check.
#[derive(Debug, Clone)]
pub struct ReplyFilter {
    own_address: String,
    no_reply: Regex,
    opt_out_markers: Vec<String>,
}

impl ReplyFilter {
    /// Build a filter for the assistant's own address and subject opt-out markers.
    pub fn new(own_address: &str, opt_out_markers: &[String]) -> Self {
        Self {
            own_address: own_address.trim().to_lowercase(),
            no_reply: Regex::new(NO_REPLY_PATTERN).expect("static no-reply pattern"),
            opt_out_markers: opt_out_markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Decide whether `message` is eligible for an automated reply.
    pub fn decide(&self, message: &Message, already_handled: &HashSet<String>) -> ReplyDecision {
        let reason = self.first_matching_rule(message, already_handled);
        if reason != DecisionReason::Eligible {
            debug!(
                message_id = %message.id,
                sender = %message.sender,
                reason = %reason,
                "Message filtered"
            );
        }
        ReplyDecision::from_reason(reason)
    }

    fn first_matching_rule(
        &self,
        message: &Message,
        already_handled: &HashSet<String>,
    ) -> DecisionReason {
        if already_handled.contains(&message.id) {
            return DecisionReason::SkipAlreadyReplied;
        }
        if self.no_reply.is_match(&message.sender) {
            return DecisionReason::SkipNoReply;
        }
        if message.headers.indicates_bulk() {
            return DecisionReason::SkipList;
        }
        if message.sender.trim().eq_ignore_ascii_case(&self.own_address) {
            return DecisionReason::SkipSelfSent;
        }
        let subject = message.subject.to_lowercase();
        if self.opt_out_markers.iter().any(|m| subject.contains(m)) {
            return DecisionReason::SkipOptOut;
        }
        DecisionReason::Eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_OPT_OUT_MARKERS;
    use crate::pipeline::types::HeaderFlags;
    use chrono::Utc;

    const OWN: &str = "assistant@example.com";

    fn filter() -> ReplyFilter {
        let markers: Vec<String> = DEFAULT_OPT_OUT_MARKERS.iter().map(|s| s.to_string()).collect();
        ReplyFilter::new(OWN, &markers)
    }

    fn msg(id: &str, sender: &str) -> Message {
        Message {
            id: id.into(),
            thread_id: id.into(),
            message_id: None,
            references: None,
            sender: sender.into(),
            sender_name: None,
            subject: "Can we meet tomorrow?".into(),
            body: "Let me know what time works.".into(),
            received_at: Utc::now(),
            headers: HeaderFlags::default(),
        }
    }

    fn all_bulk_headers() -> HeaderFlags {
        HeaderFlags {
            list_unsubscribe: true,
            list_id: true,
            auto_submitted: Some("auto-generated".into()),
            precedence: Some("bulk".into()),
        }
    }

    #[test]
    fn plain_message_is_eligible() {
        let d = filter().decide(&msg("1", "alice@example.org"), &HashSet::new());
        assert!(d.eligible);
        assert_eq!(d.reason, DecisionReason::Eligible);
    }

    #[test]
    fn already_handled_wins_over_every_other_rule() {
        let mut m = msg("1", "noreply@example.org");
        m.headers = all_bulk_headers();
        m.subject = "human-only".into();
        let handled: HashSet<String> = ["1".to_string()].into();

        let d = filter().decide(&m, &handled);
        assert!(!d.eligible);
        assert_eq!(d.reason, DecisionReason::SkipAlreadyReplied);

        let mut own = msg("1", OWN);
        own.headers = all_bulk_headers();
        assert_eq!(
            filter().decide(&own, &handled).reason,
            DecisionReason::SkipAlreadyReplied
        );
    }

    #[test]
    fn no_reply_senders_any_case() {
        let f = filter();
        for sender in [
            "noreply@shop.com",
            "no-reply@bank.example",
            "NoReply@Example.com",
            "NO-REPLY@EXAMPLE.COM",
            "alerts-noreply@service.io",
            "no_reply@legacy.example",
            "billing@noreply.vendor.com",
        ] {
            let d = f.decide(&msg("9", sender), &HashSet::new());
            assert_eq!(d.reason, DecisionReason::SkipNoReply, "{sender}");
        }
    }

    #[test]
    fn no_reply_precedes_list_headers() {
        let mut m = msg("2", "noreply@shop.com");
        m.headers.list_unsubscribe = true;
        assert_eq!(
            filter().decide(&m, &HashSet::new()).reason,
            DecisionReason::SkipNoReply
        );
    }

    #[test]
    fn newsletter_with_list_unsubscribe_is_skipped() {
        let mut m = msg("3", "newsletter@shop.com");
        m.headers.list_unsubscribe = true;
        let d = filter().decide(&m, &HashSet::new());
        assert_eq!(
            d,
            ReplyDecision {
                eligible: false,
                reason: DecisionReason::SkipList
            }
        );
    }

    #[test]
    fn auto_submitted_and_precedence_are_list() {
        let f = filter();
        let mut m = msg("4", "robot@example.org");
        m.headers.auto_submitted = Some("auto-replied".into());
        assert_eq!(f.decide(&m, &HashSet::new()).reason, DecisionReason::SkipList);

        let mut m = msg("5", "robot@example.org");
        m.headers.precedence = Some("junk".into());
        assert_eq!(f.decide(&m, &HashSet::new()).reason, DecisionReason::SkipList);

        let mut m = msg("6", "person@example.org");
        m.headers.auto_submitted = Some("no".into());
        assert_eq!(f.decide(&m, &HashSet::new()).reason, DecisionReason::Eligible);
    }

    #[test]
    fn list_precedes_self_sent() {
        let mut m = msg("7", OWN);
        m.headers.list_id = true;
        assert_eq!(
            filter().decide(&m, &HashSet::new()).reason,
            DecisionReason::SkipList
        );
    }

    #[test]
    fn self_sent_is_skipped_case_insensitively() {
        let d = filter().decide(&msg("8", "Assistant@Example.COM"), &HashSet::new());
        assert_eq!(d.reason, DecisionReason::SkipSelfSent);
    }

    #[test]
    fn opt_out_marker_in_subject() {
        let mut m = msg("10", "bob@example.org");
        m.subject = "Contract draft [HUMAN-ONLY]".into();
        assert_eq!(
            filter().decide(&m, &HashSet::new()).reason,
            DecisionReason::SkipOptOut
        );
    }

    #[test]
    fn self_sent_precedes_opt_out() {
        let mut m = msg("11", OWN);
        m.subject = "no-auto-reply please".into();
        assert_eq!(
            filter().decide(&m, &HashSet::new()).reason,
            DecisionReason::SkipSelfSent
        );
    }

    #[test]
    fn empty_markers_never_match() {
        let f = ReplyFilter::new(OWN, &["  ".to_string()]);
        assert_eq!(
            f.decide(&msg("12", "carol@example.org"), &HashSet::new()).reason,
            DecisionReason::Eligible
        );
    }

    #[test]
    fn other_handled_ids_do_not_affect_decision() {
        let handled: HashSet<String> = ["99".to_string()].into();
        assert!(filter().decide(&msg("1", "dave@example.org"), &handled).eligible);
    }

    #[test]
    fn decision_is_deterministic() {
        let f = filter();
        let mut m = msg("13", "newsletter@shop.com");
        m.headers.list_unsubscribe = true;
        let first = f.decide(&m, &HashSet::new());
        for _ in 0..5 {
            assert_eq!(f.decide(&m, &HashSet::new()), first);
        }
    }
}
