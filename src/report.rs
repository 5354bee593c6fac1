//! Summaries of a finished run: counts, date range, and top senders.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::message::Message;
use crate::pipeline::SortOutcome;

/// Number of senders listed when no explicit count is given.
pub const DEFAULT_TOP_SENDERS: usize = 10;

/// Message count for one sender address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    /// Lowercased bare address.
    pub address: String,
    pub count: usize,
}

/// Oldest and newest dated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

/// Run-level overview, printable or serializable as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub buckets: usize,
    pub undated: usize,
    pub date_range: Option<DateRange>,
    pub top_senders: Vec<SenderCount>,
}

impl Summary {
    pub fn from_outcome(outcome: &SortOutcome, top: usize) -> Self {
        Self {
            attempted: outcome.attempted,
            succeeded: outcome.succeeded,
            failed: outcome.failed(),
            buckets: outcome.buckets.len(),
            undated: outcome.messages.iter().filter(|m| m.is_undated()).count(),
            date_range: date_range(&outcome.messages),
            top_senders: top_senders(&outcome.messages, top),
        }
    }
}

/// The `n` most frequent senders, most frequent first.
///
/// Senders are keyed by lowercased address; messages without a sender, or
/// whose sender is not a `local@domain` address, are not counted. Equal counts are ordered by address.
pub fn top_senders(messages: &[Message], n: usize) -> Vec<SenderCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for msg in messages {
        if let Some(sender) = msg.sender.as_ref().filter(|s| s.is_valid()) {
            *counts.entry(sender.normalized()).or_default() += 1;
        }
    }

    let mut sorted: Vec<SenderCount> = counts
        .into_iter()
        .map(|(address, count)| SenderCount { address, count })
        .collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));
    sorted.truncate(n);
    sorted
}

/// Oldest and newest message date, ignoring undated messages.
pub fn date_range(messages: &[Message]) -> Option<DateRange> {
    let mut dates = messages.iter().filter_map(|m| m.date);
    let first = dates.next()?;
    let (oldest, newest) = dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
    Some(DateRange { oldest, newest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::EmailAddress;
    use crate::model::message::Headers;
    use chrono::TimeZone;

    fn msg(sender: Option<&str>, day: Option<u32>) -> Message {
        Message {
            source_offset: 0,
            sequence: 0,
            size: 0,
            headers: Headers::default(),
            subject: String::new(),
            from: None,
            to: Vec::new(),
            sender: sender.map(EmailAddress::parse),
            date: day.map(|d| Utc.with_ymd_and_hms(2024, 3, d, 8, 0, 0).unwrap()),
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            body_parts: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_top_senders_counts_case_insensitively() {
        let messages = vec![
            msg(Some("Ana <ANA@example.org>"), None),
            msg(Some("ana@example.org"), None),
            msg(Some("bob@example.org"), None),
            msg(Some("carl@example.org"), None),
            msg(Some("undisclosed-recipients"), None),
            msg(Some("undisclosed-recipients"), None),
            msg(Some("undisclosed-recipients"), None),
            msg(None, None),
        ];
        let top = top_senders(&messages, 2);
        assert_eq!(
            top,
            vec![
                SenderCount {
                    address: "ana@example.org".into(),
                    count: 2
                },
                SenderCount {
                    address: "bob@example.org".into(),
                    count: 1
                },
            ]
        );
        assert!(top_senders(&[], 10).is_empty());
    }

    #[test]
    fn test_date_range_skips_undated() {
        let messages = vec![msg(None, Some(9)), msg(None, None), msg(None, Some(2))];
        let range = date_range(&messages).unwrap();
        assert_eq!(range.oldest.format("%d").to_string(), "02");
        assert_eq!(range.newest.format("%d").to_string(), "09");
        assert_eq!(date_range(&[msg(None, None)]), None);
    }

    #[test]
    fn test_summary_serializes() {
        let outcome = SortOutcome {
            messages: vec![msg(Some("a@b.c"), Some(1))],
            attempted: 2,
            succeeded: 1,
            ..SortOutcome::default()
        };
        let summary = Summary::from_outcome(&outcome, DEFAULT_TOP_SENDERS);
        assert_eq!(summary.failed, 1);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["top_senders"][0]["address"], "a@b.c");
        assert_eq!(json["attempted"], 2);
    }
}
