//! Classification and sorting of decoded messages into buckets.
//!
//! A [`RuleSet`] is validated from configuration before any archive is
//! read. The [`Classifier`] then assigns every message to one bucket per
//! active rule and orders each bucket with a stable sort.

pub mod sort_key;
pub mod threading;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::config::ClassificationConfig;
use crate::error::{Result, SortError};
use crate::model::bucket::Bucket;
use crate::model::message::Message;

use self::sort_key::SortKey;
use self::threading::{build_threads, normalize_subject};

/// What a sort or grouping rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    Date,
    Sender,
    Subject,
    Thread,
}

impl Criterion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Sender => "sender",
            Self::Subject => "subject",
            Self::Thread => "thread",
        }
    }
}

impl FromStr for Criterion {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "date" => Ok(Self::Date),
            "sender" | "from" => Ok(Self::Sender),
            "subject" => Ok(Self::Subject),
            "thread" => Ok(Self::Thread),
            other => Err(SortError::config(format!(
                "unknown criterion '{other}' (expected date, sender, subject or thread)"
            ))),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Apply the direction to an ascending comparison.
    pub fn apply(self, ord: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

impl FromStr for SortOrder {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(SortError::config(format!(
                "unknown sort order '{other}' (expected asc or desc)"
            ))),
        }
    }
}

/// Size of `date:` buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateGranularity {
    Day,
    #[default]
    Month,
    Year,
}

impl DateGranularity {
    fn format(self) -> &'static str {
        match self {
            Self::Day => "%Y-%m-%d",
            Self::Month => "%Y-%m",
            Self::Year => "%Y",
        }
    }
}

impl FromStr for DateGranularity {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(SortError::config(format!(
                "unknown date granularity '{other}' (expected day, month or year)"
            ))),
        }
    }
}

/// One grouping rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationRule {
    /// `sender:<domain>`, `sender:unknown` without a usable address.
    BySender,
    /// `subject:<keyword>` per contained keyword, `subject:unmatched`
    /// otherwise. Without keywords, `subject:<normalized subject>`.
    BySubject { keywords: Vec<String> },
    /// `date:<period>`, `date:undated` without a usable date.
    ByDate { granularity: DateGranularity },
    /// `thread:<root message id>` or `thread:@<offset>`.
    ByThread,
}

impl ClassificationRule {
    pub fn criterion(&self) -> Criterion {
        match self {
            Self::BySender => Criterion::Sender,
            Self::BySubject { .. } => Criterion::Subject,
            Self::ByDate { .. } => Criterion::Date,
            Self::ByThread => Criterion::Thread,
        }
    }

    /// `true` if the rule needs the whole message set before it can assign
    /// a bucket.
    pub fn requires_full_set(&self) -> bool {
        matches!(self, Self::ByThread)
    }
}

/// Validated grouping rules plus the in-bucket ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub rules: Vec<ClassificationRule>,
    pub sort_by: Criterion,
    pub order: SortOrder,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: vec![ClassificationRule::BySender],
            sort_by: Criterion::Date,
            order: SortOrder::Asc,
        }
    }
}

impl RuleSet {
    /// Validate the string configuration. Any unknown value, an empty or
    /// duplicated `group_by` entry is a [`SortError::Configuration`].
    pub fn from_config(cfg: &ClassificationConfig) -> Result<Self> {
        let sort_by: Criterion = cfg.sort_by.parse()?;
        let order: SortOrder = cfg.sort_order.parse()?;
        let granularity: DateGranularity = cfg.date_granularity.parse()?;

        let mut keywords: Vec<String> = Vec::new();
        for kw in &cfg.subject_keywords {
            let kw = kw.trim().to_lowercase();
            if kw.is_empty() {
                return Err(SortError::config("empty subject keyword"));
            }
            if !keywords.contains(&kw) {
                keywords.push(kw);
            }
        }

        if cfg.group_by.is_empty() {
            return Err(SortError::config("group_by lists no grouping rule"));
        }
        let mut rules: Vec<ClassificationRule> = Vec::new();
        for name in &cfg.group_by {
            let rule = match name.parse::<Criterion>()? {
                Criterion::Sender => ClassificationRule::BySender,
                Criterion::Subject => ClassificationRule::BySubject {
                    keywords: keywords.clone(),
                },
                Criterion::Date => ClassificationRule::ByDate { granularity },
                Criterion::Thread => ClassificationRule::ByThread,
            };
            if rules.iter().any(|r| r.criterion() == rule.criterion()) {
                return Err(SortError::config(format!(
                    "grouping rule '{}' listed twice",
                    rule.criterion()
                )));
            }
            rules.push(rule);
        }

        Ok(Self {
            rules,
            sort_by,
            order,
        })
    }

    /// `true` if thread grouping or thread ordering is requested.
    pub fn needs_threads(&self) -> bool {
        self.sort_by == Criterion::Thread || self.rules.iter().any(|r| r.requires_full_set())
    }
}

/// Assigns messages to buckets and orders each bucket.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: RuleSet,
}

impl Classifier {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// `true` when the full message set must be materialized first.
    pub fn requires_full_set(&self) -> bool {
        self.rules.needs_threads()
    }

    /// Bucket names from the rules that look at one message at a time.
    /// Thread buckets are left to [`Classifier::classify`].
    pub fn assign(&self, message: &Message) -> Vec<String> {
        let mut names = Vec::new();
        for rule in &self.rules.rules {
            match rule {
                ClassificationRule::BySender => {
                    let domain = message.sender.as_ref().and_then(|s| s.domain());
                    names.push(format!("sender:{}", domain.as_deref().unwrap_or("unknown")));
                }
                ClassificationRule::BySubject { keywords } if keywords.is_empty() => {
                    let subject = normalize_subject(&message.subject);
                    if subject.is_empty() {
                        names.push("subject:(empty)".to_string());
                    } else {
                        names.push(format!("subject:{subject}"));
                    }
                }
                ClassificationRule::BySubject { keywords } => {
                    let subject = message.subject.to_lowercase();
                    let before = names.len();
                    names.extend(
                        keywords
                            .iter()
                            .filter(|kw| subject.contains(kw.as_str()))
                            .map(|kw| format!("subject:{kw}")),
                    );
                    if names.len() == before {
                        names.push("subject:unmatched".to_string());
                    }
                }
                ClassificationRule::ByDate { granularity } => match message.date {
                    Some(date) => names.push(format!("date:{}", date.format(granularity.format()))),
                    None => names.push("date:undated".to_string()),
                },
                ClassificationRule::ByThread => {}
            }
        }
        names
    }

    /// Classify the full, archive-ordered message list.
    ///
    /// Every message lands in one bucket per rule (several for multiple
    /// matching subject keywords). Bucket members are indices into
    /// `messages`, sorted stably by the configured key.
    pub fn classify(&self, messages: &[Message]) -> BTreeMap<String, Bucket> {
        let mut thread_ordinal = vec![0usize; messages.len()];
        let mut thread_key: Vec<Option<&str>> = vec![None; messages.len()];
        let threads = if self.requires_full_set() {
            build_threads(messages)
        } else {
            Vec::new()
        };
        for (ordinal, thread) in threads.iter().enumerate() {
            for &idx in &thread.members {
                thread_ordinal[idx] = ordinal;
                thread_key[idx] = Some(thread.key.as_str());
            }
        }
        if !threads.is_empty() {
            debug!(threads = threads.len(), "Built threads");
        }

        let group_threads = self.rules.rules.contains(&ClassificationRule::ByThread);
        let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();
        for (idx, message) in messages.iter().enumerate() {
            let mut names = self.assign(message);
            if group_threads {
                if let Some(key) = thread_key[idx] {
                    names.push(format!("thread:{key}"));
                }
            }
            for name in names {
                buckets
                    .entry(name)
                    .or_insert_with_key(|name| Bucket::new(name.clone()))
                    .members
                    .push(idx);
            }
        }

        let keys: Vec<SortKey> = messages
            .iter()
            .enumerate()
            .map(|(idx, m)| SortKey::for_message(self.rules.sort_by, m, thread_ordinal[idx]))
            .collect();
        let order = self.rules.order;
        for bucket in buckets.values_mut() {
            bucket
                .members
                .sort_by(|&a, &b| keys[a].compare(&keys[b], order));
        }
        buckets
    }
}
