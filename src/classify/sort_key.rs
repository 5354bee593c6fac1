//! Per-message sort keys.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::threading::normalize_subject;
use super::{Criterion, SortOrder};
use crate::model::message::Message;

/// A totally ordered value derived from one message for one criterion.
///
/// Missing values (undated, no sender, empty subject) sort after present
/// ones in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Date(Option<DateTime<Utc>>),
    Text(Option<String>),
    Thread {
        ordinal: usize,
        date: Option<DateTime<Utc>>,
    },
}

impl SortKey {
    /// Derive the key. `thread_ordinal` is the message's thread position by
    /// first appearance and is only read for [`Criterion::Thread`].
    pub fn for_message(criterion: Criterion, message: &Message, thread_ordinal: usize) -> Self {
        match criterion {
            Criterion::Date => Self::Date(message.date),
            Criterion::Sender => Self::Text(
                message
                    .sender
                    .as_ref()
                    .map(|s| s.normalized())
                    .filter(|s| !s.is_empty()),
            ),
            Criterion::Subject => {
                Self::Text(Some(normalize_subject(&message.subject)).filter(|s| !s.is_empty()))
            }
            Criterion::Thread => Self::Thread {
                ordinal: thread_ordinal,
                date: message.date,
            },
        }
    }

    /// Compare two keys. `Desc` reverses the comparison of present values
    /// only; equal keys compare `Equal` so a stable sort keeps archive order.
    pub fn compare(&self, other: &Self, order: SortOrder) -> Ordering {
        match (self, other) {
            (Self::Date(a), Self::Date(b)) => missing_last(a, b, order),
            (Self::Text(a), Self::Text(b)) => missing_last(a, b, order),
            (
                Self::Thread {
                    ordinal: oa,
                    date: da,
                },
                Self::Thread {
                    ordinal: ob,
                    date: db,
                },
            ) => order
                .apply(oa.cmp(ob))
                .then_with(|| missing_last(da, db, order)),
            _ => Ordering::Equal,
        }
    }
}

fn missing_last<T: Ord>(a: &Option<T>, b: &Option<T>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => order.apply(a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_dates_ascending_and_descending() {
        let a = SortKey::Date(day(1));
        let b = SortKey::Date(day(2));
        assert_eq!(a.compare(&b, SortOrder::Asc), Ordering::Less);
        assert_eq!(a.compare(&b, SortOrder::Desc), Ordering::Greater);
        assert_eq!(a.compare(&a.clone(), SortOrder::Desc), Ordering::Equal);
    }

    #[test]
    fn test_undated_sorts_last_both_ways() {
        let dated = SortKey::Date(day(5));
        let undated = SortKey::Date(None);
        assert_eq!(undated.compare(&dated, SortOrder::Asc), Ordering::Greater);
        assert_eq!(undated.compare(&dated, SortOrder::Desc), Ordering::Greater);
    }

    #[test]
    fn test_thread_key_orders_by_ordinal_then_date() {
        let a = SortKey::Thread {
            ordinal: 0,
            date: day(9),
        };
        let b = SortKey::Thread {
            ordinal: 1,
            date: day(1),
        };
        let c = SortKey::Thread {
            ordinal: 1,
            date: day(2),
        };
        assert_eq!(a.compare(&b, SortOrder::Asc), Ordering::Less);
        assert_eq!(b.compare(&c, SortOrder::Asc), Ordering::Less);
        assert_eq!(b.compare(&c, SortOrder::Desc), Ordering::Greater);
    }
}
