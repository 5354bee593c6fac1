//! Named output groups of classified messages.

/// A named grouping of messages.
///
/// Buckets do not own messages: `members` are indices into the message list
/// of the [`crate::pipeline::SortOutcome`] they belong to, already in sorted
/// order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Bucket {
    /// Full bucket name, e.g. `sender:example.org` or `date:2024-01`.
    pub name: String,
    /// Message indices in output order.
    pub members: Vec<usize>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The rule prefix of the name (`sender`, `subject`, `date`, `thread`).
    pub fn rule(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(r, _)| r)
    }

    /// The name without its rule prefix.
    pub fn label(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(_, l)| l)
    }
}
