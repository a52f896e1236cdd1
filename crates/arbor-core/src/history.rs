//! Command history, most recent first.

use std::collections::VecDeque;

/// Bounded command history deduplicated against its newest entry.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<String>,
}

impl History {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `text` unless it repeats the newest entry, then trims to
    /// `max_len`.
    ///
    /// Returns `true` when an entry was added.
    pub fn record(&mut self, text: &str, max_len: usize) -> bool {
        let text = text.trim();
        let added = !text.is_empty() && self.entries.front().is_none_or(|newest| newest != text);
        if added {
            self.entries.push_front(text.to_owned());
        }
        self.entries.truncate(max_len);
        added
    }

    /// Empties the history.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, most recent first.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
