//! Bounded in-memory conversation history.
//!
//! Holds the most recent exchanges handed to the generation stage for
//! continuity. Never persisted; trimmed from the front when the window
//! fills, and drained entirely under memory pressure.

use std::collections::VecDeque;

/// One completed user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// A sliding window over recent exchanges.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Exchange>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(limit.min(32)),
            limit: limit.max(1),
        }
    }

    /// Record a completed exchange, evicting the oldest if full.
    pub fn push(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.turns.len() >= self.limit {
            self.turns.pop_front();
        }
        self.turns.push_back(Exchange {
            user: user.into(),
            assistant: assistant.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop everything. The resource monitor's cleanup action calls this
    /// when a memory threshold is crossed.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.turns.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_iterate() {
        let mut history = ConversationHistory::new(5);
        history.push("tell me a story", "once upon a time...");
        history.push("what happened next", "the dragon appeared");

        assert_eq!(history.len(), 2);
        let turns: Vec<_> = history.iter().collect();
        assert_eq!(turns[0].user, "tell me a story");
        assert_eq!(turns[1].assistant, "the dragon appeared");
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut history = ConversationHistory::new(2);
        history.push("one", "1");
        history.push("two", "2");
        history.push("three", "3");

        assert_eq!(history.len(), 2);
        let turns: Vec<_> = history.iter().collect();
        assert_eq!(turns[0].user, "two");
        assert_eq!(turns[1].user, "three");
    }

    #[test]
    fn test_zero_limit_still_holds_one() {
        let mut history = ConversationHistory::new(0);
        history.push("hi", "hello");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::new(5);
        history.push("hi", "hello");
        history.clear();
        assert!(history.is_empty());
    }
}
