//! Working Memory for the Control Loop
//!
//! Short-term notes for the current goal (planner replies, execution summaries,
//! cancellations) plus a small episodic history of finished goals. Short-term
//! notes are trimmed oldest-first when they approach the context limit; the goal
//! and the execution-state map are pinned and never trimmed.

use sdk::TaskResult;
use std::collections::BTreeMap;

use crate::llm::{Message, MessageRole};

/// Default context limit in tokens
const DEFAULT_CONTEXT_LIMIT: usize = 4000;

/// Average characters per token (rough estimate: 1 token ≈ 4 characters)
const CHARS_PER_TOKEN: usize = 4;

/// Most recent notes that survive trimming regardless of size
const MIN_KEPT_NOTES: usize = 2;

/// Finished goals remembered for the long-term summary
const MAX_EPISODES: usize = 50;

/// Episodes rendered into the long-term summary
const SUMMARY_EPISODES: usize = 5;

/// Characters of result content kept per episode
const EPISODE_SNIPPET_CHARS: usize = 120;

/// The loop's view of memory
pub trait ContextStore: Send {
    /// Drop every short-term note (goal and execution state included)
    fn clear_short_term(&mut self);

    fn set_goal(&mut self, goal: &str);

    fn add_short_term(&mut self, role: MessageRole, text: &str);

    /// Upsert a pinned key/value (last action, last status, ...)
    fn update_execution_state(&mut self, key: &str, value: &str);

    /// Pinned context followed by the surviving notes, oldest first
    fn short_term(&self) -> Vec<Message>;

    /// Deterministic digest of previous goals
    fn long_term_summary(&self) -> String;

    fn add_episode(&mut self, goal: &str, result: &TaskResult);
}

#[derive(Debug, Clone)]
struct Episode {
    goal: String,
    status: String,
    detail: String,
}

/// In-process [`ContextStore`]
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    goal: Option<String>,
    execution_state: BTreeMap<String, String>,
    notes: Vec<Message>,
    episodes: Vec<Episode>,
    context_limit: usize,
    token_count: usize,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_CONTEXT_LIMIT)
    }

    pub fn with_limit(context_limit: usize) -> Self {
        Self {
            goal: None,
            execution_state: BTreeMap::new(),
            notes: Vec::new(),
            episodes: Vec::new(),
            context_limit,
            token_count: 0,
        }
    }

    /// Estimated tokens of everything `short_term()` returns
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    fn pinned_messages(&self) -> Vec<Message> {
        let mut pinned = Vec::new();
        if let Some(goal) = &self.goal {
            pinned.push(Message::system(format!("Goal: {}", goal)));
        }
        if !self.execution_state.is_empty() {
            let state: Vec<String> = self
                .execution_state
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect();
            pinned.push(Message::system(format!(
                "Execution state:\n{}",
                state.join("\n")
            )));
        }
        pinned
    }

    fn recount(&mut self) {
        let pinned: usize = self.pinned_messages().iter().map(Self::estimate_tokens).sum();
        let notes: usize = self.notes.iter().map(Self::estimate_tokens).sum();
        self.token_count = pinned + notes;
    }

    /// Remove the oldest notes until under the limit, keeping the most recent ones
    fn trim_notes(&mut self) {
        while self.token_count > self.context_limit && self.notes.len() > MIN_KEPT_NOTES {
            let removed = self.notes.remove(0);
            self.token_count = self
                .token_count
                .saturating_sub(Self::estimate_tokens(&removed));
        }
    }

    /// Rough estimate based on character count plus per-message overhead
    fn estimate_tokens(message: &Message) -> usize {
        let overhead = 10;
        message.content.len().div_ceil(CHARS_PER_TOKEN) + overhead
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore for WorkingMemory {
    fn clear_short_term(&mut self) {
        self.goal = None;
        self.execution_state.clear();
        self.notes.clear();
        self.token_count = 0;
    }

    fn set_goal(&mut self, goal: &str) {
        self.goal = Some(goal.to_string());
        self.recount();
        self.trim_notes();
    }

    fn add_short_term(&mut self, role: MessageRole, text: &str) {
        let message = Message {
            role,
            content: text.to_string(),
        };
        self.token_count += Self::estimate_tokens(&message);
        self.notes.push(message);

        if self.token_count > self.context_limit {
            self.trim_notes();
        }
    }

    fn update_execution_state(&mut self, key: &str, value: &str) {
        self.execution_state
            .insert(key.to_string(), value.to_string());
        self.recount();
        self.trim_notes();
    }

    fn short_term(&self) -> Vec<Message> {
        let mut messages = self.pinned_messages();
        messages.extend(self.notes.iter().cloned());
        messages
    }

    fn long_term_summary(&self) -> String {
        if self.episodes.is_empty() {
            return "No previous goals.".to_string();
        }

        let start = self.episodes.len().saturating_sub(SUMMARY_EPISODES);
        let lines: Vec<String> = self.episodes[start..]
            .iter()
            .map(|e| {
                if e.detail.is_empty() {
                    format!("- [{}] {}", e.status, e.goal)
                } else {
                    format!("- [{}] {}: {}", e.status, e.goal, e.detail)
                }
            })
            .collect();

        format!(
            "{} previous goal(s), most recent last:\n{}",
            self.episodes.len(),
            lines.join("\n")
        )
    }

    fn add_episode(&mut self, goal: &str, result: &TaskResult) {
        let source = if result.is_failed() {
            result.error()
        } else {
            result.content()
        };
        let detail: String = source
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(EPISODE_SNIPPET_CHARS)
            .collect();

        self.episodes.push(Episode {
            goal: goal.to_string(),
            status: result.status().to_string(),
            detail,
        });

        if self.episodes.len() > MAX_EPISODES {
            let excess = self.episodes.len() - MAX_EPISODES;
            self.episodes.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_working_memory() {
        let memory = WorkingMemory::new();
        assert!(memory.short_term().is_empty());
        assert_eq!(memory.token_count(), 0);
        assert_eq!(memory.context_limit(), DEFAULT_CONTEXT_LIMIT);
    }

    #[test]
    fn test_goal_and_state_are_pinned_first() {
        let mut memory = WorkingMemory::new();
        memory.add_short_term(MessageRole::Assistant, "planned");
        memory.set_goal("report system stats");
        memory.update_execution_state("last_status", "success");

        let messages = memory.short_term();
        assert_eq!(messages[0].content, "Goal: report system stats");
        assert!(messages[1].content.contains("last_status: success"));
        assert_eq!(messages[2].content, "planned");
    }

    #[test]
    fn test_execution_state_upserts() {
        let mut memory = WorkingMemory::new();
        memory.update_execution_state("last_action", "a");
        memory.update_execution_state("last_action", "b");
        let messages = memory.short_term();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("last_action: b"));
    }

    #[test]
    fn test_trimming_keeps_goal_and_recent_notes() {
        let mut memory = WorkingMemory::with_limit(100);
        memory.set_goal("the goal");

        for i in 0..20 {
            memory.add_short_term(MessageRole::User, &format!("Note {}", i));
        }

        let messages = memory.short_term();
        assert_eq!(messages[0].content, "Goal: the goal");
        assert!(messages.last().unwrap().content.contains("Note 19"));
        assert!(memory.token_count() <= memory.context_limit());
    }

    #[test]
    fn test_trimming_never_drops_last_notes() {
        let mut memory = WorkingMemory::with_limit(10);
        let long = "x".repeat(400);
        memory.add_short_term(MessageRole::User, &long);
        memory.add_short_term(MessageRole::User, &long);
        memory.add_short_term(MessageRole::User, &long);
        assert_eq!(memory.short_term().len(), MIN_KEPT_NOTES);
    }

    #[test]
    fn test_clear_short_term_keeps_episodes() {
        let mut memory = WorkingMemory::new();
        memory.set_goal("g");
        memory.add_short_term(MessageRole::User, "n");
        memory.add_episode("g", &TaskResult::failure("boom"));

        memory.clear_short_term();
        assert!(memory.short_term().is_empty());
        assert_eq!(memory.token_count(), 0);
        assert!(memory.long_term_summary().contains("[failed] g: boom"));
    }

    #[test]
    fn test_long_term_summary_is_deterministic_and_bounded() {
        let mut memory = WorkingMemory::new();
        assert_eq!(memory.long_term_summary(), "No previous goals.");

        for i in 0..8 {
            memory.add_episode(&format!("goal {}", i), &TaskResult::failure("e"));
        }
        let summary = memory.long_term_summary();
        assert_eq!(summary, memory.long_term_summary());
        assert!(summary.starts_with("8 previous goal(s)"));
        assert!(!summary.contains("goal 2"));
        assert!(summary.contains("goal 3"));
        assert!(summary.contains("goal 7"));
    }

    #[test]
    fn test_episode_history_capped() {
        let mut memory = WorkingMemory::new();
        for i in 0..(MAX_EPISODES + 5) {
            memory.add_episode(&format!("g{}", i), &TaskResult::failure("e"));
        }
        assert!(memory
            .long_term_summary()
            .starts_with(&format!("{} previous", MAX_EPISODES)));
    }
}
