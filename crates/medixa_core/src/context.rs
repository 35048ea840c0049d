//! crates/medixa_core/src/context.rs
//!
//! Builds the bounded history of prior turns sent to the language model.
//!
//! The full session history is never resent blindly. A [`ContextWindow`]
//! keeps the most recent turns that fit both a turn count and a character
//! budget; the defaults are 20 turns and 24 000 characters.

use crate::domain::{ConversationTurn, Message, TurnRole};

pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_MAX_CHARS: usize = 24_000;

/// Sliding-window policy for conversation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextWindow {
    pub max_turns: usize,
    pub max_chars: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl ContextWindow {
    pub fn new(max_turns: usize, max_chars: usize) -> Self {
        Self {
            max_turns,
            max_chars,
        }
    }

    /// Keeps every turn. Only useful for tests and debugging.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }

    /// Projects `messages` into chronological user/model turns and trims them
    /// to this window.
    ///
    /// The welcome message is skipped. The result never starts with a model
    /// turn, so the first turn the model sees is always something the user said.
    pub fn build(&self, messages: &[Message]) -> Vec<ConversationTurn> {
        let turns: Vec<ConversationTurn> = messages
            .iter()
            .filter(|m| !m.is_welcome())
            .map(ConversationTurn::from_message)
            .collect();

        let mut kept = 0usize;
        let mut chars = 0usize;
        for turn in turns.iter().rev() {
            if kept == self.max_turns {
                break;
            }
            let len = turn.text.chars().count();
            if chars.saturating_add(len) > self.max_chars {
                break;
            }
            chars += len;
            kept += 1;
        }

        let mut window: Vec<ConversationTurn> = turns.into_iter().rev().take(kept).collect();
        window.reverse();

        let first_user = window
            .iter()
            .position(|t| t.role == TurnRole::User)
            .unwrap_or(window.len());
        window.drain(..first_user);
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use chrono::Utc;

    fn conversation(texts: &[&str]) -> Vec<Message> {
        let now = Utc::now();
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let id = MessageId(i.to_string());
                if i % 2 == 0 {
                    Message::user(id, *text, now)
                } else {
                    Message::assistant(id, *text, now)
                }
            })
            .collect()
    }

    #[test]
    fn projects_roles_in_order_and_skips_the_welcome() {
        let mut messages = vec![Message::welcome(Utc::now())];
        messages.extend(conversation(&["I have a headache", "Try resting."]));

        let turns = ContextWindow::unbounded().build(&messages);

        assert_eq!(
            turns,
            vec![
                ConversationTurn {
                    role: TurnRole::User,
                    text: "I have a headache".into()
                },
                ConversationTurn {
                    role: TurnRole::Model,
                    text: "Try resting.".into()
                },
            ]
        );
    }

    #[test]
    fn turn_limit_keeps_the_most_recent_tail() {
        let messages = conversation(&["u1", "m1", "u2", "m2", "u3", "m3"]);

        let turns = ContextWindow::new(4, usize::MAX).build(&messages);

        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["u2", "m2", "u3", "m3"]);
    }

    #[test]
    fn trimmed_window_never_opens_with_a_model_turn() {
        let messages = conversation(&["u1", "m1", "u2", "m2"]);

        let turns = ContextWindow::new(3, usize::MAX).build(&messages);

        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["u2", "m2"]);
    }

    #[test]
    fn character_budget_drops_older_turns() {
        let messages = conversation(&["aaaaaaaaaa", "bbbbbbbbbb", "cc", "dd"]);

        let turns = ContextWindow::new(usize::MAX, 5).build(&messages);

        let texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["cc", "dd"]);
    }

    #[test]
    fn empty_history_builds_empty_context() {
        assert!(ContextWindow::default().build(&[]).is_empty());
    }
}
