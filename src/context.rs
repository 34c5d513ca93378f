//! Context window assembly.
//!
//! Two bounding policies are supported, selected by configuration. The
//! depth-bounded fetch itself lives in the chat store (newest-first
//! LIMIT query re-sorted ascending); this module holds the policy enum
//! and the token-bounded walk applied to a full history.

use serde::{Deserialize, Serialize};

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextWindowPolicy {
    /// Last N messages in chronological order.
    Depth,
    /// As many trailing messages as fit the token budget.
    Tokens,
}

/// Bound an ascending message history by cumulative token count.
///
/// The newest message is always part of the window — the current
/// prompt must reach the model (and the cache key) even when it alone
/// exceeds the budget. Older messages are then walked newest-backward,
/// accumulating `prompt_tokens + completion_tokens`, and the walk
/// stops before a message would push the running total past
/// `max_tokens`. The result stays in chronological order and always
/// ends with the newest message; the very first turn of a new session
/// is therefore always the entire window.
pub fn bound_by_tokens(messages: Vec<Message>, max_tokens: i64) -> Vec<Message> {
    let mut older = messages.into_iter().rev();
    let Some(newest) = older.next() else {
        return Vec::new();
    };

    let mut total: i64 = newest.prompt_tokens + newest.completion_tokens;
    let mut window: Vec<Message> = vec![newest];

    for message in older {
        let cost = message.prompt_tokens + message.completion_tokens;
        if total + cost > max_tokens {
            break;
        }
        total += cost;
        window.push(message);
    }

    window.reverse();
    window
}
