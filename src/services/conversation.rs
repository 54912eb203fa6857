// src/services/conversation.rs
use serde_json::Value;

use crate::message::{Exchange, Role, Turn};

/// Checks that every history entry is a `[user, assistant]` array of two strings.
pub fn parse_history(raw: &[Value]) -> Result<Vec<Exchange>, String> {
    raw.iter()
        .enumerate()
        .map(|(i, entry)| match entry.as_array().map(Vec::as_slice) {
            Some([Value::String(user), Value::String(assistant)]) => {
                Ok((user.clone(), assistant.clone()))
            }
            Some(items) if items.len() != 2 => Err(format!(
                "history[{i}]: expected 2 values to unpack, got {}",
                items.len()
            )),
            Some(_) => Err(format!("history[{i}]: both values must be strings")),
            None => Err(format!("history[{i}]: expected a [user, assistant] pair, got {entry}")),
        })
        .collect()
}

/// Expands prior exchanges into alternating user/assistant turns and appends
/// the new user message. `n` exchanges always yield `2n + 1` turns.
pub fn build_turns(history: &[Exchange], message: &str) -> Vec<Turn> {
    let mut turns = Vec::with_capacity(history.len() * 2 + 1);
    for (user, assistant) in history {
        turns.push(Turn::new(Role::User, user.as_str()));
        turns.push(Turn::new(Role::Assistant, assistant.as_str()));
    }
    turns.push(Turn::new(Role::User, message));
    turns
}

/// Returns `history` with `(message, response)` appended at the end.
pub fn append_exchange(
    mut history: Vec<Exchange>,
    message: impl Into<String>,
    response: impl Into<String>,
) -> Vec<Exchange> {
    history.push((message.into(), response.into()));
    history
}
