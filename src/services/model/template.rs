// src/services/model/template.rs
// ChatML, as shipped in the Qwen2 tokenizer config.
use crate::message::{Role, Turn};

pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Renders `turns` into a prompt ending with an open assistant turn.
/// A system turn is prepended when the conversation does not start with one.
pub fn render_chatml(turns: &[Turn], system_prompt: &str) -> String {
    let mut prompt = String::new();

    if turns.first().map(|t| t.role) != Some(Role::System) {
        push_turn(&mut prompt, Role::System, system_prompt);
    }
    for turn in turns {
        push_turn(&mut prompt, turn.role, &turn.content);
    }

    prompt.push_str(IM_START);
    prompt.push_str(Role::Assistant.as_str());
    prompt.push('\n');
    prompt
}

fn push_turn(prompt: &mut String, role: Role, content: &str) {
    prompt.push_str(IM_START);
    prompt.push_str(role.as_str());
    prompt.push('\n');
    prompt.push_str(content);
    prompt.push_str(IM_END);
    prompt.push('\n');
}
