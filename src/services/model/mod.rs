// src/services/model/mod.rs
pub mod exclusive;
pub mod qwen;
pub mod template;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Turn;

pub use qwen::QwenChatModel;

/// Sampling constants. Not configurable per request.
pub const MAX_NEW_TOKENS: usize = 256;
pub const TEMPERATURE: f64 = 0.7;
pub const TOP_P: f64 = 0.9;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load model: {0}")]
    Load(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

/// Text generation over a role-tagged conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, turns: &[Turn]) -> Result<String, ModelError>;
}
