// src/state.rs
use std::sync::Arc;

use crate::services::model::ChatModel;

pub type SharedState = Arc<AppState>;

/// What `GET /` answers with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Landing {
    ChatPage,
    Liveness,
}

pub struct AppState {
    pub model: Arc<dyn ChatModel>,
    pub landing: Landing,
}

impl AppState {
    pub fn new(model: Arc<dyn ChatModel>, landing: Landing) -> Self {
        Self { model, landing }
    }
}
