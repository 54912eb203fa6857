use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::{Html, IntoResponse, Response},
};
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    error::AppError,
    message::{ChatRequest, ChatResponse},
    services::conversation::{append_exchange, build_turns, parse_history},
    state::{Landing, SharedState},
};

const CHAT_PAGE: &str = include_str!("../../static/index.html");

pub async fn index_handler(State(state): State<SharedState>) -> Response {
    match state.landing {
        Landing::ChatPage => Html(CHAT_PAGE).into_response(),
        Landing::Liveness => Json(json!({
            "message": format!("{} chat service is running", state.model.model_id()),
        }))
        .into_response(),
    }
}

pub async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    // Checked before the model is touched.
    let history = parse_history(&payload.history).map_err(AppError::MalformedHistory)?;

    let span = tracing::info_span!("chat", request_id = %Uuid::new_v4());
    async move {
        tracing::info!(history = history.len(), "User asked: {}", payload.message);

        let turns = build_turns(&history, &payload.message);
        let response = state.model.generate(&turns).await?;

        tracing::info!("Model responded: {}", response);
        let history = append_exchange(history, payload.message, response.clone());

        Ok::<_, AppError>(Json(ChatResponse { response, history }))
    }
    .instrument(span)
    .await
}
