use qwen_chat_server::message::{ChatResponse, Role, Turn};
use qwen_chat_server::routes::create_router;
use qwen_chat_server::services::model::{ChatModel, ModelError};
use qwen_chat_server::state::{AppState, Landing};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;

#[derive(Clone, Copy)]
enum Behaviour {
    Reply,
    Fail,
    Unavailable,
}

/// Records every conversation it is asked to continue.
struct RecordingModel {
    behaviour: Behaviour,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl RecordingModel {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self { behaviour, calls: Mutex::new(Vec::new()) })
    }

    fn calls(&self) -> Vec<Vec<Turn>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for RecordingModel {
    fn model_id(&self) -> &str {
        "test/recording"
    }

    async fn generate(&self, turns: &[Turn]) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(turns.to_vec());
        match self.behaviour {
            Behaviour::Reply => Ok(format!("reply #{}", turns.len())),
            Behaviour::Fail => Err(ModelError::Tokenizer("CUDA out of memory".into())),
            Behaviour::Unavailable => Err(ModelError::Unavailable("worker panicked".into())),
        }
    }
}

fn app(model: Arc<RecordingModel>, landing: Landing) -> Router {
    let state = Arc::new(AppState::new(model, landing));
    create_router().with_state(state)
}

fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat/")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_single_turn_chat() {
    let model = RecordingModel::new(Behaviour::Reply);
    let app = app(model.clone(), Landing::ChatPage);

    let response = app
        .oneshot(chat_request(r#"{"message": "Hi", "history": []}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let chat: ChatResponse = serde_json::from_slice(&bytes).unwrap();

    assert!(!chat.response.is_empty());
    assert_eq!(chat.history, vec![("Hi".to_string(), chat.response.clone())]);

    let calls = model.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec![Turn::new(Role::User, "Hi")]);
}

#[tokio::test]
async fn test_history_is_optional() {
    let model = RecordingModel::new(Behaviour::Reply);
    let app = app(model.clone(), Landing::ChatPage);

    let response = app
        .oneshot(chat_request(r#"{"message": "Hello"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["history"], serde_json::json!([["Hello", "reply #1"]]));
}

#[tokio::test]
async fn test_history_expands_to_alternating_turns() {
    let model = RecordingModel::new(Behaviour::Reply);
    let app = app(model.clone(), Landing::ChatPage);

    let body = r#"{
        "message": "And Spain?",
        "history": [
            ["Capital of France?", "Paris."],
            ["And Italy?", "Rome."],
            ["And Germany?", "Berlin."]
        ]
    }"#;
    let response = app.oneshot(chat_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = model.calls();
    let turns = &calls[0];
    assert_eq!(turns.len(), 2 * 3 + 1);
    for (i, turn) in turns.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected, "turn {i}");
    }
    assert_eq!(turns[1].content, "Paris.");
    assert_eq!(turns.last().unwrap(), &Turn::new(Role::User, "And Spain?"));

    let body = json_body(response).await;
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0], serde_json::json!(["Capital of France?", "Paris."]));
    assert_eq!(
        history[3],
        serde_json::json!(["And Spain?", body["response"].as_str().unwrap()])
    );
}

#[tokio::test]
async fn test_trailing_slash_optional() {
    let model = RecordingModel::new(Behaviour::Reply);
    let app = app(model.clone(), Landing::ChatPage);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"message": "hello"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_history_is_500() {
    let model = RecordingModel::new(Behaviour::Reply);
    let app = app(model.clone(), Landing::ChatPage);

    for body in [
        r#"{"message": "Hi", "history": [["only one"]]}"#,
        r#"{"message": "Hi", "history": [["a", "b"], ["a", "b", "c"]]}"#,
        r#"{"message": "Hi", "history": [["a", 2]]}"#,
        r#"{"message": "Hi", "history": ["ab"]}"#,
    ] {
        let response = app.clone().oneshot(chat_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "body: {body}");
        let json = json_body(response).await;
        assert!(
            json["detail"].as_str().is_some_and(|d| d.contains("history[")),
            "body: {body}, detail: {}",
            json["detail"]
        );
    }

    assert!(model.calls().is_empty(), "model must not see malformed history");
}

#[tokio::test]
async fn test_unparsable_body_is_400() {
    let model = RecordingModel::new(Behaviour::Reply);
    let app = app(model.clone(), Landing::ChatPage);

    for body in [r#"{"history": []}"#, "not json", r#"{"message": 5}"#] {
        let response = app.clone().oneshot(chat_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        let json = json_body(response).await;
        assert!(json["detail"].as_str().is_some_and(|d| !d.is_empty()));
    }

    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_500_with_detail() {
    let model = RecordingModel::new(Behaviour::Fail);
    let app = app(model, Landing::ChatPage);

    let response = app
        .oneshot(chat_request(r#"{"message": "Hi", "history": []}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = json_body(response).await;
    assert!(json["detail"].as_str().unwrap().contains("CUDA out of memory"));
}

#[tokio::test]
async fn test_unavailable_model_is_503() {
    let model = RecordingModel::new(Behaviour::Unavailable);
    let app = app(model, Landing::ChatPage);

    let response = app
        .oneshot(chat_request(r#"{"message": "Hi"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(json_body(response).await["detail"].is_string());
}

#[tokio::test]
async fn test_index_serves_chat_page() {
    let app = app(RecordingModel::new(Behaviour::Fail), Landing::ChatPage);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/chat/"));
}

#[tokio::test]
async fn test_index_liveness_variant() {
    let app = app(RecordingModel::new(Behaviour::Fail), Landing::Liveness);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["message"], "test/recording chat service is running");
}

#[tokio::test]
async fn test_health() {
    let app = app(RecordingModel::new(Behaviour::Fail), Landing::Liveness);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_is_open() {
    let app = app(RecordingModel::new(Behaviour::Reply), Landing::ChatPage);

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/chat/")
                .header(header::ORIGIN, "http://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://example.com");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
}
