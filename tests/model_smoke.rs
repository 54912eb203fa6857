use qwen_chat_server::config::AppConfig;
use qwen_chat_server::message::{Role, Turn};
use qwen_chat_server::services::model::{ChatModel, QwenChatModel};

// Downloads the configured model from the hub on first run.
#[tokio::test]
#[ignore = "needs network access and model weights"]
async fn test_small_model_answers() {
    let mut config = AppConfig::from_env().expect("config");
    config.model.force_cpu = true;

    let model = QwenChatModel::load(&config.model).await.expect("model loads");
    let reply = model
        .generate(&[Turn::new(Role::User, "What is the capital of France?")])
        .await
        .expect("generation succeeds");

    assert!(!reply.trim().is_empty());
    assert!(!reply.contains("<|im_end|>"));
}
