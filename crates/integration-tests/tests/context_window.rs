mod harness;

use harness::config::ConfigBuilder;
use harness::gateway::{Gateway, collect, content};
use switchyard_config::ModelConfig;
use switchyard_llm::{LlmError, Message, PreparedParams, PromptRequest, Role};

fn echo_gateway() -> Gateway {
    let config = ConfigBuilder::new()
        .with_echo_provider("echo")
        .with_model_config(
            "small",
            ModelConfig {
                provider: "echo".to_owned(),
                context_tokens: Some(64),
                completion_tokens: Some(16),
                ..ModelConfig::default()
            },
        )
        .with_model("roomy", "echo")
        .build();
    Gateway::start(&config)
}

fn history() -> Vec<Message> {
    (0..40)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!("question number {i} about the harbour schedule"))
            } else {
                Message::assistant(format!("answer number {i} with the departure times"))
            }
        })
        .collect()
}

#[tokio::test]
async fn window_keeps_newest_turns_within_model_limits() {
    let gateway = echo_gateway();
    let history = history();

    let window = gateway
        .inference
        .build_context_window("small", "You are a harbour master.", &history, 10_000, 1_000)
        .unwrap();

    assert_eq!(window.output_budget, 16);
    assert_eq!(window.input_budget, 48);
    assert_eq!(window.messages[0].role, Role::System);
    assert!(window.messages.len() > 1);
    assert!(window.dropped > 0);
    assert!(window.used_tokens < 48);
    assert_eq!(window.messages.last(), history.last());
}

#[tokio::test]
async fn exhausted_budget_still_sends_system_prompt() {
    let gateway = echo_gateway();

    let window = gateway
        .inference
        .build_context_window("roomy", "You are a harbour master.", &history(), 0, 100)
        .unwrap();

    assert!(window.budget_exhausted);
    assert_eq!(window.messages.len(), 1);
    assert_eq!(window.messages[0].text(), "You are a harbour master.");
}

#[tokio::test]
async fn windowed_history_can_be_prompted() {
    let gateway = echo_gateway();
    let window = gateway
        .inference
        .build_context_window("roomy", "Be brief.", &history(), 40, 10)
        .unwrap();

    let mut messages = window.messages;
    messages.push(Message::user("and the last ferry?"));
    let request = PromptRequest {
        params: PreparedParams::new("roomy", messages),
        ..PromptRequest::default()
    };

    let result = gateway.inference.prompt(request.clone()).await.unwrap();
    assert_eq!(result.content, "and the last ferry?");

    let events = collect(gateway.inference.prompt_stream(request)).await;
    assert_eq!(content(&events), "and the last ferry?");
}

#[tokio::test]
async fn unknown_model_window_is_rejected() {
    let err = echo_gateway()
        .inference
        .build_context_window("mystery", "", &history(), 100, 10)
        .unwrap_err();

    assert!(matches!(err, LlmError::Validation(_)));
}
