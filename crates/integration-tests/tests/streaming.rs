mod harness;

use std::time::Duration;

use harness::config::ConfigBuilder;
use harness::gateway::{Gateway, assert_well_formed, collect, content, end_reason, kinds};
use harness::mock_vendor::MockVendor;
use switchyard_llm::{FinishReason, PromptRequest, StreamEvent, ToolDefinition};

fn gateway_for(vendor: &MockVendor) -> Gateway {
    let config = ConfigBuilder::new()
        .with_openai_provider("openai", &vendor.base_url())
        .with_model("gpt-4o", "openai")
        .build();
    Gateway::start(&config)
}

#[tokio::test]
async fn stream_reassembles_content() {
    let vendor = MockVendor::start_with_response("one small step").await.unwrap();
    let gateway = gateway_for(&vendor);

    let events = collect(gateway.inference.prompt_stream(PromptRequest::new("gpt-4o", "Hello"))).await;

    assert_well_formed(&events);
    assert_eq!(events[0].kind(), "requested");
    assert_eq!(content(&events), "one small step ");
    assert_eq!(end_reason(&events), FinishReason::Stop);

    let body = vendor.last_request().unwrap();
    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);
}

#[tokio::test]
async fn stream_end_carries_usage() {
    let vendor = MockVendor::start().await.unwrap();
    let gateway = gateway_for(&vendor);

    let events = collect(gateway.inference.prompt_stream(PromptRequest::new("gpt-4o", "Hello"))).await;

    let Some(StreamEvent::End { usage, .. }) = events.last() else {
        panic!("stream did not end with End");
    };
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].input_tokens, 10);
    assert_eq!(usage[0].output_tokens, 5);
    assert_eq!(gateway.usage_after(1).await["llm:gpt-4o"].records, 1);
}

#[tokio::test]
async fn streamed_tool_calls_arrive_on_end() {
    let vendor = MockVendor::start().await.unwrap();
    let gateway = gateway_for(&vendor);

    let mut request = PromptRequest::new("gpt-4o", "What is the weather?");
    request.params.tools = vec![ToolDefinition {
        name: "get_weather".to_owned(),
        description: Some("Get current weather".to_owned()),
        parameters: Some(serde_json::json!({
            "type": "object",
            "properties": {"location": {"type": "string"}}
        })),
    }];

    let events = collect(gateway.inference.prompt_stream(request)).await;

    assert_well_formed(&events);
    assert!(kinds(&events).contains(&"tool_info"));
    let Some(StreamEvent::End { tools, .. }) = events.last() else {
        panic!("stream did not end with End");
    };
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].id, "call_test_stream");
    assert_eq!(tools[0].arguments_json()["location"], "San Francisco");
}

#[tokio::test]
async fn vendor_failure_is_an_error_event() {
    let vendor = MockVendor::start_failing(1).await.unwrap();
    let gateway = gateway_for(&vendor);

    let events = collect(gateway.inference.prompt_stream(PromptRequest::new("gpt-4o", "Hello"))).await;

    assert_well_formed(&events);
    assert_eq!(kinds(&events), vec!["requested", "error", "end"]);
    assert_eq!(end_reason(&events), FinishReason::Error);
}

#[tokio::test]
async fn pre_cancelled_stream_makes_no_network_call() {
    let vendor = MockVendor::start().await.unwrap();
    let gateway = gateway_for(&vendor);

    let request = PromptRequest::new("gpt-4o", "Hello");
    request.cancel.cancel();
    let events = collect(gateway.inference.prompt_stream(request)).await;

    assert_eq!(kinds(&events), vec!["abort", "end"]);
    assert_eq!(end_reason(&events), FinishReason::Abort);
    assert_eq!(vendor.completion_count(), 0);
}

#[tokio::test]
async fn cancelling_mid_stream_aborts() {
    let vendor = MockVendor::start_slow("a b c d e f g h", Duration::from_millis(100))
        .await
        .unwrap();
    let gateway = gateway_for(&vendor);

    let request = PromptRequest::new("gpt-4o", "Hello");
    let cancel = request.cancel.clone();
    let stream = gateway.inference.prompt_stream(request);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
    });
    let events = collect(stream).await;

    assert_well_formed(&events);
    assert_eq!(end_reason(&events), FinishReason::Abort);
    assert!(content(&events).len() < "a b c d e f g h ".len());
}

#[tokio::test]
async fn listeners_attached_late_see_every_event() {
    let vendor = MockVendor::start().await.unwrap();
    let gateway = gateway_for(&vendor);

    let stream = gateway.inference.prompt_stream(PromptRequest::new("gpt-4o", "Hello"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = collect(stream).await;

    assert_eq!(events[0].kind(), "requested");
    assert_well_formed(&events);
}
