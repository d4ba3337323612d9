use agentfabric::client_wrapper::{ClientWrapper, CompletionRequest, LLMErrorKind};
use agentfabric::clients::common::{send_with_retry, MAX_RETRY_ATTEMPTS};
use agentfabric::clients::mock::MockClient;
use agentfabric::cost::{CostCalculator, ModelPricing, UsageRecord};

#[tokio::test(start_paused = true)]
async fn test_retryable_error_is_retried_until_success() {
    let client = MockClient::new("mock-model")
        .with_error(LLMErrorKind::RateLimit, "slow down")
        .with_error(LLMErrorKind::ServerError, "upstream hiccup")
        .with_response("finally");

    let response = send_with_retry(&client, CompletionRequest::new("mock-model"))
        .await
        .unwrap();
    assert_eq!(response.content, "finally");
    assert_eq!(client.call_count(), 3);
}

#[tokio::test]
async fn test_non_retryable_error_fails_immediately() {
    let client = MockClient::new("mock-model")
        .with_error(LLMErrorKind::Authentication, "bad key")
        .with_response("never reached");

    let err = send_with_retry(&client, CompletionRequest::new("mock-model"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, LLMErrorKind::Authentication);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let mut client = MockClient::new("mock-model");
    for _ in 0..MAX_RETRY_ATTEMPTS + 2 {
        client = client.with_error(LLMErrorKind::ServerError, "still down");
    }

    let err = send_with_retry(&client, CompletionRequest::new("mock-model"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, LLMErrorKind::ServerError);
    assert_eq!(client.call_count(), MAX_RETRY_ATTEMPTS);
}

#[tokio::test]
async fn test_mock_client_reports_usage() {
    let client = MockClient::new("mock-model").with_response("hi");
    let response = client
        .create_completion(CompletionRequest::new("mock-model").with_user("hello"))
        .await
        .unwrap();
    assert_eq!(
        response.usage.total_tokens,
        response.usage.prompt_tokens + response.usage.completion_tokens
    );
}

#[test]
fn test_cost_identity_holds_for_arbitrary_usage() {
    let calc = CostCalculator::new();
    calc.set_pricing("test-model", ModelPricing::new(1.5, 6.0, 0.15));

    let samples = [
        UsageRecord { input_tokens: 0, output_tokens: 0, cached_tokens: 0 },
        UsageRecord { input_tokens: 123, output_tokens: 456, cached_tokens: 789 },
        UsageRecord { input_tokens: 1_000_000, output_tokens: 1, cached_tokens: 0 },
    ];
    for usage in samples.iter() {
        let cost = calc.calculate("test-model", usage);
        let sum = cost.input_cost + cost.output_cost + cost.cached_cost;
        assert!((cost.total_cost - sum).abs() < 1e-12);
        assert!(cost.total_cost >= 0.0);
    }
}
