use agentfabric::agents::react::ReactAgent;
use agentfabric::client_wrapper::{
    ClientWrapper, CompletionRequest, CompletionResponse, FinishReason, LLMError,
    StructuredResponse, ToolCallRequest, Usage,
};
use agentfabric::tool_protocol::ToolRegistry;
use agentfabric::tools::CalculatorTool;
use agentfabric::AgentDef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

// Requests one calculator call, verifies the observation came back, then
// answers.
struct ToolCallingMockClient {
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ToolCallingMockClient {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ClientWrapper for ToolCallingMockClient {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let mut calls = self.calls.lock().await;
        calls.push(request.clone());

        if calls.len() == 1 {
            // The tool definitions must have been offered to the model.
            let tools = request.tools.as_ref().expect("tools should be attached");
            assert!(tools.iter().any(|t| t.name == "calculator"));
            return Ok(CompletionResponse {
                content: "Thought: I should compute this.\nAction: calculator".to_string(),
                finish_reason: FinishReason::ToolCalls,
                tool_calls: vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "calculator".to_string(),
                    arguments: serde_json::json!({"expression": "6 * 7"}),
                }],
                usage: Usage::new(50, 20),
            });
        }

        // Second round: the observation must be in the transcript.
        let transcript: Vec<String> = request
            .messages
            .iter()
            .map(|m| m.content.to_string())
            .collect();
        assert!(
            transcript.iter().any(|m| m.contains("42")),
            "observation with the tool result should be present: {:?}",
            transcript
        );
        Ok(CompletionResponse {
            content: "The answer is 42.".to_string(),
            finish_reason: FinishReason::Stop,
            tool_calls: vec![],
            usage: Usage::new(80, 10),
        })
    }

    async fn create_structured(
        &self,
        _request: CompletionRequest,
        _response_schema: serde_json::Value,
        _strict_schema: bool,
    ) -> Result<StructuredResponse, LLMError> {
        unreachable!("react never requests structured output")
    }

    fn model_name(&self) -> &str {
        "tool-mock"
    }
}

async fn react_agent(client: Arc<dyn ClientWrapper>) -> ReactAgent {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register_protocol(Arc::new(CalculatorTool::new()))
        .await
        .unwrap();
    let def = AgentDef::new("solver", "react")
        .with_model("tool-mock")
        .with_prompt("You are a precise problem solver.")
        .with_input("questions")
        .with_output("answers");
    ReactAgent::from_def(&def, client, registry).unwrap()
}

#[tokio::test]
async fn test_tool_loop_round_trip() {
    let client = Arc::new(ToolCallingMockClient::new());
    let agent = react_agent(client.clone()).await;

    let answer = agent.reason("What is 6 * 7?").await.unwrap();
    assert_eq!(answer, "The answer is 42.");
    assert_eq!(client.calls.lock().await.len(), 2);
}

// Always requests another tool call; the loop must give up at its
// iteration bound.
struct EndlessToolClient {
    calls: Mutex<usize>,
}

#[async_trait]
impl ClientWrapper for EndlessToolClient {
    async fn create_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        *self.calls.lock().await += 1;
        Ok(CompletionResponse {
            content: "Thought: one more check.".to_string(),
            finish_reason: FinishReason::ToolCalls,
            tool_calls: vec![ToolCallRequest {
                id: "call_n".to_string(),
                name: "calculator".to_string(),
                arguments: serde_json::json!({"expression": "1 + 1"}),
            }],
            usage: Usage::new(10, 10),
        })
    }

    async fn create_structured(
        &self,
        _request: CompletionRequest,
        _response_schema: serde_json::Value,
        _strict_schema: bool,
    ) -> Result<StructuredResponse, LLMError> {
        unreachable!()
    }

    fn model_name(&self) -> &str {
        "endless-mock"
    }
}

#[tokio::test]
async fn test_loop_is_bounded() {
    let client = Arc::new(EndlessToolClient {
        calls: Mutex::new(0),
    });
    let agent = react_agent(client.clone()).await;

    // 20 tokens per iteration stays under the 4000 budget, so the
    // iteration bound is what stops the loop.
    let result = agent.reason("never ends").await;
    assert!(result.is_err());
    assert_eq!(*client.calls.lock().await, 10);
}

// Burns through the token budget quickly; the loop must stop early and
// return the last content rather than erroring.
struct ExpensiveToolClient;

#[async_trait]
impl ClientWrapper for ExpensiveToolClient {
    async fn create_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        Ok(CompletionResponse {
            content: "Thought: working on it.".to_string(),
            finish_reason: FinishReason::ToolCalls,
            tool_calls: vec![ToolCallRequest {
                id: "call_x".to_string(),
                name: "calculator".to_string(),
                arguments: serde_json::json!({"expression": "2 + 2"}),
            }],
            usage: Usage::new(3000, 2000),
        })
    }

    async fn create_structured(
        &self,
        _request: CompletionRequest,
        _response_schema: serde_json::Value,
        _strict_schema: bool,
    ) -> Result<StructuredResponse, LLMError> {
        unreachable!()
    }

    fn model_name(&self) -> &str {
        "expensive-mock"
    }
}

#[tokio::test]
async fn test_token_budget_stops_the_loop() {
    let agent = react_agent(Arc::new(ExpensiveToolClient)).await;
    let answer = agent.reason("pricey question").await.unwrap();
    assert_eq!(answer, "Thought: working on it.");
}

#[tokio::test]
async fn test_failed_tool_becomes_observation() {
    // The first response requests a bogus expression; the calculator
    // reports failure, which flows back as an observation instead of
    // aborting the loop.
    struct BadExpressionClient {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ClientWrapper for BadExpressionClient {
        async fn create_completion(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LLMError> {
            let mut calls = self.calls.lock().await;
            *calls += 1;
            if *calls == 1 {
                return Ok(CompletionResponse {
                    content: String::new(),
                    finish_reason: FinishReason::ToolCalls,
                    tool_calls: vec![ToolCallRequest {
                        id: "call_bad".to_string(),
                        name: "calculator".to_string(),
                        arguments: serde_json::json!({"expression": "2 +"}),
                    }],
                    usage: Usage::new(10, 5),
                });
            }
            let transcript: Vec<String> = request
                .messages
                .iter()
                .map(|m| m.content.to_string())
                .collect();
            assert!(transcript.iter().any(|m| m.contains("error")));
            Ok(CompletionResponse {
                content: "I could not compute that.".to_string(),
                finish_reason: FinishReason::Stop,
                tool_calls: vec![],
                usage: Usage::new(10, 5),
            })
        }

        async fn create_structured(
            &self,
            _request: CompletionRequest,
            _response_schema: serde_json::Value,
            _strict_schema: bool,
        ) -> Result<StructuredResponse, LLMError> {
            unreachable!()
        }

        fn model_name(&self) -> &str {
            "bad-expression-mock"
        }
    }

    let agent = react_agent(Arc::new(BadExpressionClient {
        calls: Mutex::new(0),
    }))
    .await;
    let answer = agent.reason("impossible math").await.unwrap();
    assert_eq!(answer, "I could not compute that.");
}
