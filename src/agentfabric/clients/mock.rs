//! Deterministic scripted client for tests and offline wiring.
//!
//! A [`MockClient`] replays a queue of scripted outcomes in order and falls
//! back to a fixed default response once the script is exhausted.  Every
//! request is recorded so tests can assert on the prompts that were sent.
//!
//! # Example
//!
//! ```rust
//! use agentfabric::client_wrapper::{ClientWrapper, CompletionRequest};
//! use agentfabric::clients::mock::MockClient;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = MockClient::new("mock-model")
//!     .with_response("first")
//!     .with_response("second");
//!
//! let a = client.create_completion(CompletionRequest::new("mock-model")).await.unwrap();
//! let b = client.create_completion(CompletionRequest::new("mock-model")).await.unwrap();
//! assert_eq!(a.content, "first");
//! assert_eq!(b.content, "second");
//! assert_eq!(client.call_count(), 2);
//! # }
//! ```

use crate::agentfabric::client_wrapper::{
    ClientWrapper, CompletionRequest, CompletionResponse, FinishReason, LLMError, LLMErrorKind,
    StructuredResponse, Usage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A scripted, deterministic [`ClientWrapper`] implementation.
pub struct MockClient {
    model: String,
    script: Mutex<VecDeque<Result<String, LLMError>>>,
    default_response: String,
    usage_per_call: Usage,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
            default_response: String::from("{}"),
            usage_per_call: Usage::new(10, 20),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue one scripted response.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(content.into()));
        self
    }

    /// Queue several scripted responses at once.
    pub fn with_responses<I, S>(self, contents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut script = self.script.lock().unwrap();
            for content in contents {
                script.push_back(Ok(content.into()));
            }
        }
        self
    }

    /// Queue a scripted failure.
    pub fn with_error(self, kind: LLMErrorKind, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(LLMError::new(kind, message)));
        self
    }

    /// Response returned once the script runs dry (default `"{}"`).
    pub fn with_default_response(mut self, content: impl Into<String>) -> Self {
        self.default_response = content.into();
        self
    }

    /// Token usage reported on every successful call.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage_per_call = usage;
        self
    }

    /// Number of completion/structured calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Copy of every request received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_content(&self, request: &CompletionRequest) -> Result<String, LLMError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.default_response.clone()),
        }
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let content = self.next_content(&request)?;
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            tool_calls: vec![],
            usage: self.usage_per_call.clone(),
        })
    }

    async fn create_structured(
        &self,
        request: CompletionRequest,
        _response_schema: serde_json::Value,
        _strict_schema: bool,
    ) -> Result<StructuredResponse, LLMError> {
        let content = self.next_content(&request)?;
        let data = serde_json::from_str(&content).map_err(|e| {
            LLMError::new(
                LLMErrorKind::InvalidRequest,
                format!("scripted response is not valid JSON: {}", e),
            )
        })?;
        Ok(StructuredResponse {
            data,
            completion: CompletionResponse {
                content,
                finish_reason: FinishReason::Stop,
                tool_calls: vec![],
                usage: self.usage_per_call.clone(),
            },
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let client = MockClient::new("m")
            .with_response("scripted")
            .with_default_response("fallback");

        let first = client
            .create_completion(CompletionRequest::new("m"))
            .await
            .unwrap();
        let second = client
            .create_completion(CompletionRequest::new("m"))
            .await
            .unwrap();
        assert_eq!(first.content, "scripted");
        assert_eq!(second.content, "fallback");
    }

    #[tokio::test]
    async fn test_scripted_error_surfaces() {
        let client = MockClient::new("m").with_error(LLMErrorKind::RateLimit, "slow down");
        let err = client
            .create_completion(CompletionRequest::new("m"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, LLMErrorKind::RateLimit);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_structured_parses_json() {
        let client = MockClient::new("m").with_response(r#"{"answer": 42}"#);
        let response = client
            .create_structured(
                CompletionRequest::new("m"),
                serde_json::json!({"type": "object"}),
                true,
            )
            .await
            .unwrap();
        assert_eq!(response.data["answer"], 42);
    }

    #[tokio::test]
    async fn test_requests_are_recorded() {
        let client = MockClient::new("m");
        let request = CompletionRequest::new("m").with_user("what is up");
        client.create_completion(request).await.unwrap();
        let recorded = client.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].messages.len(), 1);
    }
}
