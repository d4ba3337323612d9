//! Shared primitives for provider-agnostic LLM clients.
//!
//! Agents interact with language models exclusively through the
//! [`ClientWrapper`] trait and the lightweight data types defined here.  The
//! trait abstracts over concrete vendor implementations (which live outside
//! this crate and are plugged in at runtime construction) while the
//! supporting structs describe chat messages, structured-schema requests,
//! streaming chunks, and token accounting.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use agentfabric::client_wrapper::{ClientWrapper, CompletionRequest};
//! use agentfabric::clients::mock::MockClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MockClient::new("mock-model").with_response("Hello back");
//!
//! let request = CompletionRequest::new("mock-model")
//!     .with_system("You are concise.")
//!     .with_user("Who are you?");
//!
//! let response = client.create_completion(request).await?;
//! println!("Assistant: {}", response.content);
//! # Ok(())
//! # }
//! ```
//!
//! # Error taxonomy
//!
//! Every provider failure is tagged with an [`LLMErrorKind`]; only
//! `RateLimit`, `ServerError` and `Timeout` are considered retryable (see
//! [`LLMError::is_retryable`] and
//! [`send_with_retry`](crate::agentfabric::clients::common::send_with_retry)).

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// Represents the possible roles for a chat message.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message.
    Assistant,
    /// A tool-result message correlating with a prior assistant
    /// [`ToolCallRequest`] by `call_id`.
    Tool { call_id: String },
}

/// A single tool call returned by the LLM in a native function-calling
/// response.  Providers assign an opaque `id` to each call so that the tool
/// result can be correlated back in a follow-up `Role::Tool` message.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// A generic chat message.  Content is stored as `Arc<str>` so transcripts
/// can be cheaply cloned between retries and agents.
#[derive(Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Arc<str>,
}

impl ChatMessage {
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::System,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::User,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Assistant,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: Arc::from(content.as_ref()),
        }
    }
}

impl fmt::Debug for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatMessage")
            .field("role", &self.role)
            .field("content", &self.content.as_ref())
            .finish()
    }
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Convenience total equal to `prompt_tokens + completion_tokens`.
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
}

/// A full chat completion request.
///
/// Built with the `with_*` methods; defaults are temperature 0.7 and
/// 1024 max tokens.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub tools: Option<Vec<ToolDefinition>>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 1024,
            tools: None,
        }
    }

    pub fn with_system(mut self, content: impl AsRef<str>) -> Self {
        self.messages.push(ChatMessage::system(content));
        self
    }

    pub fn with_user(mut self, content: impl AsRef<str>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// A full chat completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    /// Non-empty only when the provider selected one or more tools.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

/// Response from [`ClientWrapper::create_structured`]: the parsed JSON value
/// conforming to the requested schema plus the underlying completion.
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub data: serde_json::Value,
    pub completion: CompletionResponse,
}

/// Incremental fragment of a native tool call inside a streaming response.
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: usize,
    pub name: Option<String>,
    pub arguments_fragment: String,
}

/// Represents a chunk of content in a streaming response.
#[derive(Clone, Debug)]
pub struct StreamChunk {
    /// The incremental content delta in this chunk.  May be empty for chunks
    /// that only carry a finish reason.
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
}

/// Type alias for a stream of chunks compatible with `Send` executors.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LLMError>> + Send>>;

/// Tagged classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LLMErrorKind {
    Authentication,
    RateLimit,
    InvalidRequest,
    ModelNotFound,
    Timeout,
    ServerError,
    Unknown,
}

impl fmt::Display for LLMErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            LLMErrorKind::Authentication => "authentication",
            LLMErrorKind::RateLimit => "rate_limit",
            LLMErrorKind::InvalidRequest => "invalid_request",
            LLMErrorKind::ModelNotFound => "model_not_found",
            LLMErrorKind::Timeout => "timeout",
            LLMErrorKind::ServerError => "server_error",
            LLMErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", tag)
    }
}

/// A provider error with its taxonomy tag.
#[derive(Debug, Clone)]
pub struct LLMError {
    pub kind: LLMErrorKind,
    pub message: String,
}

impl LLMError {
    pub fn new(kind: LLMErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `rate_limit`, `server_error` and `timeout` are worth retrying; the
    /// rest will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            LLMErrorKind::RateLimit | LLMErrorKind::ServerError | LLMErrorKind::Timeout
        )
    }
}

impl fmt::Display for LLMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "llm error ({}): {}", self.kind, self.message)
    }
}

impl Error for LLMError {}

/// Trait defining the interface to interact with various LLM services.
///
/// All implementations **must** be thread-safe (`Send + Sync`) so they can be
/// shared between agent tasks.  Implementations translate these requests into
/// their provider's wire format; this crate ships only the deterministic
/// [`MockClient`](crate::agentfabric::clients::mock::MockClient).
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError>;

    /// Request a completion whose content must conform to `response_schema`
    /// (a JSON Schema object).  With `strict_schema`, providers that support
    /// constrained decoding must enforce the schema server-side; otherwise a
    /// best-effort parse of the content is acceptable.
    async fn create_structured(
        &self,
        request: CompletionRequest,
        response_schema: serde_json::Value,
        strict_schema: bool,
    ) -> Result<StructuredResponse, LLMError>;

    /// Request a streaming response from the provider.
    ///
    /// Implementors sitting in front of providers without streaming support
    /// can inherit the default implementation, which resolves to `Ok(None)`.
    async fn create_streaming(
        &self,
        _request: CompletionRequest,
    ) -> Result<Option<ChunkStream>, LLMError> {
        Ok(None)
    }

    /// Return the identifier used to select the upstream model.
    fn model_name(&self) -> &str;
}
