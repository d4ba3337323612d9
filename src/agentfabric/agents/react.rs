//! Tool-using ReAct reasoner.
//!
//! Runs the classic loop: the model thinks, optionally requests a tool, the
//! tool result is fed back as an observation, and the cycle repeats until
//! the model answers without requesting tools.  The loop is bounded three
//! ways: [`MAX_ITERATIONS`] round-trips, a [`LOOP_TIMEOUT`] wall-clock
//! deadline, and a [`TOKEN_BUDGET`] across the whole generation.

use crate::agentfabric::agent::{Agent, AgentError, AgentLifecycle};
use crate::agentfabric::agents::merge_inputs;
use crate::agentfabric::client_wrapper::{
    ChatMessage, ClientWrapper, CompletionRequest, LLMError, LLMErrorKind,
};
use crate::agentfabric::clients::common::send_with_retry;
use crate::agentfabric::config::{AgentDef, ConfigError};
use crate::agentfabric::message::{validate_payload, Message};
use crate::agentfabric::runtime::AgentContext;
use crate::agentfabric::tool_protocol::ToolRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Maximum model round-trips per generation.
pub const MAX_ITERATIONS: usize = 10;

/// Wall-clock bound on one whole ReAct generation.
pub const LOOP_TIMEOUT: Duration = Duration::from_secs(300);

/// Token budget across all round-trips of one generation.
pub const TOKEN_BUDGET: usize = 4000;

/// Tool-loop reasoning agent.
pub struct ReactAgent {
    lifecycle: AgentLifecycle,
    inputs: Vec<String>,
    outputs: Vec<String>,
    prompt: String,
    model: String,
    client: Arc<dyn ClientWrapper>,
    tools: Arc<ToolRegistry>,
}

impl ReactAgent {
    pub fn from_def(
        def: &AgentDef,
        client: Arc<dyn ClientWrapper>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            lifecycle: AgentLifecycle::new(def.name.clone(), "react"),
            inputs: def.inputs.iter().map(|i| i.source.clone()).collect(),
            outputs: def.outputs.iter().map(|o| o.target.clone()).collect(),
            prompt: def.prompt.clone(),
            model: def.model.clone(),
            client,
            tools,
        })
    }

    /// Run one bounded ReAct generation over `problem`.
    pub async fn reason(&self, problem: &str) -> Result<String, AgentError> {
        match tokio::time::timeout(LOOP_TIMEOUT, self.reason_inner(problem)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                operation: "react loop".to_string(),
            }),
        }
    }

    async fn reason_inner(&self, problem: &str) -> Result<String, AgentError> {
        let tool_definitions = self.tools.tool_definitions().await;
        let system = format!(
            "{}\nReason in alternating Thought / Action / Observation lines. \
             Call tools when a computation or lookup is needed; answer directly once you are confident.",
            self.prompt
        );

        let mut messages = vec![ChatMessage::system(&system), ChatMessage::user(problem)];
        let mut tokens_spent = 0usize;
        let mut last_content = String::new();

        for iteration in 0..MAX_ITERATIONS {
            let request = CompletionRequest {
                messages: messages.clone(),
                model: self.model.clone(),
                temperature: 0.7,
                max_tokens: 1024,
                tools: if tool_definitions.is_empty() {
                    None
                } else {
                    Some(tool_definitions.clone())
                },
            };
            let response = send_with_retry(self.client.as_ref(), request).await?;
            tokens_spent += response.usage.total_tokens;
            last_content = response.content.clone();

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            messages.push(ChatMessage::assistant(&response.content));
            for call in &response.tool_calls {
                log::debug!(
                    "react '{}' iteration {} calling tool '{}'",
                    self.lifecycle.name(),
                    iteration + 1,
                    call.name
                );
                let observation = match self.tools.call(&call.name, call.arguments.clone()).await {
                    Ok(result) => result.to_text(),
                    // A failed tool becomes an observation the model can
                    // react to; it does not abort the generation.
                    Err(e) => format!("error: {}", e),
                };
                messages.push(ChatMessage::tool(
                    call.id.clone(),
                    format!("Observation: {}", observation),
                ));
            }

            if tokens_spent >= TOKEN_BUDGET {
                log::warn!(
                    "react '{}' hit the {} token budget after {} iterations",
                    self.lifecycle.name(),
                    TOKEN_BUDGET,
                    iteration + 1
                );
                return Ok(last_content);
            }
        }

        Err(AgentError::Llm(LLMError::new(
            LLMErrorKind::Unknown,
            format!(
                "no final answer after {} iterations",
                MAX_ITERATIONS
            ),
        )))
    }
}

#[async_trait]
impl Agent for ReactAgent {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn role(&self) -> &str {
        self.lifecycle.role()
    }

    fn ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    async fn start(&self, ctx: AgentContext) -> Result<(), AgentError> {
        self.lifecycle.bind_cancel(ctx.cancel_token().clone());
        let mut merged = merge_inputs(&ctx, &self.inputs)?;
        self.lifecycle.set_ready(true);
        log::info!("react '{}' ready: inputs={:?}", self.lifecycle.name(), self.inputs);

        loop {
            let received = tokio::select! {
                _ = ctx.cancel_token().cancelled() => break,
                received = merged.recv() => received,
            };
            let (source, msg) = match received {
                Some(pair) => pair,
                None => break,
            };

            if let Err(e) = validate_payload(&msg.payload) {
                log::warn!(
                    "react '{}' dropping invalid message from '{}': {}",
                    self.lifecycle.name(),
                    source,
                    e
                );
                continue;
            }

            let reasoning = tokio::select! {
                _ = ctx.cancel_token().cancelled() => break,
                reasoning = self.reason(&msg.payload) => reasoning,
            };
            match reasoning {
                Ok(answer) => {
                    for target in &self.outputs {
                        let out = Message::new("analysis", answer.clone()).with_id(msg.id.clone());
                        if let Err(e) = ctx.send(target, out) {
                            log::warn!(
                                "react '{}' could not emit to '{}': {}",
                                self.lifecycle.name(),
                                target,
                                e
                            );
                        }
                    }
                }
                Err(e) => log::error!(
                    "react '{}' failed on message {}: {}",
                    self.lifecycle.name(),
                    msg.id,
                    e
                ),
            }
        }

        self.lifecycle.set_ready(false);
        Ok(())
    }

    async fn execute(&self, _ctx: AgentContext, msg: Message) -> Result<Message, AgentError> {
        if !self.ready() {
            return Err(AgentError::NotReady {
                agent: self.lifecycle.name().to_string(),
            });
        }
        validate_payload(&msg.payload)?;
        let answer = self.reason(&msg.payload).await?;
        Ok(Message::new("analysis", answer).with_id(msg.id))
    }

    async fn stop(&self) -> Result<(), AgentError> {
        self.lifecycle.trigger_stop();
        Ok(())
    }
}
