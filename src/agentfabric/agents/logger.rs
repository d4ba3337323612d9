//! Sink agent: logs everything it receives and forwards nothing.

use crate::agentfabric::agent::{Agent, AgentError, AgentLifecycle};
use crate::agentfabric::agents::merge_inputs;
use crate::agentfabric::config::{AgentDef, ConfigError};
use crate::agentfabric::message::{validate_payload, Message};
use crate::agentfabric::runtime::AgentContext;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs each received message with its source, type, id and a payload
/// preview.
pub struct LoggerAgent {
    lifecycle: AgentLifecycle,
    inputs: Vec<String>,
    received: AtomicU64,
}

impl LoggerAgent {
    pub fn from_def(def: &AgentDef) -> Result<Self, ConfigError> {
        Ok(Self {
            lifecycle: AgentLifecycle::new(def.name.clone(), "logger"),
            inputs: def.inputs.iter().map(|i| i.source.clone()).collect(),
            received: AtomicU64::new(0),
        })
    }

    /// Messages logged so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for LoggerAgent {
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
                    "logger '{}' dropping invalid message from '{}': {}",
                    self.lifecycle.name(),
                    source,
                    e
                );
                continue;
            }

            self.received.fetch_add(1, Ordering::SeqCst);
            log::info!(
                "logger '{}' [{}] type={} id={} payload={}",
                self.lifecycle.name(),
                source,
                msg.message_type,
                msg.id,
                msg.payload_preview(120)
            );
        }

        self.lifecycle.set_ready(false);
        Ok(())
    }

    async fn execute(&self, _ctx: AgentContext, _msg: Message) -> Result<Message, AgentError> {
        Err(AgentError::NotImplemented {
            agent: self.lifecycle.name().to_string(),
            operation: "execute".to_string(),
        })
    }

    async fn stop(&self) -> Result<(), AgentError> {
        self.lifecycle.trigger_stop();
        Ok(())
    }
}
