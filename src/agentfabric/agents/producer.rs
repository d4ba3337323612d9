//! Periodic event producer.
//!
//! Emits one event message per configured interval to every declared output
//! channel.  Sends are non-blocking: a full channel is logged and the event
//! dropped, which keeps a slow consumer from ever stalling the producer.

use crate::agentfabric::agent::{Agent, AgentError, AgentLifecycle};
use crate::agentfabric::config::{AgentDef, ConfigError};
use crate::agentfabric::fabric::FabricError;
use crate::agentfabric::message::Message;
use crate::agentfabric::runtime::AgentContext;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Emits a JSON event on a fixed interval.
pub struct ProducerAgent {
    lifecycle: AgentLifecycle,
    interval: Duration,
    outputs: Vec<String>,
    /// Free-form event content carried in every payload; taken from the
    /// definition's prompt.
    content: String,
    sequence: AtomicU64,
}

impl ProducerAgent {
    pub fn from_def(def: &AgentDef) -> Result<Self, ConfigError> {
        let interval_ms = def.interval_ms.ok_or_else(|| ConfigError::MissingField {
            agent: def.name.clone(),
            field: "interval_ms".to_string(),
        })?;
        Ok(Self {
            lifecycle: AgentLifecycle::new(def.name.clone(), "producer"),
            interval: Duration::from_millis(interval_ms),
            outputs: def.outputs.iter().map(|o| o.target.clone()).collect(),
            content: def.prompt.clone(),
            sequence: AtomicU64::new(0),
        })
    }

    fn emit(&self, ctx: &AgentContext) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::json!({
            "producer": self.lifecycle.name(),
            "sequence": sequence,
            "content": self.content,
        })
        .to_string();

        for target in &self.outputs {
            let msg = Message::new("event", payload.clone());
            match ctx.send(target, msg) {
                Ok(()) => {}
                // A full buffer means the consumer is behind; drop the event
                // and keep ticking.
                Err(FabricError::ChannelFull { .. }) => {
                    log::warn!(
                        "producer '{}' dropping event {}: channel '{}' full",
                        self.lifecycle.name(),
                        sequence,
                        target
                    );
                }
                Err(e) => {
                    log::warn!(
                        "producer '{}' could not send to '{}': {}",
                        self.lifecycle.name(),
                        target,
                        e
                    );
                }
            }
        }
    }

    /// Events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ProducerAgent {
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
        self.lifecycle.set_ready(true);
        log::info!(
            "producer '{}' ready: every {:?} -> {:?}",
            self.lifecycle.name(),
            self.interval,
            self.outputs
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => break,
                _ = ticker.tick() => self.emit(&ctx),
            }
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
