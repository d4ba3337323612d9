//! Classification engine: files each payload into one of a configured set
//! of categories via a structured model call.
//!
//! Results below the configured confidence floor are labelled `uncertain`
//! rather than guessed, so downstream consumers can route low-signal
//! messages separately.

use crate::agentfabric::agent::{Agent, AgentError, AgentLifecycle};
use crate::agentfabric::agents::merge_inputs;
use crate::agentfabric::client_wrapper::{ClientWrapper, CompletionRequest, LLMError, LLMErrorKind};
use crate::agentfabric::clients::common::send_structured_with_retry;
use crate::agentfabric::config::{AgentDef, ClassifierConfig, ConfigError};
use crate::agentfabric::message::{validate_payload, Message};
use crate::agentfabric::runtime::AgentContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Category label used when confidence falls below the configured floor.
pub const UNCERTAIN_CATEGORY: &str = "uncertain";

/// One classification verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

fn classification_schema(categories: &[String]) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "category": {"type": "string", "enum": categories},
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "reasoning": {"type": "string"}
        },
        "required": ["category", "confidence"]
    })
}

/// LLM-backed classification agent.
pub struct ClassifierAgent {
    lifecycle: AgentLifecycle,
    inputs: Vec<String>,
    outputs: Vec<String>,
    prompt: String,
    model: String,
    config: ClassifierConfig,
    client: Arc<dyn ClientWrapper>,
}

impl ClassifierAgent {
    pub fn from_def(def: &AgentDef, client: Arc<dyn ClientWrapper>) -> Result<Self, ConfigError> {
        let config = def.classifier_config.clone().unwrap_or_default();
        if config.categories.is_empty() {
            return Err(ConfigError::MissingField {
                agent: def.name.clone(),
                field: "classifier_config.categories".to_string(),
            });
        }
        Ok(Self {
            lifecycle: AgentLifecycle::new(def.name.clone(), "classifier"),
            inputs: def.inputs.iter().map(|i| i.source.clone()).collect(),
            outputs: def.outputs.iter().map(|o| o.target.clone()).collect(),
            prompt: def.prompt.clone(),
            model: def.model.clone(),
            config,
            client,
        })
    }

    /// Classify one payload.
    pub async fn classify(&self, content: &str) -> Result<Classification, LLMError> {
        let user = format!(
            "Classify the following content into exactly one of these categories: {}.\n\nContent:\n{}",
            self.config.categories.join(", "),
            content
        );
        let request = CompletionRequest::new(&self.model)
            .with_system(&self.prompt)
            .with_user(&user)
            .with_temperature(0.2)
            .with_max_tokens(256);
        let response = send_structured_with_retry(
            self.client.as_ref(),
            request,
            classification_schema(&self.config.categories),
            true,
        )
        .await?;

        let mut classification: Classification = serde_json::from_value(response.data)
            .map_err(|e| {
                LLMError::new(
                    LLMErrorKind::InvalidRequest,
                    format!("classification response did not match schema: {}", e),
                )
            })?;

        let known = self
            .config
            .categories
            .iter()
            .any(|c| c == &classification.category);
        if !known || classification.confidence < self.config.min_confidence {
            classification.category = UNCERTAIN_CATEGORY.to_string();
        }
        classification.confidence = classification.confidence.max(0.0).min(1.0);
        Ok(classification)
    }
}

#[async_trait]
impl Agent for ClassifierAgent {
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
        log::info!(
            "classifier '{}' ready: categories={:?}",
            self.lifecycle.name(),
            self.config.categories
        );

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
                    "classifier '{}' dropping invalid message from '{}': {}",
                    self.lifecycle.name(),
                    source,
                    e
                );
                continue;
            }

            match self.classify(&msg.payload).await {
                Ok(classification) => {
                    let payload = match serde_json::to_string(&classification) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::error!(
                                "classifier '{}' failed to serialize verdict: {}",
                                self.lifecycle.name(),
                                e
                            );
                            continue;
                        }
                    };
                    for target in &self.outputs {
                        let out =
                            Message::new("classification", payload.clone()).with_id(msg.id.clone());
                        if let Err(e) = ctx.send(target, out) {
                            log::warn!(
                                "classifier '{}' could not emit to '{}': {}",
                                self.lifecycle.name(),
                                target,
                                e
                            );
                        }
                    }
                }
                Err(e) => log::error!(
                    "classifier '{}' failed on message {}: {}",
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
        let classification = self.classify(&msg.payload).await?;
        let payload = serde_json::to_string(&classification).map_err(|e| AgentError::Startup {
            agent: self.lifecycle.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Message::new("classification", payload).with_id(msg.id))
    }

    async fn stop(&self) -> Result<(), AgentError> {
        self.lifecycle.trigger_stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentfabric::clients::mock::MockClient;

    fn classifier(client: MockClient) -> ClassifierAgent {
        let def = AgentDef::new("sorter", "classifier")
            .with_model("mock-model")
            .with_input("in")
            .with_output("out")
            .with_classifier_config(ClassifierConfig {
                categories: vec!["bug".to_string(), "feature".to_string()],
                min_confidence: 0.6,
            });
        ClassifierAgent::from_def(&def, Arc::new(client)).unwrap()
    }

    #[tokio::test]
    async fn test_confident_classification_passes_through() {
        let client = MockClient::new("mock-model")
            .with_response(r#"{"category": "bug", "confidence": 0.92, "reasoning": "crash log"}"#);
        let agent = classifier(client);
        let verdict = agent.classify("it crashes on startup").await.unwrap();
        assert_eq!(verdict.category, "bug");
        assert!((verdict.confidence - 0.92).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_low_confidence_becomes_uncertain() {
        let client = MockClient::new("mock-model")
            .with_response(r#"{"category": "bug", "confidence": 0.3}"#);
        let agent = classifier(client);
        let verdict = agent.classify("vague report").await.unwrap();
        assert_eq!(verdict.category, UNCERTAIN_CATEGORY);
    }

    #[tokio::test]
    async fn test_unknown_category_becomes_uncertain() {
        let client = MockClient::new("mock-model")
            .with_response(r#"{"category": "question", "confidence": 0.95}"#);
        let agent = classifier(client);
        let verdict = agent.classify("how do I use this?").await.unwrap();
        assert_eq!(verdict.category, UNCERTAIN_CATEGORY);
    }

    #[test]
    fn test_missing_categories_rejected_at_construction() {
        let def = AgentDef::new("sorter", "classifier").with_input("in");
        let client: Arc<dyn ClientWrapper> = Arc::new(MockClient::new("mock-model"));
        assert!(ClassifierAgent::from_def(&def, client).is_err());
    }
}
