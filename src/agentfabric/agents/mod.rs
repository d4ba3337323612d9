//! Built-in agent role implementations.
//!
//! Each role here is constructed by the runtime's default factories (see
//! [`Runtime::install_default_factories`](crate::agentfabric::runtime::Runtime::install_default_factories)):
//! `producer`, `logger`, `classifier` and `react`.  The two heavyweight
//! roles live in their own modules:
//! [`aggregator`](crate::agentfabric::aggregator) and
//! [`planner`](crate::agentfabric::planner).

pub mod classifier;
pub mod logger;
pub mod producer;
pub mod react;

pub use classifier::ClassifierAgent;
pub use logger::LoggerAgent;
pub use producer::ProducerAgent;
pub use react::ReactAgent;

use crate::agentfabric::agent::AgentError;
use crate::agentfabric::fabric::DEFAULT_CHANNEL_CAPACITY;
use crate::agentfabric::message::Message;
use crate::agentfabric::runtime::AgentContext;
use tokio::sync::mpsc;

/// Fan several input channels into one `(source, message)` stream.
///
/// Claims the receiving endpoint of every source (failing fast if one is
/// already taken) and spawns a forwarder task per source.  The merged
/// receiver ends once every source has closed; forwarders also exit on
/// context cancellation.
pub fn merge_inputs(
    ctx: &AgentContext,
    sources: &[String],
) -> Result<mpsc::Receiver<(String, Message)>, AgentError> {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY * sources.len().max(1));
    for source in sources {
        let mut receiver = ctx.receive(source)?;
        let tx = tx.clone();
        let cancel = ctx.cancel_token().clone();
        let source = source.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = receiver.recv() => match received {
                        Some(msg) => {
                            if tx.send((source.clone(), msg)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }
    Ok(rx)
}
