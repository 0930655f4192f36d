//! Transport seam between the channel and agent endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use super::channel::ResponseSink;
use super::message::{Message, MessageEnvelope};
use crate::error::{MeshError, Result};
use crate::registry::AgentCard;

/// Delivers request envelopes to the agent described by a card.
///
/// Delivery is fire-and-forget from the channel's perspective: responses
/// come back asynchronously through the channel's [`ResponseSink`], where
/// correlation matching happens. A transport never resolves a pending
/// request directly.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn deliver(&self, card: &AgentCard, envelope: MessageEnvelope) -> Result<()>;
}

/// Agent-side behavior for in-process agents: receives a request envelope
/// and produces the response message.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, envelope: MessageEnvelope) -> Result<Message>;
}

pub type BoxedHandler = Arc<dyn AgentHandler>;

/// In-process transport dispatching to registered handlers.
///
/// Each delivery runs the handler on its own task and posts the reply back
/// through the sink, so a slow agent never blocks the channel or other
/// deliveries.
pub struct LocalTransport {
    handlers: DashMap<String, BoxedHandler>,
    sink: ResponseSink,
}

impl LocalTransport {
    pub fn new(sink: ResponseSink) -> Self {
        Self {
            handlers: DashMap::new(),
            sink,
        }
    }

    pub fn register_handler(&self, agent_id: impl Into<String>, handler: BoxedHandler) {
        let agent_id = agent_id.into();
        debug!(agent_id = %agent_id, "Handler registered");
        self.handlers.insert(agent_id, handler);
    }

    pub fn unregister_handler(&self, agent_id: &str) -> bool {
        self.handlers.remove(agent_id).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl AgentTransport for LocalTransport {
    async fn deliver(&self, card: &AgentCard, envelope: MessageEnvelope) -> Result<()> {
        let handler = self
            .handlers
            .get(&card.id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| {
                MeshError::Internal(format!("no handler bound for endpoint {}", card.endpoint))
            })?;

        let sink = self.sink.clone();
        let agent_id = card.id.clone();
        tokio::spawn(async move {
            match handler.handle(envelope.clone()).await {
                Ok(reply) => sink.post(envelope.reply(reply)),
                Err(e) => {
                    warn!(
                        agent_id = %agent_id,
                        correlation_id = %envelope.correlation_id,
                        error = %e,
                        "Handler failed, no response will be posted"
                    );
                }
            }
        });
        Ok(())
    }
}
