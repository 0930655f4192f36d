//! Point-to-point messaging with request/response task correlation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::message::{Message, MessageEnvelope};
use super::task::{Task, TaskState};
use super::transport::{AgentTransport, LocalTransport};
use crate::config::MessagingSettings;
use crate::error::{MeshError, Result};
use crate::registry::AgentRegistry;

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct ChannelState {
    next_seq: u64,
}

/// Intake for responses coming back from a transport.
///
/// A response resolves exactly one outstanding request by correlation id;
/// one without a recognized id is discarded with a logged anomaly, never
/// matched speculatively to the oldest pending request.
#[derive(Clone)]
pub struct ResponseSink {
    pending: Arc<DashMap<String, oneshot::Sender<MessageEnvelope>>>,
}

impl ResponseSink {
    pub fn post(&self, envelope: MessageEnvelope) {
        match self.pending.remove(&envelope.correlation_id) {
            Some((_, tx)) => {
                if tx.send(envelope).is_err() {
                    debug!("Response arrived after the requester gave up");
                }
            }
            None => {
                warn!(
                    correlation_id = %envelope.correlation_id,
                    from = %envelope.from,
                    "Discarding response with unrecognized correlation id"
                );
            }
        }
    }
}

/// Point-to-point channel between this process and registry-resolvable
/// agents. Delivery is at-most-once; callers needing at-least-once re-send
/// with an idempotency key derived from the original correlation id.
pub struct MessagingChannel {
    local_agent: String,
    registry: Arc<AgentRegistry>,
    transport: RwLock<Option<Arc<dyn AgentTransport>>>,
    pending: Arc<DashMap<String, oneshot::Sender<MessageEnvelope>>>,
    /// Tasks keyed by correlation id; history is append-only.
    tasks: DashMap<String, Task>,
    /// Per-destination state: sequence numbers scoped to the channel.
    channels: DashMap<String, ChannelState>,
    response_timeout: Duration,
}

impl MessagingChannel {
    pub fn new(local_agent: impl Into<String>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            local_agent: local_agent.into(),
            registry,
            transport: RwLock::new(None),
            pending: Arc::new(DashMap::new()),
            tasks: DashMap::new(),
            channels: DashMap::new(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn from_settings(
        local_agent: impl Into<String>,
        registry: Arc<AgentRegistry>,
        settings: &MessagingSettings,
    ) -> Self {
        Self::new(local_agent, registry)
            .with_response_timeout(Duration::from_secs(settings.response_timeout_secs))
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn local_agent(&self) -> &str {
        &self.local_agent
    }

    pub fn bind_transport(&self, transport: Arc<dyn AgentTransport>) {
        *self.transport.write() = Some(transport);
    }

    pub fn response_sink(&self) -> ResponseSink {
        ResponseSink {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Construct a channel wired to an in-process transport.
    pub fn with_local_transport(
        local_agent: impl Into<String>,
        registry: Arc<AgentRegistry>,
    ) -> (Arc<Self>, Arc<LocalTransport>) {
        let channel = Arc::new(Self::new(local_agent, registry));
        let transport = Arc::new(LocalTransport::new(channel.response_sink()));
        channel.bind_transport(Arc::clone(&transport) as Arc<dyn AgentTransport>);
        (channel, transport)
    }

    /// Send a message and await the correlated response.
    pub async fn send(&self, target: &str, message: Message) -> Result<MessageEnvelope> {
        self.send_with(target, message, None, None).await
    }

    /// Send with an explicit correlation id (idempotency key) and/or
    /// a per-call response deadline.
    pub async fn send_with(
        &self,
        target: &str,
        mut message: Message,
        correlation_id: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<MessageEnvelope> {
        let card = self.registry.get(target)?;
        let transport = self
            .transport
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| MeshError::Config("no transport bound to channel".into()))?;
        let correlation_id =
            correlation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // Create or reuse the task for this correlation id.
        let attempts = {
            let mut task = self
                .tasks
                .entry(correlation_id.clone())
                .or_insert_with(|| Task::new(target, correlation_id.clone()));
            if task.state().is_terminal() {
                return Err(MeshError::Conflict(format!(
                    "correlation id {} already resolved as {}",
                    correlation_id,
                    task.state()
                )));
            }
            if self.pending.contains_key(&correlation_id) {
                return Err(MeshError::Conflict(format!(
                    "a send is already pending for correlation id {}",
                    correlation_id
                )));
            }
            if task.state() == TaskState::Submitted {
                task.start()?;
            } else {
                // Re-send of an unresolved exchange.
                task.attempts += 1;
            }
            task.attempts
        };

        message.sequence = self.next_sequence(target);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        let envelope =
            MessageEnvelope::request(&self.local_agent, target, &correlation_id, message);

        if let Err(e) = transport.deliver(&card, envelope).await {
            self.pending.remove(&correlation_id);
            self.with_task(&correlation_id, |task| {
                task.fail(format!("delivery failed: {}", e))
            })?;
            warn!(target = %target, error = %e, "Delivery failed");
            return Err(MeshError::Unreachable {
                target: target.to_string(),
                attempts,
            });
        }

        let deadline = timeout.unwrap_or(self.response_timeout);
        let started = Instant::now();
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(response)) => {
                self.with_task(&correlation_id, |task| {
                    task.complete(response.message.clone())
                })?;
                debug!(
                    target = %target,
                    correlation_id = %correlation_id,
                    "Response correlated"
                );
                Ok(response)
            }
            Ok(Err(_)) => Err(MeshError::Conflict(format!(
                "send to {} cancelled (correlation id {})",
                target, correlation_id
            ))),
            Err(_) => {
                // The exchange stays unresolved; a late response is discarded
                // by the sink and the caller may re-send with the same
                // correlation id.
                self.pending.remove(&correlation_id);
                warn!(
                    target = %target,
                    correlation_id = %correlation_id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "No response within deadline"
                );
                Err(MeshError::Timeout {
                    target: target.to_string(),
                    attempts,
                    waited: deadline,
                })
            }
        }
    }

    /// Cancel a pending send. The awaiting caller observes `Conflict` and
    /// the task moves to `Cancelled`.
    pub fn cancel(&self, correlation_id: &str) -> Result<()> {
        let (_, tx) = self
            .pending
            .remove(correlation_id)
            .ok_or_else(|| MeshError::not_found("pending send", correlation_id))?;
        drop(tx);
        self.with_task(correlation_id, |task| task.cancel("cancelled by caller"))?;
        debug!(correlation_id = %correlation_id, "Pending send cancelled");
        Ok(())
    }

    pub fn task(&self, correlation_id: &str) -> Result<Task> {
        self.tasks
            .get(correlation_id)
            .map(|t| t.clone())
            .ok_or_else(|| MeshError::not_found("task", correlation_id))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_sequence(&self, target: &str) -> u64 {
        let mut state = self.channels.entry(target.to_string()).or_default();
        state.next_seq += 1;
        state.next_seq
    }

    fn with_task(
        &self,
        correlation_id: &str,
        f: impl FnOnce(&mut Task) -> Result<()>,
    ) -> Result<()> {
        match self.tasks.get_mut(correlation_id) {
            Some(mut task) => f(&mut task),
            None => Err(MeshError::not_found("task", correlation_id)),
        }
    }
}
