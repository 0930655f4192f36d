//! Transport-agnostic operation surface.
//!
//! Implements the platform's request table over the coordination core
//! without binding to an HTTP server: callers hand in request metadata and
//! JSON-ready payload types, and map `MeshError::status_code` onto their
//! transport. Session identity travels as a single scalar header value on
//! every request; absence is handled by the gateway's configured policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::group::{
    ConsensusOutcome, ConsensusRequest, CoordinationMode, DecisionMode, GroupCoordinator,
    GroupState, Participant,
};
use crate::messaging::{AgentTransport, LocalTransport, Message, MessageEnvelope, MessagingChannel};
use crate::registry::{AgentCard, AgentRegistry, CapabilitySet};
use crate::session::{RequestMeta, Session, SessionContext, SessionGateway, SessionStore};

/// Payload for group creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub topic: String,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub coordination_mode: CoordinationMode,
    #[serde(default)]
    pub decision_mode: DecisionMode,
}

/// The coordination core behind one facade: session store and gateway,
/// agent registry, messaging channel, group coordinator. Constructed at
/// startup and injected wherever requests arrive; there are no ambient
/// singletons.
pub struct MeshApi {
    store: Arc<SessionStore>,
    gateway: SessionGateway,
    registry: Arc<AgentRegistry>,
    channel: Arc<MessagingChannel>,
    coordinator: Arc<GroupCoordinator>,
}

impl MeshApi {
    pub fn new(
        store: Arc<SessionStore>,
        gateway: SessionGateway,
        registry: Arc<AgentRegistry>,
        channel: Arc<MessagingChannel>,
        coordinator: Arc<GroupCoordinator>,
    ) -> Self {
        Self {
            store,
            gateway,
            registry,
            channel,
            coordinator,
        }
    }

    /// Wire the full core from configuration, using the in-process
    /// transport. The returned transport is where agent handlers register.
    pub fn from_config(config: &MeshConfig) -> (Self, Arc<LocalTransport>) {
        let store = Arc::new(SessionStore::from_settings(&config.session));
        let gateway = SessionGateway::from_settings(Arc::clone(&store), &config.gateway);
        let registry = Arc::new(AgentRegistry::new());
        let channel = Arc::new(MessagingChannel::from_settings(
            "coordinator",
            Arc::clone(&registry),
            &config.messaging,
        ));
        let transport = Arc::new(LocalTransport::new(channel.response_sink()));
        channel.bind_transport(Arc::clone(&transport) as Arc<dyn AgentTransport>);
        let coordinator = Arc::new(GroupCoordinator::from_settings(
            Arc::clone(&registry),
            Arc::clone(&channel),
            &config.coordinator,
        ));
        (
            Self::new(store, gateway, registry, channel, coordinator),
            transport,
        )
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<MessagingChannel> {
        &self.channel
    }

    pub fn coordinator(&self) -> &Arc<GroupCoordinator> {
        &self.coordinator
    }

    // === Sessions ===

    /// First handshake: issue a session. No session header is required.
    pub fn open_session(&self, ttl: Option<Duration>) -> Result<Session> {
        match ttl {
            Some(ttl) => self.store.create(ttl),
            None => self.store.create_default(),
        }
    }

    /// Explicit termination. An immediately following lookup reports
    /// `NotFound`, never a stale hit.
    pub fn delete_session(&self, meta: &RequestMeta) -> Result<()> {
        match self.gateway.resolve(meta)? {
            SessionContext::Authenticated(session) => self.store.delete(&session.id),
            SessionContext::Anonymous { .. } => {
                Err(MeshError::invalid("no session identified for deletion"))
            }
        }
    }

    // === Agents ===

    pub fn register_agent(&self, meta: &RequestMeta, card: AgentCard) -> Result<AgentCard> {
        let _ctx = self.gateway.resolve(meta)?;
        self.registry.register(card.clone())?;
        Ok(card)
    }

    pub fn discover_agents(
        &self,
        meta: &RequestMeta,
        required: &CapabilitySet,
    ) -> Result<Vec<AgentCard>> {
        let _ctx = self.gateway.resolve(meta)?;
        self.registry.discover(required)
    }

    // === Messaging ===

    pub async fn send_message(
        &self,
        meta: &RequestMeta,
        target: &str,
        message: Message,
    ) -> Result<MessageEnvelope> {
        let ctx = self.gateway.resolve(meta)?;
        debug!(session_id = %ctx.session_id(), target = %target, "Message accepted");
        self.channel.send(target, message).await
    }

    // === Groups ===

    pub fn create_group(&self, meta: &RequestMeta, spec: GroupSpec) -> Result<String> {
        let _ctx = self.gateway.resolve(meta)?;
        self.coordinator.create(
            spec.topic,
            spec.participants,
            spec.coordination_mode,
            spec.decision_mode,
        )
    }

    pub fn join_group(
        &self,
        meta: &RequestMeta,
        group_id: &str,
        agent_id: &str,
        role: &str,
    ) -> Result<()> {
        let _ctx = self.gateway.resolve(meta)?;
        self.coordinator.join(group_id, agent_id, role)
    }

    pub async fn broadcast(
        &self,
        meta: &RequestMeta,
        group_id: &str,
        message: Message,
    ) -> Result<crate::group::BroadcastSummary> {
        let _ctx = self.gateway.resolve(meta)?;
        self.coordinator.broadcast(group_id, message).await
    }

    pub async fn submit_consensus(
        &self,
        meta: &RequestMeta,
        group_id: &str,
        request: ConsensusRequest,
    ) -> Result<ConsensusOutcome> {
        let _ctx = self.gateway.resolve(meta)?;
        self.coordinator.submit_consensus(group_id, request).await
    }

    pub fn group_state(&self, meta: &RequestMeta, group_id: &str) -> Result<GroupState> {
        let _ctx = self.gateway.resolve(meta)?;
        self.coordinator.state(group_id)
    }
}
