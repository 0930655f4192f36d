//! Session-backed coordination core for multi-agent platforms.
//!
//! Five components, leaf-first: a TTL-bounded [`session::SessionStore`], the
//! request-facing [`session::SessionGateway`], the [`registry::AgentRegistry`]
//! with capability-set discovery, the point-to-point
//! [`messaging::MessagingChannel`] with request/response task correlation,
//! and the [`group::GroupCoordinator`] running multi-party broadcast rounds
//! and weighted-consensus decisions on top of the other three.
//!
//! Long-term conversational memory, natural-language synthesis, and UI
//! surfaces are external collaborators; this crate only carries the
//! state-machine, concurrency, and consistency core.

pub mod api;
pub mod config;
pub mod error;
pub mod group;
pub mod messaging;
pub mod registry;
pub mod session;

pub use api::{GroupSpec, MeshApi};
pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use group::{
    ConsensusOutcome, ConsensusRequest, CoordinationMode, DecisionMode, DecisionPoint,
    GroupCoordinator, GroupPhase, GroupState, Participant, TieBreakPolicy, TranscriptEntry,
};
pub use messaging::{
    AgentHandler, AgentTransport, LocalTransport, Message, MessageEnvelope, MessagingChannel, Part,
    Role, Task, TaskState,
};
pub use registry::{AgentCard, AgentRegistry, CapabilityFlags, CapabilitySet};
pub use session::{
    ExpiryPolicy, GatewayPolicy, RequestMeta, Session, SessionContext, SessionGateway, SessionId,
    SessionStore,
};
