//! Point-to-point structured messaging between agents.

mod channel;
mod message;
mod task;
mod transport;

pub use channel::{MessagingChannel, ResponseSink};
pub use message::{Message, MessageEnvelope, MessageKind, Part, Role};
pub use task::{Task, TaskState, TaskTransition};
pub use transport::{AgentHandler, AgentTransport, BoxedHandler, LocalTransport};
