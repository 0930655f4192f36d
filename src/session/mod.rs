//! Session identity: TTL-bounded storage and request-facing resolution.

mod gateway;
mod store;
mod types;

pub use gateway::{
    DEFAULT_SESSION_HEADER, GatewayPolicy, RequestMeta, SessionContext, SessionGateway,
};
pub use store::SessionStore;
pub use types::{ExpiryPolicy, PROTOCOL_VERSION, Session, SessionId};
