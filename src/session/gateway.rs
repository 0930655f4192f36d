//! Request-facing session resolution.
//!
//! The gateway extracts the session identifier from inbound request metadata
//! and enforces the configured policy before any business logic runs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::SessionStore;
use super::types::{Session, SessionId};
use crate::config::GatewaySettings;
use crate::error::{MeshError, Result};

/// Header key carrying the session identifier. Name comparison is
/// ASCII case-insensitive.
pub const DEFAULT_SESSION_HEADER: &str = "X-Session-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPolicy {
    /// Missing or invalid identifier rejects the request.
    #[default]
    Strict,
    /// Missing identifier proceeds anonymously; invalid still rejects.
    Permissive,
}

/// Transport-agnostic request metadata: a header multimap that preserves
/// multi-valued delivery so the gateway can reject it explicitly.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    headers: Vec<(String, String)>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// All values delivered under `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// The single scalar value for `name`. Multi-valued delivery is
    /// `InvalidInput`, never concatenated or coerced.
    pub fn scalar(&self, name: &str) -> Result<Option<&str>> {
        let values = self.values(name);
        match values.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(single)),
            many => Err(MeshError::invalid(format!(
                "header '{}' delivered {} values, expected a single scalar",
                name,
                many.len()
            ))),
        }
    }
}

/// Resolved caller identity for one request.
#[derive(Debug, Clone)]
pub enum SessionContext {
    Authenticated(Session),
    Anonymous { ephemeral_id: SessionId },
}

impl SessionContext {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Authenticated(session) => session.id,
            Self::Anonymous { ephemeral_id } => *ephemeral_id,
        }
    }
}

pub struct SessionGateway {
    store: Arc<SessionStore>,
    policy: GatewayPolicy,
    header_name: String,
}

impl SessionGateway {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            policy: GatewayPolicy::Strict,
            header_name: DEFAULT_SESSION_HEADER.to_string(),
        }
    }

    pub fn from_settings(store: Arc<SessionStore>, settings: &GatewaySettings) -> Self {
        Self::new(store)
            .with_policy(settings.policy)
            .with_header_name(settings.header_name.clone())
    }

    pub fn with_policy(mut self, policy: GatewayPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn policy(&self) -> GatewayPolicy {
        self.policy
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Resolve the caller's session context from request metadata.
    ///
    /// A present identifier is validated in both policies: malformed is
    /// `InvalidInput`, unknown is `NotFound`, past TTL is `Expired`.
    /// Successful resolution refreshes the session's last-access.
    pub fn resolve(&self, meta: &RequestMeta) -> Result<SessionContext> {
        let raw = meta.scalar(&self.header_name)?;

        let Some(raw) = raw else {
            return match self.policy {
                GatewayPolicy::Strict => Err(MeshError::invalid(format!(
                    "missing required session header '{}'",
                    self.header_name
                ))),
                GatewayPolicy::Permissive => {
                    let ephemeral_id = SessionId::random();
                    debug!(%ephemeral_id, "Anonymous request admitted");
                    Ok(SessionContext::Anonymous { ephemeral_id })
                }
            };
        };

        let id = SessionId::parse(raw)?;
        let session = self.store.touch(&id)?;
        Ok(SessionContext::Authenticated(session))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn gateway(policy: GatewayPolicy) -> (Arc<SessionStore>, SessionGateway) {
        let store = Arc::new(SessionStore::new());
        let gateway = SessionGateway::new(Arc::clone(&store)).with_policy(policy);
        (store, gateway)
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let (store, gateway) = gateway(GatewayPolicy::Strict);
        let session = store.create(Duration::from_secs(60)).unwrap();

        for name in ["X-Session-Id", "x-session-id", "X-SESSION-ID"] {
            let meta = RequestMeta::new().with_header(name, session.id.to_string());
            let ctx = gateway.resolve(&meta).unwrap();
            assert_eq!(ctx.session_id(), session.id);
        }
    }

    #[test]
    fn test_multi_valued_header_rejected() {
        let (store, gateway) = gateway(GatewayPolicy::Permissive);
        let session = store.create(Duration::from_secs(60)).unwrap();

        let meta = RequestMeta::new()
            .with_header("X-Session-Id", session.id.to_string())
            .with_header("x-session-id", session.id.to_string());

        // Rejected even in permissive mode: the container is never coerced.
        assert!(matches!(
            gateway.resolve(&meta),
            Err(MeshError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_strict_rejects_missing() {
        let (_, gateway) = gateway(GatewayPolicy::Strict);
        assert!(matches!(
            gateway.resolve(&RequestMeta::new()),
            Err(MeshError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_permissive_admits_missing_as_anonymous() {
        let (_, gateway) = gateway(GatewayPolicy::Permissive);
        let ctx = gateway.resolve(&RequestMeta::new()).unwrap();
        assert!(ctx.is_anonymous());
    }

    #[test]
    fn test_malformed_identifier_rejected_in_both_policies() {
        for policy in [GatewayPolicy::Strict, GatewayPolicy::Permissive] {
            let (_, gateway) = gateway(policy);
            let meta = RequestMeta::new().with_header("X-Session-Id", "not-a-uuid");
            assert!(matches!(
                gateway.resolve(&meta),
                Err(MeshError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_unknown_and_expired_are_distinct() {
        let (store, gateway) = gateway(GatewayPolicy::Permissive);

        let meta = RequestMeta::new().with_header("X-Session-Id", SessionId::random().to_string());
        assert!(matches!(gateway.resolve(&meta), Err(MeshError::NotFound(_))));

        let session = store.create(Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(25));
        let meta = RequestMeta::new().with_header("X-Session-Id", session.id.to_string());
        assert!(matches!(gateway.resolve(&meta), Err(MeshError::Expired(_))));
    }

    #[test]
    fn test_resolution_refreshes_last_access() {
        let (store, gateway) = gateway(GatewayPolicy::Strict);
        let session = store.create(Duration::from_secs(60)).unwrap();

        std::thread::sleep(Duration::from_millis(15));

        let meta = RequestMeta::new().with_header("X-Session-Id", session.id.to_string());
        match gateway.resolve(&meta).unwrap() {
            SessionContext::Authenticated(refreshed) => {
                assert!(refreshed.last_access > session.last_access);
            }
            SessionContext::Anonymous { .. } => panic!("Expected authenticated context"),
        }
    }

    #[test]
    fn test_custom_header_name() {
        let store = Arc::new(SessionStore::new());
        let gateway = SessionGateway::new(Arc::clone(&store)).with_header_name("X-Mesh-Session");
        let session = store.create(Duration::from_secs(60)).unwrap();

        let meta = RequestMeta::new().with_header("x-mesh-session", session.id.to_string());
        assert!(gateway.resolve(&meta).is_ok());

        let meta = RequestMeta::new().with_header("X-Session-Id", session.id.to_string());
        assert!(gateway.resolve(&meta).is_err());
    }
}
