use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{MeshError, Result};
use crate::session::{ExpiryPolicy, GatewayPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub session: SessionSettings,
    pub gateway: GatewaySettings,
    pub messaging: MessagingSettings,
    pub coordinator: CoordinatorSettings,
}

impl MeshConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.session.default_ttl_secs == 0 {
            errors.push("session default_ttl_secs must be greater than 0");
        }
        if self.session.sweep_interval_secs == 0 {
            errors.push("session sweep_interval_secs must be greater than 0");
        }

        if self.gateway.header_name.trim().is_empty() {
            errors.push("gateway header_name must not be empty");
        }

        if self.messaging.response_timeout_secs == 0 {
            errors.push("messaging response_timeout_secs must be greater than 0");
        }

        if self.coordinator.broadcast_deadline_secs == 0 {
            errors.push("coordinator broadcast_deadline_secs must be greater than 0");
        }
        if self.coordinator.vote_deadline_secs == 0 {
            errors.push("coordinator vote_deadline_secs must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MeshError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub expiry_policy: ExpiryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            sweep_interval_secs: 60,
            expiry_policy: ExpiryPolicy::Absolute,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub policy: GatewayPolicy,
    pub header_name: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            policy: GatewayPolicy::Strict,
            header_name: crate::session::DEFAULT_SESSION_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingSettings {
    pub response_timeout_secs: u64,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            response_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub broadcast_deadline_secs: u64,
    pub vote_deadline_secs: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            broadcast_deadline_secs: 30,
            vote_deadline_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(MeshConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = MeshConfig::default();
        config.session.default_ttl_secs = 0;
        config.gateway.header_name = "  ".into();
        config.messaging.response_timeout_secs = 0;

        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("default_ttl_secs"));
        assert!(msg.contains("header_name"));
        assert!(msg.contains("response_timeout_secs"));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MeshConfig::load(&dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config.session.default_ttl_secs, 3600);
    }

    #[tokio::test]
    async fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = MeshConfig::default();
        config.session.default_ttl_secs = 120;
        config.gateway.policy = GatewayPolicy::Permissive;
        config.save(&path).await.unwrap();

        let loaded = MeshConfig::load(&path).await.unwrap();
        assert_eq!(loaded.session.default_ttl_secs, 120);
        assert_eq!(loaded.gateway.policy, GatewayPolicy::Permissive);
    }

    #[tokio::test]
    async fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[session]\ndefault_ttl_secs = 0\n")
            .await
            .unwrap();

        assert!(matches!(
            MeshConfig::load(&path).await,
            Err(MeshError::Config(_))
        ));
    }
}
