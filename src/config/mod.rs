//! Runtime configuration loaded from TOML.

mod settings;

pub use settings::{
    CoordinatorSettings, GatewaySettings, MeshConfig, MessagingSettings, SessionSettings,
};
