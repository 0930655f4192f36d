//! Agent capability descriptors.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// Ordered set of declared skill tags.
///
/// Kept as an explicit type rather than a bare collection so capability
/// queries read as set operations at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: impl Into<String>) -> bool {
        self.0.insert(capability.into())
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    /// True if every capability in `required` is declared here.
    pub fn contains_all(&self, required: &CapabilitySet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn matching_count(&self, other: &CapabilitySet) -> usize {
        self.0.intersection(&other.0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for capability in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", capability)?;
            first = false;
        }
        Ok(())
    }
}

/// Protocol capability flags advertised by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityFlags {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_history: bool,
}

/// Published descriptor of an agent's identity, skills, and endpoint.
///
/// Immutable once registered; updates go through whole-card re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: CapabilitySet,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: CapabilityFlags,
}

impl AgentCard {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            skills: CapabilitySet::new(),
            endpoint: endpoint.into(),
            capabilities: CapabilityFlags::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_skills(mut self, skills: CapabilitySet) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityFlags) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MeshError::invalid("agent card id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(MeshError::invalid("agent card name must not be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(MeshError::invalid("agent card endpoint must not be empty"));
        }
        Ok(())
    }
}
