//! Shared agent registry with capability-set discovery.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::card::{AgentCard, CapabilitySet};
use crate::error::{MeshError, Result};

#[derive(Debug, Clone)]
struct RegisteredCard {
    card: AgentCard,
    registered_at: DateTime<Utc>,
    seq: u64,
}

/// Mapping from agent id to its card.
///
/// Mutations on a single agent id serialize through the map entry; distinct
/// ids do not contend. Re-registration replaces the whole card atomically
/// (no partial updates, no torn reads) while keeping the original
/// registration sequence so discovery ordering stays stable.
pub struct AgentRegistry {
    agents: DashMap<String, RegisteredCard>,
    next_seq: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn register(&self, card: AgentCard) -> Result<()> {
        card.validate()?;

        match self.agents.entry(card.id.clone()) {
            Entry::Occupied(mut existing) => {
                let registered_at = existing.get().registered_at;
                let seq = existing.get().seq;
                debug!(agent_id = %card.id, "Agent card replaced");
                existing.insert(RegisteredCard {
                    card,
                    registered_at,
                    seq,
                });
            }
            Entry::Vacant(slot) => {
                debug!(agent_id = %card.id, skills = %card.skills, "Agent registered");
                slot.insert(RegisteredCard {
                    card,
                    registered_at: Utc::now(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
            }
        }
        Ok(())
    }

    pub fn deregister(&self, agent_id: &str) -> Result<AgentCard> {
        self.agents
            .remove(agent_id)
            .map(|(_, registered)| registered.card)
            .ok_or_else(|| MeshError::not_found("agent", agent_id))
    }

    pub fn get(&self, agent_id: &str) -> Result<AgentCard> {
        self.agents
            .get(agent_id)
            .map(|r| r.card.clone())
            .ok_or_else(|| MeshError::not_found("agent", agent_id))
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// All cards in registration order.
    pub fn list(&self) -> Vec<AgentCard> {
        let mut cards: Vec<(u64, AgentCard)> = self
            .agents
            .iter()
            .map(|r| (r.seq, r.card.clone()))
            .collect();
        cards.sort_by_key(|(seq, _)| *seq);
        cards.into_iter().map(|(_, card)| card).collect()
    }

    /// Every agent whose declared skills are a superset of `required`,
    /// ordered by descending matching-capability count, then by
    /// registration order (stable tie-break).
    pub fn discover(&self, required: &CapabilitySet) -> Result<Vec<AgentCard>> {
        if required.is_empty() {
            return Err(MeshError::invalid(
                "discovery requires a non-empty capability set",
            ));
        }

        let mut matches: Vec<(usize, u64, AgentCard)> = self
            .agents
            .iter()
            .filter(|r| r.card.skills.contains_all(required))
            .map(|r| {
                (
                    r.card.skills.matching_count(required),
                    r.seq,
                    r.card.clone(),
                )
            })
            .collect();

        matches.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(matches.into_iter().map(|(_, _, card)| card).collect())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
