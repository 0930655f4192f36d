//! Group session state: participants, transcript, phase history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::consensus::ConsensusOutcome;
use super::phase::{GroupPhase, PhaseTransition};
use crate::error::{MeshError, Result};
use crate::messaging::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    #[default]
    Collaborative,
    Directive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    #[default]
    Consensus,
    WeightedVote,
}

/// A seat in the group: a registry-resolvable agent plus a role label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub agent_id: String,
    pub role: String,
}

impl Participant {
    pub fn new(agent_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
        }
    }
}

/// One entry of the append-only transcript, recorded in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Broadcast {
        from: String,
        message: Message,
        at: DateTime<Utc>,
    },
    Response {
        from: String,
        message: Message,
        round_trip: Duration,
        at: DateTime<Utc>,
    },
    Timeout {
        participant: String,
        waited: Duration,
        at: DateTime<Utc>,
    },
    Unreachable {
        participant: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    Vote {
        participant: String,
        decision_point: String,
        option: String,
        at: DateTime<Utc>,
    },
    Omission {
        participant: String,
        decision_point: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl TranscriptEntry {
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Readable snapshot of a group session, available after close as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupState {
    pub id: String,
    pub topic: String,
    pub phase: GroupPhase,
    pub participants: Vec<Participant>,
    pub coordination_mode: CoordinationMode,
    pub decision_mode: DecisionMode,
    pub transcript: Vec<TranscriptEntry>,
    pub phase_history: Vec<PhaseTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ConsensusOutcome>,
    pub created_at: DateTime<Utc>,
}

/// Multi-party coordination context spanning broadcast and consensus phases.
///
/// Interior state only; the coordinator wraps each session in its own lock
/// so transcript appends and phase checks are atomic with respect to
/// cancellation.
#[derive(Debug)]
pub struct GroupSession {
    pub id: String,
    pub topic: String,
    pub coordination_mode: CoordinationMode,
    pub decision_mode: DecisionMode,
    participants: Vec<Participant>,
    phase: GroupPhase,
    transcript: Vec<TranscriptEntry>,
    phase_history: Vec<PhaseTransition>,
    outcome: Option<ConsensusOutcome>,
    created_at: DateTime<Utc>,
}

impl GroupSession {
    pub fn new(
        topic: impl Into<String>,
        participants: Vec<Participant>,
        coordination_mode: CoordinationMode,
        decision_mode: DecisionMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            coordination_mode,
            decision_mode,
            participants,
            phase: GroupPhase::Forming,
            transcript: Vec::new(),
            phase_history: Vec::new(),
            outcome: None,
            created_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> GroupPhase {
        self.phase
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.agent_id.clone())
            .collect()
    }

    pub fn is_participant(&self, agent_id: &str) -> bool {
        self.participants.iter().any(|p| p.agent_id == agent_id)
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn outcome(&self) -> Option<&ConsensusOutcome> {
        self.outcome.as_ref()
    }

    pub fn transition(&mut self, to: GroupPhase, reason: impl Into<String>) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(MeshError::Conflict(format!(
                "group {}: invalid transition {} -> {} (allowed: {:?})",
                self.id,
                self.phase,
                to,
                self.phase.allowed_transitions()
            )));
        }
        self.phase_history
            .push(PhaseTransition::new(self.phase, to, reason));
        self.phase = to;
        Ok(())
    }

    /// Append a transcript entry. Rejected with `Conflict` once the session
    /// is closed, so late arrivals never retroactively change a result.
    pub fn record(&mut self, entry: TranscriptEntry) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(MeshError::Conflict(format!(
                "group {} is closed; entry rejected",
                self.id
            )));
        }
        self.transcript.push(entry);
        Ok(())
    }

    pub fn add_participant(&mut self, participant: Participant) -> Result<()> {
        if !self.phase.accepts_joins() {
            return Err(MeshError::Conflict(format!(
                "group {} no longer accepts joins (phase: {})",
                self.id, self.phase
            )));
        }
        if self.is_participant(&participant.agent_id) {
            return Err(MeshError::Conflict(format!(
                "agent {} already holds a seat in group {}",
                participant.agent_id, self.id
            )));
        }
        self.participants.push(participant);
        Ok(())
    }

    pub fn set_outcome(&mut self, outcome: ConsensusOutcome) {
        self.outcome = Some(outcome);
    }

    pub fn state(&self) -> GroupState {
        GroupState {
            id: self.id.clone(),
            topic: self.topic.clone(),
            phase: self.phase,
            participants: self.participants.clone(),
            coordination_mode: self.coordination_mode,
            decision_mode: self.decision_mode,
            transcript: self.transcript.clone(),
            phase_history: self.phase_history.clone(),
            outcome: self.outcome.clone(),
            created_at: self.created_at,
        }
    }
}
