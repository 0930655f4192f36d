//! Multi-party coordination: broadcast fan-out and consensus rounds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::consensus::{
    ConsensusOutcome, ConsensusRequest, DecisionResult, TieBreakPolicy, VoteBallot, VoteRequest,
    aggregate,
};
use super::phase::GroupPhase;
use super::session::{
    CoordinationMode, DecisionMode, GroupSession, GroupState, Participant, TranscriptEntry,
};
use crate::config::CoordinatorSettings;
use crate::error::{MeshError, Result};
use crate::messaging::{Message, MessageEnvelope, MessagingChannel, Part, Role};
use crate::registry::AgentRegistry;

const DEFAULT_BROADCAST_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_VOTE_DEADLINE: Duration = Duration::from_secs(30);

/// Per-participant outcome counts for one broadcast round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub responses: usize,
    pub timeouts: usize,
    pub unreachable: usize,
    /// Arrivals rejected because the session closed mid-round.
    pub rejected: usize,
}

/// Runs group sessions on top of the registry, the messaging channel, and
/// the session-backed transcript.
///
/// Every broadcast is a bounded set of concurrent sends joined by a single
/// deadline; per-participant outcomes are recorded even on timeout.
pub struct GroupCoordinator {
    registry: Arc<AgentRegistry>,
    channel: Arc<MessagingChannel>,
    groups: DashMap<String, Arc<RwLock<GroupSession>>>,
    broadcast_deadline: Duration,
    vote_deadline: Duration,
}

impl GroupCoordinator {
    pub fn new(registry: Arc<AgentRegistry>, channel: Arc<MessagingChannel>) -> Self {
        Self {
            registry,
            channel,
            groups: DashMap::new(),
            broadcast_deadline: DEFAULT_BROADCAST_DEADLINE,
            vote_deadline: DEFAULT_VOTE_DEADLINE,
        }
    }

    pub fn from_settings(
        registry: Arc<AgentRegistry>,
        channel: Arc<MessagingChannel>,
        settings: &CoordinatorSettings,
    ) -> Self {
        Self::new(registry, channel)
            .with_broadcast_deadline(Duration::from_secs(settings.broadcast_deadline_secs))
            .with_vote_deadline(Duration::from_secs(settings.vote_deadline_secs))
    }

    pub fn with_broadcast_deadline(mut self, deadline: Duration) -> Self {
        self.broadcast_deadline = deadline;
        self
    }

    pub fn with_vote_deadline(mut self, deadline: Duration) -> Self {
        self.vote_deadline = deadline;
        self
    }

    /// The deterministic tie-break rule applied to equal aggregated scores.
    pub fn tie_break_policy(&self) -> TieBreakPolicy {
        TieBreakPolicy::default()
    }

    /// Form a group. Every seat must resolve in the registry; the first
    /// unresolvable participant aborts formation with a named error.
    pub fn create(
        &self,
        topic: impl Into<String>,
        participants: Vec<Participant>,
        coordination_mode: CoordinationMode,
        decision_mode: DecisionMode,
    ) -> Result<String> {
        if participants.is_empty() {
            return Err(MeshError::invalid("group requires at least one participant"));
        }

        for (i, participant) in participants.iter().enumerate() {
            if !self.registry.contains(&participant.agent_id) {
                return Err(MeshError::invalid(format!(
                    "unresolvable participant '{}'",
                    participant.agent_id
                )));
            }
            if participants[..i]
                .iter()
                .any(|p| p.agent_id == participant.agent_id)
            {
                return Err(MeshError::invalid(format!(
                    "duplicate participant '{}'",
                    participant.agent_id
                )));
            }
        }

        let session = GroupSession::new(topic, participants, coordination_mode, decision_mode);
        let id = session.id.clone();
        info!(group_id = %id, participants = session.participants().len(), "Group formed");
        self.groups.insert(id.clone(), Arc::new(RwLock::new(session)));
        Ok(id)
    }

    /// Take a seat in a forming or active group.
    pub fn join(&self, group_id: &str, agent_id: &str, role: &str) -> Result<()> {
        let group = self.group(group_id)?;
        if !self.registry.contains(agent_id) {
            return Err(MeshError::invalid(format!(
                "unresolvable participant '{}'",
                agent_id
            )));
        }
        group.write().add_participant(Participant::new(agent_id, role))
    }

    /// Fan a message out to every participant concurrently and collect
    /// responses into the transcript in arrival order.
    pub async fn broadcast(&self, group_id: &str, message: Message) -> Result<BroadcastSummary> {
        let group = self.group(group_id)?;

        let participants = {
            let mut session = group.write();
            match session.phase() {
                GroupPhase::Forming => {
                    session.transition(GroupPhase::Active, "first broadcast")?;
                }
                GroupPhase::Active => {}
                other => {
                    return Err(MeshError::Conflict(format!(
                        "broadcast requires an active group (phase: {})",
                        other
                    )));
                }
            }
            session.record(TranscriptEntry::Broadcast {
                from: self.channel.local_agent().to_string(),
                message: message.clone(),
                at: Utc::now(),
            })?;
            session.participant_ids()
        };

        let deadline = self.broadcast_deadline;
        let mut rounds: FuturesUnordered<_> = participants
            .into_iter()
            .map(|agent_id| {
                let channel = Arc::clone(&self.channel);
                let message = message.clone();
                async move {
                    let started = Instant::now();
                    let result = channel
                        .send_with(&agent_id, message, None, Some(deadline))
                        .await;
                    (agent_id, started.elapsed(), result)
                }
            })
            .collect();

        let mut summary = BroadcastSummary::default();
        while let Some((agent_id, elapsed, result)) = rounds.next().await {
            let mut session = group.write();
            let entry = match result {
                Ok(response) => TranscriptEntry::Response {
                    from: agent_id.clone(),
                    message: response.message,
                    round_trip: elapsed,
                    at: Utc::now(),
                },
                Err(MeshError::Timeout { waited, .. }) => TranscriptEntry::Timeout {
                    participant: agent_id.clone(),
                    waited,
                    at: Utc::now(),
                },
                Err(MeshError::Unreachable { attempts, .. }) => TranscriptEntry::Unreachable {
                    participant: agent_id.clone(),
                    attempts,
                    at: Utc::now(),
                },
                Err(e) => {
                    warn!(group_id = %group_id, participant = %agent_id, error = %e, "Broadcast leg failed");
                    TranscriptEntry::Unreachable {
                        participant: agent_id.clone(),
                        attempts: 1,
                        at: Utc::now(),
                    }
                }
            };
            match session.record(entry) {
                Ok(()) => match session.transcript().last() {
                    Some(TranscriptEntry::Response { .. }) => summary.responses += 1,
                    Some(TranscriptEntry::Timeout { .. }) => summary.timeouts += 1,
                    _ => summary.unreachable += 1,
                },
                Err(e) => {
                    // Session closed mid-round: the arrival is rejected, not kept.
                    summary.rejected += 1;
                    warn!(group_id = %group_id, participant = %agent_id, error = %e, "Arrival after closure rejected");
                }
            }
        }

        debug!(
            group_id = %group_id,
            responses = summary.responses,
            timeouts = summary.timeouts,
            "Broadcast round collected"
        );
        Ok(summary)
    }

    /// Run the consensus phase: fan each decision point out as a vote
    /// directive, aggregate the ballots that arrive in time, close the
    /// session with the outcome.
    pub async fn submit_consensus(
        &self,
        group_id: &str,
        request: ConsensusRequest,
    ) -> Result<ConsensusOutcome> {
        let group = self.group(group_id)?;

        {
            let mut session = group.write();
            if session.phase() != GroupPhase::Active {
                return Err(MeshError::Conflict(format!(
                    "consensus requires an active group (phase: {})",
                    session.phase()
                )));
            }
            request.validate(&session.participant_ids())?;
            session.transition(GroupPhase::ConsensusPending, "consensus requested")?;
        }

        let mut decisions: Vec<DecisionResult> = Vec::new();
        for point in &request.decision_points {
            let participants = group.read().participant_ids();
            let votes = self
                .collect_votes(&group, group_id, point, participants)
                .await?;
            let table = request.weights.get(&point.category).ok_or_else(|| {
                MeshError::Internal(format!(
                    "missing weight table for category '{}'",
                    point.category
                ))
            })?;
            decisions.push(aggregate(point, table, &votes));
        }

        let outcome = ConsensusOutcome {
            decisions,
            tie_break: self.tie_break_policy(),
            concluded_at: Utc::now(),
        };

        {
            let mut session = group.write();
            if session.phase().is_terminal() {
                return Err(MeshError::Conflict(format!(
                    "group {} closed during consensus",
                    group_id
                )));
            }
            session.set_outcome(outcome.clone());
            session.transition(GroupPhase::Closed, "consensus concluded")?;
        }

        info!(group_id = %group_id, decisions = outcome.decisions.len(), "Consensus concluded");
        Ok(outcome)
    }

    /// Cancel a session: straight to closed with the reason recorded.
    /// Responses still in flight are rejected on arrival.
    pub fn cancel(&self, group_id: &str, reason: impl Into<String>) -> Result<()> {
        let group = self.group(group_id)?;
        let mut session = group.write();
        if session.phase().is_terminal() {
            return Err(MeshError::Conflict(format!(
                "group {} already closed",
                group_id
            )));
        }
        let reason = reason.into();
        session.record(TranscriptEntry::Cancelled {
            reason: reason.clone(),
            at: Utc::now(),
        })?;
        session.transition(GroupPhase::Closed, reason)?;
        info!(group_id = %group_id, "Group cancelled");
        Ok(())
    }

    /// Phase, transcript, and outcome; readable after close.
    pub fn state(&self, group_id: &str) -> Result<GroupState> {
        Ok(self.group(group_id)?.read().state())
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn group(&self, group_id: &str) -> Result<Arc<RwLock<GroupSession>>> {
        self.groups
            .get(group_id)
            .map(|g| Arc::clone(g.value()))
            .ok_or_else(|| MeshError::not_found("group", group_id))
    }

    async fn collect_votes(
        &self,
        group: &Arc<RwLock<GroupSession>>,
        group_id: &str,
        point: &super::consensus::DecisionPoint,
        participants: Vec<String>,
    ) -> Result<Vec<(String, String)>> {
        let deadline = self.vote_deadline;
        let mut rounds: FuturesUnordered<_> = participants
            .into_iter()
            .map(|agent_id| {
                let channel = Arc::clone(&self.channel);
                let request = VoteRequest {
                    decision_point: point.clone(),
                };
                async move {
                    let message = Message::directive(
                        Role::Coordinator,
                        vec![Part::text(&request.decision_point.prompt), Part::data(&request)?],
                    );
                    let result = channel
                        .send_with(&agent_id, message, None, Some(deadline))
                        .await;
                    Ok::<_, MeshError>((agent_id, result))
                }
            })
            .collect();

        let mut votes: Vec<(String, String)> = Vec::new();
        while let Some(leg) = rounds.next().await {
            let (agent_id, result) = leg?;
            let mut session = group.write();
            let recorded = match result {
                Ok(response) => match extract_ballot(&response, &point.id) {
                    Some(ballot) => {
                        votes.push((agent_id.clone(), ballot.option.clone()));
                        session.record(TranscriptEntry::Vote {
                            participant: agent_id.clone(),
                            decision_point: point.id.clone(),
                            option: ballot.option,
                            at: Utc::now(),
                        })
                    }
                    None => session.record(TranscriptEntry::Omission {
                        participant: agent_id.clone(),
                        decision_point: point.id.clone(),
                        reason: "malformed ballot".into(),
                        at: Utc::now(),
                    }),
                },
                Err(MeshError::Timeout { .. }) => session.record(TranscriptEntry::Omission {
                    participant: agent_id.clone(),
                    decision_point: point.id.clone(),
                    reason: "no response within deadline".into(),
                    at: Utc::now(),
                }),
                Err(e) => {
                    debug!(group_id = %group_id, participant = %agent_id, error = %e, "Vote leg failed");
                    session.record(TranscriptEntry::Omission {
                        participant: agent_id.clone(),
                        decision_point: point.id.clone(),
                        reason: format!("delivery failed: {}", e),
                        at: Utc::now(),
                    })
                }
            };
            // Closed mid-vote (cancellation): surface the conflict unchanged.
            recorded?;
        }

        Ok(votes)
    }
}

fn extract_ballot(response: &MessageEnvelope, point_id: &str) -> Option<VoteBallot> {
    response
        .message
        .extract_data::<VoteBallot>()
        .filter(|ballot| ballot.decision_point == point_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentCard;

    fn setup() -> (Arc<AgentRegistry>, GroupCoordinator) {
        let registry = Arc::new(AgentRegistry::new());
        let (channel, _transport) =
            MessagingChannel::with_local_transport("coordinator", Arc::clone(&registry));
        let coordinator = GroupCoordinator::new(Arc::clone(&registry), channel);
        (registry, coordinator)
    }

    fn register(registry: &AgentRegistry, id: &str) {
        registry
            .register(AgentCard::new(id, format!("{} agent", id), format!("local://{}", id)))
            .unwrap();
    }

    #[test]
    fn test_formation_validates_every_seat() {
        let (registry, coordinator) = setup();
        register(&registry, "dev");

        let err = coordinator
            .create(
                "pricing model",
                vec![
                    Participant::new("dev", "engineering"),
                    Participant::new("office", "operations"),
                ],
                CoordinationMode::Collaborative,
                DecisionMode::WeightedVote,
            )
            .unwrap_err();

        // The unresolvable seat is named, not silently dropped.
        match err {
            MeshError::InvalidInput(msg) => assert!(msg.contains("office")),
            other => panic!("Expected InvalidInput, got {:?}", other),
        }
        assert_eq!(coordinator.group_count(), 0);
    }

    #[test]
    fn test_duplicate_seats_rejected() {
        let (registry, coordinator) = setup();
        register(&registry, "dev");

        let err = coordinator
            .create(
                "topic",
                vec![
                    Participant::new("dev", "engineering"),
                    Participant::new("dev", "operations"),
                ],
                CoordinationMode::Collaborative,
                DecisionMode::Consensus,
            )
            .unwrap_err();
        assert!(matches!(err, MeshError::InvalidInput(_)));
    }

    #[test]
    fn test_join_unknown_group_is_not_found() {
        let (registry, coordinator) = setup();
        register(&registry, "dev");
        assert!(matches!(
            coordinator.join("missing", "dev", "engineering"),
            Err(MeshError::NotFound(_))
        ));
    }

    #[test]
    fn test_cancel_then_operations_conflict() {
        let (registry, coordinator) = setup();
        register(&registry, "dev");

        let id = coordinator
            .create(
                "topic",
                vec![Participant::new("dev", "engineering")],
                CoordinationMode::Directive,
                DecisionMode::Consensus,
            )
            .unwrap();

        coordinator.cancel(&id, "operator abort").unwrap();

        assert!(matches!(
            coordinator.cancel(&id, "again"),
            Err(MeshError::Conflict(_))
        ));
        register(&registry, "late");
        assert!(matches!(
            coordinator.join(&id, "late", "observer"),
            Err(MeshError::Conflict(_))
        ));

        // State stays readable after close, with the reason on record.
        let state = coordinator.state(&id).unwrap();
        assert_eq!(state.phase, GroupPhase::Closed);
        assert!(state
            .transcript
            .iter()
            .any(|e| matches!(e, TranscriptEntry::Cancelled { reason, .. } if reason == "operator abort")));
    }

    #[test]
    fn test_tie_break_policy_is_queryable() {
        let (_, coordinator) = setup();
        assert_eq!(
            coordinator.tie_break_policy(),
            TieBreakPolicy::HighestWeightThenSpecificationOrder
        );
    }
}
