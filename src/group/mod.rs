//! Group sessions: broadcast rounds and weighted consensus.

mod consensus;
mod coordinator;
mod phase;
mod session;

pub use consensus::{
    ConsensusOutcome, ConsensusRequest, DecisionPoint, DecisionResult, DecisionRule, OptionScore,
    TieBreakPolicy, VoteBallot, VoteRequest, WEIGHT_SUM_TOLERANCE, aggregate,
};
pub use coordinator::{BroadcastSummary, GroupCoordinator};
pub use phase::{GroupPhase, PhaseTransition};
pub use session::{
    CoordinationMode, DecisionMode, GroupSession, GroupState, Participant, TranscriptEntry,
};
