//! Weighted-consensus aggregation over decision points.
//!
//! Aggregation renormalizes category weights over the participants who
//! actually responded by the deadline; non-responders are excluded from the
//! denominator, never treated as zero-weight abstentions against the full
//! weight table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// Permitted drift when a category's weights are checked against 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Aggregated scores closer than this are a tie.
const SCORE_EPSILON: f64 = 1e-9;

/// One question the group must settle, with its candidate options in
/// the order the caller specified (that order is the final tie-break).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub category: String,
}

impl DecisionPoint {
    pub fn new(
        id: impl Into<String>,
        prompt: impl Into<String>,
        options: Vec<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options,
            category: category.into(),
        }
    }
}

/// A consensus submission: decision points plus per-category voting-weight
/// tables keyed by participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub decision_points: Vec<DecisionPoint>,
    /// category -> participant -> weight in [0, 1].
    pub weights: HashMap<String, HashMap<String, f64>>,
}

impl ConsensusRequest {
    pub fn validate(&self, participant_ids: &[String]) -> Result<()> {
        if self.decision_points.is_empty() {
            return Err(MeshError::invalid(
                "consensus request must name at least one decision point",
            ));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for point in &self.decision_points {
            if point.id.trim().is_empty() {
                return Err(MeshError::invalid("decision point id must not be empty"));
            }
            if !seen_ids.insert(point.id.as_str()) {
                return Err(MeshError::invalid(format!(
                    "duplicate decision point id '{}'",
                    point.id
                )));
            }
            if point.options.is_empty() {
                return Err(MeshError::invalid(format!(
                    "decision point '{}' has no options",
                    point.id
                )));
            }
            if !self.weights.contains_key(&point.category) {
                return Err(MeshError::invalid(format!(
                    "no weight table for category '{}'",
                    point.category
                )));
            }
        }

        for (category, table) in &self.weights {
            let mut sum = 0.0;
            for (participant, weight) in table {
                if !participant_ids.iter().any(|p| p == participant) {
                    return Err(MeshError::invalid(format!(
                        "weight table '{}' names unknown participant '{}'",
                        category, participant
                    )));
                }
                if !(0.0..=1.0).contains(weight) {
                    return Err(MeshError::invalid(format!(
                        "weight {} for '{}' in category '{}' outside [0, 1]",
                        weight, participant, category
                    )));
                }
                sum += weight;
            }
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(MeshError::invalid(format!(
                    "weights for category '{}' sum to {}, expected 1.0",
                    category, sum
                )));
            }
        }

        Ok(())
    }
}

/// Vote request fanned out to each participant as a data part of a task
/// directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub decision_point: DecisionPoint,
}

/// A participant's answer, carried back as a data part of the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteBallot {
    pub decision_point: String,
    pub option: String,
}

/// How the winner of a decision point was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// Highest aggregated score, no tie.
    Score,
    /// Tie broken by the responder holding the highest single weight.
    HighestWeightPreference,
    /// Tie still unresolved; first option as specified wins.
    SpecificationOrder,
}

/// Deterministic tie-break policy. Exposed so callers can query the rule
/// rather than discovering it empirically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Equal scores go to the option favored by the participant with the
    /// highest single weight in the deciding category; a remaining tie goes
    /// to the option listed first in the decision point.
    #[default]
    HighestWeightThenSpecificationOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionScore {
    pub option: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResult {
    pub decision_point: String,
    pub winner: String,
    /// Scores in the option order of the decision point.
    pub scores: Vec<OptionScore>,
    /// Participants whose votes entered the renormalized aggregation.
    pub responders: Vec<String>,
    /// Participants left out of this round (non-responders, unweighted
    /// voters, invalid ballots).
    pub excluded: Vec<String>,
    pub decided_by: DecisionRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub decisions: Vec<DecisionResult>,
    pub tie_break: TieBreakPolicy,
    pub concluded_at: DateTime<Utc>,
}

/// Aggregate one decision point from the votes that arrived in time.
///
/// `votes` is (participant, option) in arrival order; `weights` is the raw
/// weight table for the point's category. Weights are renormalized over the
/// weighted participants who actually voted.
pub fn aggregate(
    point: &DecisionPoint,
    weights: &HashMap<String, f64>,
    votes: &[(String, String)],
) -> DecisionResult {
    let mut responders: Vec<(String, f64, String)> = Vec::new();
    let mut excluded: Vec<String> = Vec::new();

    for (participant, option) in votes {
        if !point.options.iter().any(|o| o == option) {
            excluded.push(participant.clone());
            continue;
        }
        match weights.get(participant) {
            Some(weight) => responders.push((participant.clone(), *weight, option.clone())),
            None => excluded.push(participant.clone()),
        }
    }

    // Weighted participants who never voted are excluded from the
    // renormalized denominator.
    for participant in weights.keys() {
        if !votes.iter().any(|(p, _)| p == participant) {
            excluded.push(participant.clone());
        }
    }

    let denominator: f64 = responders.iter().map(|(_, w, _)| w).sum();

    let mut scores: Vec<OptionScore> = point
        .options
        .iter()
        .map(|option| OptionScore {
            option: option.clone(),
            score: 0.0,
        })
        .collect();

    if denominator > 0.0 {
        for (_, weight, option) in &responders {
            if let Some(entry) = scores.iter_mut().find(|s| &s.option == option) {
                entry.score += weight / denominator;
            }
        }
    }

    let (winner, decided_by) = pick_winner(point, &scores, &responders);

    DecisionResult {
        decision_point: point.id.clone(),
        winner,
        scores,
        responders: responders.into_iter().map(|(p, _, _)| p).collect(),
        excluded,
        decided_by,
    }
}

fn pick_winner(
    point: &DecisionPoint,
    scores: &[OptionScore],
    responders: &[(String, f64, String)],
) -> (String, DecisionRule) {
    let top = scores
        .iter()
        .map(|s| s.score)
        .fold(f64::NEG_INFINITY, f64::max);

    let tied: Vec<&str> = scores
        .iter()
        .filter(|s| (top - s.score).abs() < SCORE_EPSILON)
        .map(|s| s.option.as_str())
        .collect();

    if tied.len() == 1 && top > 0.0 {
        return (tied[0].to_string(), DecisionRule::Score);
    }

    // Tie: prefer the option voted by the heaviest single responder.
    let heaviest = responders
        .iter()
        .filter(|(_, _, option)| tied.contains(&option.as_str()))
        .fold(f64::NEG_INFINITY, |acc, (_, w, _)| acc.max(*w));

    if heaviest > f64::NEG_INFINITY {
        let favored: Vec<&str> = responders
            .iter()
            .filter(|(_, w, option)| {
                (w - heaviest).abs() < SCORE_EPSILON && tied.contains(&option.as_str())
            })
            .map(|(_, _, option)| option.as_str())
            .collect();

        if let [single] = favored.as_slice() {
            return (single.to_string(), DecisionRule::HighestWeightPreference);
        }
        if let Some(first) = favored.first() {
            // Heaviest responders disagree among tied options; first as
            // specified wins.
            if favored.iter().all(|o| o == first) {
                return (first.to_string(), DecisionRule::HighestWeightPreference);
            }
        }
    }

    let first_tied = point
        .options
        .iter()
        .find(|o| tied.contains(&o.as_str()))
        .cloned()
        .unwrap_or_else(|| point.options[0].clone());
    (first_tied, DecisionRule::SpecificationOrder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> DecisionPoint {
        DecisionPoint::new(
            "dp-1",
            "Which pricing model?",
            vec!["X".into(), "Y".into()],
            "technical",
        )
    }

    fn weights(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(p, w)| (p.to_string(), *w))
            .collect()
    }

    fn votes(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(p, o)| (p.to_string(), o.to_string()))
            .collect()
    }

    #[test]
    fn test_full_participation_aggregation() {
        let result = aggregate(
            &point(),
            &weights(&[("p1", 0.4), ("p2", 0.4), ("p3", 0.2)]),
            &votes(&[("p1", "X"), ("p2", "X"), ("p3", "Y")]),
        );

        assert_eq!(result.winner, "X");
        assert_eq!(result.decided_by, DecisionRule::Score);
        assert!((result.scores[0].score - 0.8).abs() < 1e-9);
        assert!((result.scores[1].score - 0.2).abs() < 1e-9);
        assert_eq!(result.responders.len(), 3);
        assert!(result.excluded.is_empty());
    }

    #[test]
    fn test_renormalization_over_responders() {
        // p3 timed out: remaining weights renormalize to {p1: 0.5, p2: 0.5}.
        let result = aggregate(
            &point(),
            &weights(&[("p1", 0.4), ("p2", 0.4), ("p3", 0.2)]),
            &votes(&[("p1", "X"), ("p2", "X")]),
        );

        assert_eq!(result.winner, "X");
        assert!((result.scores[0].score - 1.0).abs() < 1e-9);
        assert!((result.scores[1].score - 0.0).abs() < 1e-9);
        assert_eq!(result.excluded, vec!["p3".to_string()]);
    }

    #[test]
    fn test_unweighted_voter_is_excluded_not_zeroed() {
        let result = aggregate(
            &point(),
            &weights(&[("p1", 0.6), ("p2", 0.4)]),
            &votes(&[("p1", "X"), ("stranger", "Y")]),
        );

        assert_eq!(result.winner, "X");
        // p1's weight renormalizes to 1.0; the stranger never enters the
        // denominator.
        assert!((result.scores[0].score - 1.0).abs() < 1e-9);
        assert!(result.excluded.contains(&"stranger".to_string()));
        assert!(result.excluded.contains(&"p2".to_string()));
    }

    #[test]
    fn test_tie_broken_by_highest_single_weight() {
        let result = aggregate(
            &point(),
            &weights(&[("p1", 0.5), ("p2", 0.3), ("p3", 0.2)]),
            &votes(&[("p1", "Y"), ("p2", "X"), ("p3", "X")]),
        );

        // 0.5 vs 0.5: p1 holds the single highest weight and favored Y.
        assert_eq!(result.winner, "Y");
        assert_eq!(result.decided_by, DecisionRule::HighestWeightPreference);
    }

    #[test]
    fn test_tie_falls_back_to_specification_order() {
        let result = aggregate(
            &point(),
            &weights(&[("p1", 0.5), ("p2", 0.5)]),
            &votes(&[("p2", "Y"), ("p1", "X")]),
        );

        // Equal scores, equal top weights: first-listed option wins.
        assert_eq!(result.winner, "X");
        assert_eq!(result.decided_by, DecisionRule::SpecificationOrder);
    }

    #[test]
    fn test_no_weighted_responders() {
        let result = aggregate(
            &point(),
            &weights(&[("p1", 1.0)]),
            &votes(&[]),
        );

        assert_eq!(result.winner, "X");
        assert_eq!(result.decided_by, DecisionRule::SpecificationOrder);
        assert!(result.responders.is_empty());
        assert_eq!(result.excluded, vec!["p1".to_string()]);
    }

    #[test]
    fn test_invalid_option_vote_excluded() {
        let result = aggregate(
            &point(),
            &weights(&[("p1", 0.5), ("p2", 0.5)]),
            &votes(&[("p1", "X"), ("p2", "Z")]),
        );

        assert_eq!(result.winner, "X");
        assert_eq!(result.responders, vec!["p1".to_string()]);
        assert!(result.excluded.contains(&"p2".to_string()));
    }

    mod validation {
        use super::*;

        fn participants() -> Vec<String> {
            vec!["p1".into(), "p2".into(), "p3".into()]
        }

        fn valid_request() -> ConsensusRequest {
            let mut weights = HashMap::new();
            weights.insert(
                "technical".to_string(),
                super::weights(&[("p1", 0.4), ("p2", 0.4), ("p3", 0.2)]),
            );
            ConsensusRequest {
                decision_points: vec![point()],
                weights,
            }
        }

        #[test]
        fn test_valid_request_passes() {
            assert!(valid_request().validate(&participants()).is_ok());
        }

        #[test]
        fn test_empty_points_rejected() {
            let mut request = valid_request();
            request.decision_points.clear();
            assert!(request.validate(&participants()).is_err());
        }

        #[test]
        fn test_weight_sum_must_be_one() {
            let mut request = valid_request();
            request
                .weights
                .insert("technical".into(), super::weights(&[("p1", 0.4), ("p2", 0.4)]));
            let err = request.validate(&participants()).unwrap_err();
            assert!(matches!(err, MeshError::InvalidInput(_)));
        }

        #[test]
        fn test_weight_range_enforced() {
            let mut request = valid_request();
            request.weights.insert(
                "technical".into(),
                super::weights(&[("p1", 1.4), ("p2", -0.4)]),
            );
            assert!(request.validate(&participants()).is_err());
        }

        #[test]
        fn test_unknown_participant_in_table_rejected() {
            let mut request = valid_request();
            request.weights.insert(
                "technical".into(),
                super::weights(&[("p1", 0.5), ("ghost", 0.5)]),
            );
            assert!(request.validate(&participants()).is_err());
        }

        #[test]
        fn test_missing_category_table_rejected() {
            let mut request = valid_request();
            request.weights.clear();
            assert!(request.validate(&participants()).is_err());
        }

        #[test]
        fn test_duplicate_point_ids_rejected() {
            let mut request = valid_request();
            request.decision_points.push(point());
            assert!(request.validate(&participants()).is_err());
        }
    }
}
