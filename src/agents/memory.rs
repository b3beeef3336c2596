//! Per-agent and per-team memory.
//!
//! Team memory is the coordination substrate: it is how otherwise-independent
//! agent decisions avoid colliding (two agents saying the same thing, or
//! splitting their votes).

use std::collections::HashMap;

use crate::types::{PlayerId, SubmissionId};

/// Cached outcome of a toxicity assessment, keyed by the original text.
/// `display_text` is what agent paths are allowed to see.
#[derive(Debug, Clone)]
pub struct ToxicityVerdict {
    pub is_toxic: bool,
    pub display_text: String,
}

/// What an agent remembers about a finished round
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round_number: u32,
    pub target_alias: String,
    /// (author alias, sanitized content)
    pub submissions: Vec<(String, String)>,
    /// (voter alias, voted-for author alias)
    pub votes: Vec<(String, String)>,
    pub eliminated_aliases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    pub eliminated: Vec<PlayerId>,
    pub rounds: Vec<RoundSummary>,
    pub notes: Vec<String>,
    pub toxicity_cache: HashMap<String, ToxicityVerdict>,
}

/// Per-round coordination plan shared by the team
#[derive(Debug, Clone)]
pub struct RoundPlan {
    pub round_number: u32,
    /// Text already used by teammates this round, to avoid duplicate phrasing
    pub used_texts: Vec<String>,
    /// Precomputed target guaranteeing every agent can vote before the deadline
    pub fallback_vote: Option<SubmissionId>,
}

#[derive(Debug, Clone, Default)]
pub struct TeamMemory {
    pub eliminated: Vec<PlayerId>,
    pub rounds: Vec<RoundSummary>,
    pub notes: Vec<String>,
    pub toxicity_cache: HashMap<String, ToxicityVerdict>,
    pub plan: Option<RoundPlan>,
}

impl TeamMemory {
    /// Get the plan for the given round, resetting any stale plan from an earlier round
    pub fn plan_mut(&mut self, round_number: u32) -> &mut RoundPlan {
        let stale = self
            .plan
            .as_ref()
            .map(|p| p.round_number != round_number)
            .unwrap_or(true);
        if stale {
            self.plan = None;
        }
        self.plan.get_or_insert_with(|| RoundPlan {
            round_number,
            used_texts: Vec::new(),
            fallback_vote: None,
        })
    }

    pub fn plan_for(&self, round_number: u32) -> Option<&RoundPlan> {
        self.plan.as_ref().filter(|p| p.round_number == round_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_resets_between_rounds() {
        let mut team = TeamMemory::default();

        team.plan_mut(1).used_texts.push("hello".to_string());
        assert_eq!(team.plan_for(1).unwrap().used_texts.len(), 1);

        // New round starts fresh
        let plan = team.plan_mut(2);
        assert!(plan.used_texts.is_empty());
        assert!(team.plan_for(1).is_none());
    }

    #[test]
    fn test_plan_persists_within_round() {
        let mut team = TeamMemory::default();
        team.plan_mut(3).fallback_vote = Some("sub_a".to_string());
        team.plan_mut(3).used_texts.push("one".to_string());

        let plan = team.plan_for(3).unwrap();
        assert_eq!(plan.fallback_vote.as_deref(), Some("sub_a"));
        assert_eq!(plan.used_texts, vec!["one".to_string()]);
    }
}
