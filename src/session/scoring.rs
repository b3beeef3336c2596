//! Per-round scoring, applied once at finalization.

use std::collections::HashMap;

use crate::types::{PlayerId, Round, SubmissionId};

/// Descending speed bonus for the fastest three non-empty submissions
pub const SPEED_BONUSES: [i32; 3] = [5, 3, 1];
/// Flat bonus for any non-empty submission
pub const PARTICIPATION_POINTS: i32 = 2;
/// Flat penalty for an empty (placeholder) submission
pub const MISS_PENALTY: i32 = 2;
/// Consecutive missed submissions before a player is eliminated outright
pub const MISS_LIMIT: u32 = 2;

/// Pure result of scoring a completed round's submissions
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RoundScoring {
    pub deltas: HashMap<PlayerId, i32>,
    /// Authors whose missed-submission counter increments this round
    pub missed: Vec<PlayerId>,
    /// Authors whose missed-submission counter resets to zero
    pub participated: Vec<PlayerId>,
}

/// Compute score deltas and missed-submission effects from a round's submissions.
pub fn score_round(round: &Round) -> RoundScoring {
    let mut scoring = RoundScoring::default();

    // Rank non-empty submissions by earliest timestamp for the speed bonus
    let mut ranked: Vec<_> = round
        .submissions
        .iter()
        .filter(|s| !s.is_placeholder())
        .collect();
    ranked.sort_by_key(|s| s.created_at);

    for (i, submission) in ranked.iter().enumerate() {
        let mut points = PARTICIPATION_POINTS;
        if let Some(bonus) = SPEED_BONUSES.get(i) {
            points += bonus;
        }
        *scoring.deltas.entry(submission.author_id.clone()).or_insert(0) += points;
        scoring.participated.push(submission.author_id.clone());
    }

    for submission in round.submissions.iter().filter(|s| s.is_placeholder()) {
        *scoring.deltas.entry(submission.author_id.clone()).or_insert(0) -= MISS_PENALTY;
        scoring.missed.push(submission.author_id.clone());
    }

    scoring
}

/// Tally votes by submission id
pub fn tally_votes(round: &Round) -> HashMap<SubmissionId, u32> {
    let mut counts: HashMap<SubmissionId, u32> = HashMap::new();
    for vote in &round.votes {
        *counts.entry(vote.submission_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// The author eliminated by the vote, if any. A multi-way tie at the top count
/// is treated as "no consensus" and eliminates nobody (deliberate policy).
pub fn vote_eliminated_author(round: &Round) -> Option<PlayerId> {
    let counts = tally_votes(round);
    let max = counts.values().copied().max()?;
    let mut top = counts.iter().filter(|(_, c)| **c == max);

    let (submission_id, _) = top.next()?;
    if top.next().is_some() {
        return None;
    }
    round
        .submission(submission_id)
        .map(|s| s.author_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RoundContent, RoundPhase, Submission, Vote};
    use chrono::{Duration, Utc};

    fn round_with(submissions: Vec<Submission>, votes: Vec<Vote>) -> Round {
        Round {
            number: 1,
            content: RoundContent::Text,
            target_alias: "ada".to_string(),
            prompt: "test".to_string(),
            phase: RoundPhase::Voting,
            participant_ids: submissions.iter().map(|s| s.author_id.clone()).collect(),
            submissions,
            votes,
            eliminated_ids: Vec::new(),
            phase_deadline: None,
        }
    }

    fn sub(id: &str, author: &str, content: &str, offset_ms: i64) -> Submission {
        Submission {
            id: id.to_string(),
            author_id: author.to_string(),
            content: content.to_string(),
            round_number: 1,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    fn vote(voter: &str, submission: &str) -> Vote {
        Vote {
            voter_id: voter.to_string(),
            submission_id: submission.to_string(),
        }
    }

    #[test]
    fn test_speed_bonus_ordering() {
        // Three non-empty at t, t+100, t+200, one empty at t+50
        let round = round_with(
            vec![
                sub("s1", "p1", "fastest", 0),
                sub("s2", "p2", "", 50),
                sub("s3", "p3", "second", 100),
                sub("s4", "p4", "third", 200),
            ],
            vec![
                vote("p1", "s2"),
                vote("p3", "s2"),
                vote("p4", "s2"),
                vote("p2", "s1"),
            ],
        );

        let scoring = score_round(&round);
        assert_eq!(scoring.deltas["p1"], PARTICIPATION_POINTS + 5);
        assert_eq!(scoring.deltas["p3"], PARTICIPATION_POINTS + 3);
        assert_eq!(scoring.deltas["p4"], PARTICIPATION_POINTS + 1);
        assert_eq!(scoring.deltas["p2"], -MISS_PENALTY);
        assert_eq!(scoring.missed, vec!["p2".to_string()]);
        assert_eq!(scoring.participated.len(), 3);

        // The empty-content author also loses the vote
        assert_eq!(vote_eliminated_author(&round), Some("p2".to_string()));
    }

    #[test]
    fn test_fourth_fastest_gets_no_speed_bonus() {
        let round = round_with(
            vec![
                sub("s1", "p1", "a", 0),
                sub("s2", "p2", "b", 1),
                sub("s3", "p3", "c", 2),
                sub("s4", "p4", "d", 3),
            ],
            vec![],
        );

        let scoring = score_round(&round);
        assert_eq!(scoring.deltas["p4"], PARTICIPATION_POINTS);
    }

    #[test]
    fn test_tie_at_top_eliminates_nobody() {
        let round = round_with(
            vec![sub("s1", "p1", "a", 0), sub("s2", "p2", "b", 1)],
            vec![vote("p1", "s2"), vote("p2", "s1")],
        );

        assert_eq!(vote_eliminated_author(&round), None);
    }

    #[test]
    fn test_strict_maximum_eliminates_single_author() {
        let round = round_with(
            vec![
                sub("s1", "p1", "a", 0),
                sub("s2", "p2", "b", 1),
                sub("s3", "p3", "c", 2),
            ],
            vec![vote("p1", "s2"), vote("p3", "s2"), vote("p2", "s1")],
        );

        assert_eq!(vote_eliminated_author(&round), Some("p2".to_string()));
    }

    #[test]
    fn test_no_votes_eliminates_nobody() {
        let round = round_with(vec![sub("s1", "p1", "a", 0)], vec![]);
        assert_eq!(vote_eliminated_author(&round), None);
    }

    #[test]
    fn test_tally_counts_per_submission() {
        let round = round_with(
            vec![sub("s1", "p1", "a", 0), sub("s2", "p2", "b", 1)],
            vec![vote("p1", "s2"), vote("p2", "s1"), vote("p3", "s2")],
        );

        let counts = tally_votes(&round);
        assert_eq!(counts.get("s2"), Some(&2));
        assert_eq!(counts.get("s1"), Some(&1));
    }
}
