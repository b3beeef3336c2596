use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agents::memory::{AgentMemory, TeamMemory};

/// Opaque ID types for type safety
pub type SessionCode = String;
pub type PlayerId = String;
pub type SubmissionId = String;
pub type TeamId = String;

/// Session-level lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Lobby,
    RoundSubmitting,
    RoundVoting,
    RoundResults,
    GameOver,
}

/// Round-level phase, one-way
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    Submitting,
    Voting,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Humans,
    Agents,
}

/// What kind of material a round is played on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RoundContent {
    Text,
    Image { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub submit_seconds: u32,
    pub vote_seconds: u32,
    pub results_seconds: u32,
    pub max_content_chars: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            submit_seconds: 180,
            vote_seconds: 120,
            results_seconds: 6,
            max_content_chars: 280,
        }
    }
}

impl GameConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            submit_seconds: std::env::var("GAME_SUBMIT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.submit_seconds),
            vote_seconds: std::env::var("GAME_VOTE_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.vote_seconds),
            results_seconds: defaults.results_seconds,
            max_content_chars: defaults.max_content_chars,
        }
    }
}

/// Color badges assigned uniquely within a session
pub const COLOR_IDS: &[&str] = &[
    "crimson", "azure", "emerald", "amber", "violet", "coral", "teal", "magenta", "olive",
    "indigo", "salmon", "slate",
];

/// Alias pool for agents. Plain human names so an impostor's name doesn't give it away.
pub const AGENT_ALIASES: &[&str] = &[
    "Alex", "Sam", "Jordan", "Casey", "Riley", "Morgan", "Jamie", "Quinn",
];

/// All agents in a session share one team
pub const AGENT_TEAM_ID: &str = "impostors";

#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub team_id: TeamId,
    pub memory: AgentMemory,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub alias: String,
    pub color_id: String,
    pub alive: bool,
    pub connected: bool,
    pub agent: Option<AgentProfile>,
    pub score: i32,
    pub missed_submissions: u32,
}

impl Player {
    pub fn is_agent(&self) -> bool {
        self.agent.is_some()
    }

    pub fn is_human(&self) -> bool {
        self.agent.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub author_id: PlayerId,
    pub content: String,
    pub round_number: u32,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Placeholder submissions (auto-filled at the voting transition) have empty content
    pub fn is_placeholder(&self) -> bool {
        self.content.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: PlayerId,
    pub submission_id: SubmissionId,
}

#[derive(Debug, Clone)]
pub struct Round {
    pub number: u32,
    pub content: RoundContent,
    pub target_alias: String,
    pub prompt: String,
    pub phase: RoundPhase,
    /// Snapshot of the alive players at round start; never grows
    pub participant_ids: Vec<PlayerId>,
    pub submissions: Vec<Submission>,
    pub votes: Vec<Vote>,
    pub eliminated_ids: Vec<PlayerId>,
    pub phase_deadline: Option<DateTime<Utc>>,
}

impl Round {
    pub fn is_participant(&self, player_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == player_id)
    }

    pub fn submission_of(&self, author_id: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.author_id == author_id)
    }

    pub fn has_voted(&self, voter_id: &str) -> bool {
        self.votes.iter().any(|v| v.voter_id == voter_id)
    }

    pub fn submission(&self, submission_id: &str) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.id == submission_id)
    }
}

#[derive(Debug)]
pub struct Session {
    pub code: SessionCode,
    pub state: SessionState,
    pub round_counter: u32,
    pub rounds: Vec<Round>,
    pub players: Vec<Player>,
    pub winner: Option<Winner>,
    pub host_id: PlayerId,
    pub team_memory: HashMap<TeamId, TeamMemory>,
    pub config: GameConfig,
}

impl Session {
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn player_by_alias(&self, alias: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.alias == alias)
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.alive)
    }

    pub fn alive_humans(&self) -> usize {
        self.alive_players().filter(|p| p.is_human()).count()
    }

    pub fn alive_agents(&self) -> usize {
        self.alive_players().filter(|p| p.is_agent()).count()
    }

    pub fn human_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_human()).count()
    }

    /// The single non-COMPLETED round, if any
    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last().filter(|r| r.phase != RoundPhase::Completed)
    }

    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        self.rounds
            .last_mut()
            .filter(|r| r.phase != RoundPhase::Completed)
    }

    /// Pick the next unused color badge from the palette
    pub fn next_color(&self) -> Option<String> {
        COLOR_IDS
            .iter()
            .find(|c| !self.players.iter().any(|p| p.color_id == **c))
            .map(|c| c.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GameConfig::default();
        assert_eq!(config.submit_seconds, 180);
        assert_eq!(config.vote_seconds, 120);
        assert_eq!(config.max_content_chars, 280);
    }

    #[test]
    fn test_round_content_serde_is_tagged() {
        let text = serde_json::to_value(RoundContent::Text).unwrap();
        assert_eq!(text["kind"], "text");

        let image = serde_json::to_value(RoundContent::Image {
            url: "https://example.com/cat.jpg".to_string(),
        })
        .unwrap();
        assert_eq!(image["kind"], "image");
        assert_eq!(image["url"], "https://example.com/cat.jpg");
    }

    #[test]
    fn test_placeholder_detection() {
        let sub = Submission {
            id: "s1".to_string(),
            author_id: "p1".to_string(),
            content: String::new(),
            round_number: 1,
            created_at: Utc::now(),
        };
        assert!(sub.is_placeholder());
    }
}
