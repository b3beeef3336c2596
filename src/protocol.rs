use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateSession {
        alias: String,
    },
    JoinSession {
        code: SessionCode,
        alias: String,
    },
    /// Host only: first round. Requires >=2 humans; the agent roster is
    /// reconciled to the human count before play begins.
    StartSession {
        code: SessionCode,
        player_id: PlayerId,
        content: RoundContent,
    },
    Submit {
        code: SessionCode,
        round_number: u32,
        player_id: PlayerId,
        content: String,
    },
    VotingOptions {
        code: SessionCode,
        round_number: u32,
    },
    Vote {
        code: SessionCode,
        round_number: u32,
        player_id: PlayerId,
        submission_id: SubmissionId,
    },
    /// Re-associate a transport identity with an existing player
    Reconnect {
        code: SessionCode,
        player_id: PlayerId,
    },
    /// Host only, from GAME_OVER: new game with the same roster
    Restart {
        code: SessionCode,
        player_id: PlayerId,
        content: RoundContent,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionCreated {
        code: SessionCode,
        player_id: PlayerId,
        session: SessionSnapshot,
    },
    Joined {
        player_id: PlayerId,
        session: SessionSnapshot,
    },
    Reconnected {
        player_id: PlayerId,
        session: SessionSnapshot,
        has_submitted: bool,
        has_voted: bool,
    },
    /// Full snapshot, broadcast after every state-affecting mutation
    Session {
        session: SessionSnapshot,
    },
    /// Author identity deliberately withheld
    VotingOptions {
        round_number: u32,
        options: Vec<VotingOption>,
    },
    SubmissionAccepted {
        round_number: u32,
    },
    VoteAccepted {
        round_number: u32,
    },
    Error {
        code: String,
        msg: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingOption {
    pub submission_id: SubmissionId,
    pub color_id: String,
    pub content: String,
}

/// Public player info. Whether a player is an agent stays hidden until the
/// session is over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub alias: String,
    pub color_id: String,
    pub alive: bool,
    pub connected: bool,
    pub score: i32,
    pub has_submitted: bool,
    pub has_voted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundInfo {
    pub number: u32,
    pub content: RoundContent,
    pub target_alias: String,
    pub prompt: String,
    pub phase: RoundPhase,
    pub phase_deadline: Option<DateTime<Utc>>,
    pub participant_count: usize,
    pub submitted_count: usize,
    pub voted_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResultInfo {
    pub number: u32,
    pub target_alias: String,
    pub eliminated_aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub code: SessionCode,
    pub state: SessionState,
    pub round_number: u32,
    pub players: Vec<PlayerInfo>,
    pub current_round: Option<RoundInfo>,
    pub history: Vec<RoundResultInfo>,
    pub winner: Option<Winner>,
    /// Agent identities, revealed only once the game is over
    pub revealed_agents: Vec<PlayerId>,
    pub server_now: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn of(session: &Session) -> Self {
        let current = session.current_round();

        let players = session
            .players
            .iter()
            .map(|p| PlayerInfo {
                id: p.id.clone(),
                alias: p.alias.clone(),
                color_id: p.color_id.clone(),
                alive: p.alive,
                connected: p.connected,
                score: p.score,
                has_submitted: current
                    .map(|r| r.submission_of(&p.id).is_some())
                    .unwrap_or(false),
                has_voted: current.map(|r| r.has_voted(&p.id)).unwrap_or(false),
            })
            .collect();

        let history = session
            .rounds
            .iter()
            .filter(|r| r.phase == RoundPhase::Completed)
            .map(|r| RoundResultInfo {
                number: r.number,
                target_alias: r.target_alias.clone(),
                eliminated_aliases: r
                    .eliminated_ids
                    .iter()
                    .filter_map(|id| session.player(id).map(|p| p.alias.clone()))
                    .collect(),
            })
            .collect();

        let revealed_agents = if session.state == SessionState::GameOver {
            session
                .players
                .iter()
                .filter(|p| p.is_agent())
                .map(|p| p.id.clone())
                .collect()
        } else {
            Vec::new()
        };

        Self {
            code: session.code.clone(),
            state: session.state,
            round_number: session.round_counter,
            players,
            current_round: current.map(|r| RoundInfo {
                number: r.number,
                content: r.content.clone(),
                target_alias: r.target_alias.clone(),
                prompt: r.prompt.clone(),
                phase: r.phase,
                phase_deadline: r.phase_deadline,
                participant_count: r.participant_ids.len(),
                submitted_count: r.submissions.len(),
                voted_count: r.votes.len(),
            }),
            history,
            winner: session.winner,
            revealed_agents,
            server_now: Utc::now(),
        }
    }
}
