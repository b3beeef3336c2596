pub mod lifecycle;
pub mod scoring;
pub mod timers;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::error::SessionError;
use crate::llm::LlmProvider;
use crate::moderation::ModerationClient;
use crate::protocol::{ServerMessage, SessionSnapshot};
use crate::types::*;

/// Per-session actor: all mutation goes through the inner mutex, so inbound
/// actions and timer callbacks never interleave mid-transition. Cheap to
/// clone; clones share the same session.
#[derive(Clone)]
pub struct SessionHandle {
    pub code: SessionCode,
    pub(crate) state: Arc<Mutex<Session>>,
    pub(crate) timers: Arc<timers::TimerSet>,
    /// One broadcast channel per session; a full snapshot is sent after every
    /// state-affecting mutation
    pub events: broadcast::Sender<ServerMessage>,
    pub(crate) llm: Option<Arc<dyn LlmProvider>>,
    pub(crate) moderation: Arc<ModerationClient>,
}

impl SessionHandle {
    pub fn new(
        code: SessionCode,
        host_alias: &str,
        config: GameConfig,
        llm: Option<Arc<dyn LlmProvider>>,
        moderation: Arc<ModerationClient>,
    ) -> Result<(Self, Player), SessionError> {
        let alias = validate_alias(host_alias)?;
        let host = Player {
            id: ulid::Ulid::new().to_string(),
            alias,
            color_id: COLOR_IDS[0].to_string(),
            alive: true,
            connected: true,
            agent: None,
            score: 0,
            missed_submissions: 0,
        };

        let session = Session {
            code: code.clone(),
            state: SessionState::Lobby,
            round_counter: 0,
            rounds: Vec::new(),
            players: vec![host.clone()],
            winner: None,
            host_id: host.id.clone(),
            team_memory: HashMap::new(),
            config,
        };

        let (tx, _rx) = broadcast::channel(100);
        let handle = Self {
            code,
            state: Arc::new(Mutex::new(session)),
            timers: Arc::new(timers::TimerSet::default()),
            events: tx,
            llm,
            moderation,
        };
        Ok((handle, host))
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::of(&*self.state.lock().await)
    }

    /// Emit a snapshot to all connected clients. Send errors just mean nobody
    /// is listening.
    pub(crate) fn broadcast(&self, session: &Session) {
        let _ = self.events.send(ServerMessage::Session {
            session: SessionSnapshot::of(session),
        });
    }
}

pub(crate) fn validate_alias(alias: &str) -> Result<String, SessionError> {
    let alias = alias.trim();
    if alias.is_empty() || alias.chars().count() > 24 {
        return Err(SessionError::InvalidAlias);
    }
    Ok(alias.to_string())
}

/// The one capability the agent orchestrator gets for changing game state:
/// it proposes candidate actions, the state machine owns the transition
/// rules. Stale or duplicate proposals are dropped, not errors.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn apply_submission(&self, round_number: u32, player_id: &str, content: String);
    async fn apply_vote(&self, round_number: u32, player_id: &str, submission_id: &str);
}

#[async_trait]
impl ActionSink for SessionHandle {
    async fn apply_submission(&self, round_number: u32, player_id: &str, content: String) {
        if let Err(e) = self.submit(round_number, player_id, content).await {
            tracing::debug!(
                "Dropped agent submission for round {} ({}): {}",
                round_number,
                player_id,
                e
            );
        }
    }

    async fn apply_vote(&self, round_number: u32, player_id: &str, submission_id: &str) {
        if let Err(e) = self.vote(round_number, player_id, submission_id).await {
            tracing::debug!(
                "Dropped agent vote for round {} ({}): {}",
                round_number,
                player_id,
                e
            );
        }
    }
}
