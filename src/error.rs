use thiserror::Error;

/// Structured rejection for inbound actions. Never fatal: the session is left
/// untouched and the error is reported back to the originating caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Player not found in this session")]
    PlayerNotFound,

    #[error("Session is no longer accepting joins")]
    NotInLobby,

    #[error("Alias must be 1-24 characters")]
    InvalidAlias,

    #[error("Alias is already taken")]
    AliasTaken,

    #[error("Session is full")]
    SessionFull,

    #[error("Only the host can do that")]
    NotHost,

    #[error("Need at least {0} human players to start")]
    NotEnoughHumans(usize),

    #[error("Need at least {0} players to start")]
    NotEnoughPlayers(usize),

    #[error("Round {0} is not accepting this action")]
    RoundNotActive(u32),

    #[error("Wrong phase for this action")]
    WrongPhase,

    #[error("You are not a participant in this round")]
    NotParticipant,

    #[error("You already submitted this round")]
    AlreadySubmitted,

    #[error("You already voted this round")]
    AlreadyVoted,

    #[error("Submission content must not be empty")]
    EmptyContent,

    #[error("Content exceeds {0} characters")]
    ContentTooLong(usize),

    #[error("Unknown submission")]
    UnknownSubmission,

    #[error("The game is not over")]
    GameNotOver,
}

impl SessionError {
    /// Stable wire code for clients
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionNotFound => "SESSION_NOT_FOUND",
            SessionError::PlayerNotFound => "PLAYER_NOT_FOUND",
            SessionError::NotInLobby => "NOT_IN_LOBBY",
            SessionError::InvalidAlias => "INVALID_ALIAS",
            SessionError::AliasTaken => "ALIAS_TAKEN",
            SessionError::SessionFull => "SESSION_FULL",
            SessionError::NotHost => "NOT_HOST",
            SessionError::NotEnoughHumans(_) => "NOT_ENOUGH_HUMANS",
            SessionError::NotEnoughPlayers(_) => "NOT_ENOUGH_PLAYERS",
            SessionError::RoundNotActive(_) => "ROUND_NOT_ACTIVE",
            SessionError::WrongPhase => "WRONG_PHASE",
            SessionError::NotParticipant => "NOT_PARTICIPANT",
            SessionError::AlreadySubmitted => "ALREADY_SUBMITTED",
            SessionError::AlreadyVoted => "ALREADY_VOTED",
            SessionError::EmptyContent => "EMPTY_CONTENT",
            SessionError::ContentTooLong(_) => "CONTENT_TOO_LONG",
            SessionError::UnknownSubmission => "UNKNOWN_SUBMISSION",
            SessionError::GameNotOver => "GAME_NOT_OVER",
        }
    }
}
