//! WebSocket message dispatch
//!
//! Every message carries the session code and (where relevant) the sender's
//! player id; there is no per-connection authentication beyond that binding.

use std::sync::Arc;

use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::AppState;

use super::Binding;

fn error_response(e: SessionError) -> Option<ServerMessage> {
    Some(ServerMessage::Error {
        code: e.code().to_string(),
        msg: e.to_string(),
    })
}

async fn lookup(state: &Arc<AppState>, code: &str) -> Result<crate::session::SessionHandle, SessionError> {
    state
        .sessions
        .get(code)
        .await
        .ok_or(SessionError::SessionNotFound)
}

/// Handle a client message, returning an optional direct response plus an
/// optional new session binding for this connection.
pub async fn handle_message(
    msg: ClientMessage,
    state: &Arc<AppState>,
) -> (Option<ServerMessage>, Option<Binding>) {
    match msg {
        ClientMessage::CreateSession { alias } => match state.create_session(&alias).await {
            Ok((session, host)) => {
                let snapshot = session.snapshot().await;
                let binding = Binding {
                    player_id: host.id.clone(),
                    session,
                };
                (
                    Some(ServerMessage::SessionCreated {
                        code: snapshot.code.clone(),
                        player_id: host.id,
                        session: snapshot,
                    }),
                    Some(binding),
                )
            }
            Err(e) => (error_response(e), None),
        },

        ClientMessage::JoinSession { code, alias } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.join(&alias).await {
                Ok(player) => {
                    let snapshot = session.snapshot().await;
                    let binding = Binding {
                        player_id: player.id.clone(),
                        session,
                    };
                    (
                        Some(ServerMessage::Joined {
                            player_id: player.id,
                            session: snapshot,
                        }),
                        Some(binding),
                    )
                }
                Err(e) => (error_response(e), None),
            }
        }

        ClientMessage::Reconnect { code, player_id } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.reconnect(&player_id).await {
                Ok((player, has_submitted, has_voted)) => {
                    let snapshot = session.snapshot().await;
                    let binding = Binding {
                        player_id: player.id.clone(),
                        session,
                    };
                    (
                        Some(ServerMessage::Reconnected {
                            player_id: player.id,
                            session: snapshot,
                            has_submitted,
                            has_voted,
                        }),
                        Some(binding),
                    )
                }
                Err(e) => (error_response(e), None),
            }
        }

        ClientMessage::StartSession {
            code,
            player_id,
            content,
        } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.start(&player_id, content).await {
                // The broadcast snapshot carries the new round
                Ok(()) => (None, None),
                Err(e) => (error_response(e), None),
            }
        }

        ClientMessage::Restart {
            code,
            player_id,
            content,
        } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.restart(&player_id, content).await {
                Ok(()) => (None, None),
                Err(e) => (error_response(e), None),
            }
        }

        ClientMessage::Submit {
            code,
            round_number,
            player_id,
            content,
        } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.submit(round_number, &player_id, content).await {
                Ok(()) => (
                    Some(ServerMessage::SubmissionAccepted { round_number }),
                    None,
                ),
                Err(e) => (error_response(e), None),
            }
        }

        ClientMessage::VotingOptions { code, round_number } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.voting_options(round_number).await {
                Ok(options) => (
                    Some(ServerMessage::VotingOptions {
                        round_number,
                        options,
                    }),
                    None,
                ),
                Err(e) => (error_response(e), None),
            }
        }

        ClientMessage::Vote {
            code,
            round_number,
            player_id,
            submission_id,
        } => {
            let session = match lookup(state, &code).await {
                Ok(s) => s,
                Err(e) => return (error_response(e), None),
            };
            match session.vote(round_number, &player_id, &submission_id).await {
                Ok(()) => (Some(ServerMessage::VoteAccepted { round_number }), None),
                Err(e) => (error_response(e), None),
            }
        }
    }
}
