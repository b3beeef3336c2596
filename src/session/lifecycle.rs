//! Round lifecycle state machine.
//!
//! Sessions move `LOBBY -> ROUND_SUBMITTING <-> ROUND_VOTING -> ROUND_RESULTS`
//! and loop back for the next round or end at `GAME_OVER`. Every mutation
//! re-validates preconditions, applies the change, then evaluates whether the
//! current phase is complete before returning.

use chrono::{DateTime, Duration, Utc};

use crate::agents::{self, style};
use crate::error::SessionError;
use crate::protocol::VotingOption;
use crate::session::timers::TimerSlot;
use crate::session::{scoring, validate_alias, SessionHandle};
use crate::types::*;

const TEXT_PROMPTS: &[&str] = &[
    "Write a message {target} could have sent to the group chat",
    "What would {target} say after losing a bet?",
    "Describe {target}'s morning in one sentence",
    "Give {target} some questionable advice",
    "What is {target} secretly excellent at?",
    "What excuse would {target} give for being late?",
];

const IMAGE_PROMPTS: &[&str] = &[
    "Caption this image the way {target} would",
    "What would {target} say about this picture?",
    "Explain this image like {target} explaining it to a friend",
];

enum AfterSubmit {
    Nothing,
    /// The last human just submitted; fast-track pending agents
    HumansDone,
    AllDone,
}

enum AfterVote {
    Nothing,
    HumansDone,
    AllDone,
}

impl SessionHandle {
    /// Join an open session. Rejected once the game has started.
    pub async fn join(&self, alias: &str) -> Result<Player, SessionError> {
        let alias = validate_alias(alias)?;
        let mut session = self.state.lock().await;

        if session.state != SessionState::Lobby {
            return Err(SessionError::NotInLobby);
        }
        if session.player_by_alias(&alias).is_some() {
            return Err(SessionError::AliasTaken);
        }
        let color_id = session.next_color().ok_or(SessionError::SessionFull)?;

        let player = Player {
            id: ulid::Ulid::new().to_string(),
            alias,
            color_id,
            alive: true,
            connected: true,
            agent: None,
            score: 0,
            missed_submissions: 0,
        };
        session.players.push(player.clone());

        tracing::info!("{} joined session {}", player.alias, session.code);
        self.broadcast(&session);
        Ok(player)
    }

    /// Re-associate a transport identity with an existing player.
    /// Returns (player, has_submitted, has_voted) for state recovery.
    pub async fn reconnect(&self, player_id: &str) -> Result<(Player, bool, bool), SessionError> {
        let mut session = self.state.lock().await;

        let player = session
            .player_mut(player_id)
            .ok_or(SessionError::PlayerNotFound)?;
        player.connected = true;
        let player = player.clone();

        let (has_submitted, has_voted) = session
            .current_round()
            .map(|r| (r.submission_of(player_id).is_some(), r.has_voted(player_id)))
            .unwrap_or((false, false));

        self.broadcast(&session);
        Ok((player, has_submitted, has_voted))
    }

    /// Connectivity only; a disconnected player stays in the round's working
    /// set and keeps receiving auto placeholders on timeout.
    pub async fn mark_disconnected(&self, player_id: &str) {
        let mut session = self.state.lock().await;
        if let Some(player) = session.player_mut(player_id) {
            player.connected = false;
            let alias = player.alias.clone();
            tracing::info!("{} disconnected from {}", alias, self.code);
            self.broadcast(&session);
        }
    }

    /// Host action: reconcile the agent roster and start the first round.
    pub async fn start(&self, player_id: &str, content: RoundContent) -> Result<(), SessionError> {
        let started;
        {
            let mut session = self.state.lock().await;
            if session.state != SessionState::Lobby {
                return Err(SessionError::WrongPhase);
            }
            if session.host_id != player_id {
                return Err(SessionError::NotHost);
            }
            if session.human_count() < 2 {
                return Err(SessionError::NotEnoughHumans(2));
            }

            agents::reconcile_roster(&mut session);
            // The roster can come up short when the alias pool or color
            // palette is exhausted; a two-seat game is not playable
            if session.alive_players().count() < 3 {
                return Err(SessionError::NotEnoughPlayers(3));
            }
            started = self
                .begin_round(&mut session, content)
                .ok_or(SessionError::NotEnoughHumans(2))?;
        }

        let (round_number, deadline) = started;
        agents::schedule_submissions(self, round_number, deadline).await;
        self.arm_submission_timer(round_number, deadline);
        Ok(())
    }

    /// Host action, from GAME_OVER only: same roster, fresh game.
    pub async fn restart(&self, player_id: &str, content: RoundContent) -> Result<(), SessionError> {
        let started;
        {
            let mut session = self.state.lock().await;
            if session.state != SessionState::GameOver {
                return Err(SessionError::GameNotOver);
            }
            if session.host_id != player_id {
                return Err(SessionError::NotHost);
            }

            for player in session.players.iter_mut() {
                player.alive = true;
                player.score = 0;
                player.missed_submissions = 0;
                if let Some(agent) = player.agent.as_mut() {
                    agent.memory = Default::default();
                }
            }
            session.rounds.clear();
            session.round_counter = 0;
            session.winner = None;
            session.team_memory.clear();

            agents::reconcile_roster(&mut session);
            if session.alive_players().count() < 3 {
                return Err(SessionError::NotEnoughPlayers(3));
            }
            started = self
                .begin_round(&mut session, content)
                .ok_or(SessionError::NotEnoughHumans(2))?;
        }

        let (round_number, deadline) = started;
        agents::schedule_submissions(self, round_number, deadline).await;
        self.arm_submission_timer(round_number, deadline);
        Ok(())
    }

    /// Start a new round inside an already-held lock. Picks a target (humans
    /// preferred, never the immediately preceding target while an alternative
    /// exists), snapshots the alive set, and arms nothing; the caller arms
    /// the timer and schedules agents once the lock is released.
    fn begin_round(
        &self,
        session: &mut Session,
        content: RoundContent,
    ) -> Option<(u32, DateTime<Utc>)> {
        use rand::seq::IndexedRandom;

        let participant_ids: Vec<PlayerId> =
            session.alive_players().map(|p| p.id.clone()).collect();
        if participant_ids.is_empty() {
            return None;
        }

        let target_alias = {
            let humans: Vec<&Player> =
                session.alive_players().filter(|p| p.is_human()).collect();
            let pool: Vec<&Player> = if humans.is_empty() {
                session.alive_players().collect()
            } else {
                humans
            };
            let prev_target = session.rounds.last().map(|r| r.target_alias.clone());
            let fresh: Vec<&&Player> = pool
                .iter()
                .filter(|p| Some(&p.alias) != prev_target.as_ref())
                .collect();

            let mut rng = rand::rng();
            if fresh.is_empty() {
                pool.choose(&mut rng)?.alias.clone()
            } else {
                fresh.choose(&mut rng)?.alias.clone()
            }
        };

        let prompt = {
            let templates = match content {
                RoundContent::Text => TEXT_PROMPTS,
                RoundContent::Image { .. } => IMAGE_PROMPTS,
            };
            let mut rng = rand::rng();
            templates
                .choose(&mut rng)
                .unwrap_or(&TEXT_PROMPTS[0])
                .replace("{target}", &target_alias)
        };

        let number = session.round_counter + 1;
        let deadline = Utc::now() + Duration::seconds(session.config.submit_seconds as i64);

        session.round_counter = number;
        session.rounds.push(Round {
            number,
            content,
            target_alias,
            prompt,
            phase: RoundPhase::Submitting,
            participant_ids,
            submissions: Vec::new(),
            votes: Vec::new(),
            eliminated_ids: Vec::new(),
            phase_deadline: Some(deadline),
        });
        session.state = SessionState::RoundSubmitting;

        tracing::info!("Session {} round {} submitting", session.code, number);
        self.broadcast(session);
        Some((number, deadline))
    }

    pub async fn submit(
        &self,
        round_number: u32,
        player_id: &str,
        content: String,
    ) -> Result<(), SessionError> {
        let content = style::single_line(&content);

        let after;
        {
            let mut session = self.state.lock().await;
            if session.state != SessionState::RoundSubmitting {
                return Err(SessionError::WrongPhase);
            }
            if content.is_empty() {
                return Err(SessionError::EmptyContent);
            }
            let max = session.config.max_content_chars;
            if content.chars().count() > max {
                return Err(SessionError::ContentTooLong(max));
            }
            if session.player(player_id).is_none() {
                return Err(SessionError::PlayerNotFound);
            }

            {
                let round = session
                    .current_round()
                    .filter(|r| r.number == round_number && r.phase == RoundPhase::Submitting)
                    .ok_or(SessionError::RoundNotActive(round_number))?;
                if !round.is_participant(player_id) {
                    return Err(SessionError::NotParticipant);
                }
                if round.submission_of(player_id).is_some() {
                    return Err(SessionError::AlreadySubmitted);
                }
            }

            let submission = Submission {
                id: ulid::Ulid::new().to_string(),
                author_id: player_id.to_string(),
                content,
                round_number,
                created_at: Utc::now(),
            };
            if let Some(round) = session.current_round_mut() {
                round.submissions.push(submission);
            }

            after = completion_after_submit(&session, player_id);
            self.broadcast(&session);
        }

        match after {
            AfterSubmit::AllDone => self.begin_voting(round_number).await,
            AfterSubmit::HumansDone => {
                // Generation runs off this caller's path; the submitter gets
                // an ack now, the round flips once the agents are in
                let this = self.clone();
                tokio::spawn(async move {
                    agents::fast_track_submissions(&this, round_number).await;
                });
            }
            AfterSubmit::Nothing => {}
        }
        Ok(())
    }

    /// Submission -> voting. Fires on completeness or timeout; participants
    /// without a submission get an empty placeholder so they remain votable.
    pub(crate) async fn begin_voting(&self, round_number: u32) {
        let deadline;
        {
            let mut session = self.state.lock().await;
            if session.state != SessionState::RoundSubmitting {
                return;
            }
            let missing: Vec<PlayerId> = match session.current_round() {
                Some(r) if r.number == round_number && r.phase == RoundPhase::Submitting => r
                    .participant_ids
                    .iter()
                    .filter(|id| r.submission_of(id).is_none())
                    .cloned()
                    .collect(),
                _ => return,
            };

            let now = Utc::now();
            deadline = now + Duration::seconds(session.config.vote_seconds as i64);

            if let Some(round) = session.current_round_mut() {
                for author_id in missing {
                    round.submissions.push(Submission {
                        id: ulid::Ulid::new().to_string(),
                        author_id,
                        content: String::new(),
                        round_number,
                        created_at: now,
                    });
                }
                round.phase = RoundPhase::Voting;
                round.phase_deadline = Some(deadline);
            }
            session.state = SessionState::RoundVoting;

            // Agree on the team's fallback vote once, so late agents converge
            // on the same pick instead of splitting their votes
            let fallback = agents::choose_fallback_vote(&session);
            session
                .team_memory
                .entry(AGENT_TEAM_ID.to_string())
                .or_default()
                .plan_mut(round_number)
                .fallback_vote = fallback;

            tracing::info!("Session {} round {} voting", session.code, round_number);
            self.broadcast(&session);
        }

        agents::schedule_votes(self, round_number, deadline).await;
        self.arm_voting_timer(round_number, deadline);
        // Last: this may be running inside the submission timer's own task
        self.timers.cancel(TimerSlot::Submission);
    }

    pub async fn vote(
        &self,
        round_number: u32,
        player_id: &str,
        submission_id: &str,
    ) -> Result<(), SessionError> {
        let after;
        {
            let mut session = self.state.lock().await;
            if session.state != SessionState::RoundVoting {
                return Err(SessionError::WrongPhase);
            }
            if session.player(player_id).is_none() {
                return Err(SessionError::PlayerNotFound);
            }

            {
                let round = session
                    .current_round()
                    .filter(|r| r.number == round_number && r.phase == RoundPhase::Voting)
                    .ok_or(SessionError::RoundNotActive(round_number))?;
                if !round.is_participant(player_id) {
                    return Err(SessionError::NotParticipant);
                }
                if round.has_voted(player_id) {
                    return Err(SessionError::AlreadyVoted);
                }
                if round.submission(submission_id).is_none() {
                    return Err(SessionError::UnknownSubmission);
                }
            }

            if let Some(round) = session.current_round_mut() {
                round.votes.push(Vote {
                    voter_id: player_id.to_string(),
                    submission_id: submission_id.to_string(),
                });
            }

            after = completion_after_vote(&session, player_id);
            self.broadcast(&session);
        }

        match after {
            AfterVote::AllDone => self.finalize_round(round_number).await,
            // All humans are done; don't make them wait out the timer. The
            // agent votes run off this caller's path.
            AfterVote::HumansDone => {
                let this = self.clone();
                tokio::spawn(async move {
                    agents::fast_track_votes(&this, round_number).await;
                });
            }
            AfterVote::Nothing => {}
        }
        Ok(())
    }

    /// Sanitized list of votable submissions; author identity withheld, only
    /// the color badge is exposed.
    pub async fn voting_options(
        &self,
        round_number: u32,
    ) -> Result<Vec<VotingOption>, SessionError> {
        let session = self.state.lock().await;
        let round = session
            .rounds
            .iter()
            .find(|r| r.number == round_number)
            .ok_or(SessionError::RoundNotActive(round_number))?;
        if round.phase != RoundPhase::Voting {
            return Err(SessionError::WrongPhase);
        }

        let mut options: Vec<VotingOption> = round
            .submissions
            .iter()
            .map(|s| VotingOption {
                submission_id: s.id.clone(),
                color_id: session
                    .player(&s.author_id)
                    .map(|p| p.color_id.clone())
                    .unwrap_or_default(),
                content: s.content.clone(),
            })
            .collect();
        options.sort_by(|a, b| a.submission_id.cmp(&b.submission_id));
        Ok(options)
    }

    /// Voting -> completed. Idempotent: re-entry on an already-COMPLETED
    /// round is a no-op.
    pub(crate) async fn finalize_round(&self, round_number: u32) {
        let results_delay;
        {
            let mut session = self.state.lock().await;
            let Some(round) = session
                .rounds
                .iter()
                .find(|r| r.number == round_number)
                .cloned()
            else {
                return;
            };
            if round.phase != RoundPhase::Voting {
                return;
            }

            let scoring = scoring::score_round(&round);
            let vote_elim = scoring::vote_eliminated_author(&round);

            for (player_id, delta) in &scoring.deltas {
                if let Some(player) = session.player_mut(player_id) {
                    player.score += delta;
                }
            }
            for player_id in &scoring.participated {
                if let Some(player) = session.player_mut(player_id) {
                    player.missed_submissions = 0;
                }
            }

            // Missed-submission eliminations, unioned with the vote result.
            // Already-dead players are not re-eliminated or double-scored.
            let mut eliminated: Vec<PlayerId> = Vec::new();
            for player_id in &scoring.missed {
                if let Some(player) = session.player_mut(player_id) {
                    player.missed_submissions += 1;
                    if player.alive && player.missed_submissions >= scoring::MISS_LIMIT {
                        eliminated.push(player.id.clone());
                    }
                }
            }
            if let Some(player_id) = vote_elim {
                let alive = session
                    .player(&player_id)
                    .map(|p| p.alive)
                    .unwrap_or(false);
                if alive && !eliminated.contains(&player_id) {
                    eliminated.push(player_id);
                }
            }
            for player_id in &eliminated {
                if let Some(player) = session.player_mut(player_id) {
                    player.alive = false;
                    tracing::info!("{} eliminated in round {}", player.alias, round_number);
                }
            }

            agents::archive_round(&mut session, &round, &eliminated);

            if let Some(round) = session.rounds.iter_mut().find(|r| r.number == round_number) {
                round.eliminated_ids = eliminated;
                round.phase = RoundPhase::Completed;
                round.phase_deadline = None;
            }
            session.state = SessionState::RoundResults;
            results_delay = session.config.results_seconds;

            self.broadcast(&session);
        }

        self.arm_results_timer(results_delay);
        // Last: this may be running inside the voting timer's own task
        self.timers.cancel(TimerSlot::Voting);
    }

    /// Results pause elapsed: decide the winner or start the next round.
    pub(crate) async fn on_results_timeout(&self) {
        let next;
        {
            let mut session = self.state.lock().await;
            if session.state != SessionState::RoundResults {
                return;
            }

            if let Some(winner) = evaluate_winner(&session) {
                session.state = SessionState::GameOver;
                session.winner = Some(winner);
                tracing::info!("Session {} over, winner: {:?}", session.code, winner);
                self.broadcast(&session);
                next = None;
            } else {
                let content = session
                    .rounds
                    .last()
                    .map(|r| r.content.clone())
                    .unwrap_or(RoundContent::Text);
                match self.begin_round(&mut session, content) {
                    Some(started) => next = Some(started),
                    None => {
                        // Nobody left to play; end without a winner
                        session.state = SessionState::GameOver;
                        self.broadcast(&session);
                        next = None;
                    }
                }
            }
        }

        match next {
            Some((round_number, deadline)) => {
                agents::schedule_submissions(self, round_number, deadline).await;
                self.arm_submission_timer(round_number, deadline);
            }
            // Last: runs inside the results timer's own task
            None => self.timers.cancel_all(),
        }
    }

    pub(crate) async fn on_submission_timeout(&self, round_number: u32) {
        self.begin_voting(round_number).await;
    }

    pub(crate) async fn on_voting_timeout(&self, round_number: u32) {
        self.finalize_round(round_number).await;
    }
}

fn completion_after_submit(session: &Session, submitter_id: &str) -> AfterSubmit {
    let Some(round) = session.current_round() else {
        return AfterSubmit::Nothing;
    };

    let all = round
        .participant_ids
        .iter()
        .all(|id| round.submission_of(id).is_some());
    if all {
        return AfterSubmit::AllDone;
    }

    let humans_done = round
        .participant_ids
        .iter()
        .filter(|id| session.player(id).map(|p| p.is_human()).unwrap_or(false))
        .all(|id| round.submission_of(id).is_some());
    let submitter_is_human = session
        .player(submitter_id)
        .map(|p| p.is_human())
        .unwrap_or(false);

    if humans_done && submitter_is_human {
        AfterSubmit::HumansDone
    } else {
        AfterSubmit::Nothing
    }
}

fn completion_after_vote(session: &Session, voter_id: &str) -> AfterVote {
    let Some(round) = session.current_round() else {
        return AfterVote::Nothing;
    };

    let all = round.participant_ids.iter().all(|id| round.has_voted(id));
    if all {
        return AfterVote::AllDone;
    }

    let humans_done = round
        .participant_ids
        .iter()
        .filter(|id| session.player(id).map(|p| p.is_human()).unwrap_or(false))
        .all(|id| round.has_voted(id));
    let voter_is_human = session
        .player(voter_id)
        .map(|p| p.is_human())
        .unwrap_or(false);

    if humans_done && voter_is_human {
        AfterVote::HumansDone
    } else {
        AfterVote::Nothing
    }
}

/// Win conditions, evaluated in priority order after the results pause.
pub(crate) fn evaluate_winner(session: &Session) -> Option<Winner> {
    let humans = session.alive_humans();
    let agents = session.alive_agents();

    // A lone human against a lone agent can always be outlasted
    if agents == 1 && humans == 1 {
        return Some(Winner::Agents);
    }
    if humans == 0 {
        return Some(Winner::Agents);
    }
    if agents == 0 {
        return Some(Winner::Humans);
    }
    // An agent majority can always outvote the minority
    if agents > humans {
        return Some(Winner::Agents);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ModerationClient;
    use std::sync::Arc;

    async fn handle_with(humans: usize, agents: usize) -> (SessionHandle, Vec<PlayerId>) {
        handle_with_llm(humans, agents, None).await
    }

    async fn handle_with_llm(
        humans: usize,
        agents: usize,
        llm: Option<Arc<dyn crate::llm::LlmProvider>>,
    ) -> (SessionHandle, Vec<PlayerId>) {
        let (handle, host) = SessionHandle::new(
            "TESTS".to_string(),
            "host",
            GameConfig::default(),
            llm,
            Arc::new(ModerationClient::disabled()),
        )
        .unwrap();

        let mut ids = vec![host.id.clone()];
        {
            let mut session = handle.state.lock().await;
            for i in 1..humans {
                let player = Player {
                    id: ulid::Ulid::new().to_string(),
                    alias: format!("human{i}"),
                    color_id: COLOR_IDS[i].to_string(),
                    alive: true,
                    connected: true,
                    agent: None,
                    score: 0,
                    missed_submissions: 0,
                };
                ids.push(player.id.clone());
                session.players.push(player);
            }
            for i in 0..agents {
                let player = Player {
                    id: ulid::Ulid::new().to_string(),
                    alias: format!("agent{i}"),
                    color_id: COLOR_IDS[humans + i].to_string(),
                    alive: true,
                    connected: true,
                    agent: Some(AgentProfile {
                        team_id: AGENT_TEAM_ID.to_string(),
                        memory: Default::default(),
                    }),
                    score: 0,
                    missed_submissions: 0,
                };
                ids.push(player.id.clone());
                session.players.push(player);
            }
        }
        (handle, ids)
    }

    async fn push_round(handle: &SessionHandle, phase: RoundPhase) -> u32 {
        let mut session = handle.state.lock().await;
        let participant_ids: Vec<PlayerId> =
            session.alive_players().map(|p| p.id.clone()).collect();
        let number = session.round_counter + 1;
        session.round_counter = number;
        session.rounds.push(Round {
            number,
            content: RoundContent::Text,
            target_alias: "host".to_string(),
            prompt: "Say something".to_string(),
            phase,
            participant_ids,
            submissions: Vec::new(),
            votes: Vec::new(),
            eliminated_ids: Vec::new(),
            phase_deadline: Some(Utc::now() + Duration::seconds(60)),
        });
        session.state = match phase {
            RoundPhase::Submitting => SessionState::RoundSubmitting,
            RoundPhase::Voting => SessionState::RoundVoting,
            RoundPhase::Completed => SessionState::RoundResults,
        };
        number
    }

    /// Stub backend that takes a while before answering with a fixed reply
    struct SlowEcho {
        delay: std::time::Duration,
        reply: &'static str,
    }

    #[async_trait::async_trait]
    impl crate::llm::LlmProvider for SlowEcho {
        async fn generate(
            &self,
            _request: crate::llm::GenerateRequest,
        ) -> crate::llm::LlmResult<crate::llm::GenerateResponse> {
            tokio::time::sleep(self.delay).await;
            Ok(crate::llm::GenerateResponse {
                text: self.reply.to_string(),
                model: "stub".to_string(),
                latency_ms: 0,
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_join_rejected_after_start() {
        let (handle, _) = handle_with(2, 0).await;
        push_round(&handle, RoundPhase::Submitting).await;
        assert_eq!(
            handle.join("late").await.unwrap_err(),
            SessionError::NotInLobby
        );
    }

    #[tokio::test]
    async fn test_duplicate_alias_rejected() {
        let (handle, _) = handle_with(1, 0).await;
        handle.join("mara").await.unwrap();
        assert_eq!(
            handle.join(" mara ").await.unwrap_err(),
            SessionError::AliasTaken
        );
    }

    #[tokio::test]
    async fn test_start_requires_two_humans() {
        let (handle, ids) = handle_with(1, 0).await;
        assert_eq!(
            handle.start(&ids[0], RoundContent::Text).await,
            Err(SessionError::NotEnoughHumans(2))
        );
    }

    #[tokio::test]
    async fn test_disconnect_keeps_player_in_roster() {
        let (handle, _) = handle_with(1, 0).await;
        let mara = handle.join("mara").await.unwrap();

        handle.mark_disconnected(&mara.id).await;

        let session = handle.state.lock().await;
        let player = session.player(&mara.id).unwrap();
        assert!(!player.connected);
        assert!(player.alive);
    }

    #[tokio::test]
    async fn test_start_needs_three_seats() {
        let (handle, ids) = handle_with(2, 0).await;
        {
            // Every pool alias is already held, so no agent can be seated
            let mut session = handle.state.lock().await;
            for (i, alias) in AGENT_ALIASES.iter().enumerate() {
                session.players.push(Player {
                    id: format!("gone{i}"),
                    alias: alias.to_string(),
                    color_id: format!("gone-color-{i}"),
                    alive: false,
                    connected: false,
                    agent: None,
                    score: 0,
                    missed_submissions: 0,
                });
            }
        }

        assert_eq!(
            handle.start(&ids[0], RoundContent::Text).await,
            Err(SessionError::NotEnoughPlayers(3))
        );
        assert_eq!(handle.state.lock().await.state, SessionState::Lobby);
    }

    #[tokio::test]
    async fn test_start_rejects_non_host() {
        let (handle, _) = handle_with(1, 0).await;
        let guest = handle.join("guest").await.unwrap();
        assert_eq!(
            handle.start(&guest.id, RoundContent::Text).await,
            Err(SessionError::NotHost)
        );
    }

    #[tokio::test]
    async fn test_submit_checks_phase_and_round() {
        let (handle, ids) = handle_with(3, 0).await;
        assert_eq!(
            handle.submit(1, &ids[0], "hello".to_string()).await,
            Err(SessionError::WrongPhase)
        );

        let number = push_round(&handle, RoundPhase::Submitting).await;
        assert_eq!(
            handle.submit(number + 1, &ids[0], "hello".to_string()).await,
            Err(SessionError::RoundNotActive(number + 1))
        );
        assert_eq!(
            handle.submit(number, &ids[0], "   ".to_string()).await,
            Err(SessionError::EmptyContent)
        );
        assert_eq!(
            handle.submit(number, &ids[0], "x".repeat(300)).await,
            Err(SessionError::ContentTooLong(280))
        );

        handle.submit(number, &ids[0], "hello".to_string()).await.unwrap();
        assert_eq!(
            handle.submit(number, &ids[0], "again".to_string()).await,
            Err(SessionError::AlreadySubmitted)
        );
    }

    #[tokio::test]
    async fn test_all_submissions_trigger_voting() {
        let (handle, ids) = handle_with(3, 0).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;

        for (i, id) in ids.iter().enumerate() {
            handle.submit(number, id, format!("text {i}")).await.unwrap();
        }

        let session = handle.state.lock().await;
        assert_eq!(session.state, SessionState::RoundVoting);
        assert_eq!(session.rounds[0].phase, RoundPhase::Voting);
    }

    #[tokio::test]
    async fn test_last_human_action_is_acked_before_agent_generation() {
        let provider = Arc::new(SlowEcho {
            delay: std::time::Duration::from_millis(800),
            reply: r#"{"text": "sounds about right to me"}"#,
        });
        let (handle, ids) = handle_with_llm(3, 1, Some(provider)).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;

        handle.submit(number, &ids[0], "i would simply not do it".to_string()).await.unwrap();
        handle.submit(number, &ids[1], "that seems fine honestly".to_string()).await.unwrap();

        let start = std::time::Instant::now();
        handle.submit(number, &ids[2], "no notes, ship it friday".to_string()).await.unwrap();
        assert!(
            start.elapsed() < std::time::Duration::from_millis(400),
            "submit waited on agent generation"
        );

        // The agent still finishes the round off the caller's path
        for _ in 0..100 {
            if handle.state.lock().await.state == SessionState::RoundVoting {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        {
            let session = handle.state.lock().await;
            assert_eq!(session.state, SessionState::RoundVoting);
            assert_eq!(session.rounds[0].submissions.len(), 4);
        }

        let options = handle.voting_options(number).await.unwrap();
        handle.vote(number, &ids[0], &options[0].submission_id).await.unwrap();
        handle.vote(number, &ids[1], &options[0].submission_id).await.unwrap();

        let start = std::time::Instant::now();
        handle.vote(number, &ids[2], &options[0].submission_id).await.unwrap();
        assert!(
            start.elapsed() < std::time::Duration::from_millis(400),
            "vote waited on agent generation"
        );

        for _ in 0..100 {
            if handle.state.lock().await.state == SessionState::RoundResults {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(handle.state.lock().await.state, SessionState::RoundResults);
    }

    #[tokio::test]
    async fn test_begin_voting_fills_placeholders() {
        let (handle, ids) = handle_with(3, 0).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;
        handle.submit(number, &ids[0], "only one".to_string()).await.unwrap();

        handle.begin_voting(number).await;

        let session = handle.state.lock().await;
        let round = &session.rounds[0];
        assert_eq!(round.phase, RoundPhase::Voting);
        assert_eq!(round.submissions.len(), 3);
        let placeholders = round
            .submissions
            .iter()
            .filter(|s| s.is_placeholder())
            .count();
        assert_eq!(placeholders, 2);
    }

    #[tokio::test]
    async fn test_voting_options_hide_authors_and_sort_stable() {
        let (handle, ids) = handle_with(3, 0).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;
        for (i, id) in ids.iter().enumerate() {
            handle.submit(number, id, format!("text {i}")).await.unwrap();
        }

        let options = handle.voting_options(number).await.unwrap();
        assert_eq!(options.len(), 3);
        let mut sorted = options.clone();
        sorted.sort_by(|a, b| a.submission_id.cmp(&b.submission_id));
        assert_eq!(
            options.iter().map(|o| &o.submission_id).collect::<Vec<_>>(),
            sorted.iter().map(|o| &o.submission_id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_vote_validations() {
        let (handle, ids) = handle_with(3, 0).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;
        for (i, id) in ids.iter().enumerate() {
            handle.submit(number, id, format!("text {i}")).await.unwrap();
        }

        assert_eq!(
            handle.vote(number, &ids[0], "nope").await,
            Err(SessionError::UnknownSubmission)
        );

        let options = handle.voting_options(number).await.unwrap();
        handle.vote(number, &ids[0], &options[0].submission_id).await.unwrap();
        assert_eq!(
            handle.vote(number, &ids[0], &options[1].submission_id).await,
            Err(SessionError::AlreadyVoted)
        );
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let (handle, ids) = handle_with(3, 0).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;
        for (i, id) in ids.iter().enumerate() {
            handle.submit(number, id, format!("text {i}")).await.unwrap();
        }
        let options = handle.voting_options(number).await.unwrap();
        // everyone votes for the same submission except its author
        let picked = options[0].submission_id.clone();
        for id in &ids {
            let _ = handle.vote(number, id, &picked).await;
        }

        handle.finalize_round(number).await;
        handle.finalize_round(number).await;

        let session = handle.state.lock().await;
        assert_eq!(session.rounds[0].phase, RoundPhase::Completed);
        // first submitter: 5 speed + 2 participation, applied exactly once
        let first = session.player(&ids[0]).unwrap();
        assert_eq!(first.score, 7);
    }

    #[tokio::test]
    async fn test_vote_tie_eliminates_nobody() {
        let (handle, ids) = handle_with(4, 0).await;
        let number = push_round(&handle, RoundPhase::Submitting).await;
        for (i, id) in ids.iter().enumerate() {
            handle.submit(number, id, format!("text {i}")).await.unwrap();
        }
        let options = handle.voting_options(number).await.unwrap();
        handle.vote(number, &ids[0], &options[0].submission_id).await.unwrap();
        handle.vote(number, &ids[1], &options[0].submission_id).await.unwrap();
        handle.vote(number, &ids[2], &options[1].submission_id).await.unwrap();
        handle.vote(number, &ids[3], &options[1].submission_id).await.unwrap();

        let session = handle.state.lock().await;
        assert_eq!(session.state, SessionState::RoundResults);
        assert!(session.rounds[0].eliminated_ids.is_empty());
        assert!(session.alive_players().count() == 4);
    }

    #[tokio::test]
    async fn test_target_not_repeated_when_alternative_exists() {
        let (handle, _) = handle_with(3, 0).await;
        for _ in 0..20 {
            let mut session = handle.state.lock().await;
            if let Some(last) = session.rounds.last_mut() {
                last.phase = RoundPhase::Completed;
            }
            let prev = session.rounds.last().map(|r| r.target_alias.clone());
            let _ = handle.begin_round(&mut session, RoundContent::Text);
            let next = session.rounds.last().unwrap().target_alias.clone();
            if let Some(prev) = prev {
                assert_ne!(prev, next);
            }
        }
    }

    #[tokio::test]
    async fn test_miss_limit_eliminates() {
        let (handle, ids) = handle_with(3, 0).await;

        for _ in 0..scoring::MISS_LIMIT {
            let number = push_round(&handle, RoundPhase::Submitting).await;
            // everyone but the last player submits
            for (i, id) in ids.iter().enumerate().take(ids.len() - 1) {
                handle.submit(number, id, format!("text {i}")).await.unwrap();
            }
            handle.begin_voting(number).await;
            handle.finalize_round(number).await;
            // reset state so the next round can be pushed manually
            let mut session = handle.state.lock().await;
            session.state = SessionState::Lobby;
        }

        let session = handle.state.lock().await;
        let missed = session.player(ids.last().unwrap()).unwrap();
        assert!(!missed.alive);
        assert_eq!(missed.missed_submissions, scoring::MISS_LIMIT);
    }

    #[test]
    fn test_evaluate_winner_priority() {
        fn session_with(humans: usize, agents: usize) -> Session {
            let mut players = Vec::new();
            for i in 0..humans {
                players.push(Player {
                    id: format!("h{i}"),
                    alias: format!("h{i}"),
                    color_id: "red".to_string(),
                    alive: true,
                    connected: true,
                    agent: None,
                    score: 0,
                    missed_submissions: 0,
                });
            }
            for i in 0..agents {
                players.push(Player {
                    id: format!("a{i}"),
                    alias: format!("a{i}"),
                    color_id: "blue".to_string(),
                    alive: true,
                    connected: true,
                    agent: Some(AgentProfile {
                        team_id: AGENT_TEAM_ID.to_string(),
                        memory: Default::default(),
                    }),
                    score: 0,
                    missed_submissions: 0,
                });
            }
            Session {
                code: "TESTS".to_string(),
                state: SessionState::RoundResults,
                round_counter: 0,
                rounds: Vec::new(),
                players,
                winner: None,
                host_id: "h0".to_string(),
                team_memory: Default::default(),
                config: GameConfig::default(),
            }
        }

        assert_eq!(evaluate_winner(&session_with(1, 1)), Some(Winner::Agents));
        assert_eq!(evaluate_winner(&session_with(0, 2)), Some(Winner::Agents));
        assert_eq!(evaluate_winner(&session_with(0, 0)), Some(Winner::Agents));
        assert_eq!(evaluate_winner(&session_with(3, 0)), Some(Winner::Humans));
        assert_eq!(evaluate_winner(&session_with(2, 3)), Some(Winner::Agents));
        assert_eq!(evaluate_winner(&session_with(3, 2)), None);
        assert_eq!(evaluate_winner(&session_with(2, 2)), None);
    }
}
