//! Agent orchestration: the impostor roster, and the tasks that write
//! submissions and cast votes on behalf of agents.
//!
//! Agents never touch session state directly. Each task snapshots its context
//! under the lock, does generation and moderation I/O unlocked, and proposes
//! the result through [`ActionSink`], which re-validates phase and duplicates.

pub mod memory;
pub mod style;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::llm::{self, GenerateRequest};
use crate::session::timers::until;
use crate::session::{ActionSink, SessionHandle};
use crate::types::*;

use memory::{RoundSummary, ToxicityVerdict};

/// How many recent rounds an agent is reminded of when generating
const HISTORY_WINDOW: usize = 3;

/// Fallback votes fire this long before the voting deadline
const VOTE_SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Agent head-count by live human count. Always a minority.
pub fn roster_size(humans: usize) -> usize {
    match humans {
        0 | 1 => 0,
        2 => 1,
        3 | 4 => 2,
        _ => 3,
    }
}

/// Bring the session's agent roster in line with the human count. Called from
/// the lobby and on restart, never mid-round.
pub fn reconcile_roster(session: &mut Session) {
    use rand::seq::IndexedRandom;

    let target = roster_size(session.human_count());
    let mut current = session.players.iter().filter(|p| p.is_agent()).count();

    while current > target {
        if let Some(pos) = session.players.iter().rposition(|p| p.is_agent()) {
            let removed = session.players.remove(pos);
            tracing::debug!("Removed agent {} from {}", removed.alias, session.code);
        }
        current -= 1;
    }

    while current < target {
        let free: Vec<&&str> = AGENT_ALIASES
            .iter()
            .filter(|a| session.player_by_alias(a).is_none())
            .collect();
        let alias = {
            let mut rng = rand::rng();
            match free.choose(&mut rng) {
                Some(a) => a.to_string(),
                None => break,
            }
        };
        let Some(color_id) = session.next_color() else {
            break;
        };

        tracing::info!("Seated agent {} in {}", alias, session.code);
        session.players.push(Player {
            id: ulid::Ulid::new().to_string(),
            alias,
            color_id,
            alive: true,
            connected: true,
            agent: Some(AgentProfile {
                team_id: AGENT_TEAM_ID.to_string(),
                memory: Default::default(),
            }),
            score: 0,
            missed_submissions: 0,
        });
        current += 1;
    }
}

/// The team's shared vote target: a real human submission from the current
/// round, so no agent ever wastes a vote on a teammate.
pub fn choose_fallback_vote(session: &Session) -> Option<SubmissionId> {
    use rand::seq::IndexedRandom;

    let round = session.current_round()?;
    let candidates: Vec<&Submission> = round
        .submissions
        .iter()
        .filter(|s| !s.is_placeholder())
        .filter(|s| {
            session
                .player(&s.author_id)
                .map(|p| p.is_human())
                .unwrap_or(false)
        })
        .collect();

    let mut rng = rand::rng();
    candidates.choose(&mut rng).map(|s| s.id.clone())
}

fn alive_agent_ids(session: &Session, round_number: u32) -> Vec<PlayerId> {
    let Some(round) = session.rounds.iter().find(|r| r.number == round_number) else {
        return Vec::new();
    };
    round
        .participant_ids
        .iter()
        .filter(|id| session.player(id).map(|p| p.is_agent()).unwrap_or(false))
        .cloned()
        .collect()
}

/// Arm one delayed submission task per agent. The delay lands in the back
/// half of the phase, where human activity naturally clusters; the fast-track
/// path preempts it when every human is already in.
pub async fn schedule_submissions(
    handle: &SessionHandle,
    round_number: u32,
    deadline: DateTime<Utc>,
) {
    let agent_ids = {
        let session = handle.state.lock().await;
        alive_agent_ids(&session, round_number)
    };

    let span = until(deadline);
    for agent_id in agent_ids {
        let delay = span.mul_f64(rand::random_range(0.35..0.85));
        let this = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_agent_submission(&this, round_number, &agent_id).await;
        });
    }
}

/// Every human has submitted; finish the round instead of making them wait.
pub async fn fast_track_submissions(handle: &SessionHandle, round_number: u32) {
    let pending = {
        let session = handle.state.lock().await;
        let Some(round) = session.rounds.iter().find(|r| r.number == round_number) else {
            return;
        };
        alive_agent_ids(&session, round_number)
            .into_iter()
            .filter(|id| round.submission_of(id).is_none())
            .collect::<Vec<_>>()
    };

    for agent_id in pending {
        run_agent_submission(handle, round_number, &agent_id).await;
    }
}

/// Arm delayed vote tasks plus one safety task that casts the team fallback
/// for any agent still missing shortly before the deadline.
pub async fn schedule_votes(handle: &SessionHandle, round_number: u32, deadline: DateTime<Utc>) {
    let agent_ids = {
        let session = handle.state.lock().await;
        alive_agent_ids(&session, round_number)
    };
    if agent_ids.is_empty() {
        return;
    }

    let span = until(deadline);
    for agent_id in agent_ids.clone() {
        let delay = span.mul_f64(rand::random_range(0.2..0.7));
        let this = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run_agent_vote(&this, round_number, &agent_id).await;
        });
    }

    let safety_at = deadline - ChronoDuration::from_std(VOTE_SAFETY_MARGIN).unwrap_or_default();
    let this = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(until(safety_at)).await;
        cast_fallback_votes(&this, round_number, &agent_ids).await;
    });
}

pub async fn fast_track_votes(handle: &SessionHandle, round_number: u32) {
    let pending = {
        let session = handle.state.lock().await;
        let Some(round) = session.rounds.iter().find(|r| r.number == round_number) else {
            return;
        };
        alive_agent_ids(&session, round_number)
            .into_iter()
            .filter(|id| !round.has_voted(id))
            .collect::<Vec<_>>()
    };

    for agent_id in pending {
        run_agent_vote(handle, round_number, &agent_id).await;
    }
}

async fn cast_fallback_votes(handle: &SessionHandle, round_number: u32, agent_ids: &[PlayerId]) {
    let pending: Vec<(PlayerId, SubmissionId)> = {
        let session = handle.state.lock().await;
        let Some(round) = session.rounds.iter().find(|r| r.number == round_number) else {
            return;
        };
        if round.phase != RoundPhase::Voting {
            return;
        }
        let Some(fallback) = session
            .team_memory
            .get(AGENT_TEAM_ID)
            .and_then(|t| t.plan_for(round_number))
            .and_then(|p| p.fallback_vote.clone())
        else {
            return;
        };
        agent_ids
            .iter()
            .filter(|id| !round.has_voted(id))
            .map(|id| (id.clone(), fallback.clone()))
            .collect()
    };

    for (agent_id, submission_id) in pending {
        tracing::debug!("Fallback vote for agent {}", agent_id);
        handle.apply_vote(round_number, &agent_id, &submission_id).await;
    }
}

struct SubmissionContext {
    agent_alias: String,
    prompt: String,
    /// Set on image rounds; forwarded to the generation backend so the model
    /// sees what the humans are writing about
    image_url: Option<String>,
    target_alias: String,
    /// Human-authored, non-empty texts, in submission order. Raw; must pass
    /// through moderation before any agent path reads them.
    human_texts: Vec<String>,
    used_texts: Vec<String>,
    notes: Vec<String>,
    history: Vec<RoundSummary>,
    max_chars: usize,
}

async fn submission_context(
    handle: &SessionHandle,
    round_number: u32,
    agent_id: &str,
) -> Option<SubmissionContext> {
    let session = handle.state.lock().await;
    let round = session
        .current_round()
        .filter(|r| r.number == round_number && r.phase == RoundPhase::Submitting)?;
    let agent = session.player(agent_id)?;
    if round.submission_of(agent_id).is_some() {
        return None;
    }

    // Agents act only once every human is in, so the output can be
    // style-matched against visible human text
    let humans_done = round
        .participant_ids
        .iter()
        .filter(|id| session.player(id).map(|p| p.is_human()).unwrap_or(false))
        .all(|id| round.submission_of(id).is_some());
    if !humans_done {
        return None;
    }

    let human_texts = round
        .submissions
        .iter()
        .filter(|s| !s.is_placeholder())
        .filter(|s| {
            session
                .player(&s.author_id)
                .map(|p| p.is_human())
                .unwrap_or(false)
        })
        .map(|s| s.content.clone())
        .collect();

    let team = session.team_memory.get(AGENT_TEAM_ID);
    let used_texts = team
        .and_then(|t| t.plan_for(round_number))
        .map(|p| p.used_texts.clone())
        .unwrap_or_default();

    let profile = agent.agent.as_ref()?;
    let image_url = match &round.content {
        RoundContent::Image { url } => Some(url.clone()),
        RoundContent::Text => None,
    };
    Some(SubmissionContext {
        agent_alias: agent.alias.clone(),
        prompt: round.prompt.clone(),
        image_url,
        target_alias: round.target_alias.clone(),
        human_texts,
        used_texts,
        notes: profile.memory.notes.clone(),
        history: profile
            .memory
            .rounds
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .rev()
            .cloned()
            .collect(),
        max_chars: session.config.max_content_chars,
    })
}

/// Run moderation over texts visible to an agent, preserving order: one
/// verdict per input, with toxic texts carried as their placeholder rather
/// than dropped. Cache order is team scope, then the agent's own scope, then
/// the network; verdicts are written back to both scopes so each distinct
/// text is assessed at most once per session.
async fn sanitize_visible(
    handle: &SessionHandle,
    agent_id: &str,
    texts: Vec<String>,
) -> Vec<ToxicityVerdict> {
    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
        let cached = {
            let session = handle.state.lock().await;
            session
                .team_memory
                .get(AGENT_TEAM_ID)
                .and_then(|t| t.toxicity_cache.get(&text))
                .or_else(|| {
                    session
                        .player(agent_id)
                        .and_then(|p| p.agent.as_ref())
                        .and_then(|a| a.memory.toxicity_cache.get(&text))
                })
                .cloned()
        };
        let verdict = match cached {
            Some(v) => v,
            None => {
                let verdict = handle.moderation.assess(&text).await;
                let mut session = handle.state.lock().await;
                session
                    .team_memory
                    .entry(AGENT_TEAM_ID.to_string())
                    .or_default()
                    .toxicity_cache
                    .insert(text.clone(), verdict.clone());
                if let Some(profile) =
                    session.player_mut(agent_id).and_then(|p| p.agent.as_mut())
                {
                    profile
                        .memory
                        .toxicity_cache
                        .insert(text.clone(), verdict.clone());
                }
                verdict
            }
        };
        out.push(verdict);
    }
    out
}

async fn run_agent_submission(handle: &SessionHandle, round_number: u32, agent_id: &str) {
    let Some(ctx) = submission_context(handle, round_number, agent_id).await else {
        return;
    };
    let verdicts = sanitize_visible(handle, agent_id, ctx.human_texts.clone()).await;
    let visible: Vec<String> = verdicts.iter().map(|v| v.display_text.clone()).collect();
    // Placeholders stay in the prompt context but are never copied, and they
    // don't skew the length window
    let copyable: Vec<String> = verdicts
        .into_iter()
        .filter(|v| !v.is_toxic)
        .map(|v| v.display_text)
        .collect();
    let window = style::length_window(&copyable);

    let mut note = None;
    let text = match generate_submission(handle, &ctx, &visible, window).await {
        Some((text, n)) => {
            note = n;
            Some(text)
        }
        None => style::fallback_text(&copyable, &ctx.used_texts, window),
    };
    let Some(text) = text else {
        tracing::debug!("Agent {} has nothing to submit in round {}", agent_id, round_number);
        return;
    };

    // Reserve the text in the team plan before applying, so a concurrent
    // teammate can't pick the same line
    {
        let mut session = handle.state.lock().await;
        let plan = session
            .team_memory
            .entry(AGENT_TEAM_ID.to_string())
            .or_default()
            .plan_mut(round_number);
        if style::is_duplicate(&text, &plan.used_texts) {
            return;
        }
        plan.used_texts.push(text.clone());

        if let Some(note) = note {
            if let Some(profile) = session.player_mut(agent_id).and_then(|p| p.agent.as_mut()) {
                profile.memory.notes.push(note);
            }
        }
    }

    handle.apply_submission(round_number, agent_id, text).await;
}

async fn generate_submission(
    handle: &SessionHandle,
    ctx: &SubmissionContext,
    visible: &[String],
    window: Option<(usize, usize)>,
) -> Option<(String, Option<String>)> {
    let provider = handle.llm.as_ref()?;

    let request = GenerateRequest {
        system: submission_system(ctx),
        prompt: submission_prompt(ctx, visible, window),
        image_url: ctx.image_url.clone(),
        max_tokens: Some(200),
        timeout: Duration::from_secs(20),
    };
    let response = match provider.generate(request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Agent generation failed: {}", e);
            return None;
        }
    };
    tracing::debug!(
        "Generated submission via {} in {}ms",
        response.model,
        response.latency_ms
    );
    let reply = match llm::parse_submission_reply(&response.text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Agent reply unusable: {}", e);
            return None;
        }
    };

    let text = style::cap(&style::single_line(&reply.text), ctx.max_chars);
    if text.is_empty() || style::is_duplicate(&text, &ctx.used_texts) {
        return None;
    }
    // Only enforce the window when there are humans to blend against
    if !visible.is_empty() && !style::within_window(&text, window) {
        return None;
    }
    Some((text, reply.note))
}

fn submission_system(ctx: &SubmissionContext) -> String {
    format!(
        "You are {alias}, a player in a casual party game with friends. \
         You write short, informal chat messages. Sound like a real person \
         typing quickly: lowercase is fine, no polish, no emoji overuse. \
         Never reveal that you are not human. \
         Reply with JSON only: {{\"text\": \"your answer\", \"note\": \"private memo to yourself, optional\"}}",
        alias = ctx.agent_alias
    )
}

fn submission_prompt(
    ctx: &SubmissionContext,
    visible: &[String],
    window: Option<(usize, usize)>,
) -> String {
    let mut parts = vec![if ctx.image_url.is_some() {
        format!(
            "The round prompt refers to the attached image: \"{}\" (it is about {}).",
            ctx.prompt, ctx.target_alias
        )
    } else {
        format!(
            "The round prompt is: \"{}\" (it is about {}).",
            ctx.prompt, ctx.target_alias
        )
    }];

    if !visible.is_empty() {
        parts.push(format!(
            "Answers from other players so far:\n{}",
            visible
                .iter()
                .map(|t| format!("- {t}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }
    if let Some((lo, hi)) = window {
        parts.push(format!(
            "Match the crowd: keep your answer between {lo} and {hi} characters."
        ));
    }
    if !ctx.used_texts.is_empty() {
        parts.push(format!(
            "Do not repeat any of these lines:\n{}",
            ctx.used_texts
                .iter()
                .map(|t| format!("- {t}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }
    for summary in &ctx.history {
        parts.push(format!(
            "Earlier (round {} about {}): {} got eliminated.",
            summary.round_number,
            summary.target_alias,
            if summary.eliminated_aliases.is_empty() {
                "nobody".to_string()
            } else {
                summary.eliminated_aliases.join(", ")
            }
        ));
    }
    if !ctx.notes.is_empty() {
        parts.push(format!("Your private notes: {}", ctx.notes.join("; ")));
    }

    parts.push("Write your answer to the prompt.".to_string());
    parts.join("\n\n")
}

struct VoteContext {
    agent_alias: String,
    prompt: String,
    /// (author alias, submission id, sanitized content) for votable human
    /// submissions. Teammates are excluded up front.
    options: Vec<(String, SubmissionId, String)>,
    fallback: Option<SubmissionId>,
    notes: Vec<String>,
}

async fn vote_context(
    handle: &SessionHandle,
    round_number: u32,
    agent_id: &str,
) -> Option<VoteContext> {
    let raw = {
        let session = handle.state.lock().await;
        let round = session
            .current_round()
            .filter(|r| r.number == round_number && r.phase == RoundPhase::Voting)?;
        let agent = session.player(agent_id)?;
        if round.has_voted(agent_id) {
            return None;
        }

        let options: Vec<(String, SubmissionId, String)> = round
            .submissions
            .iter()
            .filter(|s| !s.is_placeholder())
            .filter_map(|s| {
                let author = session.player(&s.author_id)?;
                author
                    .is_human()
                    .then(|| (author.alias.clone(), s.id.clone(), s.content.clone()))
            })
            .collect();

        let profile = agent.agent.as_ref()?;
        VoteContext {
            agent_alias: agent.alias.clone(),
            prompt: round.prompt.clone(),
            options,
            fallback: session
                .team_memory
                .get(AGENT_TEAM_ID)
                .and_then(|t| t.plan_for(round_number))
                .and_then(|p| p.fallback_vote.clone()),
            notes: profile.memory.notes.clone(),
        }
    };

    // Sanitize what the model will read; hidden texts keep their slot so
    // every candidate stays votable
    let VoteContext {
        agent_alias,
        prompt,
        options,
        fallback,
        notes,
    } = raw;
    let texts: Vec<String> = options.iter().map(|(_, _, t)| t.clone()).collect();
    let verdicts = sanitize_visible(handle, agent_id, texts).await;
    let options = options
        .into_iter()
        .zip(verdicts)
        .map(|((alias, id, _), verdict)| (alias, id, verdict.display_text))
        .collect();

    Some(VoteContext {
        agent_alias,
        prompt,
        options,
        fallback,
        notes,
    })
}

async fn run_agent_vote(handle: &SessionHandle, round_number: u32, agent_id: &str) {
    let Some(ctx) = vote_context(handle, round_number, agent_id).await else {
        return;
    };

    let picked = match generate_vote(handle, &ctx).await {
        Some(submission_id) => Some(submission_id),
        None => ctx.fallback.clone().or_else(|| {
            use rand::seq::IndexedRandom;
            let mut rng = rand::rng();
            ctx.options.choose(&mut rng).map(|(_, id, _)| id.clone())
        }),
    };

    let Some(submission_id) = picked else {
        tracing::debug!("Agent {} found nothing to vote for", agent_id);
        return;
    };
    handle.apply_vote(round_number, agent_id, &submission_id).await;
}

async fn generate_vote(handle: &SessionHandle, ctx: &VoteContext) -> Option<SubmissionId> {
    let provider = handle.llm.as_ref()?;
    if ctx.options.is_empty() {
        return None;
    }

    let request = GenerateRequest {
        system: format!(
            "You are {alias}, a player in a party game. You must vote one \
             other player's answer out. Pick the answer whose author seems \
             easiest to rally votes against. \
             Reply with JSON only: {{\"vote_alias\": \"player name\", \"note\": \"private memo, optional\"}}",
            alias = ctx.agent_alias
        ),
        prompt: vote_prompt(ctx),
        image_url: None,
        max_tokens: Some(100),
        timeout: Duration::from_secs(20),
    };
    let response = match provider.generate(request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Agent vote generation failed: {}", e);
            return None;
        }
    };
    let reply = match llm::parse_vote_reply(&response.text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Agent vote reply unusable: {}", e);
            return None;
        }
    };

    let wanted = reply.vote_alias.trim();
    ctx.options
        .iter()
        .find(|(alias, _, _)| alias.eq_ignore_ascii_case(wanted))
        .map(|(_, id, _)| id.clone())
}

fn vote_prompt(ctx: &VoteContext) -> String {
    let mut parts = vec![format!("The round prompt was: \"{}\".", ctx.prompt)];
    parts.push(format!(
        "Candidates:\n{}",
        ctx.options
            .iter()
            .map(|(alias, _, text)| format!("- {alias}: {text}"))
            .collect::<Vec<_>>()
            .join("\n")
    ));
    if !ctx.notes.is_empty() {
        parts.push(format!("Your private notes: {}", ctx.notes.join("; ")));
    }
    parts.push("Name the player you vote against.".to_string());
    parts.join("\n\n")
}

/// Fold a finished round into agent and team memory. Human text enters memory
/// only through its cached moderation verdict; anything never assessed stays
/// hidden.
pub fn archive_round(session: &mut Session, round: &Round, eliminated: &[PlayerId]) {
    let alias_of = |session: &Session, id: &str| {
        session
            .player(id)
            .map(|p| p.alias.clone())
            .unwrap_or_else(|| "unknown".to_string())
    };

    let cache = session
        .team_memory
        .get(AGENT_TEAM_ID)
        .map(|t| t.toxicity_cache.clone())
        .unwrap_or_default();

    let submissions: Vec<(String, String)> = round
        .submissions
        .iter()
        .filter(|s| !s.is_placeholder())
        .map(|s| {
            let author = alias_of(session, &s.author_id);
            let is_human = session
                .player(&s.author_id)
                .map(|p| p.is_human())
                .unwrap_or(true);
            let text = if is_human {
                match cache.get(&s.content) {
                    Some(v) => v.display_text.clone(),
                    None => "[unreviewed]".to_string(),
                }
            } else {
                s.content.clone()
            };
            (author, text)
        })
        .collect();

    let votes: Vec<(String, String)> = round
        .votes
        .iter()
        .filter_map(|v| {
            let target = round.submission(&v.submission_id)?;
            Some((
                alias_of(session, &v.voter_id),
                alias_of(session, &target.author_id),
            ))
        })
        .collect();

    let summary = RoundSummary {
        round_number: round.number,
        target_alias: round.target_alias.clone(),
        submissions,
        votes,
        eliminated_aliases: eliminated
            .iter()
            .map(|id| alias_of(session, id))
            .collect(),
    };

    let team = session.team_memory.entry(AGENT_TEAM_ID.to_string()).or_default();
    team.rounds.push(summary.clone());
    team.eliminated.extend(eliminated.iter().cloned());

    for player in session.players.iter_mut() {
        if let Some(profile) = player.agent.as_mut() {
            profile.memory.rounds.push(summary.clone());
            profile.memory.eliminated.extend(eliminated.iter().cloned());
        }
    }
}
