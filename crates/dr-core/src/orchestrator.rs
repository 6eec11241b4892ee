//! Interaction orchestrator: turns an asynchronous backend job into a
//! synchronous call with timeout semantics.
//!
//! The poll loop is a small state machine:
//!
//! ```text
//! Submitted ──fetch──▶ Terminal
//!     │                  ▲
//!     ▼                  │ fetch
//!  Polling{n} ──sleep──▶─┘
//!     │
//!     └── deadline passed ──▶ TimedOut
//! ```
//!
//! Reaching the deadline is not an error: the last observed interaction is
//! returned so the caller can resume polling with the same job id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::ResearchBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::interaction::Interaction;

pub const DEFAULT_AGENT: &str = "deep-research-pro-preview-12-2025";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Longest wait accepted from callers and configuration: one week.
pub const MAX_TIMEOUT_SECONDS: f64 = 604_800.0;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Research agent used for new jobs.
    pub agent: String,
    /// Model used for follow-ups when the caller does not pick one.
    pub default_model: String,
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(agent: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            default_model: default_model.into(),
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Where the poll loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Job id known, nothing fetched yet.
    Submitted,
    /// At least one non-terminal fetch; waiting before the next one.
    Polling { attempt: u32 },
    /// Backend reported a terminal status.
    Terminal,
    /// Deadline passed while the job was still running.
    TimedOut,
}

impl PollState {
    pub fn is_finished(&self) -> bool {
        matches!(self, PollState::Terminal | PollState::TimedOut)
    }

    /// Transition taken after a fetch observed `interaction` at time `now`.
    /// A `None` deadline lies beyond what the clock can represent and never passes.
    pub fn after_fetch(
        interaction: &Interaction,
        now: Instant,
        deadline: Option<Instant>,
        fetches: u32,
    ) -> PollState {
        if interaction.is_terminal() {
            PollState::Terminal
        } else if deadline.is_some_and(|deadline| now >= deadline) {
            PollState::TimedOut
        } else {
            PollState::Polling { attempt: fetches }
        }
    }
}

/// Result of a bounded poll.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Last interaction fetched; non-terminal when the poll timed out.
    pub interaction: Interaction,
    /// Either [`PollState::Terminal`] or [`PollState::TimedOut`].
    pub state: PollState,
    pub fetches: u32,
}

impl PollOutcome {
    pub fn timed_out(&self) -> bool {
        self.state == PollState::TimedOut
    }

    pub fn into_interaction(self) -> Interaction {
        self.interaction
    }
}

pub struct Orchestrator {
    backend: Arc<dyn ResearchBackend>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
}

fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, Error> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::required(field))
    } else {
        Ok(trimmed)
    }
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ResearchBackend>, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit a new background research job.
    pub async fn submit(&self, prompt: &str, agent: &str) -> Result<Interaction, Error> {
        let prompt = require(prompt, "prompt")?;
        let agent = require(agent, "agent")?;

        let job = self.backend.submit(prompt, agent).await?;
        let Some(job_id) = job.id.as_deref() else {
            return Err(Error::backend_protocol(format!(
                "{} did not return a job id for the submitted research",
                self.backend.name()
            )));
        };

        info!(
            backend = self.backend.name(),
            job_id,
            agent,
            status = job.status_label(),
            "Research job submitted"
        );
        Ok(job)
    }

    /// Fetch the job once without waiting.
    pub async fn fetch_once(&self, job_id: &str) -> Result<Interaction, Error> {
        let job_id = require(job_id, "job_id")?;
        let interaction = self.backend.fetch(job_id).await?;
        debug!(job_id, status = interaction.status_label(), "Fetched job");
        Ok(interaction)
    }

    /// Fetch until the job is terminal or `timeout` elapses.
    ///
    /// Fetch failures are returned immediately rather than retried, so a
    /// flaky backend cannot stretch the call past its deadline unnoticed.
    pub async fn poll(
        &self,
        job_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<PollOutcome, Error> {
        let job_id = require(job_id, "job_id")?;
        if timeout.is_zero() {
            return Err(Error::invalid_argument("`timeout_seconds` must be > 0"));
        }

        let deadline = self.clock.now().checked_add(timeout);
        let mut state = PollState::Submitted;
        let mut fetches: u32 = 0;

        loop {
            let interaction = self.backend.fetch(job_id).await?;
            fetches += 1;

            let next = PollState::after_fetch(&interaction, self.clock.now(), deadline, fetches);
            debug!(
                job_id,
                from = ?state,
                to = ?next,
                status = interaction.status_label(),
                "Poll transition"
            );
            state = next;

            if !state.is_finished() {
                self.clock.sleep(poll_interval).await;
                continue;
            }

            if state == PollState::Terminal {
                info!(
                    job_id,
                    status = interaction.status_label(),
                    fetches,
                    "Job reached terminal status"
                );
            } else {
                warn!(
                    job_id,
                    status = interaction.status_label(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Poll deadline reached; job still running"
                );
            }
            return Ok(PollOutcome {
                interaction,
                state,
                fetches,
            });
        }
    }

    /// Submit a follow-up question against a previous job.
    ///
    /// The returned job is not polled; when it is still running the caller
    /// polls it like any other job.
    pub async fn follow_up(
        &self,
        prior_job_id: &str,
        question: &str,
        model: Option<&str>,
    ) -> Result<Interaction, Error> {
        let prior_job_id = require(prior_job_id, "prior_job_id")?;
        let question = require(question, "question")?;
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.config.default_model.as_str());

        let job = self
            .backend
            .submit_followup(prior_job_id, question, model)
            .await?;

        if job.id.is_none() && !job.is_terminal() {
            return Err(Error::backend_protocol(format!(
                "{} did not return a job id for the follow-up",
                self.backend.name()
            )));
        }

        info!(
            prior_job_id,
            job_id = job.id.as_deref().unwrap_or("-"),
            model,
            status = job.status_label(),
            "Follow-up submitted"
        );
        Ok(job)
    }
}
