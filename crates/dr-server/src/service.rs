//! Transport-independent tool semantics.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dr_core::{Error, Interaction, Orchestrator, Result, MAX_TIMEOUT_SECONDS};
use dr_report::{build_report, CitationEntry, RedirectResolver};

fn default_wait() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct StartOrPollArgs {
    /// Research question or topic. Starts a new job; mutually exclusive with `job_id`.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Id of an existing job to check on or keep waiting for. Mutually exclusive with `prompt`.
    #[serde(default, alias = "interaction_id")]
    pub job_id: Option<String>,

    /// Block until the job finishes or `timeout_seconds` elapses (default: true).
    #[serde(default = "default_wait")]
    pub wait: bool,

    /// Maximum seconds to wait when `wait` is true (default: server setting, 600).
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct FollowUpArgs {
    /// Id of the completed research job the question refers to.
    #[serde(alias = "previous_interaction_id")]
    pub prior_job_id: String,

    /// Follow-up question about the research.
    pub question: String,

    /// Model to answer with (default: server setting).
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchOutput {
    pub job_id: String,
    pub status: String,
    pub report_text: String,
    pub citations: Vec<CitationEntry>,
    /// Backend failure description, present when the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUpOutput {
    pub job_id: String,
    pub answer_text: String,
    pub citations: Vec<CitationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn warn_if_unsuccessful(job_id: &str, interaction: &Interaction) {
    if interaction.is_terminal() && interaction.status_label() != "completed" {
        warn!(
            job_id,
            status = interaction.status_label(),
            error = interaction.error_message().unwrap_or("-"),
            "Job ended without completing"
        );
    }
}

enum Request<'a> {
    Start(&'a str),
    Resume(&'a str),
}

/// Shared by every tool call for the lifetime of the process.
pub struct ResearchService {
    orchestrator: Orchestrator,
    resolver: Arc<RedirectResolver>,
    default_timeout: Duration,
}

impl ResearchService {
    pub fn new(
        orchestrator: Orchestrator,
        resolver: Arc<RedirectResolver>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            resolver,
            default_timeout,
        }
    }

    fn wait_timeout(&self, timeout_seconds: Option<f64>) -> Result<Duration> {
        let Some(seconds) = timeout_seconds else {
            return Ok(self.default_timeout);
        };
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(Error::invalid_argument("`timeout_seconds` must be > 0"));
        }
        if seconds > MAX_TIMEOUT_SECONDS {
            return Err(Error::invalid_argument(format!(
                "`timeout_seconds` must be <= {}",
                MAX_TIMEOUT_SECONDS
            )));
        }
        Ok(Duration::from_secs_f64(seconds))
    }

    async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<Interaction> {
        let poll_interval = self.orchestrator.config().poll_interval;
        let outcome = self.orchestrator.poll(job_id, timeout, poll_interval).await?;
        if outcome.timed_out() {
            debug!(job_id, fetches = outcome.fetches, "Returning running job to caller");
        }
        Ok(outcome.into_interaction())
    }

    /// Start a new research job or check on an existing one.
    pub async fn start_or_poll(&self, args: StartOrPollArgs) -> Result<ResearchOutput> {
        let request = match (
            non_blank(args.prompt.as_deref()),
            non_blank(args.job_id.as_deref()),
        ) {
            (Some(prompt), None) => Request::Start(prompt),
            (None, Some(job_id)) => Request::Resume(job_id),
            _ => {
                return Err(Error::invalid_argument(
                    "exactly one of `prompt` or `job_id` is required",
                ))
            }
        };
        let timeout = if args.wait {
            Some(self.wait_timeout(args.timeout_seconds)?)
        } else {
            None
        };

        let (requested_id, interaction) = match request {
            Request::Start(prompt) => {
                let agent = self.orchestrator.config().agent.clone();
                let submitted = self.orchestrator.submit(prompt, &agent).await?;
                let submitted_id = submitted.id.clone().unwrap_or_default();
                let interaction = match timeout {
                    Some(timeout) => self.wait_for(&submitted_id, timeout).await?,
                    None => submitted,
                };
                (submitted_id, interaction)
            }
            Request::Resume(job_id) => {
                let interaction = match timeout {
                    Some(timeout) => self.wait_for(job_id, timeout).await?,
                    None => self.orchestrator.fetch_once(job_id).await?,
                };
                (job_id.to_string(), interaction)
            }
        };

        let job_id = interaction.id.clone().unwrap_or(requested_id);
        warn_if_unsuccessful(&job_id, &interaction);
        let report = build_report(&interaction, &self.resolver).await;
        let output = ResearchOutput {
            job_id,
            status: interaction.status_label().to_string(),
            report_text: report.text,
            citations: report.citations,
            error: interaction.error_message().map(str::to_string),
        };
        info!(
            job_id = %output.job_id,
            status = %output.status,
            report_len = output.report_text.len(),
            citations = output.citations.len(),
            "Research result ready"
        );
        Ok(output)
    }

    /// Ask a follow-up question about a finished job.
    pub async fn follow_up(&self, args: FollowUpArgs) -> Result<FollowUpOutput> {
        let submitted = self
            .orchestrator
            .follow_up(&args.prior_job_id, &args.question, args.model.as_deref())
            .await?;

        let interaction = match submitted.id.clone() {
            Some(job_id) if !submitted.is_terminal() => {
                debug!(
                    job_id = %job_id,
                    status = submitted.status_label(),
                    "Waiting for follow-up answer"
                );
                self.wait_for(&job_id, self.default_timeout).await?
            }
            _ => submitted,
        };

        let job_id = interaction.id.clone().unwrap_or_default();
        warn_if_unsuccessful(&job_id, &interaction);
        let report = build_report(&interaction, &self.resolver).await;
        Ok(FollowUpOutput {
            job_id,
            answer_text: report.text,
            citations: report.citations,
            error: interaction.error_message().map(str::to_string),
        })
    }
}
