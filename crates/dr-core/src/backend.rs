use async_trait::async_trait;

use crate::error::Error;
use crate::interaction::Interaction;

/// The external research service that owns job state.
///
/// Implementations perform a single attempt per call; retry policy belongs to
/// the caller.
#[async_trait]
pub trait ResearchBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Start a background research job. The backend must retain the job so it
    /// can be polled and followed up later.
    async fn submit(&self, prompt: &str, agent: &str) -> Result<Interaction, Error>;

    /// Fetch the current state of a job.
    async fn fetch(&self, job_id: &str) -> Result<Interaction, Error>;

    /// Ask a question in the context of a previous job using a regular model.
    async fn submit_followup(
        &self,
        prior_job_id: &str,
        question: &str,
        model: &str,
    ) -> Result<Interaction, Error>;
}
