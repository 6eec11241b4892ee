use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, trace};

use dr_core::{Error, Interaction, ResearchBackend};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini Interactions API client.
pub struct GeminiInteractions {
    client: Client,
    api_key: String,
    base_url: String,
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl GeminiInteractions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request timeout for submit/fetch calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    fn interactions_url(&self) -> String {
        format!("{}/interactions", self.base_url)
    }

    fn interaction_url(&self, job_id: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.interactions_url()).map_err(|e| {
            Error::config(format!("Invalid Gemini base URL '{}': {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                Error::config(format!("Gemini base URL cannot be a base: {}", self.base_url))
            })?
            .push(job_id);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Interaction, Error> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                Error::backend_unavailable(format!("Gemini {} failed: {}", operation, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(
                status = status.as_u16(),
                body = %error_text,
                operation,
                "Gemini request failed"
            );
            return Err(self.parse_error(status.as_u16(), &error_text));
        }

        let body = response.text().await.map_err(|e| {
            Error::backend_unavailable(format!(
                "Gemini {} response read failed: {}",
                operation, e
            ))
        })?;
        trace!(response = %body, operation, "Gemini response payload");

        let interaction = parse_interaction(&body)?;
        debug!(
            operation,
            job_id = interaction.id.as_deref().unwrap_or("-"),
            status = interaction.status_label(),
            outputs = interaction.outputs.len(),
            "Gemini response"
        );
        Ok(interaction)
    }

    async fn create(
        &self,
        body: &CreateInteractionRequest<'_>,
        operation: &str,
    ) -> Result<Interaction, Error> {
        trace!(
            request = %serde_json::to_string(body).unwrap_or_default(),
            operation,
            "Gemini request payload"
        );
        let request = self
            .client
            .post(self.interactions_url())
            .header("Content-Type", "application/json")
            .json(body);
        self.send(request, operation).await
    }

    fn parse_error(&self, status: u16, body: &str) -> Error {
        #[derive(Deserialize)]
        struct ErrorResponse {
            error: ErrorDetail,
        }

        #[derive(Deserialize)]
        struct ErrorDetail {
            message: String,
        }

        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|err| err.error.message)
            .unwrap_or_else(|_| body.to_string());

        match status {
            401 | 403 => Error::auth(message),
            429 => Error::rate_limit(message),
            500..=599 => {
                Error::backend_unavailable(format!("Gemini returned {}: {}", status, message))
            }
            _ => Error::api(status, message),
        }
    }
}

/// The backend must answer with a JSON object; anything else breaks the contract.
fn parse_interaction(body: &str) -> Result<Interaction, Error> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::backend_protocol(format!("Gemini returned invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(Error::backend_protocol("Gemini response is not a JSON object"));
    }
    Ok(Interaction::from_value(&value))
}

#[async_trait]
impl ResearchBackend for GeminiInteractions {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn submit(&self, prompt: &str, agent: &str) -> Result<Interaction, Error> {
        debug!(agent, prompt_len = prompt.len(), "Gemini submit research");
        // Background execution requires the job to be stored server-side.
        let body = CreateInteractionRequest {
            input: prompt,
            agent: Some(agent),
            model: None,
            previous_interaction_id: None,
            background: Some(true),
            store: Some(true),
        };
        self.create(&body, "submit").await
    }

    async fn fetch(&self, job_id: &str) -> Result<Interaction, Error> {
        let url = self.interaction_url(job_id)?;
        trace!(url = %url, "Gemini fetch");
        let request = self.client.get(url);
        self.send(request, "fetch").await
    }

    async fn submit_followup(
        &self,
        prior_job_id: &str,
        question: &str,
        model: &str,
    ) -> Result<Interaction, Error> {
        debug!(prior_job_id, model, "Gemini submit follow-up");
        let body = CreateInteractionRequest {
            input: question,
            agent: None,
            model: Some(model),
            previous_interaction_id: Some(prior_job_id),
            background: None,
            store: None,
        };
        self.create(&body, "follow-up").await
    }
}

// ── Gemini API types ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateInteractionRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_interaction_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    background: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<bool>,
}
