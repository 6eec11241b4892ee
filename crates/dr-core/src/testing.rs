//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::backend::ResearchBackend;
use crate::clock::Clock;
use crate::error::Error;
use crate::interaction::Interaction;

/// A mock backend that returns pre-configured responses.
pub struct MockBackend {
    submit_responses: Mutex<Vec<Result<Interaction, Error>>>,
    fetch_responses: Mutex<Vec<Result<Interaction, Error>>>,
    followup_responses: Mutex<Vec<Result<Interaction, Error>>>,
    /// Returned by fetch() once the fetch queue is exhausted.
    repeated_fetch: Mutex<Option<Interaction>>,
    /// Captured (prompt, agent) pairs.
    pub submitted: Mutex<Vec<(String, String)>>,
    /// Captured job ids.
    pub fetched: Mutex<Vec<String>>,
    /// Captured (prior_job_id, question, model) triples.
    pub followups: Mutex<Vec<(String, String, String)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            submit_responses: Mutex::new(Vec::new()),
            fetch_responses: Mutex::new(Vec::new()),
            followup_responses: Mutex::new(Vec::new()),
            repeated_fetch: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
            followups: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for the next submit() call (FIFO).
    pub fn queue_submit(&self, response: Result<Interaction, Error>) {
        self.submit_responses.lock().unwrap().insert(0, response);
    }

    /// Queue a response for the next fetch() call (FIFO).
    pub fn queue_fetch(&self, response: Result<Interaction, Error>) {
        self.fetch_responses.lock().unwrap().insert(0, response);
    }

    /// Queue a response for the next submit_followup() call (FIFO).
    pub fn queue_followup(&self, response: Result<Interaction, Error>) {
        self.followup_responses.lock().unwrap().insert(0, response);
    }

    /// Return `interaction` from every fetch() after the queue runs dry.
    pub fn repeat_fetch(&self, interaction: Interaction) {
        *self.repeated_fetch.lock().unwrap() = Some(interaction);
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }

    pub fn followup_count(&self) -> usize {
        self.followups.lock().unwrap().len()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResearchBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, prompt: &str, agent: &str) -> Result<Interaction, Error> {
        self.submitted
            .lock()
            .unwrap()
            .push((prompt.to_string(), agent.to_string()));
        self.submit_responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(Error::backend_unavailable("No mock submit response queued")))
    }

    async fn fetch(&self, job_id: &str) -> Result<Interaction, Error> {
        self.fetched.lock().unwrap().push(job_id.to_string());
        if let Some(response) = self.fetch_responses.lock().unwrap().pop() {
            return response;
        }
        match self.repeated_fetch.lock().unwrap().clone() {
            Some(interaction) => Ok(interaction),
            None => Err(Error::backend_unavailable("No mock fetch response queued")),
        }
    }

    async fn submit_followup(
        &self,
        prior_job_id: &str,
        question: &str,
        model: &str,
    ) -> Result<Interaction, Error> {
        self.followups.lock().unwrap().push((
            prior_job_id.to_string(),
            question.to_string(),
            model.to_string(),
        ));
        self.followup_responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(Error::backend_unavailable("No mock follow-up response queued")))
    }
}

/// A clock whose sleep() advances virtual time instantly.
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    /// Every duration passed to sleep(), in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}
