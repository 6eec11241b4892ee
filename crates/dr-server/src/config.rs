use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use dr_core::{Error, OrchestratorConfig, DEFAULT_AGENT, DEFAULT_MODEL, MAX_TIMEOUT_SECONDS};

/// Effective server settings.
///
/// Sources, lowest precedence first: built-in defaults, the TOML config file,
/// `GOOGLE_API_KEY` (credential only), then `GEMINI_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used for follow-up questions
    pub model: String,

    /// Agent used for new research jobs
    pub deep_research_agent: String,

    pub poll_interval_seconds: f64,

    /// Default wait for `deep_research` calls and for follow-ups
    pub timeout_seconds: f64,

    /// Override for the Interactions API endpoint (e.g. a proxy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            deep_research_agent: DEFAULT_AGENT.to_string(),
            poll_interval_seconds: 10.0,
            timeout_seconds: 600.0,
            base_url: None,
        }
    }
}

impl Settings {
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GOOGLE_").only(&["api_key"]))
            .merge(Env::prefixed("GEMINI_"))
    }

    /// Load and validate settings. `config_path` overrides the default file.
    pub fn load(config_path: Option<&Path>) -> Result<Self, Error> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        let settings: Settings = Self::figment(&path)
            .extract()
            .map_err(|e| Error::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn config_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine config directory"))?;
        Ok(config_dir.join("deep-research").join("config.toml"))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
            return Err(Error::config(
                "Missing API key. Set GEMINI_API_KEY (or GOOGLE_API_KEY) or `api_key` in the config file",
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config("`model` must not be empty"));
        }
        if self.deep_research_agent.trim().is_empty() {
            return Err(Error::config("`deep_research_agent` must not be empty"));
        }
        if !self.poll_interval_seconds.is_finite() || self.poll_interval_seconds < 0.0 {
            return Err(Error::config(format!(
                "`poll_interval_seconds` must be a non-negative number, got {}",
                self.poll_interval_seconds
            )));
        }
        if !self.timeout_seconds.is_finite()
            || self.timeout_seconds <= 0.0
            || self.timeout_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(Error::config(format!(
                "`timeout_seconds` must be in (0, {}], got {}",
                MAX_TIMEOUT_SECONDS, self.timeout_seconds
            )));
        }
        Ok(())
    }

    /// Credential with surrounding whitespace removed; empty before validation.
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_seconds).unwrap_or(Duration::ZERO)
    }

    /// Clamped to [`MAX_TIMEOUT_SECONDS`].
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds.min(MAX_TIMEOUT_SECONDS))
            .unwrap_or(Duration::ZERO)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new(self.deep_research_agent.trim(), self.model.trim())
            .with_poll_interval(self.poll_interval())
    }

    /// Copy safe to print: the credential is reduced to its last four characters.
    pub fn redacted(&self) -> Self {
        let api_key = self.api_key.as_deref().map(|key| {
            let key = key.trim();
            let tail: String = key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if key.chars().count() > 8 {
                format!("…{}", tail)
            } else {
                "(configured)".to_string()
            }
        });
        Self {
            api_key,
            ..self.clone()
        }
    }
}
