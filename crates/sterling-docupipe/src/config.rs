//! DocuPipe client configuration.

use sterling_core::defaults;

/// Default DocuPipe API endpoint.
pub const DEFAULT_DOCUPIPE_URL: &str = "https://app.docupipe.ai";

/// Configuration for the DocuPipe client.
#[derive(Debug, Clone)]
pub struct DocupipeConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional against a local mock server).
    pub api_key: Option<String>,
    /// Standardization workflow to submit documents into. Used when the
    /// caller does not pass a workflow id explicitly.
    pub workflow_id: Option<String>,
    /// Per-request timeout for submissions in seconds.
    pub submit_timeout_secs: u64,
    /// Interval between job status polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall deadline for a poll loop in seconds.
    pub poll_timeout_secs: u64,
}

impl Default for DocupipeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DOCUPIPE_URL.to_string(),
            api_key: None,
            workflow_id: None,
            submit_timeout_secs: defaults::DOCUPIPE_SUBMIT_TIMEOUT_SECS,
            poll_interval_ms: defaults::DOCUPIPE_POLL_INTERVAL_MS,
            poll_timeout_secs: defaults::DOCUPIPE_POLL_TIMEOUT_SECS,
        }
    }
}

impl DocupipeConfig {
    /// Build configuration from environment variables.
    ///
    /// - `STERLING_DOCUPIPE_URL` — base endpoint (default production URL)
    /// - `STERLING_DOCUPIPE_API_KEY` — bearer token
    /// - `STERLING_DOCUPIPE_WORKFLOW` — default workflow id
    /// - `STERLING_DOCUPIPE_SUBMIT_TIMEOUT_SECS`
    /// - `STERLING_DOCUPIPE_POLL_INTERVAL_MS`
    /// - `STERLING_DOCUPIPE_POLL_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("STERLING_DOCUPIPE_URL")
                .unwrap_or_else(|_| DEFAULT_DOCUPIPE_URL.to_string()),
            api_key: std::env::var("STERLING_DOCUPIPE_API_KEY").ok(),
            workflow_id: std::env::var("STERLING_DOCUPIPE_WORKFLOW").ok(),
            submit_timeout_secs: std::env::var("STERLING_DOCUPIPE_SUBMIT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::DOCUPIPE_SUBMIT_TIMEOUT_SECS),
            poll_interval_ms: std::env::var("STERLING_DOCUPIPE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::DOCUPIPE_POLL_INTERVAL_MS),
            poll_timeout_secs: std::env::var("STERLING_DOCUPIPE_POLL_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::DOCUPIPE_POLL_TIMEOUT_SECS),
        }
    }
}
