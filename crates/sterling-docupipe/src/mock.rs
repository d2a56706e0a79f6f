//! Mock standardizer for deterministic testing.
//!
//! Scriptable implementation of [`Standardizer`]: canned submissions, a poll
//! script (sequence of outcomes consumed one per `poll` call), canned
//! standardization payloads, and a call log for assertions.
//!
//! ## Usage
//!
//! ```rust
//! use sterling_docupipe::mock::{MockDocupipe, PollOutcome};
//! use sterling_docupipe::{Standardizer, StandardizeStatus};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mock = MockDocupipe::new()
//!     .with_poll_script(vec![PollOutcome::Error("upstream 503".into()), PollOutcome::Completed]);
//!
//! let submission = mock.submit(b"bytes", "payslip.pdf", None).await.unwrap();
//! assert!(mock.poll(&submission.job_id).await.is_err());
//! assert_eq!(
//!     mock.poll(&submission.job_id).await.unwrap(),
//!     StandardizeStatus::Completed
//! );
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use sterling_core::{Error, Result};

use crate::client::{StandardizeStatus, Standardizer, Submission};

/// Scripted outcome for one `poll` call.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Job completed; payload becomes fetchable.
    Completed,
    /// Job reached a terminal failure with the given error detail.
    Failed(String),
    /// Poll loop deadline exhausted ([`Error::DocupipeTimeout`]).
    Timeout,
    /// Transport or API error ([`Error::Docupipe`]).
    Error(String),
}

/// Mock standardizer for testing.
#[derive(Clone)]
pub struct MockDocupipe {
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    fixed_submission: Option<Submission>,
    submit_error: Option<String>,
    fetch_error: Option<String>,
    payloads: HashMap<String, JsonValue>,
    default_payload: JsonValue,
}

#[derive(Debug, Default)]
struct MockState {
    submissions: u64,
    poll_script: VecDeque<PollOutcome>,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
    pub timestamp: std::time::Instant,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            fixed_submission: None,
            submit_error: None,
            fetch_error: None,
            payloads: HashMap::new(),
            default_payload: JsonValue::Object(serde_json::Map::new()),
        }
    }
}

impl MockDocupipe {
    /// Create a new mock with default configuration.
    ///
    /// Submissions get sequential `mock-doc-N`/`mock-job-N` identifiers and
    /// every poll completes immediately.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            state: Arc::new(Mutex::new(MockState::default())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Pin the identifiers returned by every submission.
    pub fn with_submission(
        mut self,
        document_id: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config).fixed_submission = Some(Submission {
            document_id: document_id.into(),
            job_id: job_id.into(),
        });
        self
    }

    /// Make every submission fail with the given error.
    pub fn with_submit_error(mut self, error: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).submit_error = Some(error.into());
        self
    }

    /// Script poll outcomes, consumed one per `poll` call.
    ///
    /// Once the script is exhausted, further polls complete.
    pub fn with_poll_script(self, outcomes: Vec<PollOutcome>) -> Self {
        self.state.lock().unwrap().poll_script = outcomes.into();
        self
    }

    /// Set the payload returned for a specific document id.
    pub fn with_payload(mut self, document_id: impl Into<String>, payload: JsonValue) -> Self {
        Arc::make_mut(&mut self.config)
            .payloads
            .insert(document_id.into(), payload);
        self
    }

    /// Set the payload returned for documents without a specific mapping.
    pub fn with_default_payload(mut self, payload: JsonValue) -> Self {
        Arc::make_mut(&mut self.config).default_payload = payload;
        self
    }

    /// Make every standardization fetch fail with the given error.
    pub fn with_fetch_error(mut self, error: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).fetch_error = Some(error.into());
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    /// Get number of submit calls.
    pub fn submit_call_count(&self) -> usize {
        self.count_calls("submit")
    }

    /// Get number of poll calls.
    pub fn poll_call_count(&self) -> usize {
        self.count_calls("poll")
    }

    /// Get number of standardization fetches.
    pub fn fetch_call_count(&self) -> usize {
        self.count_calls("fetch_standardization")
    }

    fn count_calls(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn log_call(&self, operation: &str, input: &str) {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            input: input.to_string(),
            timestamp: std::time::Instant::now(),
        });
    }
}

impl Default for MockDocupipe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Standardizer for MockDocupipe {
    async fn submit(
        &self,
        _bytes: &[u8],
        filename: &str,
        _workflow_id: Option<&str>,
    ) -> Result<Submission> {
        self.log_call("submit", filename);

        if let Some(ref error) = self.config.submit_error {
            return Err(Error::Docupipe(error.clone()));
        }

        if let Some(ref submission) = self.config.fixed_submission {
            return Ok(submission.clone());
        }

        let mut state = self.state.lock().unwrap();
        state.submissions += 1;
        Ok(Submission {
            document_id: format!("mock-doc-{}", state.submissions),
            job_id: format!("mock-job-{}", state.submissions),
        })
    }

    async fn poll(&self, job_id: &str) -> Result<StandardizeStatus> {
        self.log_call("poll", job_id);

        let outcome = self.state.lock().unwrap().poll_script.pop_front();
        match outcome {
            None | Some(PollOutcome::Completed) => Ok(StandardizeStatus::Completed),
            Some(PollOutcome::Failed(error)) => Ok(StandardizeStatus::Failed { error }),
            Some(PollOutcome::Timeout) => Err(Error::DocupipeTimeout(format!(
                "job {} not terminal before deadline",
                job_id
            ))),
            Some(PollOutcome::Error(error)) => Err(Error::Docupipe(error)),
        }
    }

    async fn fetch_standardization(&self, document_id: &str) -> Result<JsonValue> {
        self.log_call("fetch_standardization", document_id);

        if let Some(ref error) = self.config.fetch_error {
            return Err(Error::Docupipe(error.clone()));
        }

        Ok(self
            .config
            .payloads
            .get(document_id)
            .cloned()
            .unwrap_or_else(|| self.config.default_payload.clone()))
    }
}
