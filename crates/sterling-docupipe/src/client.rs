//! DocuPipe HTTP client.
//!
//! Stateless per call: every retry/backoff decision belongs to the pipeline
//! layer, not here. The only looping behavior is the job status poll, which
//! runs at a fixed interval until the job reaches a terminal state or the
//! deadline passes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use sterling_core::{Error, Result};

use crate::config::DocupipeConfig;

/// Identifiers returned by a successful document submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub document_id: String,
    pub job_id: String,
}

/// Terminal outcome of a standardization job.
///
/// Non-terminal statuses never escape the poll loop; a loop that cannot
/// reach a terminal status before its deadline returns
/// [`Error::DocupipeTimeout`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StandardizeStatus {
    Completed,
    Failed { error: String },
}

/// External document-standardization service.
///
/// Implemented by [`DocupipeClient`] for the real API and by
/// [`crate::mock::MockDocupipe`] for tests.
#[async_trait]
pub trait Standardizer: Send + Sync {
    /// Submit a document for standardization.
    ///
    /// `workflow_id` overrides the configured default workflow when given.
    async fn submit(
        &self,
        bytes: &[u8],
        filename: &str,
        workflow_id: Option<&str>,
    ) -> Result<Submission>;

    /// Poll a job until it completes or fails, or the configured deadline
    /// passes (in which case the error is [`Error::DocupipeTimeout`]).
    async fn poll(&self, job_id: &str) -> Result<StandardizeStatus>;

    /// Fetch the standardized payload for a completed document.
    async fn fetch_standardization(&self, document_id: &str) -> Result<JsonValue>;
}

/// HTTP client for the DocuPipe standardization API.
pub struct DocupipeClient {
    client: Client,
    config: DocupipeConfig,
}

impl DocupipeClient {
    /// Create a new client with the given configuration.
    pub fn new(config: DocupipeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.submit_timeout_secs))
            .build()
            .map_err(|e| Error::Docupipe(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            workflow = config.workflow_id.as_deref().unwrap_or("(none)"),
            "Initializing DocuPipe client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(DocupipeConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &DocupipeConfig {
        &self.config
    }

    /// Build a POST request with authentication if configured.
    fn build_post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    /// Build a GET request with authentication if configured.
    fn build_get(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.get(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req
    }

    /// Poll with an explicit interval and deadline.
    ///
    /// The trait-level [`Standardizer::poll`] delegates here with the
    /// configured defaults; tests use short values to avoid real waits.
    pub async fn poll_with(
        &self,
        job_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<StandardizeStatus> {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            let job = self.fetch_job_status(job_id).await?;
            polls += 1;

            match job.status.as_str() {
                "completed" => {
                    debug!(job_id = %job_id, polls, elapsed_ms = start.elapsed().as_millis() as u64, "Standardization job completed");
                    return Ok(StandardizeStatus::Completed);
                }
                "failed" | "error" => {
                    let error = job
                        .error
                        .unwrap_or_else(|| "standardization failed without detail".to_string());
                    warn!(job_id = %job_id, error = %error, "Standardization job failed");
                    return Ok(StandardizeStatus::Failed { error });
                }
                other => {
                    debug!(job_id = %job_id, status = %other, polls, "Standardization job still running");
                }
            }

            if start.elapsed() >= timeout {
                return Err(Error::DocupipeTimeout(format!(
                    "job {} not terminal after {}s ({} polls)",
                    job_id,
                    timeout.as_secs(),
                    polls
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn fetch_job_status(&self, job_id: &str) -> Result<JobResponse> {
        let response = self
            .build_get(&format!("/jobs/{}", job_id))
            .send()
            .await
            .map_err(|e| Error::Docupipe(format!("Job status request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Docupipe(format!(
                "DocuPipe returned {} for job status: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Docupipe(format!("Failed to parse job status: {}", e)))
    }
}

#[async_trait]
impl Standardizer for DocupipeClient {
    async fn submit(
        &self,
        bytes: &[u8],
        filename: &str,
        workflow_id: Option<&str>,
    ) -> Result<Submission> {
        use base64::Engine;

        let start = Instant::now();
        let workflow = workflow_id
            .map(String::from)
            .or_else(|| self.config.workflow_id.clone());

        debug!(
            filename = %filename,
            size = bytes.len(),
            workflow = workflow.as_deref().unwrap_or("(none)"),
            "Submitting document for standardization"
        );

        let request = SubmitRequest {
            document: SubmitDocument {
                file: SubmitFile {
                    contents: base64::engine::general_purpose::STANDARD.encode(bytes),
                    filename: filename.to_string(),
                },
            },
            workflow_id: workflow,
        };

        let response = self
            .build_post("/documents")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Docupipe(format!("Submit request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Docupipe(format!(
                "DocuPipe returned {} for submit: {}",
                status, body
            )));
        }

        let result: SubmitResponse = response
            .json()
            .await
            .map_err(|e| Error::Docupipe(format!("Failed to parse submit response: {}", e)))?;

        debug!(
            document_id = %result.document_id,
            job_id = %result.job_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Document submitted"
        );

        Ok(Submission {
            document_id: result.document_id,
            job_id: result.job_id,
        })
    }

    async fn poll(&self, job_id: &str) -> Result<StandardizeStatus> {
        self.poll_with(
            job_id,
            Duration::from_millis(self.config.poll_interval_ms),
            Duration::from_secs(self.config.poll_timeout_secs),
        )
        .await
    }

    async fn fetch_standardization(&self, document_id: &str) -> Result<JsonValue> {
        let response = self
            .build_get(&format!("/documents/{}/standardization", document_id))
            .send()
            .await
            .map_err(|e| Error::Docupipe(format!("Standardization fetch failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Docupipe(format!(
                "DocuPipe returned {} for standardization: {}",
                status, body
            )));
        }

        let payload: JsonValue = response
            .json()
            .await
            .map_err(|e| Error::Docupipe(format!("Failed to parse standardization: {}", e)))?;

        Ok(unwrap_envelope(payload))
    }
}

/// Peel the `data` and `standardization` envelopes when present.
///
/// The API wraps payloads inconsistently across versions; downstream
/// normalization always receives the innermost document.
fn unwrap_envelope(value: JsonValue) -> JsonValue {
    let mut value = value;
    for key in ["data", "standardization"] {
        if let JsonValue::Object(ref mut map) = value {
            if let Some(inner) = map.remove(key) {
                value = inner;
            }
        }
    }
    value
}

#[derive(Serialize)]
struct SubmitRequest {
    document: SubmitDocument,
    #[serde(rename = "workflowId", skip_serializing_if = "Option::is_none")]
    workflow_id: Option<String>,
}

#[derive(Serialize)]
struct SubmitDocument {
    file: SubmitFile,
}

#[derive(Serialize)]
struct SubmitFile {
    contents: String,
    filename: String,
}

/// Response from `POST /documents`.
#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(rename = "documentId")]
    document_id: String,
    #[serde(rename = "jobId")]
    job_id: String,
}

/// Response from `GET /jobs/{id}`.
#[derive(Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_request_serialization() {
        use base64::Engine;

        let request = SubmitRequest {
            document: SubmitDocument {
                file: SubmitFile {
                    contents: base64::engine::general_purpose::STANDARD.encode(b"hello"),
                    filename: "payslip.pdf".to_string(),
                },
            },
            workflow_id: Some("wf-1".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["document"]["file"]["contents"], "aGVsbG8=");
        assert_eq!(value["document"]["file"]["filename"], "payslip.pdf");
        assert_eq!(value["workflowId"], "wf-1");
    }

    #[test]
    fn test_submit_request_omits_missing_workflow() {
        let request = SubmitRequest {
            document: SubmitDocument {
                file: SubmitFile {
                    contents: "AA==".to_string(),
                    filename: "x.pdf".to_string(),
                },
            },
            workflow_id: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("workflowId").is_none());
    }

    #[test]
    fn test_submit_response_deserialization() {
        let json = r#"{"documentId": "doc-9", "jobId": "job-4"}"#;
        let response: SubmitResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.document_id, "doc-9");
        assert_eq!(response.job_id, "job-4");
    }

    #[test]
    fn test_job_response_without_error_field() {
        let json = r#"{"status": "processing"}"#;
        let response: JobResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, "processing");
        assert!(response.error.is_none());
    }

    #[test]
    fn test_unwrap_envelope_peels_data_then_standardization() {
        let wrapped = json!({
            "data": {
                "standardization": {"documentType": "payslip", "grossPay": "3,500.00"}
            }
        });
        let inner = unwrap_envelope(wrapped);
        assert_eq!(inner["documentType"], "payslip");
        assert_eq!(inner["grossPay"], "3,500.00");
    }

    #[test]
    fn test_unwrap_envelope_peels_single_layer() {
        let wrapped = json!({"standardization": {"netPay": "2,500.00"}});
        let inner = unwrap_envelope(wrapped);
        assert_eq!(inner, json!({"netPay": "2,500.00"}));
    }

    #[test]
    fn test_unwrap_envelope_passes_bare_payload_through() {
        let bare = json!({"documentType": "payslip", "netPay": "2,500.00"});
        assert_eq!(unwrap_envelope(bare.clone()), bare);
    }

    #[test]
    fn test_unwrap_envelope_ignores_non_objects() {
        assert_eq!(unwrap_envelope(json!([1, 2])), json!([1, 2]));
        assert_eq!(unwrap_envelope(json!("raw")), json!("raw"));
    }
}
