//! RunPod serverless dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{DispatchError, DispatchOutcome, DispatchRequest, Dispatcher};

/// Longest provider body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct RunRequest<'a> {
    input: &'a DispatchRequest,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Dispatches jobs to a RunPod serverless endpoint (`POST /v2/{endpoint}/run`).
#[derive(Debug, Clone)]
pub struct RunPodDispatcher {
    client: Client,
    run_url: String,
    api_key: String,
}

impl RunPodDispatcher {
    /// Create a dispatcher for `endpoint_id`.
    pub fn new(
        base_url: &str,
        endpoint_id: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            run_url: format!("{}/v2/{endpoint_id}/run", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Dispatcher for RunPodDispatcher {
    async fn submit(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let response = self
            .client
            .post(&self.run_url)
            .bearer_auth(&self.api_key)
            .json(&RunRequest { input: request })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Malformed input is never going to be accepted on retry.
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            return Ok(DispatchOutcome::Rejected {
                reason: format!("status {}: {}", status.as_u16(), truncate(&body)),
            });
        }

        if !status.is_success() {
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let parsed: RunResponse = serde_json::from_str(&body)
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;

        if parsed.status.as_deref() == Some("FAILED") {
            return Ok(DispatchOutcome::Rejected {
                reason: parsed.error.unwrap_or_else(|| "provider reported FAILED".into()),
            });
        }

        let handle = parsed
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DispatchError::InvalidResponse("missing job id".into()))?;

        Ok(DispatchOutcome::Accepted { handle })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipledger_core::{Job, Quality, UserId};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> DispatchRequest {
        let user = UserId::new("user_1").unwrap();
        DispatchRequest::for_job(&Job::new(user, "uploads/user_1/a/in.mp4", Quality::E2fgviHq))
    }

    fn dispatcher(server: &MockServer) -> RunPodDispatcher {
        RunPodDispatcher::new(&server.uri(), "ep1", "rp_key", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn accepted_job_returns_handle() {
        let server = MockServer::start().await;
        let req = request();
        Mock::given(method("POST"))
            .and(path("/v2/ep1/run"))
            .and(header("authorization", "Bearer rp_key"))
            .and(body_partial_json(json!({
                "input": {
                    "job_id": req.job_id.to_string(),
                    "output_key": req.output_key,
                    "quality": "e2fgvi_hq"
                }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "rp-123", "status": "IN_QUEUE"})),
            )
            .mount(&server)
            .await;

        let outcome = dispatcher(&server).submit(&req).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Accepted {
                handle: "rp-123".into()
            }
        );
    }

    #[tokio::test]
    async fn bad_request_is_definitive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .mount(&server)
            .await;

        let outcome = dispatcher(&server).submit(&request()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Rejected { reason } if reason.contains("bad input")));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = dispatcher(&server).submit(&request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status { status: 503, .. }));
    }
}
