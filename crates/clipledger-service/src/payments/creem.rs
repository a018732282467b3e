//! Creem API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider};

/// Creem API client.
#[derive(Debug, Clone)]
pub struct CreemClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreemErrorResponse {
    #[serde(default)]
    message: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl CreemClient {
    /// Production API base URL.
    pub const BASE_URL: &'static str = "https://api.creem.io";

    /// Test-mode API base URL, selected for `creem_test_` keys.
    pub const TEST_BASE_URL: &'static str = "https://test-api.creem.io";

    /// Create a client. The base URL follows the key's mode unless overridden.
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Result<Self, PaymentError> {
        let api_key = api_key.into();
        let base_url = base_url.unwrap_or_else(|| {
            if api_key.starts_with("creem_test_") {
                Self::TEST_BASE_URL.to_string()
            } else {
                Self::BASE_URL.to_string()
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// API base URL in use.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PaymentProvider for CreemClient {
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/checkouts", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<CreemErrorResponse>(&body)
                .ok()
                .and_then(|e| {
                    e.error
                        .or_else(|| e.message.map(|m| m.to_string()))
                })
                .unwrap_or(body);
            return Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::CheckoutMetadata;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            product_id: "prod_pro".into(),
            success_url: "http://app.test/en/dashboard?payment=success&credits=50".into(),
            metadata: CheckoutMetadata {
                user_id: "user_1".into(),
                transaction_id: "01HZX".into(),
                pack: "pro".into(),
                credits: 50,
            },
        }
    }

    #[test]
    fn test_keys_select_test_api() {
        let client = CreemClient::new("creem_test_abc", None).unwrap();
        assert_eq!(client.base_url(), CreemClient::TEST_BASE_URL);

        let client = CreemClient::new("creem_live", None).unwrap();
        assert_eq!(client.base_url(), CreemClient::BASE_URL);
    }

    #[tokio::test]
    async fn creates_checkout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkouts"))
            .and(header("x-api-key", "creem_test_abc"))
            .and(body_partial_json(json!({
                "product_id": "prod_pro",
                "metadata": { "transaction_id": "01HZX", "credits": 50 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ch_1",
                "checkout_url": "https://pay.test/ch_1",
                "status": "pending"
            })))
            .mount(&server)
            .await;

        let client = CreemClient::new("creem_test_abc", Some(server.uri())).unwrap();
        let session = client.create_checkout(&request()).await.unwrap();
        assert_eq!(session.id, "ch_1");
        assert_eq!(session.checkout_url, "https://pay.test/ch_1");
    }

    #[tokio::test]
    async fn surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "Forbidden"})))
            .mount(&server)
            .await;

        let client = CreemClient::new("creem_live", Some(server.uri())).unwrap();
        let err = client.create_checkout(&request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Api { status: 403, message } if message == "Forbidden"));
    }
}
