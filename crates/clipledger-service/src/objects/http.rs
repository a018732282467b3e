//! Object store reached over plain HTTP (`PUT` to write, `HEAD` to probe).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{join_url, validate_key, ObjectStore, ObjectStoreError};

/// An HTTP object store such as a bucket gateway or presigning proxy.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    token: Option<String>,
    public_url_base: String,
}

impl HttpObjectStore {
    /// Create a client for the store at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        public_url_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ObjectStoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
            public_url_base: public_url_base.into(),
        })
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, join_url(&self.base_url, key));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let response = self
            .request(reqwest::Method::PUT, key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ObjectStoreError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;
        let response = self.request(reqwest::Method::HEAD, key).send().await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(ObjectStoreError::Status { status: s.as_u16() }),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_url_base, key)
    }
}
