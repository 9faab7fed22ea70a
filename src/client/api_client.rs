use crate::api::ApiResponse;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// ApiClient is a thin JSON-over-HTTP client: base URI, optional token
/// header, enveloped responses, short per-request timeout.
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response envelope carried no data")]
    MissingData,
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

impl ApiClient {
    pub fn new(base_uri: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("plain http client construction cannot fail");
        let base_uri: String = base_uri.into();
        ApiClient {
            http,
            base: base_uri.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// GET `path`, expecting enveloped data in the response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(http::Method::GET, path, None)
            .await?
            .ok_or(ClientError::MissingData)
    }

    /// POST `path` with an optional JSON body, ignoring any response data.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ClientError> {
        self.request::<B, serde_json::Value>(http::Method::POST, path, body)
            .await?;
        Ok(())
    }

    async fn request<B, T>(
        &self,
        method: http::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<T>, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let mut request = self
            .http
            .request(method, &url)
            .header(http::header::ACCEPT, "application/json");
        if !self.token.is_empty() {
            request = request.header("X-Api-Key", self.token.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            // Failures still carry the envelope; surface its message.
            let message = response
                .json::<ApiResponse<serde_json::Value>>()
                .await
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or_default();
            return Err(ClientError::Api { status, message });
        }

        let raw = response.bytes().await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let envelope: ApiResponse<T> = serde_json::from_slice(&raw)?;
        Ok(envelope.data)
    }
}
