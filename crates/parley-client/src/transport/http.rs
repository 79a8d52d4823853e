//! Persistence calls over HTTP.

use std::time::Duration;

use parley_proto::{ApiRequest, ApiResponse, Method};
use serde::Deserialize;

use super::TransportError;
use crate::error::ApiError;

/// Upper bound on a single persistence call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the persistence API.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApi {
    /// Client for the API rooted at `base_url`, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    /// Execute `request`, authenticating with `token` when the call needs it.
    pub async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path());
        let mut builder = match request.method() {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };
        if let Some(token) = bearer(request, token) {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body()? {
            builder = builder.json(&body);
        }

        tracing::debug!(call = request.name(), %url, "api request");
        let response = builder.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| ApiError::Network(e.to_string()))?;

        if status.is_success() {
            return Ok(request.decode_response(&body)?);
        }

        let message = serde_json::from_slice::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        tracing::debug!(call = request.name(), status = status.as_u16(), %message, "api request refused");

        if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(ApiError::Unauthorized(message))
        } else {
            Err(ApiError::Rejected { status: status.as_u16(), message })
        }
    }
}

/// Token to attach to `request`. Credential exchanges never carry one.
fn bearer<'a>(request: &ApiRequest, token: Option<&'a str>) -> Option<&'a str> {
    token.filter(|_| request.requires_auth())
}

#[cfg(test)]
mod tests {
    use parley_proto::{Credentials, UserId};

    use super::*;

    #[test]
    fn token_is_withheld_from_login() {
        let login = ApiRequest::Login(Credentials { email: "a@b.co".into(), password: "secret".into() });
        let history = ApiRequest::History { peer: UserId::new("p42"), page: 1, limit: 50 };

        assert_eq!(bearer(&login, Some("stale")), None);
        assert_eq!(bearer(&history, Some("tok")), Some("tok"));
        assert_eq!(bearer(&history, None), None);
    }
}
