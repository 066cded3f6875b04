//! Shared JSON-over-HTTP plumbing for provider clients.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;

/// Bearer-authenticated JSON client bound to one base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Auth("api key not configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::rejected(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = self.url(path);
        debug!(%url, "provider POST");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let url = self.url(path);
        debug!(%url, "provider GET");
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn read(resp: reqwest::Response) -> Result<Value, ProviderError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }
        let body: Value = resp.json().await?;
        check_envelope(&body)?;
        Ok(body)
    }
}

/// Some providers answer HTTP 200 with an error code in the body.
fn check_envelope(body: &Value) -> Result<(), ProviderError> {
    let Some(code) = body.get("code").and_then(Value::as_u64) else {
        return Ok(());
    };
    if code == 200 || code == 0 {
        return Ok(());
    }
    let msg = body.get("msg").and_then(Value::as_str).unwrap_or("provider error");
    match u16::try_from(code) {
        Ok(status) => Err(ProviderError::from_status(status, msg)),
        Err(_) => Err(ProviderError::InvalidResponse(format!("unexpected code {code}: {msg}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_codes() {
        assert!(check_envelope(&json!({"data": {}})).is_ok());
        assert!(check_envelope(&json!({"code": 200, "data": {}})).is_ok());
        assert!(matches!(
            check_envelope(&json!({"code": 429, "msg": "slow down"})),
            Err(ProviderError::Quota(_))
        ));
    }

    #[test]
    fn empty_key_is_an_auth_error() {
        let err = HttpClient::new("https://example.invalid", " ", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }
}
