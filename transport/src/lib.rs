//! Pushover HTTP client: the concrete implementation behind
//! `runner_core::notifier::NotificationTransport`.
//!
//! Message clamping and credential/active checks happen upstream in the
//! notifier; this crate is deliberately thin — it posts the form payload
//! and classifies the response.

use async_trait::async_trait;
use runner_core::notifier::{NotificationTransport, TransportError};
use std::time::Duration;

const ENDPOINT: &str = "https://api.pushover.net/1/messages.json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

pub struct PushoverTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl PushoverTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client configuration is static and valid");
        Self {
            client,
            endpoint: ENDPOINT.to_string(),
        }
    }

    /// Points the client at a different endpoint, for tests against a mock server.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client configuration is static and valid");
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Default for PushoverTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationTransport for PushoverTransport {
    async fn send(
        &self,
        user_key: &str,
        api_token: &str,
        title: &str,
        message: &str,
    ) -> Result<(), TransportError> {
        let user_key = user_key.trim();
        let api_token = api_token.trim();
        if user_key.is_empty() || api_token.is_empty() {
            return Err(TransportError::Failed(
                "missing pushover user key or api token".to_string(),
            ));
        }
        if message.trim().is_empty() {
            return Err(TransportError::Failed("empty message".to_string()));
        }

        let form = [
            ("token", api_token),
            ("user", user_key),
            ("message", message),
            ("title", title),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|err| TransportError::Failed(format!("network error: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(TransportError::Failed(format!("HTTP {status}: {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_credentials_without_a_network_call() {
        let transport = PushoverTransport::with_endpoint("http://127.0.0.1:1");
        let result = transport.send("", "", "title", "message").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_blank_message_without_a_network_call() {
        let transport = PushoverTransport::with_endpoint("http://127.0.0.1:1");
        let result = transport.send("u", "t", "title", "   ").await;
        assert!(result.is_err());
    }
}
