//! Authorization code to token exchange
//!
//! One form-encoded POST to the provider token endpoint. No retries: a
//! failed exchange ends the connect attempt.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use crate::Result;
use crate::config::Config;
use crate::error::Error;

/// Token endpoint success response
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    pub instance_url: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Identity URL, `https://<host>/id/<orgId>/<userId>`
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl TokenResponse {
    /// Organization id carried by the identity URL
    pub fn org_id(&self) -> Option<String> {
        self.id.as_deref().and_then(org_id_from_identity_url)
    }
}

/// Extract the organization id from an identity URL.
///
/// The identity URL has the fixed shape `https://<host>/id/<orgId>/<userId>`,
/// so splitting on `/` puts the org id at index 4. Anything shorter yields `None`.
pub fn org_id_from_identity_url(identity_url: &str) -> Option<String> {
    identity_url
        .split('/')
        .nth(4)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// OAuth2 error body, e.g. `{"error":"invalid_grant","error_description":"expired authorization code"}`
#[derive(Debug, Deserialize)]
struct ProviderError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Token exchange request
#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'a str,
    code: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

/// Exchanges an authorization code for tokens
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<TokenResponse>;
}

/// Token exchange client backed by reqwest
#[derive(Clone)]
pub struct HttpTokenClient {
    http_client: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
}

impl HttpTokenClient {
    pub fn new(
        token_endpoint: String,
        client_id: String,
        client_secret: Option<String>,
        redirect_uri: String,
    ) -> Self {
        Self {
            http_client: Client::new(),
            token_endpoint,
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.token_endpoint(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.clone(),
        )
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenClient {
    async fn exchange(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        let request = TokenExchangeRequest {
            grant_type: "authorization_code",
            code,
            client_id: &self.client_id,
            redirect_uri: &self.redirect_uri,
            code_verifier,
            client_secret: self.client_secret.as_deref().filter(|s| !s.is_empty()),
        };

        tracing::debug!("Exchanging authorization code at {}", self.token_endpoint);

        let response = self.http_client
            .post(&self.token_endpoint)
            .form(&request)
            .send()
            .await
            .map_err(|e| Error::TokenExchange(format!("request to {} failed: {}", self.token_endpoint, e)))?;

        let status = response.status();
        let body = response.text().await
            .map_err(|e| Error::TokenExchange(format!("failed to read token response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::TokenExchange(describe_failure(status.as_u16(), &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::TokenExchange(format!("malformed token response: {}", e)))
    }
}

/// Human readable reason for a non-success token response
fn describe_failure(status: u16, body: &str) -> String {
    match serde_json::from_str::<ProviderError>(body) {
        Ok(ProviderError { error: Some(code), error_description: Some(desc) }) => {
            format!("{} - {} (HTTP {})", code, desc, status)
        }
        Ok(ProviderError { error: Some(code), error_description: None }) => {
            format!("{} (HTTP {})", code, status)
        }
        _ => {
            let snippet: String = body.trim().chars().take(200).collect();
            if snippet.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, snippet)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve a single canned HTTP response and hand back the raw request
    async fn fake_token_endpoint(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{}/services/oauth2/token", addr), handle)
    }

    fn form_body(raw: &str) -> Vec<(String, String)> {
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        url::form_urlencoded::parse(body.as_bytes()).into_owned().collect()
    }

    #[test]
    fn test_org_id_from_identity_url() {
        assert_eq!(
            org_id_from_identity_url("https://login.salesforce.com/id/00Dxx/005xx").as_deref(),
            Some("00Dxx")
        );
        assert_eq!(org_id_from_identity_url("https://login.salesforce.com/id/00Dxx").as_deref(), Some("00Dxx"));
        assert_eq!(org_id_from_identity_url("https://login.salesforce.com/id"), None);
        assert_eq!(org_id_from_identity_url("https://login.salesforce.com/id//005xx"), None);
        assert_eq!(org_id_from_identity_url(""), None);
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let (endpoint, server) = fake_token_endpoint(
            "200 OK",
            r#"{"access_token":"tok1","instance_url":"https://na1.my.salesforce.com","id":"https://login.salesforce.com/id/00Dxx/005xx","token_type":"Bearer"}"#,
        )
        .await;

        let client = HttpTokenClient::new(
            endpoint,
            "abc".to_string(),
            None,
            "http://localhost:1717/callback".to_string(),
        );
        let token = client.exchange("XYZ", "verifier123").await.unwrap();

        assert_eq!(token.access_token, "tok1");
        assert_eq!(token.instance_url, "https://na1.my.salesforce.com");
        assert!(token.refresh_token.is_none());
        assert_eq!(token.org_id().as_deref(), Some("00Dxx"));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /services/oauth2/token "));
        assert!(raw.to_ascii_lowercase().contains("content-type: application/x-www-form-urlencoded"));

        let form = form_body(&raw);
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("grant_type"), Some("authorization_code"));
        assert_eq!(get("code"), Some("XYZ"));
        assert_eq!(get("client_id"), Some("abc"));
        assert_eq!(get("redirect_uri"), Some("http://localhost:1717/callback"));
        assert_eq!(get("code_verifier"), Some("verifier123"));
        assert_eq!(get("client_secret"), None);
    }

    #[tokio::test]
    async fn test_exchange_sends_client_secret_when_configured() {
        let (endpoint, server) = fake_token_endpoint(
            "200 OK",
            r#"{"access_token":"tok","instance_url":"https://x.my.salesforce.com","refresh_token":"ref"}"#,
        )
        .await;

        let client = HttpTokenClient::new(
            endpoint,
            "abc".to_string(),
            Some("s3cret".to_string()),
            "http://localhost:1717/callback".to_string(),
        );
        let token = client.exchange("code", "verifier").await.unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("ref"));
        assert!(token.org_id().is_none());

        let form = form_body(&server.await.unwrap());
        assert!(form.contains(&("client_secret".to_string(), "s3cret".to_string())));
    }

    #[tokio::test]
    async fn test_exchange_provider_error() {
        let (endpoint, _server) = fake_token_endpoint(
            "400 Bad Request",
            r#"{"error":"invalid_grant","error_description":"expired authorization code"}"#,
        )
        .await;

        let client = HttpTokenClient::new(endpoint, "abc".to_string(), None, "http://localhost/cb".to_string());
        let err = client.exchange("code", "verifier").await.unwrap_err();

        assert!(matches!(err, Error::TokenExchange(_)));
        let msg = err.to_string();
        assert!(msg.contains("invalid_grant"));
        assert!(msg.contains("expired authorization code"));
    }

    #[tokio::test]
    async fn test_exchange_malformed_body() {
        let (endpoint, _server) = fake_token_endpoint("200 OK", r#"{"token":"missing fields"}"#).await;

        let client = HttpTokenClient::new(endpoint, "abc".to_string(), None, "http://localhost/cb".to_string());
        let err = client.exchange("code", "verifier").await.unwrap_err();
        assert!(err.to_string().contains("malformed token response"));
    }

    #[tokio::test]
    async fn test_exchange_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpTokenClient::new(
            format!("http://{}/services/oauth2/token", addr),
            "abc".to_string(),
            None,
            "http://localhost/cb".to_string(),
        );
        let err = client.exchange("code", "verifier").await.unwrap_err();
        assert!(matches!(err, Error::TokenExchange(_)));
    }

    #[test]
    fn test_describe_failure_plain_body() {
        assert_eq!(describe_failure(502, ""), "HTTP 502");
        assert_eq!(describe_failure(500, "upstream down"), "HTTP 500: upstream down");
        assert_eq!(describe_failure(400, r#"{"error":"invalid_client"}"#), "invalid_client (HTTP 400)");
    }
}
