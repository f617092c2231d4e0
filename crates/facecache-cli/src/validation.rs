//! Validation lookup for recognized names.
//!
//! Display-only: the status is printed next to a match and never feeds back
//! into matching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Status shown when the lookup could not be completed.
pub const STATUS_ERROR: &str = "error";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("validation request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ValidationRequest<'a> {
    photo: &'a str,
}

#[derive(Deserialize)]
struct ValidationResponse {
    status: String,
}

/// HTTP client for the validation endpoint.
pub struct ValidationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ValidationClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ValidationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, endpoint: endpoint.into() })
    }

    /// Look up the status recorded for `name`'s reference photo.
    pub async fn check(&self, name: &str) -> Result<String, ValidationError> {
        let photo = format!("{name}.jpeg");
        let response: ValidationResponse = self
            .client
            .post(&self.endpoint)
            .json(&ValidationRequest { photo: &photo })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.status)
    }

    /// Like [`check`](Self::check), but a failure is logged and shown as `"error"`.
    pub async fn status(&self, name: &str) -> String {
        match self.check(name).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(name, endpoint = %self.endpoint, error = %e, "validation lookup failed");
                STATUS_ERROR.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the request body, reply with `body`.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/v1/checkValidation", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let request_body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).into_owned();
                if let Some(split) = text.find("\r\n\r\n") {
                    let headers = text[..split].to_ascii_lowercase();
                    let len = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + len || n == 0 {
                        break text[split + 4..].to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };

            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request_body
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_check_posts_photo_name() {
        let (url, server) = serve_once("HTTP/1.1 200 OK", r#"{"status":"valid"}"#).await;
        let client = ValidationClient::new(url).unwrap();

        assert_eq!(client.check("alice").await.unwrap(), "valid");
        let sent: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(sent, serde_json::json!({ "photo": "alice.jpeg" }));
    }

    #[tokio::test]
    async fn test_http_error_status_degrades() {
        let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error", r#"{"message":"down"}"#).await;
        let client = ValidationClient::new(url).unwrap();

        assert_eq!(client.status("bob").await, STATUS_ERROR);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_degrades() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ValidationClient::new(format!("http://{addr}/check")).unwrap();
        assert!(client.check("carol").await.is_err());
        assert_eq!(client.status("carol").await, STATUS_ERROR);
    }
}
