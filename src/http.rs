//! JSON-over-HTTP calls with exponential backoff.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use tracing::warn;

use crate::error::RequestError;

pub fn client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }
    Ok(builder.build()?)
}

pub async fn post_json_with_retry(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, RequestError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| RequestError::Decode {
                        service,
                        reason: e.to_string(),
                    });
                }

                let err = RequestError::Status {
                    service,
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(service, %status, attempt, "request failed, retrying");
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                warn!(service, error = %e, attempt, "connection error");
                last_err = Some(RequestError::Connection {
                    service,
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| RequestError::Connection {
        service,
        url: url.to_string(),
        reason: "no attempts made".to_string(),
    }))
}
