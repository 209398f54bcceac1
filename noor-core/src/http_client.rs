//! Shared outbound HTTP helpers

use crate::config::USER_AGENT;
use crate::error::{AppError, Result};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;

/// Error body shape shared by Appwrite and Resend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Build a client with the crate user agent and a bounded timeout
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Generic(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a non-success response into an error
pub async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);

    Err(AppError::from_status(status.as_u16(), message))
}
