//! Welcome emails through Resend

use crate::config::{Config, WELCOME_EMAIL_SUBJECT};
use crate::error::Result;
use crate::http_client::{build_client, check};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a send, reported to the caller instead of an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailResult {
    pub success: bool,
    /// Provider message id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmailResult {
    fn sent(id: String) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Clone)]
pub struct EmailService {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    from: String,
}

impl EmailService {
    pub fn new(
        api_key: Option<String>,
        api_url: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            from: from.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.resend_api_key.clone(),
            config.resend_api_url.clone(),
            config.email_from.clone(),
            config.remote_timeout,
        )
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send the welcome email. Never panics and never retries: a repeated
    /// send would reach the user twice.
    pub async fn send_welcome_email(&self, to: &str, name: Option<&str>) -> EmailResult {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("RESEND_API_KEY not set, welcome email to {} not sent", to);
            return EmailResult::failed("Email service not configured");
        };

        let to = to.trim();
        if !is_valid_recipient(to) {
            return EmailResult::failed(format!("Invalid recipient: {}", to));
        }

        match self.send(api_key, to, name).await {
            Ok(id) => {
                tracing::info!("Welcome email sent to {} ({})", to, id);
                EmailResult::sent(id)
            }
            Err(e) => {
                tracing::warn!("Welcome email to {} failed: {}", to, e);
                EmailResult::failed(e.to_string())
            }
        }
    }

    async fn send(&self, api_key: &str, to: &str, name: Option<&str>) -> Result<String> {
        let request = SendRequest {
            from: &self.from,
            to: [to],
            subject: WELCOME_EMAIL_SUBJECT,
            html: welcome_html(name),
        };

        let response = self
            .client
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let sent: SendResponse = check(response).await?.json().await?;
        Ok(sent.id)
    }
}

/// Loose shape check on an email address
pub fn is_valid_recipient(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !address.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Fixed bilingual template, Arabic first
fn welcome_html(name: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    let (ar_greeting, en_greeting) = match name {
        Some(name) => {
            let name = escape_html(name);
            (
                format!("السلام عليكم {}،", name),
                format!("Assalamu alaikum {},", name),
            )
        }
        None => ("السلام عليكم،".to_string(), "Assalamu alaikum,".to_string()),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif; background: #f7f5ef; padding: 24px;">
    <div dir="rtl" lang="ar" style="text-align: right;">
      <h2>{ar_greeting}</h2>
      <p>أهلا بك في نور. يمكنك الآن حفظ الآيات والأحاديث والأدعية المفضلة لديك ومزامنتها على جميع أجهزتك.</p>
    </div>
    <hr>
    <div dir="ltr" lang="en">
      <h2>{en_greeting}</h2>
      <p>Welcome to Noor. You can now save your favorite verses, hadith and supplications and keep them in sync on all your devices.</p>
    </div>
  </body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn serve_resend() -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));

        async fn emails(
            State(captured): State<Captured>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let rejected = body["to"][0] == "blocked@example.com";
            captured.lock().unwrap().push((auth, body));
            if rejected {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "statusCode": 422, "message": "recipient blocked", "name": "validation_error" })),
                )
            } else {
                (StatusCode::OK, Json(json!({ "id": "em_123" })))
            }
        }

        let app = Router::new()
            .route("/emails", post(emails))
            .with_state(Arc::clone(&captured));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), captured)
    }

    fn service(api_key: Option<&str>, url: &str) -> EmailService {
        EmailService::new(
            api_key.map(str::to_string),
            url,
            "Noor <welcome@noor.app>",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let (url, captured) = serve_resend().await;
        let email = service(None, &url);

        let result = email.send_welcome_email("amina@example.com", Some("Amina")).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("not configured"));
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sends_bilingual_welcome() {
        let (url, captured) = serve_resend().await;
        let email = service(Some("re_test"), &url);

        let result = email.send_welcome_email("amina@example.com", Some("Amina")).await;

        assert_eq!(result, EmailResult::sent("em_123".to_string()));
        let requests = captured.lock().unwrap();
        let (auth, body) = &requests[0];
        assert_eq!(auth.as_deref(), Some("Bearer re_test"));
        assert_eq!(body["to"][0], "amina@example.com");
        let html = body["html"].as_str().unwrap();
        assert!(html.contains("السلام عليكم Amina"));
        assert!(html.contains("Assalamu alaikum Amina,"));
    }

    #[tokio::test]
    async fn test_provider_rejection_is_reported() {
        let (url, _captured) = serve_resend().await;
        let email = service(Some("re_test"), &url);

        let result = email.send_welcome_email("blocked@example.com", None).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("recipient blocked"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_not_sent() {
        let (url, captured) = serve_resend().await;
        let email = service(Some("re_test"), &url);

        let result = email.send_welcome_email("not-an-address", None).await;

        assert!(!result.success);
        assert!(captured.lock().unwrap().is_empty());
    }

    #[test]
    fn test_name_is_escaped() {
        let html = welcome_html(Some("<script>alert(1)</script>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_blank_name_uses_plain_greeting() {
        let html = welcome_html(Some("   "));
        assert!(html.contains("Assalamu alaikum,"));
    }
}
