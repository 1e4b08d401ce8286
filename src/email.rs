//! Email delivery for issued activation codes.
//!
//! Supports three modes:
//! 1. Send via Resend API (default when API key available)
//! 2. POST to webhook URL (for DIY email delivery)
//! 3. Disabled (no email sent, log only)

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};

/// Retry delays in seconds (exponential backoff: 1s, 4s, 16s)
const RETRY_DELAYS: &[u64] = &[1, 4, 16];

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Format a Unix timestamp as a human-readable date (e.g., "Jan 15, 2024")
fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y").to_string())
        .unwrap_or_else(|| "Unknown date".to_string())
}

/// Result of attempting to deliver an activation code email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent successfully via Resend
    Sent,
    /// Data was POSTed to the configured webhook URL
    WebhookCalled,
    /// Email delivery is disabled
    Disabled,
    /// No Resend API key configured
    NoApiKey,
}

/// What triggered the activation email.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTrigger {
    /// Storefront purchase (payment webhook)
    Purchase,
    /// Admin issued the activation via the admin API
    AdminIssued,
}

/// Everything needed to deliver one activation code.
pub struct ActivationEmail<'a> {
    pub to_email: &'a str,
    pub code: &'a str,
    /// Display name for the licensed product (storefront name or tier)
    pub product_name: &'a str,
    pub activation_id: &'a str,
    pub expires_at: i64,
    pub max_devices: i64,
    /// What triggered this email
    pub trigger: EmailTrigger,
}

/// Webhook payload sent when an email webhook URL is configured.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event: &'static str,
    pub email: &'a str,
    pub code: &'a str,
    pub product_name: &'a str,
    pub activation_id: &'a str,
    pub expires_at: i64,
    pub max_devices: i64,
    pub trigger: EmailTrigger,
}

/// Resend API request body.
#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    text: String,
    html: String,
}

/// Resend API response.
#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

/// Email service using Resend API.
#[derive(Clone)]
pub struct EmailService {
    /// Resend API key (from ENV)
    api_key: Option<String>,
    /// "from" email address (from ENV)
    from_email: String,
    /// Webhook URL that replaces direct email delivery when set
    webhook_url: Option<String>,
    enabled: bool,
    /// HTTP client for API calls
    http_client: Client,
}

impl EmailService {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.resend_api_key.clone(),
            from_email: config.email_from.clone(),
            webhook_url: config.email_webhook_url.clone(),
            enabled: config.email_enabled,
            http_client: Client::new(),
        }
    }

    /// A service that skips all delivery. Used in tests and one-off CLI runs.
    pub fn disabled() -> Self {
        Self {
            api_key: None,
            from_email: String::new(),
            webhook_url: None,
            enabled: false,
            http_client: Client::new(),
        }
    }

    /// Deliver an activation code email (or call webhook, or skip if disabled).
    ///
    /// Resolution order:
    /// 1. If email delivery is disabled -> return Disabled
    /// 2. If an email webhook URL is set -> POST to webhook
    /// 3. Otherwise send via Resend API
    pub async fn send_activation_email(
        &self,
        email: ActivationEmail<'_>,
    ) -> Result<EmailSendResult> {
        if !self.enabled {
            tracing::debug!(
                activation_id = %email.activation_id,
                "Email delivery disabled, skipping activation email"
            );
            return Ok(EmailSendResult::Disabled);
        }

        // If webhook URL is configured, POST to it instead of sending email
        if let Some(ref webhook_url) = self.webhook_url {
            return self.call_webhook(webhook_url, &email).await;
        }

        let Some(ref api_key) = self.api_key else {
            tracing::warn!(
                activation_id = %email.activation_id,
                "No Resend API key configured, cannot send activation email"
            );
            return Ok(EmailSendResult::NoApiKey);
        };

        self.send_via_resend(api_key, &email).await
    }

    /// Send email via Resend API with retry logic.
    async fn send_via_resend(
        &self,
        api_key: &str,
        email: &ActivationEmail<'_>,
    ) -> Result<EmailSendResult> {
        let subject = format!("Your {} license", email.product_name);
        let valid_until = format_date(email.expires_at);
        let text = format!(
            "Your {} license\n\nThank you! Here is your activation code:\n\n{}\n\nEnter this code in the app on each device you want to activate. Your license covers up to {} devices and is valid until {}.\n\nKeep this email: the code is how you activate new devices later.",
            email.product_name, email.code, email.max_devices, valid_until
        );
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Your {} license</h2>
<p>Thank you! Here is your activation code:</p>
<div style="background: #f5f5f5; padding: 20px; border-radius: 8px; text-align: center;">
<code style="font-size: 24px; font-weight: bold; letter-spacing: 2px; color: #333;">{}</code>
</div>
<p>Enter this code in the app on each device you want to activate. Your license covers up to <strong>{}</strong> devices and is valid until <strong>{}</strong>.</p>
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">Keep this email: the code is how you activate new devices later.</p>
</body>
</html>"#,
            email.product_name, email.code, email.max_devices, valid_until
        );

        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![email.to_email],
            subject,
            text,
            html,
        };

        self.send_request_with_retry(api_key, &request, email.to_email, email.activation_id)
            .await
    }

    /// Send a request to Resend API with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// Fails immediately on non-transient errors (4xx except 429).
    async fn send_request_with_retry(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
        to_email: &str,
        activation_id: &str,
    ) -> Result<EmailSendResult> {
        let mut last_error: Option<AppError> = None;

        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            // Sleep before retry (skip on first attempt)
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    "Retrying email send after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self.send_resend_request(api_key, request).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt,
                            to = %to_email,
                            activation_id = %activation_id,
                            "Email sent successfully after retry"
                        );
                    } else {
                        tracing::info!(
                            to = %to_email,
                            activation_id = %activation_id,
                            "Activation email sent via Resend"
                        );
                    }
                    return Ok(EmailSendResult::Sent);
                }
                Err((error, is_transient)) => {
                    if is_transient {
                        last_error = Some(error);
                        // Continue to next retry
                    } else {
                        // Non-transient error, fail immediately
                        return Err(error);
                    }
                }
            }
        }

        // All retries exhausted
        tracing::error!(
            to = %to_email,
            activation_id = %activation_id,
            attempts = RETRY_DELAYS.len() + 1,
            "Email send failed after all retries"
        );
        Err(last_error.unwrap_or_else(|| {
            AppError::Internal("Email service error: all retries exhausted".into())
        }))
    }

    /// Send a single request to Resend API.
    ///
    /// Returns Ok(()) on success, or Err((AppError, is_transient)) on failure.
    async fn send_resend_request(
        &self,
        api_key: &str,
        request: &ResendEmailRequest<'_>,
    ) -> std::result::Result<(), (AppError, bool)> {
        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to send request to Resend API");
                // Network errors are transient
                (
                    AppError::Internal(format!("Email service error: {}", e)),
                    true,
                )
            })?;

        let status = response.status();

        if status.is_success() {
            let _result: ResendEmailResponse = response.json().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to parse Resend API response");
                // Parse errors after success are weird but not transient
                (
                    AppError::Internal("Email service response error".into()),
                    false,
                )
            })?;
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();

            // Determine if error is transient (should retry)
            let is_transient = status.as_u16() == 429 // Rate limited
                || status.is_server_error(); // 5xx errors

            if is_transient {
                tracing::warn!(
                    status = %status,
                    body = %body,
                    "Resend API returned transient error"
                );
            } else {
                tracing::error!(
                    status = %status,
                    body = %body,
                    "Resend API returned non-transient error"
                );
            }

            Err((
                AppError::Internal(format!("Email service error: {} - {}", status, body)),
                is_transient,
            ))
        }
    }

    /// POST activation data to the configured webhook URL with retry logic.
    async fn call_webhook(
        &self,
        webhook_url: &str,
        email: &ActivationEmail<'_>,
    ) -> Result<EmailSendResult> {
        let payload = WebhookPayload {
            event: "activation_issued",
            email: email.to_email,
            code: email.code,
            product_name: email.product_name,
            activation_id: email.activation_id,
            expires_at: email.expires_at,
            max_devices: email.max_devices,
            trigger: email.trigger,
        };

        self.call_webhook_with_retry(
            webhook_url,
            "activation_issued",
            &payload,
            email.activation_id,
        )
        .await
    }

    /// Call a webhook URL with exponential backoff retry.
    ///
    /// Retries on transient errors (network issues, 5xx, 429 rate limit).
    /// After all retries exhausted, returns success anyway (webhook errors
    /// shouldn't block the caller - the activation is already issued).
    async fn call_webhook_with_retry<T: Serialize>(
        &self,
        webhook_url: &str,
        event_name: &str,
        payload: &T,
        activation_id: &str,
    ) -> Result<EmailSendResult> {
        for (attempt, delay_secs) in std::iter::once(&0u64).chain(RETRY_DELAYS).enumerate() {
            // Sleep before retry (skip on first attempt)
            if *delay_secs > 0 {
                tracing::warn!(
                    attempt,
                    delay_secs,
                    webhook_url = %webhook_url,
                    "Retrying webhook call after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
            }

            match self
                .send_webhook_request(webhook_url, event_name, payload)
                .await
            {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempt,
                            webhook_url = %webhook_url,
                            activation_id = %activation_id,
                            "Webhook called successfully after retry"
                        );
                    } else {
                        tracing::info!(
                            webhook_url = %webhook_url,
                            activation_id = %activation_id,
                            "Activation webhook called successfully"
                        );
                    }
                    return Ok(EmailSendResult::WebhookCalled);
                }
                Err(is_transient) => {
                    if !is_transient {
                        // Non-transient error (4xx) - don't retry, but still return success
                        // The operator's webhook rejected it, they can check their logs
                        tracing::warn!(
                            webhook_url = %webhook_url,
                            activation_id = %activation_id,
                            "Webhook returned non-transient error, not retrying"
                        );
                        return Ok(EmailSendResult::WebhookCalled);
                    }
                    // Transient error - continue to next retry
                }
            }
        }

        // All retries exhausted - still return success, but log prominently
        tracing::error!(
            webhook_url = %webhook_url,
            activation_id = %activation_id,
            attempts = RETRY_DELAYS.len() + 1,
            "Webhook call failed after all retries - activation issued but webhook not delivered"
        );
        Ok(EmailSendResult::WebhookCalled)
    }

    /// Send a single webhook request.
    ///
    /// Returns Ok(()) on success, or Err(is_transient) on failure.
    async fn send_webhook_request<T: Serialize>(
        &self,
        webhook_url: &str,
        event_name: &str,
        payload: &T,
    ) -> std::result::Result<(), bool> {
        let response = self
            .http_client
            .post(webhook_url)
            .header("Content-Type", "application/json")
            .header("X-Keymint-Event", event_name)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    webhook_url = %webhook_url,
                    "Failed to send webhook request"
                );
                // Network errors are transient
                true
            })?;

        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();

            // Determine if error is transient (should retry)
            let is_transient = status.as_u16() == 429 || status.is_server_error();

            if is_transient {
                tracing::warn!(
                    status = %status,
                    body = %body,
                    webhook_url = %webhook_url,
                    "Webhook returned transient error"
                );
            } else {
                tracing::error!(
                    status = %status,
                    body = %body,
                    webhook_url = %webhook_url,
                    "Webhook returned non-transient error"
                );
            }

            Err(is_transient)
        }
    }
}
