//! Outbound Telegram notifications.
//!
//! Staff get pinged on every new ticket and on every non-empty customer
//! message. Delivery is fire-and-forget: sends are spawned off the request
//! path, retried with jittered backoff, and a final failure is only logged —
//! it must never abort the operation that triggered it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use paydesk_core::config::NotifyConfig;
use paydesk_core::models::ticket::Ticket;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

pub struct TelegramNotifier {
    client: Client,
    config: NotifyConfig,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(config: NotifyConfig) -> Result<Self, NotifyError> {
        Self::with_base_url(config, TELEGRAM_API.to_string())
    }

    /// Create a notifier with a custom API base URL (for testing)
    pub fn with_base_url(config: NotifyConfig, base_url: String) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    pub async fn ticket_created(&self, ticket: &Ticket) -> Result<(), NotifyError> {
        let text = format!(
            "🔔 <b>New top-up request #{}</b>\n\n\
             👤 <b>Client:</b> {}\n\
             💰 <b>Amount:</b> {} ₽\n\n\
             ⏰ Needs attention!",
            ticket.id,
            ticket.user_name.as_deref().unwrap_or("Anonymous"),
            ticket.amount,
        );
        self.send_text(&text).await
    }

    pub async fn customer_message(
        &self,
        ticket_id: Option<i64>,
        sender: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let ticket_ref = ticket_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let text = format!(
            "📩 <b>New message</b>\n\n\
             🎫 Ticket: <code>#{}</code>\n\
             👤 From: <b>{}</b>\n\
             💬 Message:\n{}",
            ticket_ref, sender, body,
        );
        self.send_text(&text).await
    }

    async fn send_text(&self, text: &str) -> Result<(), NotifyError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.send_once(text)).await;

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All notification retry attempts failed"
                );
                Err(NotifyError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn send_once(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url, self.config.bot_token
        );

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.config.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

/// Spawn a ticket-created alert off the request path.
pub fn spawn_ticket_alert(notifier: Arc<TelegramNotifier>, ticket: Ticket) {
    if !notifier.config.enabled {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = notifier.ticket_created(&ticket).await {
            tracing::warn!(ticket = ticket.id, error = %e, "ticket notification failed");
        }
    });
}

/// Spawn a customer-message alert off the request path.
pub fn spawn_message_alert(
    notifier: Arc<TelegramNotifier>,
    ticket_id: Option<i64>,
    sender: String,
    body: String,
) {
    if !notifier.config.enabled {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = notifier.customer_message(ticket_id, &sender, &body).await {
            tracing::warn!(error = %e, "message notification failed");
        }
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use paydesk_core::models::ticket::TicketStatus;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> NotifyConfig {
        NotifyConfig {
            enabled: true,
            bot_token: "123:abc".to_string(),
            chat_id: "-100500".to_string(),
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn sample_ticket() -> Ticket {
        Ticket {
            id: 42,
            session_id: "session-1-abc".to_string(),
            amount: "2500".to_string(),
            user_name: Some("Ivan".to_string()),
            status: TicketStatus::New,
            manager: None,
            is_blocked: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            unread_messages: Some(1),
        }
    }

    #[tokio::test]
    async fn test_ticket_alert_hits_bot_endpoint() {
        let server = MockServer::start().await;
        let notifier = TelegramNotifier::with_base_url(test_config(), server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100500",
                "parse_mode": "HTML",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true
            })))
            .mount(&server)
            .await;

        notifier.ticket_created(&sample_ticket()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let text = body["text"].as_str().unwrap();
        assert!(text.contains("#42"));
        assert!(text.contains("2500"));
        assert!(text.contains("Ivan"));
    }

    #[tokio::test]
    async fn test_message_alert_without_ticket_uses_placeholder() {
        let server = MockServer::start().await;
        let notifier = TelegramNotifier::with_base_url(test_config(), server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true
            })))
            .mount(&server)
            .await;

        notifier
            .customer_message(None, "Anonymous", "need help")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["text"].as_str().unwrap().contains("#N/A"));
    }

    #[tokio::test]
    async fn test_persistent_failure_exhausts_retries() {
        let server = MockServer::start().await;
        let notifier = TelegramNotifier::with_base_url(test_config(), server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = notifier.customer_message(Some(1), "Ivan", "hello").await;
        match result {
            Err(NotifyError::RetryExhausted { attempts }) => assert_eq!(attempts, 2),
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        let notifier = TelegramNotifier::with_base_url(test_config(), server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true
            })))
            .mount(&server)
            .await;

        notifier
            .customer_message(Some(7), "Ivan", "second try")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_notifier_spawns_nothing() {
        let server = MockServer::start().await;
        let mut config = test_config();
        config.enabled = false;
        let notifier =
            Arc::new(TelegramNotifier::with_base_url(config, server.uri()).unwrap());

        spawn_ticket_alert(notifier.clone(), sample_ticket());
        spawn_message_alert(notifier, Some(1), "Ivan".to_string(), "hi".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }
}
