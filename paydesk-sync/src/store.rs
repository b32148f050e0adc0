//! The backend boundary.
//!
//! `RemoteStore` abstracts every persistence operation the views need; the
//! single concrete backend is `HttpStore`, a reqwest client speaking the
//! Paydesk REST wire format. Mutations optionally fan out on a [`ChangeBus`]
//! after the server confirms them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use paydesk_core::api::{
    CreateTicketRequest, ErrorResponse, MediaUploadResponse, MessagesResponse,
    SendMessageRequest, TicketsResponse, UnreadCountResponse, UpdateTicketRequest,
};
use paydesk_core::error::StoreError;
use paydesk_core::media::{content_type_for, MediaPayload};
use paydesk_core::models::message::Message;
use paydesk_core::models::ticket::{Ticket, TicketStatus};

use crate::bus::{ChangeBus, StoreEvent};

/// Everything a view may ask of the backend. Implementations are shared
/// behind an `Arc` across synchronizers.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Conversation for a session, oldest message first.
    async fn list_messages(&self, session: &str) -> Result<Vec<Message>, StoreError>;

    async fn send_message(&self, req: SendMessageRequest) -> Result<Message, StoreError>;

    /// All tickets, most recently updated first, optionally filtered by status.
    async fn list_tickets(&self, filter: Option<&TicketStatus>) -> Result<Vec<Ticket>, StoreError>;

    async fn create_ticket(
        &self,
        session: &str,
        amount: &str,
        name: Option<&str>,
    ) -> Result<Ticket, StoreError>;

    async fn update_ticket_status(
        &self,
        id: i64,
        status: &TicketStatus,
    ) -> Result<Ticket, StoreError>;

    /// `None` unassigns.
    async fn update_ticket_manager(
        &self,
        id: i64,
        manager: Option<&str>,
    ) -> Result<Ticket, StoreError>;

    async fn delete_ticket(&self, id: i64) -> Result<(), StoreError>;

    /// Removes all messages and tickets for a session.
    async fn delete_conversation(&self, session: &str) -> Result<(), StoreError>;

    async fn set_blocked(&self, session: &str, blocked: bool) -> Result<(), StoreError>;

    /// Flip the reading party's flag on every unread message of the session.
    /// Idempotent.
    async fn mark_read(&self, session: &str, as_staff: bool) -> Result<(), StoreError>;

    async fn unread_count(&self, session: &str, as_staff: bool) -> Result<i64, StoreError>;

    /// Upload pre-validated media, returning its public URL.
    async fn upload_media(&self, media: MediaPayload) -> Result<String, StoreError>;
}

// ============================================================================
// HttpStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    admin_token: Option<String>,
    bus: Option<ChangeBus>,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(transport)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_token: None,
            bus: None,
        })
    }

    /// Staff front ends attach the shared token; it is sent on every request.
    pub fn with_admin_token(mut self, token: &str) -> Self {
        self.admin_token = Some(token.to_string());
        self
    }

    /// Attach a bus so sibling views in this process learn about mutations
    /// without waiting for their next tick.
    pub fn with_bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.admin_token {
            Some(token) => builder.header("X-Admin-Token", token),
            None => builder,
        }
    }

    fn publish(&self, event: StoreEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list_messages(&self, session: &str) -> Result<Vec<Message>, StoreError> {
        let resp = self
            .request(self.client.get(self.url("/messages")))
            .query(&[("session", session)])
            .send()
            .await
            .map_err(transport)?;
        let body: MessagesResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.messages)
    }

    async fn send_message(&self, req: SendMessageRequest) -> Result<Message, StoreError> {
        let session = req.session.clone();
        let resp = self
            .request(self.client.post(self.url("/messages")))
            .json(&req)
            .send()
            .await
            .map_err(transport)?;
        let message: Message = check(resp).await?.json().await.map_err(transport)?;
        self.publish(StoreEvent::MessagePosted { session });
        Ok(message)
    }

    async fn list_tickets(&self, filter: Option<&TicketStatus>) -> Result<Vec<Ticket>, StoreError> {
        let mut builder = self.request(self.client.get(self.url("/tickets")));
        if let Some(status) = filter {
            builder = builder.query(&[("status", status.as_wire())]);
        }
        let resp = builder.send().await.map_err(transport)?;
        let body: TicketsResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.tickets)
    }

    async fn create_ticket(
        &self,
        session: &str,
        amount: &str,
        name: Option<&str>,
    ) -> Result<Ticket, StoreError> {
        let req = CreateTicketRequest {
            session: session.to_string(),
            amount: amount.to_string(),
            name: name.map(str::to_string),
        };
        let resp = self
            .request(self.client.post(self.url("/tickets")))
            .json(&req)
            .send()
            .await
            .map_err(transport)?;
        let ticket: Ticket = check(resp).await?.json().await.map_err(transport)?;
        self.publish(StoreEvent::TicketCreated {
            id: ticket.id,
            session: ticket.session_id.clone(),
        });
        Ok(ticket)
    }

    async fn update_ticket_status(
        &self,
        id: i64,
        status: &TicketStatus,
    ) -> Result<Ticket, StoreError> {
        let req = UpdateTicketRequest {
            status: Some(status.clone()),
            manager: None,
        };
        let ticket = self.patch_ticket(id, &req).await?;
        self.publish(StoreEvent::TicketUpdated { id });
        Ok(ticket)
    }

    async fn update_ticket_manager(
        &self,
        id: i64,
        manager: Option<&str>,
    ) -> Result<Ticket, StoreError> {
        let req = UpdateTicketRequest {
            status: None,
            manager: Some(manager.map(str::to_string)),
        };
        let ticket = self.patch_ticket(id, &req).await?;
        self.publish(StoreEvent::TicketUpdated { id });
        Ok(ticket)
    }

    async fn delete_ticket(&self, id: i64) -> Result<(), StoreError> {
        let resp = self
            .request(self.client.delete(self.url(&format!("/tickets/{}", id))))
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        self.publish(StoreEvent::TicketDeleted { id });
        Ok(())
    }

    async fn delete_conversation(&self, session: &str) -> Result<(), StoreError> {
        let resp = self
            .request(
                self.client
                    .delete(self.url(&format!("/conversations/{}", session))),
            )
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        self.publish(StoreEvent::ConversationDeleted {
            session: session.to_string(),
        });
        Ok(())
    }

    async fn set_blocked(&self, session: &str, blocked: bool) -> Result<(), StoreError> {
        let resp = self
            .request(
                self.client
                    .patch(self.url(&format!("/conversations/{}/block", session))),
            )
            .json(&paydesk_core::api::SetBlockedRequest { blocked })
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        Ok(())
    }

    async fn mark_read(&self, session: &str, as_staff: bool) -> Result<(), StoreError> {
        let resp = self
            .request(self.client.patch(self.url("/messages/read")))
            .query(&[("session", session), ("as_staff", &as_staff.to_string())])
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?;
        self.publish(StoreEvent::MessagesRead {
            session: session.to_string(),
            as_staff,
        });
        Ok(())
    }

    async fn unread_count(&self, session: &str, as_staff: bool) -> Result<i64, StoreError> {
        let resp = self
            .request(self.client.get(self.url("/messages/unread-count")))
            .query(&[("session", session), ("as_staff", &as_staff.to_string())])
            .send()
            .await
            .map_err(transport)?;
        let body: UnreadCountResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.count)
    }

    async fn upload_media(&self, media: MediaPayload) -> Result<String, StoreError> {
        // MediaPayload construction already enforced size/type limits, so an
        // invalid file can never reach this point.
        let mime = content_type_for(&media.file_name);
        let part = reqwest::multipart::Part::bytes(media.bytes)
            .file_name(media.file_name.clone())
            .mime_str(mime)
            .map_err(transport)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .request(self.client.post(self.url("/media")))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let body: MediaUploadResponse = check(resp).await?.json().await.map_err(transport)?;
        Ok(body.url)
    }
}

impl HttpStore {
    /// Server health document, outside the `RemoteStore` surface.
    pub async fn health(&self) -> Result<serde_json::Value, StoreError> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?.json().await.map_err(transport)
    }

    async fn patch_ticket(
        &self,
        id: i64,
        req: &UpdateTicketRequest,
    ) -> Result<Ticket, StoreError> {
        let resp = self
            .request(self.client.patch(self.url(&format!("/tickets/{}", id))))
            .json(req)
            .send()
            .await
            .map_err(transport)?;
        check(resp).await?.json().await.map_err(transport)
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

/// Map a non-success response onto the store error taxonomy.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let msg = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };

    Err(match status.as_u16() {
        429 => StoreError::RateLimited(msg),
        404 => StoreError::NotFound(msg),
        413 => StoreError::PayloadTooLarge(msg),
        415 => StoreError::UnsupportedType(msg),
        _ => StoreError::Transport(format!("server returned {}: {}", status, msg)),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message_json(id: i64, body: &str, is_admin: bool) -> serde_json::Value {
        json!({
            "id": id,
            "session_id": "session-1-abc",
            "message": body,
            "image_url": null,
            "is_admin": is_admin,
            "manager_name": null,
            "user_name": null,
            "read_by_customer": !is_admin,
            "read_by_staff": is_admin,
            "created_at": "2026-08-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_list_messages_ordered() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("session", "session-1-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [message_json(1, "hi", false), message_json(2, "hello", true)]
            })))
            .mount(&server)
            .await;

        let messages = store.list_messages("session-1-abc").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, "hi");
        assert!(messages[1].is_staff);
    }

    #[tokio::test]
    async fn test_send_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": "Request limit exceeded",
                "status": "error"
            })))
            .mount(&server)
            .await;

        let result = store
            .send_message(SendMessageRequest {
                session: "s1".to_string(),
                message: "hi".to_string(),
                is_admin: false,
                name: None,
                image_url: None,
                manager_name: None,
            })
            .await;

        match result {
            Err(StoreError::RateLimited(msg)) => assert!(msg.contains("limit")),
            other => panic!("expected RateLimited, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_missing_ticket_maps_to_not_found() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri()).unwrap();

        Mock::given(method("PATCH"))
            .and(path("/tickets/99"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "Ticket not found",
                "status": "error"
            })))
            .mount(&server)
            .await;

        let result = store.update_ticket_status(99, &TicketStatus::Paid).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport() {
        // Port 1 refuses connections.
        let store = HttpStore::new("http://127.0.0.1:1").unwrap();
        let result = store.list_messages("s1").await;
        assert!(matches!(result, Err(StoreError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unassign_manager_sends_explicit_null() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri()).unwrap();

        Mock::given(method("PATCH"))
            .and(path("/tickets/7"))
            .and(body_json(json!({ "manager": null })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "session_id": "s1",
                "amount": "2500",
                "user_name": "Ivan",
                "status": "new",
                "assigned_manager": null,
                "is_blocked": false,
                "created_at": "2026-08-01T10:00:00Z",
                "updated_at": "2026-08-01T10:00:00Z"
            })))
            .mount(&server)
            .await;

        let ticket = store.update_ticket_manager(7, None).await.unwrap();
        assert!(ticket.manager.is_none());
    }

    #[tokio::test]
    async fn test_admin_token_attached_when_configured() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri())
            .unwrap()
            .with_admin_token("sekrit");

        Mock::given(method("GET"))
            .and(path("/tickets"))
            .and(wiremock::matchers::header("X-Admin-Token", "sekrit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "tickets": [] })),
            )
            .mount(&server)
            .await;

        let tickets = store.list_tickets(None).await.unwrap();
        assert!(tickets.is_empty());
    }

    #[tokio::test]
    async fn test_unread_count_query_params() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(path("/messages/unread-count"))
            .and(query_param("session", "s1"))
            .and(query_param("as_staff", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 3 })))
            .mount(&server)
            .await;

        assert_eq!(store.unread_count("s1", true).await.unwrap(), 3);
    }

    // Oversized media must be rejected at payload construction — the server
    // must never see a request.
    #[tokio::test]
    async fn test_oversized_upload_never_reaches_network() {
        let server = MockServer::start().await;
        let _store = HttpStore::new(&server.uri()).unwrap();

        let oversized = vec![0u8; paydesk_core::media::IMAGE_MAX_BYTES + 1];
        let payload = MediaPayload::image("big.png", oversized);
        assert!(matches!(payload, Err(StoreError::PayloadTooLarge(_))));

        let received = server.received_requests().await.unwrap();
        assert!(received.is_empty(), "no network call may be issued");
    }

    #[tokio::test]
    async fn test_upload_returns_url() {
        let server = MockServer::start().await;
        let store = HttpStore::new(&server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "url": "http://media.local/abc.png"
            })))
            .mount(&server)
            .await;

        let payload = MediaPayload::image("shot.png", vec![1, 2, 3]).unwrap();
        let url = store.upload_media(payload).await.unwrap();
        assert_eq!(url, "http://media.local/abc.png");
    }

    #[tokio::test]
    async fn test_mutations_fan_out_on_bus() {
        let server = MockServer::start().await;
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();
        let store = HttpStore::new(&server.uri()).unwrap().with_bus(bus);

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(message_json(5, "hey", false)),
            )
            .mount(&server)
            .await;

        store
            .send_message(SendMessageRequest {
                session: "session-1-abc".to_string(),
                message: "hey".to_string(),
                is_admin: false,
                name: None,
                image_url: None,
                manager_name: None,
            })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::MessagePosted {
                session: "session-1-abc".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_mutation_publishes_nothing() {
        let server = MockServer::start().await;
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();
        let store = HttpStore::new(&server.uri()).unwrap().with_bus(bus);

        Mock::given(method("DELETE"))
            .and(path("/tickets/3"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "Ticket not found",
                "status": "error"
            })))
            .mount(&server)
            .await;

        assert!(store.delete_ticket(3).await.is_err());
        assert!(rx.try_recv().is_err(), "failed mutation must not fan out");
    }
}
