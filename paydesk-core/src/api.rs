//! Wire DTOs shared by the REST server and the client store.

use serde::{Deserialize, Deserializer, Serialize};

use crate::models::message::Message;
use crate::models::ticket::{Ticket, TicketStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketsResponse {
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub session: String,
    pub message: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    pub session: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// PATCH /tickets/{id}. `manager` distinguishes "absent" (leave as-is) from
/// an explicit null (unassign).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateTicketRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub manager: Option<Option<String>>,
}

fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetBlockedRequest {
    pub blocked: bool,
}

/// Query parameters selecting a session and a reading party.
#[derive(Debug, Serialize, Deserialize)]
pub struct PartyQuery {
    pub session: String,
    #[serde(default)]
    pub as_staff: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionQuery {
    pub session: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TicketsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MediaUploadResponse {
    pub url: String,
}

/// Standard HTTP error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}
