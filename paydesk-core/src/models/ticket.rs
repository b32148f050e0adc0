use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow state of a top-up request. `InProgress` carries the handling
/// agent's handle; the wire/db form is `in_progress:<agent>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TicketStatus {
    New,
    Processed,
    Scam,
    Paid,
    InProgress { agent: String },
    Closed,
}

impl TicketStatus {
    pub fn as_wire(&self) -> String {
        match self {
            TicketStatus::New => "new".to_string(),
            TicketStatus::Processed => "processed".to_string(),
            TicketStatus::Scam => "scam".to_string(),
            TicketStatus::Paid => "paid".to_string(),
            TicketStatus::InProgress { agent } => format!("in_progress:{}", agent),
            TicketStatus::Closed => "closed".to_string(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "new" => Ok(TicketStatus::New),
            "processed" => Ok(TicketStatus::Processed),
            "scam" => Ok(TicketStatus::Scam),
            "paid" => Ok(TicketStatus::Paid),
            "closed" => Ok(TicketStatus::Closed),
            other => match other.strip_prefix("in_progress:") {
                Some(agent) if !agent.trim().is_empty() => Ok(TicketStatus::InProgress {
                    agent: agent.trim().to_string(),
                }),
                _ => Err(format!("unknown ticket status: {}", other)),
            },
        }
    }

    /// Rows written by older revisions may carry statuses outside the current
    /// vocabulary; readers default those to `New` rather than failing a whole
    /// listing.
    pub fn parse_lossy(s: &str) -> Self {
        Self::parse(s).unwrap_or(TicketStatus::New)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_wire())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TicketStatus::parse(s)
    }
}

impl From<TicketStatus> for String {
    fn from(status: TicketStatus) -> String {
        status.as_wire()
    }
}

impl TryFrom<String> for TicketStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TicketStatus::parse(&s)
    }
}

/// A tracked top-up request. Amount and name are immutable after creation;
/// status and manager are staff-mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub session_id: String,
    pub amount: String,
    pub user_name: Option<String>,
    pub status: TicketStatus,
    #[serde(rename = "assigned_manager")]
    pub manager: Option<String>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Customer messages not yet read by staff. Populated on staff listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unread_messages: Option<i64>,
}
