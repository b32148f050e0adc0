use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One chat turn in a session's conversation. Wire field names keep the
/// historical API vocabulary (`message`, `image_url`, `is_admin`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "image_url")]
    pub media_url: Option<String>,
    #[serde(rename = "is_admin")]
    pub is_staff: bool,
    #[serde(rename = "manager_name")]
    pub staff_name: Option<String>,
    #[serde(rename = "user_name")]
    pub sender_name: Option<String>,
    pub read_by_customer: bool,
    pub read_by_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether the given party has seen this message. The authoring party's
    /// own flag is true from the moment of insert.
    pub fn read_by(&self, as_staff: bool) -> bool {
        if as_staff {
            self.read_by_staff
        } else {
            self.read_by_customer
        }
    }

    /// True when the opposite party has seen it — drives the sender-side
    /// "seen" indicator.
    pub fn seen_by_recipient(&self) -> bool {
        self.read_by(!self.is_staff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(is_staff: bool) -> Message {
        Message {
            id: 1,
            session_id: "session-1-abc".to_string(),
            body: "hello".to_string(),
            media_url: None,
            is_staff,
            staff_name: None,
            sender_name: None,
            read_by_customer: !is_staff,
            read_by_staff: is_staff,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_author_side_is_read_at_insert() {
        let customer_msg = sample(false);
        assert!(customer_msg.read_by(false));
        assert!(!customer_msg.read_by(true));
        assert!(!customer_msg.seen_by_recipient());

        let staff_msg = sample(true);
        assert!(staff_msg.read_by(true));
        assert!(!staff_msg.seen_by_recipient());
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample(true)).unwrap();
        assert_eq!(json["is_admin"], true);
        assert!(json["message"].is_string());
        assert!(json.get("body").is_none(), "wire must use the legacy names");
    }
}
