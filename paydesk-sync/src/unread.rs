//! Read receipts and badge counts.

use std::sync::Arc;

use paydesk_core::error::StoreError;

use crate::store::RemoteStore;

/// Tracks readership of one conversation for one party. The owning view
/// calls [`activate`](Self::activate) when it becomes the active reader and
/// [`refresh`](Self::refresh) on its polling cadence; both are idempotent.
pub struct UnreadTracker {
    store: Arc<dyn RemoteStore>,
    session: String,
    as_staff: bool,
}

impl UnreadTracker {
    pub fn new(store: Arc<dyn RemoteStore>, session: &str, as_staff: bool) -> Self {
        Self {
            store,
            session: session.to_string(),
            as_staff,
        }
    }

    /// Claim readership: everything currently in the conversation is read.
    pub async fn activate(&self) -> Result<(), StoreError> {
        self.store.mark_read(&self.session, self.as_staff).await
    }

    /// Re-claim readership and report what the opposite party still has
    /// pending for us. Safe to call on every poll tick while the view is the
    /// active reader.
    pub async fn refresh(&self) -> Result<i64, StoreError> {
        self.store.mark_read(&self.session, self.as_staff).await?;
        self.store.unread_count(&self.session, self.as_staff).await
    }

    /// Badge count without claiming readership — for list rows that show a
    /// conversation without opening it.
    pub async fn pending(&self) -> Result<i64, StoreError> {
        self.store.unread_count(&self.session, self.as_staff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use paydesk_core::api::SendMessageRequest;
    use paydesk_core::media::MediaPayload;
    use paydesk_core::models::message::Message;
    use paydesk_core::models::ticket::{Ticket, TicketStatus};

    /// Minimal in-memory double covering the message/read-flag surface.
    #[derive(Default)]
    struct MemStore {
        messages: Mutex<Vec<Message>>,
    }

    impl MemStore {
        fn seed(&self, is_staff: bool, count: usize) {
            let mut messages = self.messages.lock().unwrap();
            for _ in 0..count {
                let id = messages.len() as i64 + 1;
                messages.push(Message {
                    id,
                    session_id: "s1".to_string(),
                    body: format!("message {}", id),
                    media_url: None,
                    is_staff,
                    staff_name: None,
                    sender_name: None,
                    read_by_customer: !is_staff,
                    read_by_staff: is_staff,
                    created_at: Utc::now(),
                });
            }
        }
    }

    #[async_trait]
    impl RemoteStore for MemStore {
        async fn list_messages(&self, session: &str) -> Result<Vec<Message>, StoreError> {
            Ok(self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.session_id == session)
                .cloned()
                .collect())
        }

        async fn send_message(&self, _req: SendMessageRequest) -> Result<Message, StoreError> {
            unimplemented!("not exercised here")
        }

        async fn list_tickets(
            &self,
            _filter: Option<&TicketStatus>,
        ) -> Result<Vec<Ticket>, StoreError> {
            unimplemented!("not exercised here")
        }

        async fn create_ticket(
            &self,
            _session: &str,
            _amount: &str,
            _name: Option<&str>,
        ) -> Result<Ticket, StoreError> {
            unimplemented!("not exercised here")
        }

        async fn update_ticket_status(
            &self,
            _id: i64,
            _status: &TicketStatus,
        ) -> Result<Ticket, StoreError> {
            unimplemented!("not exercised here")
        }

        async fn update_ticket_manager(
            &self,
            _id: i64,
            _manager: Option<&str>,
        ) -> Result<Ticket, StoreError> {
            unimplemented!("not exercised here")
        }

        async fn delete_ticket(&self, _id: i64) -> Result<(), StoreError> {
            unimplemented!("not exercised here")
        }

        async fn delete_conversation(&self, _session: &str) -> Result<(), StoreError> {
            unimplemented!("not exercised here")
        }

        async fn set_blocked(&self, _session: &str, _blocked: bool) -> Result<(), StoreError> {
            unimplemented!("not exercised here")
        }

        async fn mark_read(&self, session: &str, as_staff: bool) -> Result<(), StoreError> {
            let mut messages = self.messages.lock().unwrap();
            for m in messages.iter_mut().filter(|m| m.session_id == session) {
                if as_staff {
                    m.read_by_staff = true;
                } else {
                    m.read_by_customer = true;
                }
            }
            Ok(())
        }

        async fn unread_count(&self, session: &str, as_staff: bool) -> Result<i64, StoreError> {
            let messages = self.messages.lock().unwrap();
            Ok(messages
                .iter()
                .filter(|m| m.session_id == session && !m.read_by(as_staff))
                .count() as i64)
        }

        async fn upload_media(&self, _media: MediaPayload) -> Result<String, StoreError> {
            unimplemented!("not exercised here")
        }
    }

    #[tokio::test]
    async fn test_mark_read_then_unread_is_zero() {
        let store = Arc::new(MemStore::default());
        store.seed(false, 3); // three customer messages, unread by staff

        let tracker = UnreadTracker::new(store.clone(), "s1", true);
        assert_eq!(tracker.pending().await.unwrap(), 3);

        tracker.activate().await.unwrap();
        assert_eq!(tracker.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_on_polling_cadence() {
        let store = Arc::new(MemStore::default());
        store.seed(false, 2);

        let tracker = UnreadTracker::new(store.clone(), "s1", true);
        for _ in 0..5 {
            assert_eq!(tracker.refresh().await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_parties_track_independently() {
        let store = Arc::new(MemStore::default());
        store.seed(false, 1); // customer message: staff has 1 pending
        store.seed(true, 2); // staff messages: customer has 2 pending

        let staff = UnreadTracker::new(store.clone(), "s1", true);
        let customer = UnreadTracker::new(store.clone(), "s1", false);

        assert_eq!(staff.pending().await.unwrap(), 1);
        assert_eq!(customer.pending().await.unwrap(), 2);

        staff.activate().await.unwrap();
        assert_eq!(staff.pending().await.unwrap(), 0);
        // Staff reading must not clear the customer's side.
        assert_eq!(customer.pending().await.unwrap(), 2);
    }
}
