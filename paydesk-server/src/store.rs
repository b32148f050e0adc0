//! PostgreSQL-backed conversation and ticket store.
//!
//! All policy refusals (rate limit, blocked session, missing rows) surface as
//! `StoreError` inside `PaydeskError::Store`; everything else is a database
//! error. Queries are runtime-bound so builds never need a live database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use paydesk_core::api::SendMessageRequest;
use paydesk_core::error::{PaydeskError, StoreError};
use paydesk_core::models::message::Message;
use paydesk_core::models::ticket::{Ticket, TicketStatus};
use paydesk_core::policy;

use crate::subsystems::notify::{self, TelegramNotifier};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tickets (
    id BIGSERIAL PRIMARY KEY,
    session_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    user_name TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    manager TEXT,
    is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_tickets_session ON tickets (session_id);

CREATE TABLE IF NOT EXISTS messages (
    id BIGSERIAL PRIMARY KEY,
    session_id TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    media_url TEXT,
    is_staff BOOLEAN NOT NULL DEFAULT FALSE,
    staff_name TEXT,
    sender_name TEXT,
    read_by_customer BOOLEAN NOT NULL DEFAULT FALSE,
    read_by_staff BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, created_at);
"#;

const MESSAGE_COLUMNS: &str = "id, session_id, body, media_url, is_staff, staff_name, \
     sender_name, read_by_customer, read_by_staff, created_at";

/// Ticket row as stored; status is converted on the way out so one bad row
/// cannot fail a whole listing.
#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: i64,
    session_id: String,
    amount: String,
    user_name: Option<String>,
    status: String,
    manager: Option<String>,
    is_blocked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    unread_messages: Option<i64>,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Ticket {
        Ticket {
            id: row.id,
            session_id: row.session_id,
            amount: row.amount,
            user_name: row.user_name,
            status: TicketStatus::parse_lossy(&row.status),
            manager: row.manager,
            is_blocked: row.is_blocked,
            created_at: row.created_at,
            updated_at: row.updated_at,
            unread_messages: row.unread_messages,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    notifier: Option<Arc<TelegramNotifier>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<TelegramNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent schema bootstrap, run once at server start.
    pub async fn init_schema(&self) -> Result<(), PaydeskError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    // ========================================================================
    // Messages
    // ========================================================================

    pub async fn list_messages(&self, session: &str) -> Result<Vec<Message>, PaydeskError> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {} FROM messages WHERE session_id = $1 ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        ))
        .bind(session)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<Message, PaydeskError> {
        if !req.is_admin && self.is_blocked(&req.session).await? {
            return Err(StoreError::RateLimited(policy::blocked_notice().to_string()).into());
        }

        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages \
                 (session_id, body, media_url, is_staff, staff_name, sender_name, \
                  read_by_customer, read_by_staff) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(&req.session)
        .bind(&req.message)
        .bind(&req.image_url)
        .bind(req.is_admin)
        .bind(&req.manager_name)
        .bind(&req.name)
        // The authoring party has seen its own message from the start.
        .bind(!req.is_admin)
        .bind(req.is_admin)
        .fetch_one(&self.pool)
        .await?;

        // A new message makes the conversation's tickets "recently updated".
        sqlx::query("UPDATE tickets SET updated_at = NOW() WHERE session_id = $1")
            .bind(&req.session)
            .execute(&self.pool)
            .await?;

        if !req.is_admin && !req.message.trim().is_empty() {
            self.notify_message(&req.session, req.name.as_deref(), &req.message)
                .await;
        }

        Ok(message)
    }

    pub async fn mark_read(&self, session: &str, as_staff: bool) -> Result<(), PaydeskError> {
        let column = read_column(as_staff);
        sqlx::query(&format!(
            "UPDATE messages SET {col} = TRUE WHERE session_id = $1 AND {col} = FALSE",
            col = column
        ))
        .bind(session)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unread_count(&self, session: &str, as_staff: bool) -> Result<i64, PaydeskError> {
        let column = read_column(as_staff);
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM messages WHERE session_id = $1 AND {} = FALSE",
            column
        ))
        .bind(session)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ========================================================================
    // Tickets
    // ========================================================================

    pub async fn list_tickets(
        &self,
        filter: Option<&TicketStatus>,
    ) -> Result<Vec<Ticket>, PaydeskError> {
        let base = "SELECT t.id, t.session_id, t.amount, t.user_name, t.status, t.manager, \
                    t.is_blocked, t.created_at, t.updated_at, \
                    (SELECT COUNT(*) FROM messages m \
                     WHERE m.session_id = t.session_id AND m.read_by_staff = FALSE) \
                        AS unread_messages \
                    FROM tickets t";

        let rows: Vec<TicketRow> = match filter {
            Some(status) => {
                sqlx::query_as(&format!(
                    "{} WHERE t.status = $1 ORDER BY t.updated_at DESC",
                    base
                ))
                .bind(status.as_wire())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!("{} ORDER BY t.updated_at DESC", base))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(Ticket::from).collect())
    }

    pub async fn create_ticket(
        &self,
        session: &str,
        amount: &str,
        name: Option<&str>,
    ) -> Result<Ticket, PaydeskError> {
        if self.is_blocked(session).await? {
            return Err(StoreError::RateLimited(policy::blocked_notice().to_string()).into());
        }

        let prior: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM tickets \
             WHERE session_id = $1 AND created_at > NOW() - INTERVAL '24 hours'",
        )
        .bind(session)
        .fetch_all(&self.pool)
        .await?;
        let prior: Vec<DateTime<Utc>> = prior.into_iter().map(|(t,)| t).collect();

        if !policy::ticket_creation_allowed(&prior, Utc::now()) {
            return Err(StoreError::RateLimited(policy::rate_limit_notice().to_string()).into());
        }

        let mut tx = self.pool.begin().await?;

        let row: TicketRow = sqlx::query_as(
            "INSERT INTO tickets (session_id, amount, user_name, status) \
             VALUES ($1, $2, $3, 'new') \
             RETURNING id, session_id, amount, user_name, status, manager, is_blocked, \
                       created_at, updated_at, NULL::BIGINT AS unread_messages",
        )
        .bind(session)
        .bind(amount)
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        // The conversation opens with the request itself, authored by the
        // customer and unread by staff.
        sqlx::query(
            "INSERT INTO messages \
                 (session_id, body, is_staff, sender_name, read_by_customer, read_by_staff) \
             VALUES ($1, $2, FALSE, $3, TRUE, FALSE)",
        )
        .bind(session)
        .bind(policy::greeting_body(amount))
        .bind(name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut ticket = Ticket::from(row);
        ticket.unread_messages = Some(1);

        if let Some(notifier) = &self.notifier {
            notify::spawn_ticket_alert(notifier.clone(), ticket.clone());
        }

        Ok(ticket)
    }

    pub async fn update_ticket_status(
        &self,
        id: i64,
        status: &TicketStatus,
    ) -> Result<Ticket, PaydeskError> {
        let row: Option<TicketRow> = sqlx::query_as(
            "UPDATE tickets SET status = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING id, session_id, amount, user_name, status, manager, is_blocked, \
                       created_at, updated_at, NULL::BIGINT AS unread_messages",
        )
        .bind(id)
        .bind(status.as_wire())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::from)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", id)).into())
    }

    pub async fn update_ticket_manager(
        &self,
        id: i64,
        manager: Option<&str>,
    ) -> Result<Ticket, PaydeskError> {
        let row: Option<TicketRow> = sqlx::query_as(
            "UPDATE tickets SET manager = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING id, session_id, amount, user_name, status, manager, is_blocked, \
                       created_at, updated_at, NULL::BIGINT AS unread_messages",
        )
        .bind(id)
        .bind(manager)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Ticket::from)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", id)).into())
    }

    pub async fn delete_ticket(&self, id: i64) -> Result<(), PaydeskError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("ticket {}", id)).into());
        }
        Ok(())
    }

    /// Staff-initiated purge: the conversation and every ticket layered on it.
    pub async fn delete_conversation(&self, session: &str) -> Result<(), PaydeskError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE session_id = $1")
            .bind(session)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tickets WHERE session_id = $1")
            .bind(session)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_blocked(&self, session: &str, blocked: bool) -> Result<(), PaydeskError> {
        sqlx::query("UPDATE tickets SET is_blocked = $2 WHERE session_id = $1")
            .bind(session)
            .bind(blocked)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_blocked(&self, session: &str) -> Result<bool, PaydeskError> {
        let (blocked,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE session_id = $1 AND is_blocked = TRUE)",
        )
        .bind(session)
        .fetch_one(&self.pool)
        .await?;
        Ok(blocked)
    }

    /// Fire-and-forget alert for a customer message, referencing the
    /// session's most recent ticket when one exists.
    async fn notify_message(&self, session: &str, sender: Option<&str>, body: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let ticket_id: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM tickets WHERE session_id = $1 \
             AND created_at > NOW() - INTERVAL '24 hours' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ticket lookup for notification failed");
            None
        });

        notify::spawn_message_alert(
            notifier.clone(),
            ticket_id.map(|(id,)| id),
            sender.unwrap_or("Anonymous").to_string(),
            body.to_string(),
        );
    }
}

fn read_column(as_staff: bool) -> &'static str {
    if as_staff {
        "read_by_staff"
    } else {
        "read_by_customer"
    }
}
