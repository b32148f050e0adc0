//! Pure policy checks, kept out of the store so they are testable without a
//! database.

use chrono::{DateTime, Duration, Utc};

/// A session may create at most this many tickets inside the trailing window.
pub const TICKET_RATE_LIMIT: usize = 5;

pub fn ticket_rate_window() -> Duration {
    Duration::hours(24)
}

/// Whether a session with the given prior creation times may create another
/// ticket at `now`. Only creations inside the trailing window count.
pub fn ticket_creation_allowed(prior_created: &[DateTime<Utc>], now: DateTime<Utc>) -> bool {
    let cutoff = now - ticket_rate_window();
    let recent = prior_created.iter().filter(|t| **t > cutoff).count();
    recent < TICKET_RATE_LIMIT
}

/// The customer message auto-generated when a ticket is created, so the
/// conversation opens with the request itself.
pub fn greeting_body(amount: &str) -> String {
    format!("Hello! I would like to top up my account for {} ₽", amount)
}

pub fn rate_limit_notice() -> &'static str {
    "Request limit exceeded: at most 5 tickets per 24 hours"
}

pub fn blocked_notice() -> &'static str {
    "This session is blocked from sending requests"
}
