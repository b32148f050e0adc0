//! Stable per-profile visitor identity.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::Utc;
use uuid::Uuid;

const SESSION_FILE: &str = "session";

/// Produces and persists the opaque session id correlating a visitor with
/// their tickets and messages. The id survives restarts; clearing the state
/// directory is the only way to get a new one.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    state_dir: PathBuf,
}

impl SessionIdentity {
    /// `state_dir` may start with `~`, expanded against the current user.
    pub fn new(state_dir: &str) -> Self {
        Self {
            state_dir: PathBuf::from(shellexpand::tilde(state_dir).into_owned()),
        }
    }

    pub fn get_or_create(&self) -> io::Result<String> {
        let path = self.state_dir.join(SESSION_FILE);
        if let Ok(existing) = fs::read_to_string(&path) {
            let trimmed = existing.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }

        let id = generate_session_id();
        fs::create_dir_all(&self.state_dir)?;
        fs::write(&path, &id)?;
        Ok(id)
    }
}

/// `session-<unix millis>-<12 hex chars>`. The timestamp keeps ids sortable
/// in ad-hoc queries; the random suffix makes collisions negligible.
fn generate_session_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string()[..12].to_string();
    format!("session-{}-{}", Utc::now().timestamp_millis(), suffix)
}
