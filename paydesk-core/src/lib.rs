pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod policy;

pub use config::PaydeskConfig;
pub use error::{PaydeskError, StoreError};
pub use media::{MediaKind, MediaPayload, IMAGE_MAX_BYTES, PDF_MAX_BYTES};
pub use models::message::Message;
pub use models::ticket::{Ticket, TicketStatus};
