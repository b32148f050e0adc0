//! Client-side synchronization core for Paydesk views.
//!
//! Every front end (customer chat widget, admin ticket board, admin chat
//! view) drives the same small set of pieces instead of reimplementing its
//! own interval/alert logic:
//!
//! - [`identity::SessionIdentity`] — stable per-profile visitor id
//! - [`store::RemoteStore`] / [`store::HttpStore`] — the backend boundary
//! - [`poller::PollingSynchronizer`] — fixed-interval snapshot fetching
//! - [`alert::EdgeAlertDetector`] — fire-once-per-increase alerting
//! - [`unread::UnreadTracker`] — read receipts and badge counts
//! - [`bus::ChangeBus`] — mutation fan-out to concurrently-running views

pub mod alert;
pub mod bus;
pub mod identity;
pub mod poller;
pub mod store;
pub mod unread;

pub use alert::{AlertSet, EdgeAlertDetector};
pub use bus::{ChangeBus, StoreEvent};
pub use identity::SessionIdentity;
pub use poller::PollingSynchronizer;
pub use store::{HttpStore, RemoteStore};
pub use unread::UnreadTracker;
