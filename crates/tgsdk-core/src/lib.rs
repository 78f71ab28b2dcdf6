//! Long-polling update distribution for Telegram-style bot APIs.
//!
//! This crate is intentionally transport-agnostic: the long-poll fetch and
//! cursor calls live behind the [`Transport`] port, implemented over HTTP in
//! `tgsdk-http`. What lives here is everything with real coordination in it:
//! the polling loop and offset bookkeeping, the feeder/worker fan-out, the
//! typed update model, and the per-(sender, chat) session store.

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod session;
pub mod transport;
pub mod update;

pub use config::Config;
pub use dispatch::Dispatcher;
pub use errors::{Error, Result};
pub use session::{FileStore, SessionBackend, Sessions};
pub use transport::Transport;
pub use update::{Chat, Message, Update, User};
