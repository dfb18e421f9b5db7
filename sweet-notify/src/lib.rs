//! sweet-notify library crate.
//!
//! Notification composition, push delivery and the per-user notification
//! ledger for Sweet.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
