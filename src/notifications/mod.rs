//! Alert notification dispatch across provider channels.

pub mod models;
pub mod senders;
pub mod service;

pub use service::NotificationDispatcher;
