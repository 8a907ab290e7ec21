//! HTTP routes.

pub mod audit;
pub mod health;
pub mod outbox;
