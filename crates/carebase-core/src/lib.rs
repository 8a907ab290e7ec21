//! Carebase Core — outbox domain types and capability traits.
//!
//! This crate defines the event records, the storage, broker and metrics
//! capabilities the delivery pipeline depends on, and the configuration and
//! error types shared by every other crate. It contains no infrastructure code.

pub mod audit;
pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod store;
