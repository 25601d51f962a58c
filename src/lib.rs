//! # ascmonitor-rs
//!
//! Immutable, strongly-typed event log for a monitored bibliography.
//!
//! Records the lifecycle of documents (discovered, updated, removed) and of
//! the social-media announcements about them (post started, succeeded,
//! failed). Events are encoded to flat records, persisted append-only in
//! Postgres (or an in-memory store), and decoded back to the exact variant
//! they were written as.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod log;
pub mod model;
pub mod telemetry;
