//! `DuoChat` reference server library.
//!
//! An in-memory backend for the `DuoChat` client: accounts and tokens,
//! contacts, per-pair history, and a `/ws` channel that routes message
//! frames between the two parties. Used by integration tests and local
//! demos.

pub mod config;
pub mod server;
pub mod store;
