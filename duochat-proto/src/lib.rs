//! Shared protocol definitions for the `DuoChat` client and server.
//!
//! The real-time channel carries JSON text frames (see [`frame`]); the
//! request/response endpoints exchange the DTOs in [`api`].

pub mod api;
pub mod frame;
pub mod identity;
