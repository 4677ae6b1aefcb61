//! `DuoChat`: terminal client for a two-party text chat service.
//!
//! The library is layered bottom-up:
//! - [`api`]: request/response seams (auth, directory, history)
//! - [`auth`]: persisted session token and login bookkeeping
//! - [`directory`], [`conversation`]: per-session state
//! - [`connection`]: the persistent real-time channel and its retry policy
//! - [`session`]: the session context and the task that drives it
//! - [`app`], [`ui`]: the terminal view

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod directory;
pub mod session;
pub mod ui;
