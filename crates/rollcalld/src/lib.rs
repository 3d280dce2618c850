//! Attendance kiosk daemon.
//!
//! Serves a JSON API over axum; all camera and training work runs on a
//! single engine thread.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod engine;
pub mod http;
