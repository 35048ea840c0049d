//! services/api/src/lib.rs
//!
//! The HTTP and WebSocket service for the Medixa chat assistant: concrete adapters
//! for the ports in `medixa_core`, configuration, and the Axum web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
