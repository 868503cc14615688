//! API response types.
//!
//! Timers and recipients serialize straight from their domain types
//! (camelCase JSON); the wrappers here only add counts and messages.

use serde::Serialize;

use crate::core::{Recipient, SmartTimer};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// List of timers response.
#[derive(Debug, Serialize)]
pub struct TimerListResponse {
    pub timers: Vec<SmartTimer>,
    pub count: usize,
}

/// List of recipients response.
#[derive(Debug, Serialize)]
pub struct RecipientListResponse {
    pub recipients: Vec<Recipient>,
    pub count: usize,
}

/// Prune outcome response.
#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub pruned: u64,
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
