//! Application state.

use memshuttle_sdk::MemoryEngine;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: Config,
    /// Two-tier memory engine
    pub engine: Arc<MemoryEngine>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<MemoryEngine>) -> Self {
        Self {
            config,
            engine,
            start_time: Instant::now(),
        }
    }
}
