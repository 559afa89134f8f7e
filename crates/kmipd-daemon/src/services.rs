//! Service registry handed to operation handlers.
//!
//! Handlers are stateless; anything they need beyond the request lives here.
//! The concrete key-management backends are out of scope, so today this is
//! the configuration plus room for the stores a real deployment would wire
//! in.

use std::sync::Arc;

use crate::config::Config;

/// Shared services for operation handlers.
#[derive(Debug, Clone)]
pub struct Services {
    config: Arc<Config>,
}

impl Services {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
