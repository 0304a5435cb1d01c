//! Service configuration.

/// Configuration for the sync service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of items accepted in one bulk request.
    pub max_batch_size: usize,
    /// Bearer token required on every request, if set.
    pub bearer_token: Option<String>,
}

impl ServerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            max_batch_size: 100,
            bearer_token: None,
        }
    }

    /// Sets the maximum bulk batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Requires the given bearer token on every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
