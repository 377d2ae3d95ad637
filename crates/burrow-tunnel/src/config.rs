//! Tunnel configuration.

use crate::error::TunnelError;

/// Length of the ready marker the bundled agent emits (`STARTED:`).
pub const DEFAULT_MARKER_LEN: usize = 8;

/// Configuration for establishing a tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Length of the ready marker in bytes (default: 8). Must match what
    /// the sandboxed process emits; the content is never validated.
    pub marker_len: usize,
    /// Buffer size of the internal protocol pipe in bytes (default: 64 KiB).
    pub pipe_capacity: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            marker_len: DEFAULT_MARKER_LEN,
            pipe_capacity: 64 * 1024,
        }
    }
}

impl TunnelConfig {
    /// Create a new config builder.
    pub fn builder() -> TunnelConfigBuilder {
        TunnelConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.marker_len == 0 {
            return Err(TunnelError::Config("marker_len must be > 0".into()));
        }
        if self.pipe_capacity == 0 {
            return Err(TunnelError::Config("pipe_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for TunnelConfig.
#[derive(Debug, Default)]
pub struct TunnelConfigBuilder {
    config: TunnelConfig,
}

impl TunnelConfigBuilder {
    /// Set the ready marker length.
    pub fn marker_len(mut self, len: usize) -> Self {
        self.config.marker_len = len;
        self
    }

    /// Set the internal protocol pipe capacity.
    pub fn pipe_capacity(mut self, bytes: usize) -> Self {
        self.config.pipe_capacity = bytes;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<TunnelConfig, TunnelError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
