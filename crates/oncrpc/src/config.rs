//! Connection and client settings, with fluent setters.

use std::time::Duration;

use crate::record::DEFAULT_CHUNK_SIZE;
use crate::record::DEFAULT_MAX_RECORD_SIZE;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-stream settings. Survive reconnects unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Largest fragment written in one record-mark chunk.
    pub chunk_size: usize,
    /// Bound on each individual read or write.
    pub timeout: Duration,
    /// Largest record accepted from the peer.
    pub max_record_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_TIMEOUT,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_record_size(mut self, max_record_size: usize) -> Self {
        self.max_record_size = max_record_size;
        self
    }
}

/// Identifies the remote program and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub program: u32,
    pub version: u32,
    pub connection: ConnectionConfig,
}

impl ClientConfig {
    pub fn new(program: u32, version: u32) -> Self {
        Self { program, version, connection: ConnectionConfig::default() }
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.connection.timeout = timeout;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.connection.chunk_size = chunk_size;
        self
    }
}
