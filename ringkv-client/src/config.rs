//! Client configuration.

use std::time::Duration;

use ringkv_core::{Error, Result, StoreDefinition};
use ringkv_wire::MAX_FRAME_BYTES;

/// Name of the store that serves cluster metadata documents.
pub const METADATA_STORE: &str = "metadata";

/// Attempts made when connecting to a specific routed node.
pub const ROUTED_CONNECT_ATTEMPTS: usize = 3;

/// Per-connection timing and limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for opening the TCP stream and for protocol negotiation.
    pub connect_timeout: Duration,
    /// Deadline for one request/response round trip.
    pub request_timeout: Duration,
    /// Proactively move to the next node after this many requests on one
    /// connection. Zero disables the refresh.
    pub reconnect_interval: u64,
    /// Largest response frame accepted.
    pub max_frame_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            reconnect_interval: 500,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl ConnectionConfig {
    /// Creates a config suitable for testing (short timeouts).
    #[must_use]
    pub fn fast_for_testing() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(250),
            ..Self::default()
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect interval.
    #[must_use]
    pub const fn with_reconnect_interval(mut self, requests: u64) -> Self {
        self.reconnect_interval = requests;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns a config error for zero timeouts or a zero frame limit.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be > 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout must be > 0"));
        }
        if self.max_frame_bytes == 0 || self.max_frame_bytes > MAX_FRAME_BYTES {
            return Err(Error::config(format!(
                "max_frame_bytes must be in 1..={MAX_FRAME_BYTES}"
            )));
        }
        Ok(())
    }
}

/// Configuration for a client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default store, its routing mode and key layout.
    pub store: StoreDefinition,
    /// Connection timing.
    pub connection: ConnectionConfig,
    /// Start on a random node instead of the bootstrap seed.
    pub randomize: bool,
}

impl ClientConfig {
    /// Creates a configuration for `store` with default timing.
    #[must_use]
    pub fn new(store: StoreDefinition) -> Self {
        Self {
            store,
            connection: ConnectionConfig::default(),
            randomize: true,
        }
    }

    /// Sets the connection configuration.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Sets whether the start node is picked at random.
    #[must_use]
    pub const fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns a config error if the store or the timing is invalid.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.connection.validate()
    }
}

/// Converts a duration to whole milliseconds, saturating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
