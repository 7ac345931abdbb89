//! Timeout configuration for bus client operations.
//!
//! One place for every duration the client and its transport respect:
//! connection establishment, the auth handshake, the close-time drain,
//! and the keepalive probe cycle.

use std::time::Duration;

/// Timeout configuration for bus client operations.
///
/// All values have sensible defaults; use the presets or the builder to
/// adjust them for your network.
///
/// # Examples
///
/// ```rust
/// use skiff_link::SkiffTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = SkiffTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = SkiffTimeouts::builder()
///     .connect_timeout(Duration::from_secs(60))
///     .drain_timeout(Duration::from_secs(20))
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = SkiffTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct SkiffTimeouts {
    /// Timeout for establishing the transport connection (TCP + upgrade).
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Timeout for the authentication handshake after the connection opens.
    /// Default: 5 seconds
    pub auth_timeout: Duration,

    /// Maximum time `close()` waits for queued outbound frames to flush
    /// before the connection is dropped anyway.
    /// Default: 5 seconds
    pub drain_timeout: Duration,

    /// Keepalive ping interval.
    /// Set to 0 to disable keepalive pings.
    /// Default: 10 seconds
    pub keepalive_interval: Duration,

    /// Maximum time to wait for a Pong (or any other frame) after sending a
    /// keepalive Ping before the connection is considered dead.
    /// Set to 0 to disable pong timeout checking.
    /// Default: 5 seconds
    pub pong_timeout: Duration,
}

impl Default for SkiffTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl SkiffTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> SkiffTimeoutsBuilder {
        SkiffTimeoutsBuilder::new()
    }

    /// Create timeouts optimized for fast local development.
    ///
    /// Uses shorter timeouts suitable for localhost connections.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }

    /// Create timeouts optimized for high-latency or unreliable networks.
    ///
    /// Uses longer timeouts suitable for cloud/remote connections.
    pub fn relaxed() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365) // > 1 year
    }
}

/// Builder for creating custom [`SkiffTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct SkiffTimeoutsBuilder {
    timeouts: SkiffTimeouts,
}

impl SkiffTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: SkiffTimeouts::default(),
        }
    }

    /// Set the connection establishment timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    /// Set the connection establishment timeout in seconds.
    pub fn connect_timeout_secs(self, secs: u64) -> Self {
        self.connect_timeout(Duration::from_secs(secs))
    }

    /// Set the authentication handshake timeout.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth_timeout = timeout;
        self
    }

    /// Set the authentication handshake timeout in seconds.
    pub fn auth_timeout_secs(self, secs: u64) -> Self {
        self.auth_timeout(Duration::from_secs(secs))
    }

    /// Set the close-time drain timeout.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.drain_timeout = timeout;
        self
    }

    /// Set the close-time drain timeout in seconds.
    pub fn drain_timeout_secs(self, secs: u64) -> Self {
        self.drain_timeout(Duration::from_secs(secs))
    }

    /// Set the keepalive ping interval.
    /// Set to 0 to disable keepalive pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the keepalive ping interval in seconds.
    /// Set to 0 to disable keepalive pings.
    pub fn keepalive_interval_secs(self, secs: u64) -> Self {
        self.keepalive_interval(Duration::from_secs(secs))
    }

    /// Set the pong timeout (max wait for Pong after sending a Ping).
    /// Set to 0 to disable pong timeout checking.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Set the pong timeout in seconds.
    /// Set to 0 to disable pong timeout checking.
    pub fn pong_timeout_secs(self, secs: u64) -> Self {
        self.pong_timeout(Duration::from_secs(secs))
    }

    /// Build the timeout configuration.
    pub fn build(self) -> SkiffTimeouts {
        self.timeouts
    }
}
