//! Centralized configuration for chanrpc.
//!
//! Protocol constants live on unit structs as associated constants; runtime
//! knobs live on [`NodeConfig`] and [`ChannelerConfig`].

use crate::error::{ChannelError, Result};
use crate::retry::RetryConfig;
use std::time::Duration;

/// Protocol-level constants shared by both peers.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Inbound frames at or above this size are rejected before parsing.
    pub const MAX_INBOUND_FRAME: usize = 1050;
    pub const SLICE_SIZE: usize = 512;
    pub const MAX_RETRIES: u32 = 3;
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);
    pub const SWEEP_TICK: Duration = Duration::from_secs(1);
    /// Upper bound on the JSON envelope around a slice payload.
    pub const ENVELOPE_OVERHEAD: usize = 160;
    pub const MAX_BUFFER_SIZE: u64 = 256 * 1024 * 1024; // 256MB
    /// Announced buffers pulled at the same time by one receiver.
    pub const MAX_CONCURRENT_RECEIVES: usize = 16;
}

/// Configuration for the TCP transport.
pub struct TcpConfig;

impl TcpConfig {
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OUTBOUND_QUEUE: usize = 256;
}

/// Runtime configuration for an [`RpcNode`](crate::node::RpcNode).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name attached to the node's tracing span.
    pub name: String,
    /// Sweep period; timeout granularity equals this value.
    pub tick: Duration,
    /// Reject inbound frames whose length is `>=` this value.
    pub max_inbound_frame: Option<usize>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            tick: ProtocolConfig::SWEEP_TICK,
            max_inbound_frame: None,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_max_inbound_frame(mut self, limit: Option<usize>) -> Self {
        self.max_inbound_frame = limit;
        self
    }

    /// Number of sweep ticks needed to cover `timeout`, rounded up.
    pub fn ticks_for(&self, timeout: Duration) -> u64 {
        let tick = self.tick.as_nanos().max(1);
        u64::try_from(timeout.as_nanos().div_ceil(tick)).unwrap_or(u64::MAX)
    }
}

/// Runtime configuration for a [`Channeler`](crate::channeler::Channeler).
#[derive(Debug, Clone)]
pub struct ChannelerConfig {
    pub node: NodeConfig,
    pub slice_size: usize,
    /// Largest slice this side will serve to a peer.
    pub max_slice_size: usize,
    /// Largest announced buffer this side will allocate.
    pub max_buffer_size: u64,
    /// Pulls in progress at once; further announces are refused.
    pub max_concurrent_receives: usize,
    /// Per-call timeout for `gbi`/`gbs` queries.
    pub call_timeout: Duration,
    /// Timeout of the announce call on the sending side.
    pub announce_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ChannelerConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default()
                .with_name("channeler")
                .with_max_inbound_frame(Some(ProtocolConfig::MAX_INBOUND_FRAME)),
            slice_size: ProtocolConfig::SLICE_SIZE,
            max_slice_size: ProtocolConfig::SLICE_SIZE,
            max_buffer_size: ProtocolConfig::MAX_BUFFER_SIZE,
            max_concurrent_receives: ProtocolConfig::MAX_CONCURRENT_RECEIVES,
            call_timeout: ProtocolConfig::CALL_TIMEOUT,
            announce_timeout: ProtocolConfig::CALL_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl ChannelerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    pub fn with_slice_size(mut self, size: usize) -> Self {
        self.slice_size = size;
        self
    }

    pub fn with_max_slice_size(mut self, size: usize) -> Self {
        self.max_slice_size = size;
        self
    }

    pub fn with_max_buffer_size(mut self, size: u64) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn with_max_concurrent_receives(mut self, limit: usize) -> Self {
        self.max_concurrent_receives = limit;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_announce_timeout(mut self, timeout: Duration) -> Self {
        self.announce_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check that slices requested and served by this side fit under the
    /// inbound frame ceiling once base64 and the envelope are added.
    pub fn validate(&self) -> Result<()> {
        if self.slice_size == 0 {
            return Err(ChannelError::Config {
                message: "slice_size must be greater than zero".to_string(),
            });
        }
        if self.slice_size > self.max_slice_size {
            return Err(ChannelError::Config {
                message: format!(
                    "slice_size {} exceeds max_slice_size {}",
                    self.slice_size, self.max_slice_size
                ),
            });
        }
        if self.max_concurrent_receives == 0 {
            return Err(ChannelError::Config {
                message: "max_concurrent_receives must be greater than zero".to_string(),
            });
        }
        if let Some(limit) = self.node.max_inbound_frame {
            let encoded = base64_len(self.slice_size) + ProtocolConfig::ENVELOPE_OVERHEAD;
            if encoded >= limit {
                return Err(ChannelError::Config {
                    message: format!(
                        "slice_size {} encodes to ~{} bytes, over the {} byte frame limit",
                        self.slice_size, encoded, limit
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Length of the padded standard base64 encoding of `n` bytes.
pub fn base64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channeler_config_is_valid() {
        let config = ChannelerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.node.max_inbound_frame, Some(1050));
        assert_eq!(config.slice_size, 512);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_oversized_slice_rejected() {
        let config = ChannelerConfig::default()
            .with_slice_size(1024)
            .with_max_slice_size(1024);
        assert!(matches!(
            config.validate(),
            Err(ChannelError::Config { .. })
        ));
    }

    #[test]
    fn test_zero_slice_rejected() {
        let config = ChannelerConfig::default().with_slice_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ticks_round_up() {
        let config = NodeConfig::default();
        assert_eq!(config.ticks_for(Duration::ZERO), 0);
        assert_eq!(config.ticks_for(Duration::from_secs(60)), 60);
        assert_eq!(config.ticks_for(Duration::from_millis(1500)), 2);
    }

    #[test]
    fn test_ticks_saturate_instead_of_wrapping() {
        let config = NodeConfig::default().with_tick(Duration::from_nanos(1));
        assert_eq!(config.ticks_for(Duration::MAX), u64::MAX);
        assert_eq!(config.ticks_for(Duration::from_secs(1)), 1_000_000_000);
    }

    #[test]
    fn test_zero_concurrent_receives_rejected() {
        let config = ChannelerConfig::default().with_max_concurrent_receives(0);
        assert!(matches!(
            config.validate(),
            Err(ChannelError::Config { .. })
        ));
    }

    #[test]
    fn test_base64_len() {
        assert_eq!(base64_len(0), 0);
        assert_eq!(base64_len(1), 4);
        assert_eq!(base64_len(512), 684);
    }
}
