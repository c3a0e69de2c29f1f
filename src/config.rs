//! Compile/construction-time tunables, defaulted from `csp_config_dfl.h`.

use std::time::Duration;

/// Tunable parameters for a [`crate::stack::Stack`].
///
/// Every field defaults to the value libcsp ships in `csp_config_dfl.h`;
/// override only what your deployment needs.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of simultaneous connections.
    pub conn_max: usize,
    /// Depth of each connection's inbound queue.
    pub conn_queue_length: usize,
    /// Depth of each QoS priority input FIFO.
    pub fifo_input: usize,
    /// Highest local port number reachable via `bind`.
    pub max_bind_port: u16,
    /// Maximum size of the RDP sliding window.
    pub rdp_max_window: usize,
    /// Number of retransmissions a RDP packet tolerates before the
    /// connection is declared dead (spec.md §3's RDP tunables `retries`;
    /// not pinned by `csp_config_dfl.h`, resolved as 3 to match common
    /// RUDP implementations' `MAXRETR`, recorded in `DESIGN.md`).
    pub rdp_retries: u32,
    /// Payload capacity of a single packet buffer.
    pub buffer_size: usize,
    /// Number of packet buffers in the pool.
    pub buffer_count: usize,
    /// Number of QoS priority levels (1 disables QoS, 4 is the original).
    pub qos_levels: usize,
    /// Use 48-bit (v2) identifiers instead of the 32-bit v1 format.
    pub use_v2_identifiers: bool,
    /// Enable CRC32 by default on outgoing packets.
    pub use_crc32: bool,
    /// Enable HMAC-SHA1 by default on outgoing packets.
    pub use_hmac: bool,
    /// Enable XTEA encryption by default on outgoing packets.
    pub use_xtea: bool,
    /// Enable RDP.
    pub use_rdp: bool,
}

impl Config {
    /// Router dequeue timeout: 100ms when RDP is enabled (so
    /// retransmission timers get a chance to tick), otherwise unbounded.
    pub fn router_rx_timeout(&self) -> Option<Duration> {
        self.use_rdp.then(|| Duration::from_millis(100))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conn_max: 10,
            conn_queue_length: 100,
            fifo_input: 100,
            max_bind_port: 15,
            rdp_max_window: 20,
            rdp_retries: 3,
            buffer_size: 320,
            buffer_count: 12,
            qos_levels: 4,
            use_v2_identifiers: false,
            use_crc32: true,
            use_hmac: true,
            use_xtea: true,
            use_rdp: true,
        }
    }
}
