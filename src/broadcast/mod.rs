//! Push notifications between instances
//!
//! After every write to the shared region the writer calls
//! [`UpdateBroadcaster::notify_all`]; each running window, the writer's own
//! included, re-reads the region and repaints. Delivery is best effort: a
//! peer that does not take the message within [`PEER_TIMEOUT`] is skipped,
//! and the shared region stays the single source of truth.
//!
//! - unix: one datagram socket per instance in a per-user channel directory
//! - windows: a registered window message sent to every `IPCGridClass` window

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{channel_dir, UpdateBroadcaster, UpdateListener};

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::{install_repaint_hook, UpdateBroadcaster, WINDOW_CLASS};

/// Name of the notification channel (registered window message on Windows)
pub const UPDATE_CHANNEL: &str = "IPCGRID_UPDATE";

/// Longest wait for a single peer
pub const PEER_TIMEOUT: Duration = Duration::from_millis(100);

/// Wire message; kept distinct from any input event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastMessage {
    /// Shared state changed; `generation` is the region's write counter
    StateChanged { origin: u32, generation: u64 },
}

/// Outcome of one `notify_all`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Skipped after the per-peer timeout
    pub unresponsive: usize,
    /// Endpoints whose owner has exited, removed during the send
    pub pruned: usize,
}

impl BroadcastMessage {
    pub fn state_changed(generation: u64) -> Self {
        BroadcastMessage::StateChanged {
            origin: std::process::id(),
            generation,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Fixed-size enum of integers; serialization cannot fail
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_decodes_what_it_encodes() {
        let msg = BroadcastMessage::state_changed(7);
        assert_eq!(BroadcastMessage::decode(&msg.encode()), Some(msg));
    }

    #[test]
    fn test_garbage_is_not_a_message() {
        assert_eq!(BroadcastMessage::decode(&[0xFF, 0xFF, 0xFF]), None);
        assert_eq!(BroadcastMessage::decode(&[]), None);
    }
}
