//! Datagram-socket transport
//!
//! Every instance binds `<pid>-<n>.sock` inside the channel directory.
//! `notify_all` sends one datagram to every socket found there.

use super::{BroadcastMessage, BroadcastReport, PEER_TIMEOUT};
use crate::error::{GridError, Result};
use directories::ProjectDirs;
use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

static NEXT_ENDPOINT: AtomicU32 = AtomicU32::new(0);

/// Per-user directory holding the sockets of every instance on `channel`.
///
/// Uses the XDG runtime directory when there is one, otherwise a uid-suffixed
/// directory under the system temp dir.
pub fn channel_dir(channel: &str) -> PathBuf {
    let base = ProjectDirs::from("", "", "IpcGrid")
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| {
            let uid = unsafe { libc::getuid() };
            std::env::temp_dir().join(format!("ipc-grid-{}", uid))
        });

    let clean: String = channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    base.join(clean)
}

pub struct UpdateBroadcaster {
    socket: UnixDatagram,
    dir: PathBuf,
    own_path: PathBuf,
}

/// Receiving half, for a thread that waits on notifications
pub struct UpdateListener {
    socket: UnixDatagram,
}

impl UpdateBroadcaster {
    /// Join the channel, binding this instance's endpoint
    pub fn join(channel: &str) -> Result<Self> {
        Self::join_in(channel_dir(channel))
    }

    pub fn join_in(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .map_err(GridError::Broadcast)?;

        let own_path = dir.join(format!(
            "{}-{}.sock",
            std::process::id(),
            NEXT_ENDPOINT.fetch_add(1, Ordering::Relaxed)
        ));
        // A leftover from an earlier process that had the same pid
        let _ = fs::remove_file(&own_path);

        let socket = UnixDatagram::bind(&own_path).map_err(GridError::Broadcast)?;
        socket
            .set_write_timeout(Some(PEER_TIMEOUT))
            .map_err(GridError::Broadcast)?;

        debug!("Joined update channel at {}", own_path.display());

        Ok(Self {
            socket,
            dir,
            own_path,
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.own_path
    }

    pub fn listener(&self) -> Result<UpdateListener> {
        let socket = self.socket.try_clone().map_err(GridError::Broadcast)?;
        Ok(UpdateListener { socket })
    }

    /// Tell every instance on the channel, this one included, that the shared
    /// state reached `generation`.
    pub fn notify_all(&self, generation: u64) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let payload = BroadcastMessage::state_changed(generation).encode();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list update channel {}: {}", self.dir.display(), e);
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "sock") {
                continue;
            }

            match self.socket.send_to(&payload, &path) {
                Ok(_) => report.delivered += 1,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    // Owner exited without cleaning up
                    if path != self.own_path && fs::remove_file(&path).is_ok() {
                        debug!("Pruned stale endpoint {}", path.display());
                        report.pruned += 1;
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    let skipped = GridError::PeerUnresponsive {
                        peer: path.display().to_string(),
                        timeout_ms: PEER_TIMEOUT.as_millis() as u64,
                    };
                    debug!("{}", skipped);
                    report.unresponsive += 1;
                }
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    report.unresponsive += 1;
                }
            }
        }

        report
    }
}

impl Drop for UpdateBroadcaster {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.own_path);
    }
}

impl UpdateListener {
    /// Block until the next well-formed notification
    pub fn recv(&self) -> Result<BroadcastMessage> {
        let mut buf = [0u8; 64];
        loop {
            let len = self.socket.recv(&mut buf).map_err(GridError::Broadcast)?;
            match BroadcastMessage::decode(&buf[..len]) {
                Some(msg) => return Ok(msg),
                None => debug!("Ignoring malformed {}-byte datagram", len),
            }
        }
    }

    /// Like `recv`, giving up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<BroadcastMessage>> {
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(GridError::Broadcast)?;
        let result = self.recv();
        self.socket.set_read_timeout(None).map_err(GridError::Broadcast)?;

        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(GridError::Broadcast(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
