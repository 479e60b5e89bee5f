//! Registered-window-message transport
//!
//! The sender walks every top-level `IPCGridClass` window and posts the
//! registered message with a bounded `SendMessageTimeoutW`. Receivers
//! subclass their window and invalidate it when the message arrives, which
//! turns into a regular redraw.

use super::{BroadcastReport, PEER_TIMEOUT};
use crate::error::{GridError, Result};
use std::io;
use tracing::debug;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::Graphics::Gdi::InvalidateRect;
use windows::Win32::UI::Shell::{DefSubclassProc, SetWindowSubclass};
use windows::Win32::UI::WindowsAndMessaging::{
    FindWindowExW, RegisterWindowMessageW, SendMessageTimeoutW, SMTO_ABORTIFHUNG,
};

/// Window class shared by every instance
pub const WINDOW_CLASS: &str = "IPCGridClass";

const SUBCLASS_ID: usize = 1;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

pub struct UpdateBroadcaster {
    message_id: u32,
    class_name: Vec<u16>,
}

impl UpdateBroadcaster {
    pub fn join(channel: &str) -> Result<Self> {
        let name = wide(channel);
        let message_id = unsafe { RegisterWindowMessageW(PCWSTR(name.as_ptr())) };
        if message_id == 0 {
            return Err(GridError::Broadcast(io::Error::last_os_error()));
        }

        debug!("Registered update message {:#x}", message_id);

        Ok(Self {
            message_id,
            class_name: wide(WINDOW_CLASS),
        })
    }

    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Send the update message to every grid window, this one included
    pub fn notify_all(&self, generation: u64) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut hwnd = HWND::default();

        loop {
            hwnd = unsafe {
                FindWindowExW(
                    HWND::default(),
                    hwnd,
                    PCWSTR(self.class_name.as_ptr()),
                    PCWSTR::null(),
                )
            };
            if hwnd.0 == 0 {
                break;
            }

            let mut result = 0usize;
            let sent = unsafe {
                SendMessageTimeoutW(
                    hwnd,
                    self.message_id,
                    WPARAM(std::process::id() as usize),
                    LPARAM(generation as isize),
                    SMTO_ABORTIFHUNG,
                    PEER_TIMEOUT.as_millis() as u32,
                    Some(&mut result),
                )
            };

            if sent.0 != 0 {
                report.delivered += 1;
            } else {
                let skipped = GridError::PeerUnresponsive {
                    peer: format!("{:#x}", hwnd.0),
                    timeout_ms: PEER_TIMEOUT.as_millis() as u64,
                };
                debug!("{}", skipped);
                report.unresponsive += 1;
            }
        }

        report
    }
}

unsafe extern "system" fn repaint_subclass(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
    _id: usize,
    message_id: usize,
) -> LRESULT {
    if msg == message_id as u32 {
        let _ = InvalidateRect(hwnd, None, false);
        return LRESULT(1);
    }
    DefSubclassProc(hwnd, msg, wparam, lparam)
}

/// Make `hwnd` repaint whenever the update message `message_id` arrives
pub fn install_repaint_hook(hwnd: isize, message_id: u32) -> Result<()> {
    let ok = unsafe {
        SetWindowSubclass(
            HWND(hwnd),
            Some(repaint_subclass),
            SUBCLASS_ID,
            message_id as usize,
        )
    };
    if ok.as_bool() {
        Ok(())
    } else {
        Err(GridError::Broadcast(io::Error::last_os_error()))
    }
}
