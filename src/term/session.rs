//! Managed terminal session
//!
//! A [`TerminalSession`] owns exactly one [`TerminalBackend`] and
//! tracks whether the device is currently in managed mode. All screen
//! access above this layer goes through the session, which clips
//! writes to the screen and keeps the last known dimensions cached.

use std::time::Duration;

use tracing::{debug, info};
use unicode_width::UnicodeWidthChar;

use super::backend::{CrosstermBackend, TerminalBackend};
use super::caps::Capabilities;
use super::event::InputEvent;
use crate::error::{Result, RuntimeError};

/// Rectangular screen region in character cells
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenRegion {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl ScreenRegion {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering the whole screen
    pub fn full(cols: u16, rows: u16) -> Self {
        Self::new(0, 0, cols, rows)
    }
}

/// Exclusive handle on the process terminal.
///
/// `open` switches the device into managed mode (raw input, alternate
/// screen, mouse capture) and `close` restores it. Restoration also
/// runs on drop, so a panicking caller does not leave the user's shell
/// in raw mode.
pub struct TerminalSession {
    backend: Box<dyn TerminalBackend>,
    managed: bool,
    dims: (u16, u16),
    caps: Option<Capabilities>,
}

impl TerminalSession {
    pub fn new(backend: Box<dyn TerminalBackend>) -> Self {
        Self {
            backend,
            managed: false,
            dims: (0, 0),
            caps: None,
        }
    }

    /// Session on the process terminal via crossterm
    pub fn stdio() -> Self {
        Self::new(Box::new(CrosstermBackend::new()))
    }

    /// Acquire the terminal and enter managed mode.
    ///
    /// Fails with [`RuntimeError::TerminalUnavailable`] when no
    /// interactive terminal is attached (output redirected, no tty).
    /// Opening an already open session is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.managed {
            return Ok(());
        }

        if !self.backend.is_interactive() {
            return Err(RuntimeError::TerminalUnavailable);
        }

        let caps = self.backend.capabilities();
        self.dims = self.backend.size()?;
        self.backend.enter_managed()?;
        self.managed = true;

        info!(
            "terminal session opened: host={}, {}x{}",
            caps.host, self.dims.0, self.dims.1
        );
        self.caps = Some(caps);
        Ok(())
    }

    /// Leave managed mode and restore the terminal. Idempotent, so the
    /// drop guard can call it again safely.
    pub fn close(&mut self) -> Result<()> {
        if !self.managed {
            return Ok(());
        }
        self.managed = false;
        self.backend.leave_managed()?;
        info!("terminal session closed");
        Ok(())
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Last known size as (columns, rows), updated on resize events
    pub fn dimensions(&self) -> (u16, u16) {
        self.dims
    }

    /// Host capabilities, available once the session has been opened
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.caps.as_ref()
    }

    /// Wait up to `timeout` for the next input event.
    ///
    /// Resize events refresh the cached dimensions before delivery.
    pub fn poll_event(&mut self, timeout: Duration) -> Result<Option<InputEvent>> {
        let event = self.backend.poll_event(timeout)?;
        if let Some(InputEvent::Resize(cols, rows)) = event {
            self.dims = (cols, rows);
            debug!("terminal resized to {}x{}", cols, rows);
        }
        Ok(event)
    }

    /// Write lines into a region, clipping to the region and to the
    /// screen. Lines are cut at the last character whose display width
    /// still fits; a control character ends its line early. Writes are
    /// queued, visible after [`flush`](Self::flush).
    pub fn write(&mut self, region: ScreenRegion, lines: &[String]) -> Result<()> {
        if !self.managed {
            return Ok(());
        }

        let (cols, rows) = self.dims;
        if region.x >= cols || region.width == 0 {
            return Ok(());
        }
        let max_width = region.width.min(cols - region.x) as usize;

        for (i, line) in lines.iter().take(region.height as usize).enumerate() {
            let y = region.y.saturating_add(i as u16);
            if y >= rows {
                break;
            }
            let clipped = clip_width(line, max_width);
            if clipped.is_empty() {
                continue;
            }
            self.backend.write_at(region.x, y, clipped)?;
        }
        Ok(())
    }

    /// Queue a full-screen clear
    pub fn clear(&mut self) -> Result<()> {
        if !self.managed {
            return Ok(());
        }
        self.backend.clear()?;
        Ok(())
    }

    /// Push queued output to the device
    pub fn flush(&mut self) -> Result<()> {
        self.backend.flush()?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Cut `text` at the last char boundary whose accumulated display
/// width still fits in `max_width` columns
fn clip_width(text: &str, max_width: usize) -> &str {
    let mut width = 0;
    for (idx, ch) in text.char_indices() {
        if ch.is_control() {
            return &text[..idx];
        }
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width > max_width {
            return &text[..idx];
        }
        width += ch_width;
    }
    text
}
