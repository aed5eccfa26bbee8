//! Application contract
//!
//! An application is anything that implements [`Application`]: a named
//! body of work that runs on its own thread, draws through the runtime
//! instead of owning the screen, and stops when asked. The runtime
//! hands `run` an [`AppContext`] carrying everything the application
//! may touch: the stop signal, its input queue, a screen handle and a
//! log sink. There is no other sanctioned way to reach the terminal.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::Level;
use unicode_width::UnicodeWidthStr;

use crate::lifecycle::LifecycleShared;
use crate::logging::LogSink;
use crate::term::{InputEvent, ScreenRegion};

/// Identifier assigned to an application at registration. Never reused
/// within one scheduler.
pub type AppId = u64;

/// A terminal-resident application managed by the runtime.
///
/// Implementations must uphold the cooperative contract:
///
/// - `run` is invoked exactly once, on a dedicated thread.
/// - The body checks [`AppContext::should_run`] regularly and returns
///   promptly (within ~100ms) once it reports false.
/// - All screen output goes through [`AppContext::draw`]; diagnostics
///   go through [`AppContext::log`]. Printing to stdout or stderr
///   corrupts the shared screen.
/// - Returning `Ok(())` means a clean exit; returning `Err` marks the
///   application as failed without affecting its neighbors.
pub trait Application: Send {
    /// Name of this application. Fixed for the application's lifetime
    /// and unique within one scheduler.
    fn name(&self) -> &str;

    /// Main body, driven until it observes a stop request
    fn run(&mut self, ctx: &mut AppContext) -> anyhow::Result<()>;
}

/// Cooperative cancellation signal.
///
/// Cloned freely; all clones observe the same flag. Once cancelled it
/// stays cancelled.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    cancelled: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One routed draw request: the issuing application plus its write
pub(crate) struct DrawCommand {
    pub app: AppId,
    pub region: ScreenRegion,
    pub lines: Vec<String>,
}

/// Shared screen dimensions, refreshed by the scheduler on resize
pub(crate) struct ScreenDims {
    cols: AtomicU16,
    rows: AtomicU16,
}

impl ScreenDims {
    pub(crate) fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: AtomicU16::new(cols),
            rows: AtomicU16::new(rows),
        }
    }

    pub(crate) fn get(&self) -> (u16, u16) {
        (
            self.cols.load(Ordering::SeqCst),
            self.rows.load(Ordering::SeqCst),
        )
    }

    pub(crate) fn set(&self, cols: u16, rows: u16) {
        self.cols.store(cols, Ordering::SeqCst);
        self.rows.store(rows, Ordering::SeqCst);
    }
}

/// Application-side screen handle. Draws travel over the scheduler's
/// channel, so only the scheduler thread ever touches the device.
pub(crate) struct ScreenHandle {
    app: AppId,
    tx: Sender<DrawCommand>,
    dims: Arc<ScreenDims>,
}

impl ScreenHandle {
    pub(crate) fn new(app: AppId, tx: Sender<DrawCommand>, dims: Arc<ScreenDims>) -> Self {
        Self { app, tx, dims }
    }
}

/// Capabilities handed to an application body for its whole run
pub struct AppContext {
    shared: Arc<LifecycleShared>,
    input: Receiver<InputEvent>,
    screen: ScreenHandle,
    sink: Arc<dyn LogSink>,
}

impl AppContext {
    pub(crate) fn new(
        shared: Arc<LifecycleShared>,
        input: Receiver<InputEvent>,
        screen: ScreenHandle,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            shared,
            input,
            screen,
            sink,
        }
    }

    /// Name this application was registered under
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Whether the body should keep running. The main loop condition.
    pub fn should_run(&self) -> bool {
        !self.shared.token().is_cancelled()
    }

    /// Clone of the cancellation token, for helper threads the
    /// application spawns itself
    pub fn stop_token(&self) -> StopToken {
        self.shared.token().clone()
    }

    /// Ask the runtime to stop this application. `should_run` reports
    /// false from here on; the body is expected to return soon after.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Wait up to `timeout` for the next input event routed to this
    /// application. Only the focused application receives input, so an
    /// unfocused one simply times out.
    pub fn poll_input(&self, timeout: Duration) -> Option<InputEvent> {
        match self.input.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Queue lines for display in a screen region.
    ///
    /// While this application is focused the write reaches the screen
    /// on the scheduler's next pump cycle; while unfocused it is
    /// buffered and replayed when focus returns.
    pub fn draw(&self, region: ScreenRegion, lines: Vec<String>) {
        let _ = self.screen.tx.send(DrawCommand {
            app: self.screen.app,
            region,
            lines,
        });
    }

    /// Convenience for a single line at a position
    pub fn print_at(&self, x: u16, y: u16, text: &str) {
        let width = u16::try_from(UnicodeWidthStr::width(text)).unwrap_or(u16::MAX);
        self.draw(
            ScreenRegion::new(x, y, width.max(1), 1),
            vec![text.to_string()],
        );
    }

    /// Current screen size as (columns, rows)
    pub fn dimensions(&self) -> (u16, u16) {
        self.screen.dims.get()
    }

    /// Emit a leveled text record to the runtime's log sink
    pub fn log(&self, level: Level, message: &str) {
        self.sink.record(level, message);
    }
}
