//! Terminal backend abstraction
//!
//! [`TerminalBackend`] hides the physical console behind a small
//! contract so the session layer (and everything above it) can run
//! against the real terminal or a scripted double. [`CrosstermBackend`]
//! drives the process terminal through crossterm; [`TestBackend`]
//! replays scripted input and journals output for assertions.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
    tty::IsTty,
};

use super::caps::{CapFlags, Capabilities};
use super::event::{from_crossterm, InputEvent};

/// Contract between the session layer and a concrete terminal device.
///
/// Backends are driven from the scheduler thread only; `Send` is
/// required so a session can be handed across threads before the pump
/// starts.
pub trait TerminalBackend: Send {
    /// Whether an interactive terminal is attached
    fn is_interactive(&self) -> bool;

    /// Sniff what the host terminal can do
    fn capabilities(&self) -> Capabilities;

    /// Enter managed mode (raw input, alternate screen, mouse capture)
    fn enter_managed(&mut self) -> io::Result<()>;

    /// Leave managed mode, restoring the terminal as it was found
    fn leave_managed(&mut self) -> io::Result<()>;

    /// Wait up to `timeout` for the next input event
    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>>;

    /// Queue text at a cell position; visible after [`flush`](Self::flush)
    fn write_at(&mut self, x: u16, y: u16, text: &str) -> io::Result<()>;

    /// Queue a full-screen clear
    fn clear(&mut self) -> io::Result<()>;

    /// Push queued output to the device
    fn flush(&mut self) -> io::Result<()>;

    /// Current size as (columns, rows)
    fn size(&self) -> io::Result<(u16, u16)>;
}

/// Backend for the real process terminal
pub struct CrosstermBackend {
    out: io::Stdout,
}

impl CrosstermBackend {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for CrosstermBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalBackend for CrosstermBackend {
    fn is_interactive(&self) -> bool {
        self.out.is_tty()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::detect()
    }

    fn enter_managed(&mut self) -> io::Result<()> {
        // Disable Windows console Quick Edit mode to receive mouse events
        #[cfg(windows)]
        clear_quick_edit_mode();

        terminal::enable_raw_mode()?;

        execute!(
            self.out,
            EnterAlternateScreen,
            EnableMouseCapture,
            DisableLineWrap,
            Hide,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        Ok(())
    }

    fn leave_managed(&mut self) -> io::Result<()> {
        // Reset all attributes first
        let _ = execute!(self.out, ResetColor, SetAttribute(Attribute::Reset));

        // Show cursor
        let _ = execute!(self.out, Show);

        // Enable line wrap
        let _ = execute!(self.out, EnableLineWrap);

        // Disable mouse capture
        let _ = execute!(self.out, DisableMouseCapture);

        // Leave alternate screen
        let _ = execute!(self.out, LeaveAlternateScreen);

        // Flush output
        let _ = self.out.flush();

        // Disable raw mode - this is the most important part
        terminal::disable_raw_mode()?;

        Ok(())
    }

    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>> {
        if event::poll(timeout)? {
            return Ok(from_crossterm(event::read()?));
        }
        Ok(None)
    }

    fn write_at(&mut self, x: u16, y: u16, text: &str) -> io::Result<()> {
        queue!(self.out, MoveTo(x, y), Print(text))
    }

    fn clear(&mut self) -> io::Result<()> {
        queue!(self.out, Clear(ClearType::All))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn size(&self) -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

/// Disable Quick Edit mode on the Windows console input handle.
///
/// Quick Edit swallows mouse events for its own select-and-copy
/// handling, so crossterm never sees them until it is turned off.
#[cfg(windows)]
fn clear_quick_edit_mode() {
    use windows::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, ENABLE_EXTENDED_FLAGS,
        ENABLE_MOUSE_INPUT, ENABLE_QUICK_EDIT_MODE, ENABLE_WINDOW_INPUT, STD_INPUT_HANDLE,
    };

    unsafe {
        let handle = GetStdHandle(STD_INPUT_HANDLE).unwrap_or_default();
        let mut mode = CONSOLE_MODE(0);
        if GetConsoleMode(handle, &mut mode).is_ok() {
            let new_mode = CONSOLE_MODE(
                (mode.0 & !ENABLE_QUICK_EDIT_MODE.0)
                    | ENABLE_EXTENDED_FLAGS.0
                    | ENABLE_MOUSE_INPUT.0
                    | ENABLE_WINDOW_INPUT.0,
            );
            let _ = SetConsoleMode(handle, new_mode);
        }
    }
}

/// One journaled backend operation, in issue order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestOp {
    Enter,
    Leave,
    Write { x: u16, y: u16, text: String },
    Clear,
    Flush,
}

/// One scripted step for the test backend
#[derive(Clone, Debug)]
enum Scripted {
    Input(InputEvent),
    Wait(Duration),
}

#[derive(Debug)]
struct TestState {
    interactive: bool,
    managed: bool,
    size: (u16, u16),
    script: VecDeque<Scripted>,
    ops: Vec<TestOp>,
}

/// Scripted in-memory backend for driving the runtime without a console.
///
/// Clones share state: keep one handle in the test, give the other to
/// the session, then script input up front and inspect the op journal
/// after the run.
#[derive(Clone, Debug)]
pub struct TestBackend {
    state: Arc<Mutex<TestState>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::with_size(80, 24)
    }

    pub fn with_size(cols: u16, rows: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(TestState {
                interactive: true,
                managed: false,
                size: (cols, rows),
                script: VecDeque::new(),
                ops: Vec::new(),
            })),
        }
    }

    /// A backend with no interactive terminal attached
    pub fn detached() -> Self {
        let backend = Self::new();
        backend.lock().interactive = false;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, TestState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script an input event to be delivered by a later poll
    pub fn push_event(&self, event: InputEvent) {
        self.lock().script.push_back(Scripted::Input(event));
    }

    /// Script a pause before the next event, giving application
    /// threads time to react to what came before
    pub fn push_wait(&self, duration: Duration) {
        self.lock().script.push_back(Scripted::Wait(duration));
    }

    /// Full operation journal in issue order
    pub fn ops(&self) -> Vec<TestOp> {
        self.lock().ops.clone()
    }

    /// Journaled write texts only, in issue order
    pub fn writes(&self) -> Vec<String> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                TestOp::Write { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_managed(&self) -> bool {
        self.lock().managed
    }

    pub fn enter_count(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| **op == TestOp::Enter)
            .count()
    }

    pub fn leave_count(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| **op == TestOp::Leave)
            .count()
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalBackend for TestBackend {
    fn is_interactive(&self) -> bool {
        self.lock().interactive
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            host: "Test".to_string(),
            flags: CapFlags::COLOR_16 | CapFlags::MOUSE,
        }
    }

    fn enter_managed(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.managed = true;
        state.ops.push(TestOp::Enter);
        Ok(())
    }

    fn leave_managed(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.managed = false;
        state.ops.push(TestOp::Leave);
        Ok(())
    }

    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>> {
        let step = self.lock().script.pop_front();
        match step {
            Some(Scripted::Input(event)) => {
                if let InputEvent::Resize(cols, rows) = event {
                    self.lock().size = (cols, rows);
                }
                Ok(Some(event))
            }
            Some(Scripted::Wait(duration)) => {
                // Sleep without holding the lock so other handles can
                // journal writes meanwhile
                std::thread::sleep(duration);
                Ok(None)
            }
            None => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn write_at(&mut self, x: u16, y: u16, text: &str) -> io::Result<()> {
        self.lock().ops.push(TestOp::Write {
            x,
            y,
            text: text.to_string(),
        });
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.lock().ops.push(TestOp::Clear);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().ops.push(TestOp::Flush);
        Ok(())
    }

    fn size(&self) -> io::Result<(u16, u16)> {
        Ok(self.lock().size)
    }
}
