//! appmux - A lifecycle and scheduling runtime for terminal-resident
//! applications
//!
//! appmux lets several long-running applications share one terminal:
//! each gets its own thread, a managed lifecycle, and a turn at the
//! screen, while the runtime owns the device and keeps it restorable.
//!
//! # Features
//!
//! - **Managed terminal session**: Raw mode, alternate screen and
//!   mouse capture entered once and always restored, even on panic
//! - **Cooperative lifecycles**: Created, Running, StopRequested and
//!   the final Stopped/Failed states, driven by an explicit stop token
//! - **Failure isolation**: An application that errors or panics is
//!   marked Failed; its neighbors keep running
//! - **Focus multiplexing**: One focused application receives input
//!   and draws live; unfocused output is buffered and replayed
//! - **Host detection**: Capability sniffing for Windows Terminal,
//!   VSCode, Alacritty and friends
//! - **Test backend**: Scripted input and journaled output for driving
//!   the whole runtime without a console
//!
//! # Quick Start
//!
//! ```no_run
//! use appmux::{AppContext, Application, Config, Scheduler, TerminalSession};
//!
//! struct Hello;
//!
//! impl Application for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     fn run(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
//!         while ctx.should_run() {
//!             ctx.print_at(0, 0, "hello from appmux");
//!             if ctx.poll_input(std::time::Duration::from_millis(50)).is_some() {
//!                 ctx.request_stop();
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> appmux::Result<()> {
//!     let session = TerminalSession::stdio();
//!     let mut scheduler = Scheduler::new(session, Config::load());
//!     scheduler.run_single(Box::new(Hello))
//! }
//! ```
//!
//! With several applications registered, `run_all` multiplexes them:
//! the configured focus-switch combination (Ctrl+A by default) cycles
//! focus in registration order.

pub mod app;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod sched;
pub mod term;

pub use app::{AppContext, AppId, Application, StopToken};
pub use config::{Config, KeyCombo};
pub use error::{Result, RuntimeError};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use logging::{init_file_logging, Level, LogSink, MemorySink, TracingSink};
pub use sched::Scheduler;
pub use term::{
    CapFlags, Capabilities, CrosstermBackend, InputEvent, ScreenRegion, TerminalBackend,
    TerminalSession, TestBackend,
};
