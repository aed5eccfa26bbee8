//! Terminal capability layer.
//!
//! Everything that touches the physical terminal lives here:
//!
//! - **backend**: Device contract plus the crossterm and test backends
//! - **caps**: Host terminal detection from the environment
//! - **event**: Input event model delivered to the scheduler
//! - **session**: Exclusive managed-mode handle over one backend
//!
//! The rest of the runtime never calls crossterm directly; it talks to
//! a [`TerminalSession`], which can just as well wrap a [`TestBackend`]
//! in a harness as the real console in production.

pub mod backend;
pub mod caps;
pub mod event;
pub mod session;

pub use backend::{CrosstermBackend, TerminalBackend, TestBackend, TestOp};
pub use caps::{CapFlags, Capabilities};
pub use event::InputEvent;
pub use session::{ScreenRegion, TerminalSession};
