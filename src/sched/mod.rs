//! Scheduling and multiplexing.
//!
//! - **scheduler**: The pump loop that owns the terminal session,
//!   routes input to the focused application and serializes draws
//! - **slot**: Per-registration bookkeeping (controller plus the
//!   buffer of unfocused output)

pub mod scheduler;
pub(crate) mod slot;

pub use scheduler::Scheduler;
