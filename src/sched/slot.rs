//! Registered application slot

use crate::lifecycle::LifecycleController;
use crate::term::ScreenRegion;

/// One registered application: its lifecycle controller plus the
/// output queued while the application is unfocused.
pub(crate) struct AppSlot {
    pub controller: LifecycleController,
    /// Draw operations issued while unfocused, replayed in issue order
    /// when focus returns
    pub pending: Vec<(ScreenRegion, Vec<String>)>,
    /// Whether the pump has already noted this slot's terminal state
    pub swept: bool,
}

impl AppSlot {
    pub fn new(controller: LifecycleController) -> Self {
        Self {
            controller,
            pending: Vec::new(),
            swept: false,
        }
    }
}
