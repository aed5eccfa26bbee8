//! Input event model
//!
//! Events delivered by a terminal session to the scheduler, and from
//! there to whichever application holds focus.

use crossterm::event::{Event, KeyEvent, KeyEventKind, MouseEvent};

/// An input event observed on the managed terminal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press (release and repeat reports are filtered out)
    Key(KeyEvent),
    /// Mouse activity, already normalized by the backend
    Mouse(MouseEvent),
    /// The terminal was resized to (columns, rows)
    Resize(u16, u16),
}

/// Map a raw crossterm event into the runtime's input model.
///
/// Key events other than presses are dropped: Windows delivers release
/// and repeat reports that applications should never see. Focus and
/// paste events are dropped as well.
pub(crate) fn from_crossterm(event: Event) -> Option<InputEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(InputEvent::Key(key)),
        Event::Key(_) => None,
        Event::Mouse(mouse) => Some(InputEvent::Mouse(mouse)),
        Event::Resize(cols, rows) => Some(InputEvent::Resize(cols, rows)),
        _ => None,
    }
}
