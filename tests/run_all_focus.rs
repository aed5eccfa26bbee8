use std::sync::Arc;
use std::thread;
use std::time::Duration;

use appmux::term::TestOp;
use appmux::{
    AppContext, Application, Config, InputEvent, LifecycleState, MemorySink, Scheduler,
    TerminalSession, TestBackend,
};
use crossterm::event::{
    KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};

const SETTLE: Duration = Duration::from_millis(150);

fn scheduler_with(backend: &TestBackend) -> Scheduler {
    let session = TerminalSession::new(Box::new(backend.clone()));
    Scheduler::with_sink(session, Config::default(), Arc::new(MemorySink::new()))
}

fn key(c: char) -> InputEvent {
    InputEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
}

fn switch_combo() -> InputEvent {
    InputEvent::Key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL))
}

fn click() -> InputEvent {
    InputEvent::Mouse(MouseEvent {
        kind: MouseEventKind::Down(MouseButton::Left),
        column: 3,
        row: 1,
        modifiers: KeyModifiers::NONE,
    })
}

/// Announces itself, then echoes whatever input reaches it. `q` stops it.
struct EchoApp {
    name: String,
    row: u16,
}

impl EchoApp {
    fn boxed(name: &str, row: u16) -> Box<dyn Application> {
        Box::new(EchoApp {
            name: name.to_string(),
            row,
        })
    }
}

impl Application for EchoApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        ctx.print_at(0, self.row, &format!("{} ready", self.name));
        while ctx.should_run() {
            match ctx.poll_input(Duration::from_millis(20)) {
                Some(InputEvent::Key(event)) => match event.code {
                    KeyCode::Char('q') => ctx.request_stop(),
                    KeyCode::Char(c) => {
                        ctx.print_at(0, self.row, &format!("{}:{}", self.name, c));
                    }
                    _ => {}
                },
                Some(InputEvent::Mouse(_)) => {
                    ctx.print_at(0, self.row, &format!("{} mouse", self.name));
                }
                Some(InputEvent::Resize(_, _)) => {
                    let (cols, rows) = ctx.dimensions();
                    ctx.print_at(0, self.row, &format!("{} {}x{}", self.name, cols, rows));
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Announces itself and returns on its own shortly after
struct BriefApp;

impl Application for BriefApp {
    fn name(&self) -> &str {
        "early"
    }

    fn run(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        ctx.print_at(0, 0, "early ready");
        thread::sleep(Duration::from_millis(100));
        Ok(())
    }
}

#[test]
fn focus_cycles_through_applications_and_buffers_unfocused_output() {
    let backend = TestBackend::new();
    let mut scheduler = scheduler_with(&backend);

    scheduler.register(EchoApp::boxed("a", 1)).unwrap();
    scheduler.register(EchoApp::boxed("b", 2)).unwrap();
    scheduler.register(EchoApp::boxed("c", 3)).unwrap();

    backend.push_wait(SETTLE); // startup lines land, unfocused ones buffer
    backend.push_event(key('1')); // a
    backend.push_wait(SETTLE);
    backend.push_event(click()); // a
    backend.push_wait(SETTLE);
    backend.push_event(switch_combo()); // focus -> b
    backend.push_event(key('2'));
    backend.push_wait(SETTLE);
    backend.push_event(InputEvent::Resize(100, 40)); // b
    backend.push_wait(SETTLE);
    backend.push_event(switch_combo()); // focus -> c
    backend.push_event(key('3'));
    backend.push_wait(SETTLE);
    backend.push_event(switch_combo()); // wraps back to a
    backend.push_event(key('4'));
    backend.push_wait(SETTLE);
    backend.push_event(key('q')); // a exits, focus advances to b
    backend.push_wait(SETTLE);
    backend.push_event(key('q')); // b exits, focus advances to c
    backend.push_wait(SETTLE);
    backend.push_event(key('q')); // c exits, nothing left alive

    scheduler.run_all().unwrap();

    let expected: Vec<String> = [
        "a ready", "a:1", "a mouse", "b ready", "b:2", "b 100x40", "c ready", "c:3", "a:4",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(backend.writes(), expected);

    // b's startup line stayed buffered until the first focus change
    let ops = backend.ops();
    let first_clear = ops
        .iter()
        .position(|op| matches!(op, TestOp::Clear))
        .expect("focus change clears the screen");
    let b_ready = ops
        .iter()
        .position(|op| matches!(op, TestOp::Write { text, .. } if text == "b ready"))
        .expect("buffered line replays");
    assert!(first_clear < b_ready);

    // Three manual switches, then two automatic advances as a and b exit
    let clears = ops.iter().filter(|op| matches!(op, TestOp::Clear)).count();
    assert_eq!(clears, 5);

    for name in ["a", "b", "c"] {
        assert_eq!(scheduler.state_of(name), Some(LifecycleState::Stopped));
    }
    assert_eq!(scheduler.focused_name(), None);
    assert!(!backend.is_managed());
}

#[test]
fn focus_advances_to_next_live_application_when_the_focused_one_exits() {
    let backend = TestBackend::new();
    let mut scheduler = scheduler_with(&backend);

    scheduler.register(Box::new(BriefApp)).unwrap();
    scheduler.register(EchoApp::boxed("late", 1)).unwrap();
    assert_eq!(scheduler.registered_names(), vec!["early", "late"]);

    backend.push_wait(Duration::from_millis(300)); // early finishes on its own
    backend.push_event(key('q')); // goes to late, which now holds focus

    scheduler.run_all().unwrap();

    let expected: Vec<String> = ["early ready", "late ready"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(backend.writes(), expected);

    // The automatic advance cleared the screen before replaying late's line
    let ops = backend.ops();
    let clear = ops
        .iter()
        .position(|op| matches!(op, TestOp::Clear))
        .expect("advance clears the screen");
    let late_ready = ops
        .iter()
        .position(|op| matches!(op, TestOp::Write { text, .. } if text == "late ready"))
        .expect("late's buffered line replays");
    assert!(clear < late_ready);

    assert_eq!(scheduler.state_of("early"), Some(LifecycleState::Stopped));
    assert_eq!(scheduler.state_of("late"), Some(LifecycleState::Stopped));
    assert_eq!(scheduler.focused_name(), None);
}
