//! Application lifecycle control
//!
//! A [`LifecycleController`] owns one application instance from
//! construction to its terminal state: it spawns the run thread,
//! relays stop requests, waits for completion and records the outcome.
//! The state machine is strict; every transition goes through one
//! guarded choke point and anything outside the table is rejected.
//!
//! ```text
//! Created ──► Running ──► StopRequested ──► Stopped
//!    │           │              │
//!    │           ├──► Stopped   └──► Failed
//!    │           └──► Failed
//!    └──► StopRequested            (Stopped / Failed are final)
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn, Level};

use crate::app::{AppContext, AppId, Application, DrawCommand, ScreenDims, ScreenHandle, StopToken};
use crate::error::{Result, RuntimeError};
use crate::logging::LogSink;
use crate::term::InputEvent;

/// How often a join waiter re-reads the shared state
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Position in the lifecycle state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed and registered, not yet started
    Created,
    /// The run thread is executing the application body
    Running,
    /// A stop was requested; the body has not returned yet
    StopRequested,
    /// The body returned cleanly. Final.
    Stopped,
    /// The body returned an error or panicked. Final.
    Failed,
}

impl LifecycleState {
    /// Whether no further transitions are permitted
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    fn permits(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Created, StopRequested)
                | (Running, StopRequested)
                | (Running, Stopped)
                | (Running, Failed)
                | (StopRequested, Stopped)
                | (StopRequested, Failed)
        )
    }
}

/// State shared between a controller, the run thread it spawns, and
/// the application context
pub(crate) struct LifecycleShared {
    name: String,
    state: Mutex<LifecycleState>,
    token: StopToken,
    failure: Mutex<Option<String>>,
}

impl LifecycleShared {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new(LifecycleState::Created),
            token: StopToken::new(),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn token(&self) -> &StopToken {
        &self.token
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Guarded transition. The single place state is ever written.
    fn transition(&self, to: LifecycleState) -> Result<LifecycleState> {
        let mut state = self.lock_state();
        let from = *state;
        if !from.permits(to) {
            return Err(RuntimeError::InvalidTransition { from, to });
        }
        *state = to;
        Ok(from)
    }

    /// Request a cooperative stop. The token is always cancelled; the
    /// state moves to StopRequested at most once. Returns whether this
    /// call performed that transition.
    pub(crate) fn request_stop(&self) -> bool {
        self.token.cancel();
        let mut state = self.lock_state();
        match *state {
            LifecycleState::Created | LifecycleState::Running => {
                *state = LifecycleState::StopRequested;
                true
            }
            _ => false,
        }
    }

    /// Move Created to Running, refusing anything else
    fn begin_running(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state != LifecycleState::Created {
            return Err(RuntimeError::AlreadyStarted {
                name: self.name.clone(),
                state: *state,
            });
        }
        *state = LifecycleState::Running;
        Ok(())
    }

    /// Mark a clean exit. Returns the state the run left from, so the
    /// caller can tell a requested stop from a body that finished on
    /// its own.
    fn finish_ok(&self) -> Result<LifecycleState> {
        self.transition(LifecycleState::Stopped)
    }

    /// Mark a failed exit, retaining the failure message
    fn finish_failed(&self, message: String) -> Result<LifecycleState> {
        let from = self.transition(LifecycleState::Failed)?;
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
        Ok(from)
    }
}

/// Owns one application instance and its run thread.
///
/// Constructed by the scheduler at registration; `start` consumes the
/// application into a dedicated thread, `stop` requests a cooperative
/// stop, `join` waits for the terminal state with a deadline.
pub struct LifecycleController {
    shared: Arc<LifecycleShared>,
    app: Option<Box<dyn Application>>,
    sink: Arc<dyn LogSink>,
    id: AppId,
    draw_tx: Sender<DrawCommand>,
    dims: Arc<ScreenDims>,
    input_tx: Sender<InputEvent>,
    input_rx: Option<Receiver<InputEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl LifecycleController {
    pub(crate) fn new(
        app: Box<dyn Application>,
        id: AppId,
        sink: Arc<dyn LogSink>,
        draw_tx: Sender<DrawCommand>,
        dims: Arc<ScreenDims>,
    ) -> Self {
        let shared = Arc::new(LifecycleShared::new(app.name().to_string()));
        let (input_tx, input_rx) = mpsc::channel();
        Self {
            shared,
            app: Some(app),
            sink,
            id,
            draw_tx,
            dims,
            input_tx,
            input_rx: Some(input_rx),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Failure message, present once the state is Failed
    pub fn failure(&self) -> Option<String> {
        self.shared.failure()
    }

    /// Spawn the run thread and move to Running.
    ///
    /// Fails with [`RuntimeError::AlreadyStarted`] unless the
    /// application is still in Created.
    pub fn start(&mut self) -> Result<()> {
        let (mut app, input_rx) = match (self.app.take(), self.input_rx.take()) {
            (Some(app), Some(rx)) => (app, rx),
            _ => {
                return Err(RuntimeError::AlreadyStarted {
                    name: self.shared.name().to_string(),
                    state: self.shared.state(),
                })
            }
        };

        if let Err(err) = self.shared.begin_running() {
            self.app = Some(app);
            self.input_rx = Some(input_rx);
            return Err(err);
        }

        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&self.sink);
        let mut ctx = AppContext::new(
            Arc::clone(&self.shared),
            input_rx,
            ScreenHandle::new(self.id, self.draw_tx.clone(), Arc::clone(&self.dims)),
            Arc::clone(&self.sink),
        );

        let spawned = thread::Builder::new()
            .name(format!("app-{}", self.shared.name()))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| app.run(&mut ctx)));
                match outcome {
                    Ok(Ok(())) => match shared.finish_ok() {
                        Ok(LifecycleState::StopRequested) => {
                            info!("application '{}' stopped", shared.name());
                        }
                        Ok(_) => {
                            warn!(
                                "application '{}' returned without a stop request",
                                shared.name()
                            );
                        }
                        Err(err) => {
                            error!("application '{}' exit not recorded: {}", shared.name(), err);
                        }
                    },
                    Ok(Err(err)) => {
                        let message = format!("{:#}", err);
                        error!("application '{}' failed: {}", shared.name(), message);
                        sink.record(
                            Level::ERROR,
                            &format!("{} failed: {}", shared.name(), message),
                        );
                        let _ = shared.finish_failed(message);
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("application '{}' panicked: {}", shared.name(), message);
                        sink.record(
                            Level::ERROR,
                            &format!("{} panicked: {}", shared.name(), message),
                        );
                        let _ = shared.finish_failed(message);
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                info!("application '{}' started", self.shared.name());
                Ok(())
            }
            Err(err) => {
                let _ = self
                    .shared
                    .finish_failed(format!("thread spawn failed: {}", err));
                Err(RuntimeError::Io(err))
            }
        }
    }

    /// Request a cooperative stop. Idempotent; a no-op once the
    /// application has reached a terminal state.
    pub fn stop(&self) {
        if self.shared.request_stop() {
            info!("stop requested for application '{}'", self.shared.name());
        }
    }

    /// Wait until the application reaches a terminal state, polling
    /// the shared state every few milliseconds.
    ///
    /// Returns the terminal state, or [`RuntimeError::StopTimeout`]
    /// when the deadline passes first. An application that was stopped
    /// before ever starting settles to Stopped immediately.
    pub fn join(&mut self, timeout: Duration) -> Result<LifecycleState> {
        // Stopped before start: there is no thread to wait for
        if self.handle.is_none() && self.shared.state() == LifecycleState::StopRequested {
            let _ = self.shared.finish_ok();
            return Ok(self.shared.state());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let state = self.shared.state();
            if state.is_terminal() {
                if let Some(handle) = self.handle.take() {
                    // The body already wrote its terminal state; the
                    // thread is in teardown and this cannot block long
                    let _ = handle.join();
                }
                return Ok(state);
            }
            if Instant::now() >= deadline {
                return Err(RuntimeError::StopTimeout(self.shared.name().to_string()));
            }
            thread::sleep(JOIN_POLL);
        }
    }

    /// Deliver an input event to the application's queue. Returns
    /// false once the receiving side is gone.
    pub(crate) fn send_input(&self, event: InputEvent) -> bool {
        self.input_tx.send(event).is_ok()
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = self.handle.take() {
            if self.shared.state().is_terminal() {
                let _ = handle.join();
            }
            // A still-running thread is detached: cancellation is
            // cooperative and drop cannot wait on an arbitrary body
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct TickApp {
        ticks: Arc<AtomicU64>,
    }

    impl Application for TickApp {
        fn name(&self) -> &str {
            "tick"
        }
        fn run(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
            while ctx.should_run() {
                self.ticks.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    struct FailApp;

    impl Application for FailApp {
        fn name(&self) -> &str {
            "fail"
        }
        fn run(&mut self, _ctx: &mut AppContext) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    struct PanicApp;

    impl Application for PanicApp {
        fn name(&self) -> &str {
            "panic"
        }
        fn run(&mut self, _ctx: &mut AppContext) -> anyhow::Result<()> {
            panic!("kaboom");
        }
    }

    /// Ignores the stop token entirely until its private escape flag
    /// is raised
    struct StubbornApp {
        escape: Arc<AtomicBool>,
    }

    impl Application for StubbornApp {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn run(&mut self, _ctx: &mut AppContext) -> anyhow::Result<()> {
            while !self.escape.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    struct FinishApp;

    impl Application for FinishApp {
        fn name(&self) -> &str {
            "finish"
        }
        fn run(&mut self, _ctx: &mut AppContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct RecordInputApp {
        seen: Arc<Mutex<Vec<InputEvent>>>,
    }

    impl Application for RecordInputApp {
        fn name(&self) -> &str {
            "recorder"
        }
        fn run(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
            while ctx.should_run() {
                if let Some(event) = ctx.poll_input(Duration::from_millis(10)) {
                    self.seen.lock().unwrap().push(event);
                }
            }
            Ok(())
        }
    }

    fn controller_for(app: Box<dyn Application>) -> LifecycleController {
        let (draw_tx, _draw_rx) = mpsc::channel();
        let dims = Arc::new(ScreenDims::new(80, 24));
        LifecycleController::new(app, 1, Arc::new(MemorySink::new()), draw_tx, dims)
    }

    #[test]
    fn test_clean_stop_cycle() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut controller = controller_for(Box::new(TickApp {
            ticks: Arc::clone(&ticks),
        }));
        assert_eq!(controller.state(), LifecycleState::Created);

        controller.start().unwrap();
        assert_eq!(controller.state(), LifecycleState::Running);

        // Let the body demonstrably run
        while ticks.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        controller.stop();
        let state = controller.join(Duration::from_secs(2)).unwrap();
        assert_eq!(state, LifecycleState::Stopped);
        assert!(controller.failure().is_none());
    }

    #[test]
    fn test_start_twice_fails() {
        let ticks = Arc::new(AtomicU64::new(0));
        let mut controller = controller_for(Box::new(TickApp { ticks }));
        controller.start().unwrap();

        match controller.start() {
            Err(RuntimeError::AlreadyStarted { name, state }) => {
                assert_eq!(name, "tick");
                assert_eq!(state, LifecycleState::Running);
            }
            other => panic!("expected AlreadyStarted, got {:?}", other),
        }

        controller.stop();
        controller.join(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let shared = LifecycleShared::new("x".to_string());
        shared.transition(LifecycleState::Running).unwrap();
        assert!(shared.request_stop());
        assert!(!shared.request_stop());
        assert!(!shared.request_stop());
        assert_eq!(shared.state(), LifecycleState::StopRequested);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let shared = LifecycleShared::new("x".to_string());
        shared.transition(LifecycleState::Running).unwrap();
        shared.transition(LifecycleState::Stopped).unwrap();

        assert!(!shared.request_stop());
        assert_eq!(shared.state(), LifecycleState::Stopped);
        assert!(matches!(
            shared.begin_running(),
            Err(RuntimeError::AlreadyStarted { .. })
        ));
        assert!(matches!(
            shared.finish_failed("late".to_string()),
            Err(RuntimeError::InvalidTransition {
                from: LifecycleState::Stopped,
                to: LifecycleState::Failed,
            })
        ));
    }

    #[test]
    fn test_transition_table() {
        use LifecycleState::*;
        assert!(Created.permits(Running));
        assert!(Created.permits(StopRequested));
        assert!(Running.permits(StopRequested));
        assert!(Running.permits(Stopped));
        assert!(Running.permits(Failed));
        assert!(StopRequested.permits(Stopped));
        assert!(StopRequested.permits(Failed));

        assert!(!Created.permits(Stopped));
        assert!(!Created.permits(Failed));
        assert!(!StopRequested.permits(Running));
        assert!(!Stopped.permits(Running));
        assert!(!Stopped.permits(Failed));
        assert!(!Failed.permits(Running));
        assert!(!Failed.permits(Stopped));
    }

    #[test]
    fn test_error_exit_marks_failed() {
        let mut controller = controller_for(Box::new(FailApp));
        controller.start().unwrap();
        let state = controller.join(Duration::from_secs(2)).unwrap();
        assert_eq!(state, LifecycleState::Failed);
        assert!(controller.failure().unwrap().contains("boom"));
    }

    #[test]
    fn test_panic_marks_failed() {
        let mut controller = controller_for(Box::new(PanicApp));
        controller.start().unwrap();
        let state = controller.join(Duration::from_secs(2)).unwrap();
        assert_eq!(state, LifecycleState::Failed);
        assert!(controller.failure().unwrap().contains("kaboom"));
    }

    #[test]
    fn test_join_times_out_then_recovers() {
        let escape = Arc::new(AtomicBool::new(false));
        let mut controller = controller_for(Box::new(StubbornApp {
            escape: Arc::clone(&escape),
        }));
        controller.start().unwrap();
        controller.stop();

        match controller.join(Duration::from_millis(50)) {
            Err(RuntimeError::StopTimeout(name)) => assert_eq!(name, "stubborn"),
            other => panic!("expected StopTimeout, got {:?}", other),
        }

        escape.store(true, Ordering::SeqCst);
        let state = controller.join(Duration::from_secs(2)).unwrap();
        assert_eq!(state, LifecycleState::Stopped);
    }

    #[test]
    fn test_stop_before_start_settles_on_join() {
        let mut controller = controller_for(Box::new(FinishApp));
        controller.stop();
        assert_eq!(controller.state(), LifecycleState::StopRequested);

        let state = controller.join(Duration::from_millis(10)).unwrap();
        assert_eq!(state, LifecycleState::Stopped);

        assert!(matches!(
            controller.start(),
            Err(RuntimeError::AlreadyStarted { .. })
        ));
    }

    #[test]
    fn test_self_finishing_run_reaches_stopped() {
        let mut controller = controller_for(Box::new(FinishApp));
        controller.start().unwrap();
        let state = controller.join(Duration::from_secs(2)).unwrap();
        assert_eq!(state, LifecycleState::Stopped);
    }

    #[test]
    fn test_input_reaches_application() {
        use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut controller = controller_for(Box::new(RecordInputApp {
            seen: Arc::clone(&seen),
        }));
        controller.start().unwrap();

        let key = InputEvent::Key(KeyEvent::new(KeyCode::Char('z'), KeyModifiers::NONE));
        assert!(controller.send_input(key.clone()));

        // Wait for the application thread to pick the event up
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen.lock().unwrap().as_slice(), &[key]);

        controller.stop();
        controller.join(Duration::from_secs(2)).unwrap();
    }
}
