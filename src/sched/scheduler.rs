//! Scheduler and terminal multiplexer
//!
//! The scheduler owns the terminal session, the registration table and
//! the single receiving end of the draw channel. All screen access is
//! serialized through its pump loop: application threads only send
//! draw commands, the pump decides what reaches the device. Exactly
//! one application holds focus; it receives input and draws live,
//! while everyone else's output is buffered until focus returns.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::{AppId, Application, DrawCommand, ScreenDims};
use crate::config::{Config, KeyCombo};
use crate::error::{Result, RuntimeError};
use crate::lifecycle::LifecycleState;
use crate::logging::{LogSink, TracingSink};
use crate::sched::slot::AppSlot;
use crate::term::{InputEvent, TerminalSession};

/// Runs registered applications over one terminal session.
///
/// `run_single` drives one application with no multiplexing overhead;
/// `run_all` starts every registered application and multiplexes the
/// screen and input between them until all have finished. Both restore
/// the terminal before returning, whatever happened inside.
pub struct Scheduler {
    session: TerminalSession,
    config: Config,
    focus_switch: KeyCombo,
    slots: HashMap<AppId, AppSlot>,
    /// Registration order; drives focus cycling
    order: Vec<AppId>,
    focused: Option<AppId>,
    next_app_id: AppId,
    draw_tx: Sender<DrawCommand>,
    draw_rx: Receiver<DrawCommand>,
    dims: Arc<ScreenDims>,
    sink: Arc<dyn LogSink>,
}

impl Scheduler {
    pub fn new(session: TerminalSession, config: Config) -> Self {
        Self::with_sink(session, config, Arc::new(TracingSink))
    }

    /// Scheduler handing `sink` to every application it registers
    pub fn with_sink(session: TerminalSession, config: Config, sink: Arc<dyn LogSink>) -> Self {
        let (draw_tx, draw_rx) = mpsc::channel();
        let focus_switch = config.focus_switch_combo();
        Self {
            session,
            config,
            focus_switch,
            slots: HashMap::new(),
            order: Vec::new(),
            focused: None,
            next_app_id: 1,
            draw_tx,
            draw_rx,
            dims: Arc::new(ScreenDims::new(0, 0)),
            sink,
        }
    }

    /// Register an application under its own name.
    ///
    /// Names must be non-empty and unique for the lifetime of this
    /// scheduler; a duplicate is rejected and the existing registration
    /// stays untouched.
    pub fn register(&mut self, app: Box<dyn Application>) -> Result<()> {
        self.register_inner(app).map(|_| ())
    }

    fn register_inner(&mut self, app: Box<dyn Application>) -> Result<AppId> {
        let name = app.name().to_string();
        if name.is_empty() {
            return Err(RuntimeError::EmptyName);
        }
        if self.slots.values().any(|slot| slot.controller.name() == name) {
            return Err(RuntimeError::DuplicateName(name));
        }

        let id = self.next_app_id;
        self.next_app_id += 1;

        let controller = crate::lifecycle::LifecycleController::new(
            app,
            id,
            Arc::clone(&self.sink),
            self.draw_tx.clone(),
            Arc::clone(&self.dims),
        );
        self.slots.insert(id, AppSlot::new(controller));
        self.order.push(id);
        info!("registered application '{}'", name);
        Ok(id)
    }

    /// Number of registered applications
    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Names in registration order
    pub fn registered_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| slot.controller.name())
            .collect()
    }

    /// Lifecycle state of a registered application
    pub fn state_of(&self, name: &str) -> Option<LifecycleState> {
        self.slot_by_name(name).map(|slot| slot.controller.state())
    }

    /// Failure message of a registered application, if it failed
    pub fn failure_of(&self, name: &str) -> Option<String> {
        self.slot_by_name(name)
            .and_then(|slot| slot.controller.failure())
    }

    /// Name of the currently focused application
    pub fn focused_name(&self) -> Option<&str> {
        self.focused
            .and_then(|id| self.slots.get(&id))
            .map(|slot| slot.controller.name())
    }

    /// Register `app` and run it alone until it finishes.
    ///
    /// The single application is focused unconditionally and its draws
    /// go straight to the screen; none of the multiplexing machinery
    /// sits in the path. The terminal is restored before returning.
    pub fn run_single(&mut self, app: Box<dyn Application>) -> Result<()> {
        let id = self.register_inner(app)?;

        self.session.open()?;
        let (cols, rows) = self.session.dimensions();
        self.dims.set(cols, rows);

        let mut result = self.start_app(id);
        if result.is_ok() {
            self.focused = Some(id);
            result = self.pump_single(id);
        }

        let shutdown = self.shutdown();
        result.and(shutdown)
    }

    /// Start every registered application and multiplex until all of
    /// them reach a terminal state.
    ///
    /// Focus starts on the first registered application. The configured
    /// focus-switch combination cycles focus in registration order,
    /// wrapping around and skipping finished applications; when the
    /// focused application finishes, focus advances automatically. The
    /// terminal is restored before returning.
    pub fn run_all(&mut self) -> Result<()> {
        if self.order.is_empty() {
            debug!("run_all invoked with no registered applications");
            return Ok(());
        }

        self.session.open()?;
        let (cols, rows) = self.session.dimensions();
        self.dims.set(cols, rows);

        let mut result = self.start_all();
        if result.is_ok() {
            self.focused = self.order.first().copied();
            if let Some(name) = self.focused_name() {
                debug!("initial focus -> '{}'", name);
            }
            result = self.pump_multi();
        }

        let shutdown = self.shutdown();
        result.and(shutdown)
    }

    /// Stop everything, wait out the grace period per application, and
    /// release the terminal.
    ///
    /// An application that ignores its stop request is logged and
    /// abandoned; restoration happens regardless.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.order.is_empty() {
            info!("shutting down {} application(s)", self.order.len());
        }

        let ids = self.order.clone();
        for id in &ids {
            if let Some(slot) = self.slots.get(id) {
                slot.controller.stop();
            }
        }

        let grace = self.config.stop_grace();
        for id in &ids {
            if let Some(slot) = self.slots.get_mut(id) {
                match slot.controller.join(grace) {
                    Ok(state) => {
                        debug!(
                            "application '{}' settled as {:?}",
                            slot.controller.name(),
                            state
                        );
                    }
                    Err(RuntimeError::StopTimeout(name)) => {
                        warn!(
                            "application '{}' did not stop within {:?}, abandoning it",
                            name, grace
                        );
                    }
                    Err(err) => warn!("join failed: {}", err),
                }
            }
        }

        self.focused = None;
        self.session.close()
    }

    fn start_app(&mut self, id: AppId) -> Result<()> {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.controller.start()?;
        }
        Ok(())
    }

    fn start_all(&mut self) -> Result<()> {
        let ids = self.order.clone();
        for id in ids {
            self.start_app(id)?;
        }
        Ok(())
    }

    /// Event pump for `run_single`: drain this application's draws
    /// straight to the screen, feed it input, stop when it stops.
    fn pump_single(&mut self, id: AppId) -> Result<()> {
        let poll_timeout = self.config.poll_timeout();
        loop {
            self.flush_direct(id)?;

            if !self.is_live(id) {
                break;
            }

            match self.session.poll_event(poll_timeout)? {
                Some(InputEvent::Resize(cols, rows)) => {
                    self.dims.set(cols, rows);
                    self.route_input(InputEvent::Resize(cols, rows));
                }
                Some(event) => self.route_input(event),
                None => {}
            }
        }
        self.flush_direct(id)?;
        self.sweep_finished()?;
        Ok(())
    }

    /// Event pump for `run_all`: route draws by focus, watch for the
    /// focus-switch combination, and keep going while anyone is alive.
    fn pump_multi(&mut self) -> Result<()> {
        let poll_timeout = self.config.poll_timeout();
        loop {
            self.drain_output()?;
            self.sweep_finished()?;

            if !self.any_live() {
                info!("all applications finished");
                break;
            }

            match self.session.poll_event(poll_timeout)? {
                Some(InputEvent::Key(key)) if self.focus_switch.matches(&key) => {
                    self.advance_focus()?;
                }
                Some(InputEvent::Resize(cols, rows)) => {
                    self.dims.set(cols, rows);
                    self.route_input(InputEvent::Resize(cols, rows));
                }
                Some(event) => self.route_input(event),
                None => {}
            }
        }
        self.drain_output()?;
        Ok(())
    }

    /// Drain the draw channel, writing the focused application's
    /// output to the screen and buffering everyone else's.
    fn drain_output(&mut self) -> Result<()> {
        let mut wrote = false;
        loop {
            match self.draw_rx.try_recv() {
                Ok(cmd) => {
                    if Some(cmd.app) == self.focused {
                        self.session.write(cmd.region, &cmd.lines)?;
                        wrote = true;
                    } else if let Some(slot) = self.slots.get_mut(&cmd.app) {
                        slot.pending.push((cmd.region, cmd.lines));
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if wrote {
            self.session.flush()?;
        }
        Ok(())
    }

    /// Single-application fast path with no routing table in between
    fn flush_direct(&mut self, id: AppId) -> Result<()> {
        let mut wrote = false;
        loop {
            match self.draw_rx.try_recv() {
                Ok(cmd) if cmd.app == id => {
                    self.session.write(cmd.region, &cmd.lines)?;
                    wrote = true;
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if wrote {
            self.session.flush()?;
        }
        Ok(())
    }

    /// Note newly finished applications and move focus off dead ones
    fn sweep_finished(&mut self) -> Result<()> {
        let ids = self.order.clone();
        for id in ids {
            if let Some(slot) = self.slots.get_mut(&id) {
                let state = slot.controller.state();
                if slot.swept || !state.is_terminal() {
                    continue;
                }
                slot.swept = true;
                // Buffered output of a finished application will never
                // be replayed
                slot.pending.clear();
                match state {
                    LifecycleState::Failed => {
                        warn!(
                            "application '{}' failed, others continue: {}",
                            slot.controller.name(),
                            slot.controller.failure().unwrap_or_default()
                        );
                    }
                    _ => debug!("application '{}' finished", slot.controller.name()),
                }
            }
        }

        if let Some(id) = self.focused {
            if !self.is_live(id) {
                let next = self.next_live_after(Some(id));
                self.set_focus(next)?;
            }
        }
        Ok(())
    }

    /// Move focus to the next live application in registration order
    fn advance_focus(&mut self) -> Result<()> {
        let next = self.next_live_after(self.focused);
        if next != self.focused {
            self.set_focus(next)?;
        }
        Ok(())
    }

    /// Give `id` the screen: clear, replay its buffered output in
    /// issue order, flush.
    fn set_focus(&mut self, id: Option<AppId>) -> Result<()> {
        self.focused = id;
        if let Some(id) = id {
            self.session.clear()?;
            let pending = match self.slots.get_mut(&id) {
                Some(slot) => std::mem::take(&mut slot.pending),
                None => Vec::new(),
            };
            for (region, lines) in &pending {
                self.session.write(*region, lines)?;
            }
            self.session.flush()?;
            if let Some(name) = self.focused_name() {
                debug!("focus -> '{}'", name);
            }
        } else {
            debug!("focus cleared, no live applications");
        }
        Ok(())
    }

    /// Next live id after `current` in registration order, wrapping
    /// around; `None` when nothing is live.
    fn next_live_after(&self, current: Option<AppId>) -> Option<AppId> {
        if self.order.is_empty() {
            return None;
        }
        let start = current
            .and_then(|id| self.order.iter().position(|&x| x == id))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        for offset in 0..self.order.len() {
            let id = self.order[(start + offset) % self.order.len()];
            if self.is_live(id) {
                return Some(id);
            }
        }
        None
    }

    /// Deliver input to the focused application; with nothing focused,
    /// input is discarded.
    fn route_input(&mut self, event: InputEvent) {
        if let Some(id) = self.focused {
            if let Some(slot) = self.slots.get(&id) {
                slot.controller.send_input(event);
            }
        }
    }

    fn is_live(&self, id: AppId) -> bool {
        self.slots
            .get(&id)
            .map(|slot| !slot.controller.state().is_terminal())
            .unwrap_or(false)
    }

    fn any_live(&self) -> bool {
        self.order.iter().any(|&id| self.is_live(id))
    }

    fn slot_by_name(&self, name: &str) -> Option<&AppSlot> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id))
            .find(|slot| slot.controller.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use crate::term::TestBackend;

    struct NamedApp {
        name: String,
    }

    impl NamedApp {
        fn boxed(name: &str) -> Box<dyn Application> {
            Box::new(Self {
                name: name.to_string(),
            })
        }
    }

    impl Application for NamedApp {
        fn name(&self) -> &str {
            &self.name
        }
        fn run(&mut self, _ctx: &mut AppContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn scheduler() -> (Scheduler, TestBackend) {
        let backend = TestBackend::new();
        let session = TerminalSession::new(Box::new(backend.clone()));
        (Scheduler::new(session, Config::default()), backend)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (mut sched, _backend) = scheduler();
        sched.register(NamedApp::boxed("worker")).unwrap();

        match sched.register(NamedApp::boxed("worker")) {
            Err(RuntimeError::DuplicateName(name)) => assert_eq!(name, "worker"),
            other => panic!("expected DuplicateName, got {:?}", other),
        }

        // The first registration is untouched
        assert_eq!(sched.count(), 1);
        assert_eq!(sched.state_of("worker"), Some(LifecycleState::Created));
    }

    #[test]
    fn test_empty_name_rejected() {
        let (mut sched, _backend) = scheduler();
        assert!(matches!(
            sched.register(NamedApp::boxed("")),
            Err(RuntimeError::EmptyName)
        ));
        assert_eq!(sched.count(), 0);
    }

    #[test]
    fn test_names_keep_registration_order() {
        let (mut sched, _backend) = scheduler();
        sched.register(NamedApp::boxed("alpha")).unwrap();
        sched.register(NamedApp::boxed("beta")).unwrap();
        sched.register(NamedApp::boxed("gamma")).unwrap();
        assert_eq!(sched.registered_names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_focus_cycling_wraps_in_registration_order() {
        let (mut sched, _backend) = scheduler();
        let a = sched.register_inner(NamedApp::boxed("a")).unwrap();
        let b = sched.register_inner(NamedApp::boxed("b")).unwrap();
        let c = sched.register_inner(NamedApp::boxed("c")).unwrap();

        assert_eq!(sched.next_live_after(None), Some(a));
        assert_eq!(sched.next_live_after(Some(a)), Some(b));
        assert_eq!(sched.next_live_after(Some(b)), Some(c));
        assert_eq!(sched.next_live_after(Some(c)), Some(a));
    }

    #[test]
    fn test_run_all_without_registrations_is_a_no_op() {
        let (mut sched, backend) = scheduler();
        sched.run_all().unwrap();
        assert_eq!(backend.enter_count(), 0);
    }

    #[test]
    fn test_shutdown_settles_never_started_applications() {
        let (mut sched, backend) = scheduler();
        sched.register(NamedApp::boxed("one")).unwrap();
        sched.register(NamedApp::boxed("two")).unwrap();

        sched.shutdown().unwrap();

        assert_eq!(sched.state_of("one"), Some(LifecycleState::Stopped));
        assert_eq!(sched.state_of("two"), Some(LifecycleState::Stopped));
        assert_eq!(sched.focused_name(), None);
        // The session was never opened, so nothing was entered or left
        assert_eq!(backend.enter_count(), 0);
        assert_eq!(backend.leave_count(), 0);
    }
}
