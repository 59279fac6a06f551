//! Ordered event dispatcher with panic isolation.
//!
//! Every relay event, every listener registration and every locally forced
//! status goes through one unbounded channel and is handled by a single
//! worker thread, in arrival order. State owned by the worker (status
//! machine, listener registry, proxy ports) is therefore never touched
//! concurrently.
//!
//! Callers on other threads read a published [`ControllerSnapshot`].

use crate::event::{EventKind, ProxyPorts, ServiceEvent};
use crate::listener::{panic_message, ListenerRef, ListenerRegistry};
use crate::relay::LogRelay;
use crate::status::{Status, StatusEvent, StatusMachine};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};

/// Messages handled by the dispatcher thread
pub(crate) enum Message {
    /// Raw event from the relay service
    Event(ServiceEvent),
    /// Status decided locally, applied as forced
    Force(Status),
    AddListener(ListenerRef),
    RemoveListener(ListenerRef),
    ClearListeners,
    /// Reply once every earlier message has been handled
    Flush(Sender<()>),
    Shutdown,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Event(e) => write!(f, "Event({})", e.action),
            Message::Force(s) => write!(f, "Force({})", s),
            Message::AddListener(_) => f.write_str("AddListener"),
            Message::RemoveListener(_) => f.write_str("RemoveListener"),
            Message::ClearListeners => f.write_str("ClearListeners"),
            Message::Flush(_) => f.write_str("Flush"),
            Message::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Read-only view of dispatcher state
#[derive(Debug, Clone, Default)]
pub struct ControllerSnapshot {
    pub status: Option<Status>,
    pub ports: ProxyPorts,
    pub log: LogRelay,
}

type SharedSnapshot = Arc<RwLock<ControllerSnapshot>>;

/// Entry point for relay service events
///
/// Cheap to clone and usable from any thread. Events are queued, never
/// handled inline.
#[derive(Clone)]
pub struct EventIntake {
    tx: Sender<Message>,
}

impl EventIntake {
    /// Queue an event
    pub fn submit(&self, event: ServiceEvent) {
        if self.tx.send(Message::Event(event)).is_err() {
            debug!("Dispatcher stopped, dropping relay event");
        }
    }

    /// Queue an event from its raw parts
    pub fn receive(&self, action: &str, payload: Map<String, Value>) {
        self.submit(ServiceEvent {
            action: action.to_string(),
            payload,
        });
    }
}

impl std::fmt::Debug for EventIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIntake")
            .field("queued", &self.tx.len())
            .finish()
    }
}

/// Single-consumer dispatcher
pub struct Dispatcher {
    tx: Sender<Message>,
    snapshot: SharedSnapshot,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl Dispatcher {
    /// Spawn the dispatcher thread
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(ControllerSnapshot::default()));

        let state = DispatchState::new(snapshot.clone());
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!("Dispatcher started");
                run_dispatch_loop(state, rx);
                info!("Dispatcher stopped");
            })?;
        let worker_id = worker.thread().id();

        Ok(Self {
            tx,
            snapshot,
            worker: Some(worker),
            worker_id,
        })
    }

    pub fn intake(&self) -> EventIntake {
        EventIntake {
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn post(&self, msg: Message) {
        if let Err(e) = self.tx.send(msg) {
            debug!("Dispatcher stopped, dropping {:?}", e.into_inner());
        }
    }

    /// Block until every message queued before this call is handled.
    ///
    /// Returns at once when called from the dispatcher thread itself.
    pub fn flush(&self) {
        if thread::current().id() == self.worker_id {
            warn!("flush() called from a listener callback, ignoring");
            return;
        }

        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(Message::Flush(reply_tx)).is_err() {
            return;
        }
        let _ = reply_rx.recv();
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read one field without cloning the log
    pub fn with_snapshot<T>(&self, f: impl FnOnce(&ControllerSnapshot) -> T) -> T {
        f(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Stop the worker after it drains the messages already queued
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = self.tx.send(Message::Shutdown);
        if thread::current().id() == self.worker_id {
            // Joining ourselves would deadlock; the loop exits on its own.
            return;
        }
        if worker.join().is_err() {
            error!("Dispatcher thread panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the dispatcher thread
struct DispatchState {
    machine: StatusMachine,
    listeners: ListenerRegistry,
    snapshot: SharedSnapshot,
}

impl DispatchState {
    fn new(snapshot: SharedSnapshot) -> Self {
        Self {
            machine: StatusMachine::new(),
            listeners: ListenerRegistry::new(),
            snapshot,
        }
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::Event(event) => self.handle_event(&event),
            Message::Force(status) => self.apply_status(StatusEvent::forced(status)),
            Message::AddListener(listener) => {
                if !self.listeners.add(listener) {
                    debug!("Listener already registered");
                }
            }
            Message::RemoveListener(listener) => {
                self.listeners.remove(&listener);
            }
            Message::ClearListeners => self.listeners.clear(),
            Message::Flush(reply) => {
                let _ = reply.send(());
            }
            // Handled by the loop
            Message::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: &ServiceEvent) {
        let kind = event.kind();
        debug!("Relay event {:?}", kind);

        match event.parsed_status() {
            Some(Ok(status)) => self.apply_status(StatusEvent::new(status, kind.source_action())),
            Some(Err(e)) => warn!("Can't parse relay service status: {}", e),
            None => {}
        }

        match kind {
            EventKind::Log => {
                if let Some(line) = event.log_line() {
                    self.write_snapshot(|s| s.log.push(line));
                    self.listeners.notify_log(line);
                }
            }
            EventKind::Bandwidth => self.listeners.notify_traffic(event.traffic()),
            EventKind::Ports => {
                let ports = event.proxy_ports();
                debug!("Proxy ports http={} socks={}", ports.http, ports.socks);
                self.write_snapshot(|s| s.ports = ports);
            }
            EventKind::Status | EventKind::Other => {}
        }
    }

    fn apply_status(&mut self, event: StatusEvent) {
        if let Some(status) = self.machine.apply(event) {
            self.write_snapshot(|s| s.status = Some(status));
            self.listeners.notify_status(status);
        }
    }

    fn write_snapshot(&self, f: impl FnOnce(&mut ControllerSnapshot)) {
        f(&mut self.snapshot.write().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Main dispatch loop.
fn run_dispatch_loop(mut state: DispatchState, rx: Receiver<Message>) {
    while let Ok(msg) = rx.recv() {
        if matches!(msg, Message::Shutdown) {
            debug!("Dispatcher received shutdown");
            break;
        }

        // Listener callbacks are guarded one by one; this catches the rest.
        let result = panic::catch_unwind(AssertUnwindSafe(|| state.handle(msg)));

        if let Err(panic_info) = result {
            error!("Panic during dispatch: {}", panic_message(&*panic_info));
        }
    }
}
