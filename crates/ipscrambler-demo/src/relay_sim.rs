//! In-process stand-in for the relay service.
//!
//! Receives commands on its own thread and answers with the same broadcasts
//! the real service sends, including the early ON that arrives before any
//! traffic.

use crossbeam_channel::{unbounded, Receiver, Sender};
use ipscrambler::{
    EventIntake, LinkError, NotificationSource, ServiceCommand, ServiceEvent, ServiceLink, Status,
    TrafficSample, EXTRA_STATUS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

const NOTIFY_ID: i32 = 1;
const HTTP_PORT: i32 = 8118;
const SOCKS_PORT: i32 = 9050;

/// Shared state between the link, the notification view and the worker
#[derive(Default)]
struct RelayState {
    running: AtomicBool,
    intake: Mutex<Option<EventIntake>>,
}

impl RelayState {
    fn emit(&self, event: ServiceEvent) {
        if let Ok(guard) = self.intake.lock() {
            if let Some(intake) = guard.as_ref() {
                intake.submit(event);
            }
        }
    }

    fn status(&self) -> Status {
        if self.running.load(Ordering::Relaxed) {
            Status::On
        } else {
            Status::Off
        }
    }
}

/// Simulated relay service
pub struct SimulatedRelay {
    state: Arc<RelayState>,
    commands: Sender<ServiceCommand>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedRelay {
    /// Spawn the relay worker. `samples` bandwidth reports follow each start.
    pub fn spawn(samples: u32, tick: Duration) -> std::io::Result<Self> {
        let state = Arc::new(RelayState::default());
        let (tx, rx) = unbounded();

        let worker_state = state.clone();
        let worker = thread::Builder::new()
            .name("relay-sim".to_string())
            .spawn(move || run_relay(worker_state, rx, samples, tick))?;

        Ok(Self {
            state,
            commands: tx,
            worker: Some(worker),
        })
    }

    /// Deliver broadcasts to this intake from now on
    pub fn attach(&self, intake: EventIntake) {
        if let Ok(mut guard) = self.state.intake.lock() {
            *guard = Some(intake);
        }
    }

    pub fn link(&self) -> Arc<dyn ServiceLink> {
        Arc::new(RelayLink(self.commands.clone()))
    }

    pub fn notifications(&self) -> Arc<dyn NotificationSource> {
        Arc::new(RelayNotifications(self.state.clone()))
    }

    /// Wait for the worker to exit. Every link handed out must be dropped first.
    pub fn join(mut self) {
        drop(self.commands);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct RelayLink(Sender<ServiceCommand>);

impl ServiceLink for RelayLink {
    fn send(&self, command: ServiceCommand) -> Result<(), LinkError> {
        self.0
            .send(command)
            .map_err(|_| LinkError::Unavailable("relay simulator exited".into()))
    }
}

struct RelayNotifications(Arc<RelayState>);

impl NotificationSource for RelayNotifications {
    fn active_notification_ids(&self) -> Vec<i32> {
        if self.0.running.load(Ordering::Relaxed) {
            vec![NOTIFY_ID]
        } else {
            Vec::new()
        }
    }
}

fn run_relay(state: Arc<RelayState>, rx: Receiver<ServiceCommand>, samples: u32, tick: Duration) {
    let mut written: i64 = 0;
    let mut read: i64 = 0;

    while let Ok(command) = rx.recv() {
        debug!("Relay simulator received {:?}", command);
        match command {
            ServiceCommand::Start => {
                state.running.store(true, Ordering::Relaxed);
                state.emit(ServiceEvent::log("Starting relay").with(EXTRA_STATUS, "STARTING"));
                thread::sleep(tick);
                state.emit(ServiceEvent::ports(HTTP_PORT, SOCKS_PORT));
                state.emit(ServiceEvent::log("Bootstrapped 100%: Done").with(EXTRA_STATUS, "ON"));

                for i in 1..=i64::from(samples) {
                    thread::sleep(tick);
                    let upload = 1_500 * i;
                    let download = 9_000 * i;
                    written += upload;
                    read += download;
                    let sample = TrafficSample::new(upload, download, written, read);
                    state.emit(ServiceEvent::bandwidth(sample).with(EXTRA_STATUS, "ON"));
                }
            }
            ServiceCommand::StartRouting => {
                state.emit(ServiceEvent::log("Routing enabled"));
            }
            ServiceCommand::StopRouting => {
                state.emit(ServiceEvent::log("Routing disabled"));
            }
            ServiceCommand::Stop => {
                state.emit(ServiceEvent::log("Stopping relay").with(EXTRA_STATUS, "STOPPING"));
                thread::sleep(tick);
                state.running.store(false, Ordering::Relaxed);
                state.emit(ServiceEvent::log("Relay stopped").with(EXTRA_STATUS, "OFF"));
            }
            ServiceCommand::StatusQuery => {
                state.emit(ServiceEvent::status(state.status()));
            }
            ServiceCommand::SetExit(wrapped) => {
                let label = if wrapped.is_empty() { "any" } else { wrapped.as_str() };
                state.emit(ServiceEvent::log(&format!("Exit nodes set to {label}")));
            }
        }
    }

    info!("Relay simulator exited");
}
