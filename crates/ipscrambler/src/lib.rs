//! IP Scrambler - controller for an external anonymizing relay service
//!
//! The relay service runs as a separate long-lived process. It is driven
//! with fire-and-forget commands and reports back through asynchronous,
//! loosely typed broadcasts. This crate turns those broadcasts into a
//! debounced status stream and persists the routing configuration the
//! service reads.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ start/stop/query ┌──────────────┐       ┌───────────────────┐
//! │  Caller  │─────────────────▶│CommandSender │──────▶│                   │
//! │          │ app list / exit  ├──────────────┤       │   Relay service   │
//! │          │─────────────────▶│ ConfigStore  │──────▶│    (external)     │
//! │          │                  └──────┬───────┘       │                   │
//! │          │                    LivenessProbe        └─────────┬─────────┘
//! │          │                                                   │ broadcasts
//! │          │                  ┌──────────────┐       ┌─────────▼─────────┐
//! │ Listener │◀─────────────────│  Dispatcher  │◀──────│    EventIntake    │
//! └──────────┘  status/log/     │ (one thread) │       │   (any thread)    │
//!               traffic         └──────────────┘       └───────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Events are handled one at a time, in arrival order
//! - Listeners never see the same status twice in a row unless an
//!   explicit status query re-affirmed it
//! - STARTING only becomes ON once tunnel traffic is observed
//! - Configuration reads always reflect the last successful write

mod command;
mod config;
mod controller;
mod country;
mod dispatcher;
mod event;
mod listener;
mod liveness;
mod prefs;
mod relay;
mod settings;
mod status;

pub use command::{CommandSender, LinkError, ServiceCommand, ServiceLink};
pub use config::{ConfigError, ConfigStore, RoutingList};
pub use controller::{IpScrambler, ScramblerError};
pub use country::{available_locations, ExitCountry, InvalidExitCountry, EXIT_COUNTRIES};
pub use dispatcher::{ControllerSnapshot, Dispatcher, EventIntake};
pub use event::{
    EventKind, ProxyPorts, ServiceEvent, ACTION_BANDWIDTH, ACTION_LOG, ACTION_PORTS,
    ACTION_STATUS, EXTRA_DOWNLOAD, EXTRA_HTTP_PROXY_PORT, EXTRA_LOG, EXTRA_READ,
    EXTRA_SOCKS_PROXY_PORT, EXTRA_STATUS, EXTRA_UPLOAD, EXTRA_WRITTEN, UNKNOWN_PORT,
};
pub use listener::{ListenerRef, ListenerRegistry, ScramblerListener};
pub use liveness::{LivenessProbe, NotificationSource, DEFAULT_NOTIFICATION_ID};
pub use prefs::{
    FilePreferences, MemoryPreferences, PreferenceError, PreferenceStore, PREF_DNS_PORT,
    PREF_EXIT_NODES, PREF_START_ON_BOOT, PREF_TORIFIED_APPS, PREF_USE_VPN,
};
pub use relay::{LogRelay, TrafficSample};
pub use settings::{ScramblerSettings, SettingsError, DEFAULT_DNS_PORT};
pub use status::{SourceAction, Status, StatusEvent, StatusMachine, UnknownStatusValue};
