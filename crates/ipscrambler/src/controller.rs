//! IP scrambler controller
//!
//! Wires the dispatcher, command sender, configuration store and liveness
//! probe into the interface callers use.
//!
//! # Usage
//!
//! ```rust,ignore
//! let scrambler = IpScrambler::new(
//!     ScramblerSettings::default(),
//!     prefs,
//!     link,
//!     notifications,
//! )?;
//! scrambler.add_listener(ui.clone());
//!
//! // Hand relay broadcasts to the controller
//! let intake = scrambler.intake();
//! intake.submit(ServiceEvent::status(Status::Starting));
//!
//! scrambler.set_exit_country("DE")?;
//! scrambler.start()?;
//! ```

use crate::command::{CommandSender, ServiceLink};
use crate::config::{ConfigError, ConfigStore, RoutingList};
use crate::dispatcher::{Dispatcher, EventIntake, Message};
use crate::event::ProxyPorts;
use crate::listener::ListenerRef;
use crate::liveness::{LivenessProbe, NotificationSource};
use crate::prefs::{PreferenceError, PreferenceStore, PREF_DNS_PORT};
use crate::settings::ScramblerSettings;
use crate::status::Status;
use std::sync::Arc;
use tracing::info;

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ScramblerError {
    #[error("Failed to spawn dispatcher: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Controller for the external relay service
pub struct IpScrambler {
    settings: ScramblerSettings,
    dispatcher: Dispatcher,
    commands: CommandSender,
    config: ConfigStore,
    probe: LivenessProbe,
}

impl IpScrambler {
    /// Create a controller and start its dispatcher
    pub fn new(
        settings: ScramblerSettings,
        prefs: Arc<dyn PreferenceStore>,
        link: Arc<dyn ServiceLink>,
        notifications: Arc<dyn NotificationSource>,
    ) -> Result<Self, ScramblerError> {
        prefs.put_int(PREF_DNS_PORT, settings.dns_port)?;

        let probe = LivenessProbe::new(notifications, settings.notification_id);
        let commands = CommandSender::new(link, prefs.clone());
        let config = ConfigStore::new(
            prefs,
            commands.clone(),
            probe.clone(),
            settings.app_list_separator,
        );
        let dispatcher = Dispatcher::spawn(&settings.worker_name)?;

        info!("IP scrambler ready (notification id {})", settings.notification_id);

        Ok(Self {
            settings,
            dispatcher,
            commands,
            config,
            probe,
        })
    }

    /// Handle for delivering relay service events
    pub fn intake(&self) -> EventIntake {
        self.dispatcher.intake()
    }

    pub fn settings(&self) -> &ScramblerSettings {
        &self.settings
    }

    /// Start the relay service and its routing
    pub fn start(&self) -> Result<(), ScramblerError> {
        info!("Starting relay service");
        self.commands.start()?;
        Ok(())
    }

    /// Stop routing and terminate the relay service
    pub fn stop(&self) -> Result<(), ScramblerError> {
        info!("Stopping relay service");
        self.commands.stop()?;
        Ok(())
    }

    /// Refresh the status.
    ///
    /// A service that is not running cannot answer, so OFF is reported
    /// directly. Otherwise the answer arrives later as a status event.
    pub fn request_status(&self) {
        if self.probe.is_active() {
            self.commands.query_status();
        } else {
            self.dispatcher.post(Message::Force(Status::Off));
        }
    }

    pub fn is_service_active(&self) -> bool {
        self.probe.is_active()
    }

    pub fn app_list(&self) -> RoutingList {
        self.config.app_list()
    }

    pub fn set_app_list(&self, apps: &RoutingList) -> Result<(), ScramblerError> {
        self.config.set_app_list(apps)?;
        Ok(())
    }

    pub fn exit_country(&self) -> String {
        self.config.exit_country()
    }

    pub fn set_exit_country(&self, code: &str) -> Result<(), ScramblerError> {
        self.config.set_exit_country(code)?;
        Ok(())
    }

    pub fn available_locations(&self) -> Vec<String> {
        self.config.available_locations()
    }

    /// Last status accepted by the state machine
    pub fn status(&self) -> Option<Status> {
        self.dispatcher.with_snapshot(|s| s.status)
    }

    pub fn proxy_ports(&self) -> ProxyPorts {
        self.dispatcher.with_snapshot(|s| s.ports)
    }

    /// HTTP proxy port, -1 until the service reports it
    pub fn http_proxy_port(&self) -> i32 {
        self.proxy_ports().http
    }

    /// SOCKS proxy port, -1 until the service reports it
    pub fn socks_proxy_port(&self) -> i32 {
        self.proxy_ports().socks
    }

    /// Relay log, most recent line first
    pub fn log_history(&self) -> String {
        self.dispatcher.with_snapshot(|s| s.log.history().to_string())
    }

    pub fn add_listener(&self, listener: ListenerRef) {
        self.dispatcher.post(Message::AddListener(listener));
    }

    pub fn remove_listener(&self, listener: &ListenerRef) {
        self.dispatcher.post(Message::RemoveListener(listener.clone()));
    }

    pub fn clear_listeners(&self) {
        self.dispatcher.post(Message::ClearListeners);
    }

    /// Wait until everything queued so far has been dispatched
    pub fn flush(&self) {
        self.dispatcher.flush();
    }

    /// Stop receiving relay events
    pub fn shutdown(&mut self) {
        info!("Shutting down IP scrambler");
        self.dispatcher.shutdown();
    }
}

impl std::fmt::Debug for IpScrambler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpScrambler")
            .field("settings", &self.settings)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{RecordingLink, ServiceCommand};
    use crate::event::{ServiceEvent, EXTRA_STATUS};
    use crate::listener::ScramblerListener;
    use crate::prefs::{MemoryPreferences, PREF_START_ON_BOOT, PREF_USE_VPN};
    use crate::relay::TrafficSample;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNotifications(AtomicBool);

    impl NotificationSource for FakeNotifications {
        fn active_notification_ids(&self) -> Vec<i32> {
            if self.0.load(Ordering::Relaxed) { vec![1] } else { vec![3] }
        }
    }

    #[derive(Default)]
    struct StatusLog(Mutex<Vec<Status>>);

    impl ScramblerListener for StatusLog {
        fn on_status_changed(&self, status: Status) {
            self.0.lock().unwrap().push(status);
        }
        fn on_log(&self, _line: &str) {}
        fn on_traffic_update(&self, _sample: TrafficSample) {}
    }

    impl StatusLog {
        fn seen(&self) -> Vec<Status> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Harness {
        scrambler: IpScrambler,
        link: Arc<RecordingLink>,
        prefs: Arc<MemoryPreferences>,
        service: Arc<FakeNotifications>,
        statuses: Arc<StatusLog>,
    }

    fn harness() -> Harness {
        let link = Arc::new(RecordingLink::default());
        let prefs = Arc::new(MemoryPreferences::new());
        let service = Arc::new(FakeNotifications::default());
        let scrambler = IpScrambler::new(
            ScramblerSettings::default(),
            prefs.clone(),
            link.clone(),
            service.clone(),
        )
        .unwrap();
        let statuses = Arc::new(StatusLog::default());
        scrambler.add_listener(statuses.clone());
        Harness {
            scrambler,
            link,
            prefs,
            service,
            statuses,
        }
    }

    #[test]
    fn test_dns_port_reset_on_init() {
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.put_int(PREF_DNS_PORT, 53).unwrap();
        let _scrambler = IpScrambler::new(
            ScramblerSettings::default(),
            prefs.clone(),
            Arc::new(RecordingLink::default()),
            Arc::new(FakeNotifications::default()),
        )
        .unwrap();
        assert_eq!(prefs.get_int(PREF_DNS_PORT), Some(5400));
    }

    #[test]
    fn test_settings_and_liveness_exposed() {
        let h = harness();
        assert_eq!(h.scrambler.settings(), &ScramblerSettings::default());
        assert!(!h.scrambler.is_service_active());

        h.service.0.store(true, Ordering::Relaxed);
        assert!(h.scrambler.is_service_active());
    }

    #[test]
    fn test_request_status_inactive() {
        let h = harness();
        h.scrambler.request_status();
        h.scrambler.request_status();
        h.scrambler.flush();

        assert_eq!(h.statuses.seen(), vec![Status::Off, Status::Off]);
        assert_eq!(h.scrambler.status(), Some(Status::Off));
        assert!(h.link.sent().is_empty());
    }

    #[test]
    fn test_request_status_active() {
        let h = harness();
        h.service.0.store(true, Ordering::Relaxed);

        h.scrambler.request_status();
        h.scrambler.flush();
        assert_eq!(h.link.sent(), vec![ServiceCommand::StatusQuery]);
        assert!(h.statuses.seen().is_empty());
        assert_eq!(h.scrambler.status(), None);

        h.scrambler.intake().submit(ServiceEvent::status(Status::On));
        h.scrambler.flush();
        assert_eq!(h.statuses.seen(), vec![Status::On]);
    }

    #[test]
    fn test_start_stop() {
        let h = harness();
        h.scrambler.start().unwrap();
        assert_eq!(h.prefs.get_bool(PREF_USE_VPN), Some(true));
        assert_eq!(h.prefs.get_bool(PREF_START_ON_BOOT), Some(true));

        h.scrambler.stop().unwrap();
        assert_eq!(
            h.link.sent(),
            vec![
                ServiceCommand::Start,
                ServiceCommand::StartRouting,
                ServiceCommand::StopRouting,
                ServiceCommand::Stop,
            ]
        );
        assert_eq!(h.prefs.get_bool(PREF_USE_VPN), Some(false));
    }

    #[test]
    fn test_full_lifecycle() {
        let h = harness();
        let intake = h.scrambler.intake();

        h.scrambler.start().unwrap();
        intake.submit(ServiceEvent::log("Bootstrapped 5%").with(EXTRA_STATUS, "STARTING"));
        intake.submit(ServiceEvent::ports(8118, 9050));
        intake.submit(ServiceEvent::log("Bootstrapped 100%").with(EXTRA_STATUS, "ON"));
        h.scrambler.flush();
        assert_eq!(h.statuses.seen(), vec![Status::Starting]);

        intake.submit(ServiceEvent::bandwidth(TrafficSample::new(1, 1, 1, 1)).with(EXTRA_STATUS, "ON"));
        h.scrambler.flush();
        assert_eq!(h.statuses.seen(), vec![Status::Starting, Status::On]);
        assert_eq!(h.scrambler.http_proxy_port(), 8118);
        assert_eq!(h.scrambler.socks_proxy_port(), 9050);
        assert_eq!(h.scrambler.log_history(), "Bootstrapped 100%\nBootstrapped 5%\n");
    }

    #[test]
    fn test_ports_unknown_until_reported() {
        let h = harness();
        assert_eq!(h.scrambler.http_proxy_port(), -1);
        assert_eq!(h.scrambler.socks_proxy_port(), -1);
    }

    #[test]
    fn test_configuration_passthrough() {
        let h = harness();
        let apps: RoutingList = ["org.example.browser".to_string()].into_iter().collect();

        h.scrambler.set_app_list(&apps).unwrap();
        assert_eq!(h.scrambler.app_list(), apps);

        h.scrambler.set_exit_country("DE").unwrap();
        assert_eq!(h.scrambler.exit_country(), "DE");
        assert!(matches!(
            h.scrambler.set_exit_country("ZZ"),
            Err(ScramblerError::Config(ConfigError::InvalidExitCountry(_)))
        ));
        assert_eq!(h.scrambler.exit_country(), "DE");
        assert!(h.scrambler.available_locations().contains(&"DE".to_string()));
    }

    #[test]
    fn test_remove_and_clear_listeners() {
        let h = harness();
        let listener: ListenerRef = h.statuses.clone();

        h.scrambler.remove_listener(&listener);
        h.scrambler.request_status();
        h.scrambler.flush();
        assert!(h.statuses.seen().is_empty());

        h.scrambler.add_listener(listener.clone());
        h.scrambler.add_listener(listener);
        h.scrambler.request_status();
        h.scrambler.flush();
        assert_eq!(h.statuses.seen(), vec![Status::Off]);

        h.scrambler.clear_listeners();
        h.scrambler.request_status();
        h.scrambler.flush();
        assert_eq!(h.statuses.seen(), vec![Status::Off]);
    }

    #[test]
    fn test_shutdown_stops_dispatch() {
        let mut h = harness();
        let intake = h.scrambler.intake();
        h.scrambler.shutdown();

        intake.submit(ServiceEvent::status(Status::On));
        h.scrambler.flush();
        assert_eq!(h.scrambler.status(), None);
        assert!(h.statuses.seen().is_empty());
    }
}
