//! Command Sender
//!
//! Fire-and-forget directives to the relay service. Nothing is
//! acknowledged: whether a command took effect is only visible through the
//! events the service broadcasts afterwards.

use crate::prefs::{PreferenceError, PreferenceStore, PREF_START_ON_BOOT, PREF_USE_VPN};
use std::sync::Arc;
use tracing::{info, warn};

/// Directive sent to the relay service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Start the tunnel
    Start,
    /// Start routing device traffic through the tunnel
    StartRouting,
    /// Stop routing device traffic
    StopRouting,
    /// Terminate the service
    Stop,
    /// Ask the service to broadcast its status
    StatusQuery,
    /// Switch exit node at runtime; wrapped country code or empty
    SetExit(String),
}

impl ServiceCommand {
    /// Action name understood by the relay service
    pub fn action(&self) -> &'static str {
        match self {
            ServiceCommand::Start => "org.torproject.android.intent.action.START",
            ServiceCommand::StartRouting => "org.torproject.android.intent.action.START_VPN",
            ServiceCommand::StopRouting => "org.torproject.android.intent.action.STOP_VPN",
            ServiceCommand::Stop => "org.torproject.android.intent.action.STOP",
            ServiceCommand::StatusQuery => "org.torproject.android.intent.action.STATUS",
            ServiceCommand::SetExit(_) => "setexit",
        }
    }
}

/// Link delivery errors
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Relay service unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Transport to the relay service
pub trait ServiceLink: Send + Sync {
    /// Hand a command to the service without waiting for it to act
    fn send(&self, command: ServiceCommand) -> Result<(), LinkError>;
}

/// Issues commands and keeps the service's boot preferences in step
#[derive(Clone)]
pub struct CommandSender {
    link: Arc<dyn ServiceLink>,
    prefs: Arc<dyn PreferenceStore>,
}

impl CommandSender {
    pub fn new(link: Arc<dyn ServiceLink>, prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { link, prefs }
    }

    /// Send one command. Delivery failures are logged and dropped.
    pub fn send(&self, command: ServiceCommand) {
        info!("Sending {} to relay service", command.action());
        if let Err(e) = self.link.send(command) {
            warn!("Relay service command not delivered: {}", e);
        }
    }

    /// Start the tunnel, then routing
    pub fn start(&self) -> Result<(), PreferenceError> {
        self.set_autostart(true)?;
        self.send(ServiceCommand::Start);
        self.send(ServiceCommand::StartRouting);
        Ok(())
    }

    /// Stop routing, then terminate the service
    pub fn stop(&self) -> Result<(), PreferenceError> {
        self.set_autostart(false)?;
        self.send(ServiceCommand::StopRouting);
        self.send(ServiceCommand::Stop);
        Ok(())
    }

    pub fn query_status(&self) {
        self.send(ServiceCommand::StatusQuery);
    }

    /// Stop and start routing so the service rereads its routing list.
    ///
    /// Leaves a short window with no per-app routing in between.
    pub fn restart_routing(&self) {
        self.send(ServiceCommand::StopRouting);
        self.send(ServiceCommand::StartRouting);
    }

    pub fn set_exit(&self, wrapped: String) {
        self.send(ServiceCommand::SetExit(wrapped));
    }

    fn set_autostart(&self, enabled: bool) -> Result<(), PreferenceError> {
        self.prefs.put_bool(PREF_USE_VPN, enabled)?;
        self.prefs.put_bool(PREF_START_ON_BOOT, enabled)
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender").finish_non_exhaustive()
    }
}

/// Records every command; used by tests across the crate
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingLink {
    pub sent: std::sync::Mutex<Vec<ServiceCommand>>,
}

#[cfg(test)]
impl RecordingLink {
    pub fn sent(&self) -> Vec<ServiceCommand> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ServiceLink for RecordingLink {
    fn send(&self, command: ServiceCommand) -> Result<(), LinkError> {
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPreferences;

    struct RefusingLink;

    impl ServiceLink for RefusingLink {
        fn send(&self, _command: ServiceCommand) -> Result<(), LinkError> {
            Err(LinkError::PermissionDenied("no VPN consent".into()))
        }
    }

    fn sender() -> (CommandSender, Arc<RecordingLink>, Arc<MemoryPreferences>) {
        let link = Arc::new(RecordingLink::default());
        let prefs = Arc::new(MemoryPreferences::new());
        (CommandSender::new(link.clone(), prefs.clone()), link, prefs)
    }

    #[test]
    fn test_start_order_and_prefs() {
        let (sender, link, prefs) = sender();
        sender.start().unwrap();

        assert_eq!(link.sent(), vec![ServiceCommand::Start, ServiceCommand::StartRouting]);
        assert_eq!(prefs.get_bool(PREF_USE_VPN), Some(true));
        assert_eq!(prefs.get_bool(PREF_START_ON_BOOT), Some(true));
    }

    #[test]
    fn test_stop_order_and_prefs() {
        let (sender, link, prefs) = sender();
        sender.start().unwrap();
        sender.stop().unwrap();

        assert_eq!(
            link.sent()[2..],
            [ServiceCommand::StopRouting, ServiceCommand::Stop]
        );
        assert_eq!(prefs.get_bool(PREF_USE_VPN), Some(false));
        assert_eq!(prefs.get_bool(PREF_START_ON_BOOT), Some(false));
    }

    #[test]
    fn test_restart_routing() {
        let (sender, link, _) = sender();
        sender.restart_routing();
        assert_eq!(
            link.sent(),
            vec![ServiceCommand::StopRouting, ServiceCommand::StartRouting]
        );
    }

    #[test]
    fn test_delivery_failure_is_not_fatal() {
        let prefs = Arc::new(MemoryPreferences::new());
        let sender = CommandSender::new(Arc::new(RefusingLink), prefs.clone());

        assert!(sender.start().is_ok());
        assert_eq!(prefs.get_bool(PREF_USE_VPN), Some(true));
    }

    #[test]
    fn test_actions() {
        assert_eq!(ServiceCommand::SetExit("{DE}".into()).action(), "setexit");
        assert!(ServiceCommand::StatusQuery.action().ends_with("STATUS"));
    }
}
