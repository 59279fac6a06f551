//! Routing configuration store
//!
//! Persists the per-app routing list and the exit country, and pushes
//! changes to the relay service when it is running.

use crate::command::CommandSender;
use crate::country::{available_locations, ExitCountry, InvalidExitCountry};
use crate::liveness::LivenessProbe;
use crate::prefs::{PreferenceError, PreferenceStore, PREF_EXIT_NODES, PREF_TORIFIED_APPS};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Application ids whose traffic goes through the tunnel
pub type RoutingList = BTreeSet<String>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    InvalidExitCountry(#[from] InvalidExitCountry),

    #[error("Invalid application id {0:?}: empty or contains the list separator")]
    InvalidAppId(String),

    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),
}

/// Routing list and exit country persistence
#[derive(Clone)]
pub struct ConfigStore {
    prefs: Arc<dyn PreferenceStore>,
    commands: CommandSender,
    probe: LivenessProbe,
    separator: char,
}

impl ConfigStore {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        commands: CommandSender,
        probe: LivenessProbe,
        separator: char,
    ) -> Self {
        Self {
            prefs,
            commands,
            probe,
            separator,
        }
    }

    /// Persisted routing list
    pub fn app_list(&self) -> RoutingList {
        let joined = self.prefs.get_string(PREF_TORIFIED_APPS).unwrap_or_default();
        decode_app_list(&joined, self.separator)
    }

    /// Persist a routing list, restarting routing if the service runs
    pub fn set_app_list(&self, apps: &RoutingList) -> Result<(), ConfigError> {
        // Neither would survive decoding.
        if let Some(bad) = apps
            .iter()
            .find(|a| a.is_empty() || a.contains(self.separator))
        {
            return Err(ConfigError::InvalidAppId(bad.clone()));
        }

        let joined = encode_app_list(apps, self.separator);
        self.prefs.put_string(PREF_TORIFIED_APPS, &joined)?;
        debug!("Routing list saved ({} apps)", apps.len());

        if self.probe.is_active() {
            info!("Restarting routing to apply new app list");
            self.commands.restart_routing();
        }
        Ok(())
    }

    /// Persisted exit country, empty for no preference
    pub fn exit_country(&self) -> String {
        let wrapped = self.prefs.get_string(PREF_EXIT_NODES).unwrap_or_default();
        ExitCountry::from_wrapped(&wrapped).code().to_string()
    }

    /// Select an exit country.
    ///
    /// Validation happens before anything is written or sent.
    pub fn set_exit_country(&self, code: &str) -> Result<(), ConfigError> {
        let country = ExitCountry::new(code)?;
        let wrapped = country.wrapped();

        self.prefs.put_string(PREF_EXIT_NODES, &wrapped)?;
        if self.probe.is_active() {
            info!("Switching exit country to {}", country);
            self.commands.set_exit(wrapped);
        } else {
            debug!("Exit country {} saved for next start", country);
        }
        Ok(())
    }

    pub fn available_locations(&self) -> Vec<String> {
        available_locations()
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("probe", &self.probe)
            .field("separator", &self.separator)
            .finish_non_exhaustive()
    }
}

fn encode_app_list(apps: &RoutingList, separator: char) -> String {
    let mut joined = String::new();
    for (i, app) in apps.iter().enumerate() {
        if i > 0 {
            joined.push(separator);
        }
        joined.push_str(app);
    }
    joined
}

// An empty string is the empty list, not a list holding "".
fn decode_app_list(joined: &str, separator: char) -> RoutingList {
    joined
        .split(separator)
        .filter(|app| !app.is_empty())
        .map(str::to_string)
        .collect()
}
