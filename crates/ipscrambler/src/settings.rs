//! Controller settings
//!
//! Constants shared with the relay service. Every field has a default, so
//! an empty file is a valid configuration.
//!
//! ```toml
//! notification_id = 1
//! dns_port = 5400
//! app_list_separator = "|"
//! worker_name = "scrambler-dispatch"
//! ```

use crate::liveness::DEFAULT_NOTIFICATION_ID;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default DNS port of the relay service
pub const DEFAULT_DNS_PORT: i32 = 5400;

/// Controller settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScramblerSettings {
    /// Id of the relay service's persistent notification
    #[serde(default = "default_notification_id")]
    pub notification_id: i32,
    /// DNS port written to preferences at start-up
    #[serde(default = "default_dns_port")]
    pub dns_port: i32,
    /// Separator of the persisted routing list
    #[serde(default = "default_separator")]
    pub app_list_separator: char,
    /// Name of the dispatcher thread
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

fn default_notification_id() -> i32 {
    DEFAULT_NOTIFICATION_ID
}

fn default_dns_port() -> i32 {
    DEFAULT_DNS_PORT
}

fn default_separator() -> char {
    '|'
}

fn default_worker_name() -> String {
    "scrambler-dispatch".to_string()
}

impl Default for ScramblerSettings {
    fn default() -> Self {
        Self {
            notification_id: default_notification_id(),
            dns_port: default_dns_port(),
            app_list_separator: default_separator(),
            worker_name: default_worker_name(),
        }
    }
}

impl ScramblerSettings {
    /// Load from a TOML or JSON file, picked by extension
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::Io(e.to_string()))?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            _ => Err(SettingsError::UnsupportedFormat),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            toml::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_json::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=i32::from(u16::MAX)).contains(&self.dns_port) {
            return Err(SettingsError::Invalid(format!(
                "dns_port {} out of range",
                self.dns_port
            )));
        }
        if self.app_list_separator.is_alphanumeric()
            || self.app_list_separator.is_whitespace()
            || ['.', '_', '-'].contains(&self.app_list_separator)
        {
            // Would split package names apart.
            return Err(SettingsError::Invalid(format!(
                "app_list_separator {:?} can appear in application ids",
                self.app_list_separator
            )));
        }
        if self.worker_name.is_empty() {
            return Err(SettingsError::Invalid("worker_name is empty".into()));
        }
        Ok(())
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Unsupported settings format")]
    UnsupportedFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ScramblerSettings::default();
        assert_eq!(settings.notification_id, 1);
        assert_eq!(settings.dns_port, 5400);
        assert_eq!(settings.app_list_separator, '|');
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let settings = ScramblerSettings::from_toml("").unwrap();
        assert_eq!(settings, ScramblerSettings::default());
    }

    #[test]
    fn test_partial_toml() {
        let settings = ScramblerSettings::from_toml("dns_port = 5500\nnotification_id = 9").unwrap();
        assert_eq!(settings.dns_port, 5500);
        assert_eq!(settings.notification_id, 9);
        assert_eq!(settings.worker_name, "scrambler-dispatch");
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = ScramblerSettings {
            worker_name: "relay-events".to_string(),
            ..ScramblerSettings::default()
        };
        let parsed = ScramblerSettings::from_toml(&settings.to_toml()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_json() {
        let settings = ScramblerSettings::from_json(r#"{"app_list_separator": ","}"#).unwrap();
        assert_eq!(settings.app_list_separator, ',');
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ScramblerSettings::from_toml("dns_port = 0"),
            Err(SettingsError::Invalid(_))
        ));
        assert!(matches!(
            ScramblerSettings::from_toml("app_list_separator = \".\""),
            Err(SettingsError::Invalid(_))
        ));
        for separator in ["_", "-", " ", "a", "7"] {
            assert!(
                matches!(
                    ScramblerSettings::from_toml(&format!("app_list_separator = {separator:?}")),
                    Err(SettingsError::Invalid(_))
                ),
                "separator {separator:?} accepted"
            );
        }
        for separator in ["|", ",", ";"] {
            assert!(
                ScramblerSettings::from_toml(&format!("app_list_separator = {separator:?}")).is_ok()
            );
        }
        assert!(matches!(
            ScramblerSettings::from_toml("dns_port = \"x\""),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let path = std::env::temp_dir().join(format!("ipscrambler-{}.ini", std::process::id()));
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            ScramblerSettings::from_file(&path),
            Err(SettingsError::UnsupportedFormat)
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
