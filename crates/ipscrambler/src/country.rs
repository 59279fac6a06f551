//! Exit countries
//!
//! The relay network only offers exits in a fixed set of countries. A
//! selection is either one of them or "no preference".
//!
//! The relay service expects the code wrapped in braces (`{DE}`), the
//! notation of its node-selection option. No preference is an empty
//! string in both forms.

use serde::{Deserialize, Serialize};

/// Selectable exit countries
pub const EXIT_COUNTRIES: &[&str] = &[
    "AT", "AU", "BE", "BG", "BR", "CA", "CH", "CZ", "DE", "DK", "ES", "FI", "FR", "GB", "HU",
    "IS", "JP", "NL", "NO", "PL", "RO", "RU", "SE", "SG", "SK", "US",
];

/// A validated exit-country selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExitCountry(String);

impl ExitCountry {
    /// No preference
    pub fn any() -> Self {
        Self(String::new())
    }

    /// Validate a country code. Case is ignored, the stored code is upper-case.
    pub fn new(code: &str) -> Result<Self, InvalidExitCountry> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(Self::any());
        }

        let upper = code.to_uppercase();
        if EXIT_COUNTRIES.contains(&upper.as_str()) {
            Ok(Self(upper))
        } else {
            Err(InvalidExitCountry {
                code: code.to_string(),
                allowed: available_locations(),
            })
        }
    }

    /// Decode the relay service's wrapped form.
    ///
    /// Unknown codes decode to no preference.
    pub fn from_wrapped(wrapped: &str) -> Self {
        let bare = wrapped.trim().trim_start_matches('{').trim_end_matches('}');
        Self::new(bare).unwrap_or_default()
    }

    /// Bare code, empty for no preference
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Wrapped form for the relay service
    pub fn wrapped(&self) -> String {
        if self.0.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", self.0)
        }
    }

    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ExitCountry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_any() {
            f.write_str("any")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl std::str::FromStr for ExitCountry {
    type Err = InvalidExitCountry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Country codes callers may choose from
pub fn available_locations() -> Vec<String> {
    EXIT_COUNTRIES.iter().map(|c| c.to_string()).collect()
}

/// A country code outside the selectable set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid exit country {code:?}, expected one of: {}", .allowed.join(", "))]
pub struct InvalidExitCountry {
    pub code: String,
    pub allowed: Vec<String>,
}
