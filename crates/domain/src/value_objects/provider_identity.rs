//! Provider identity value object
//!
//! A provider is addressed by its name *and* the capability it serves, so the
//! same vendor can be registered once for STT and once for TTS with fully
//! independent health bookkeeping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Capability a provider serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
    /// Speech-to-text
    Stt,
    /// Text-to-speech
    Tts,
}

impl ProviderCategory {
    /// Short lowercase label used in keys and log fields
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderCategory {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stt" | "speech-to-text" => Ok(Self::Stt),
            "tts" | "text-to-speech" => Ok(Self::Tts),
            other => Err(DomainError::InvalidCategory(other.to_string())),
        }
    }
}

/// Identity of a provider registration: `{name, category}`
///
/// Used as the map key for provider instances, circuit breakers and
/// connection metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderIdentity {
    name: String,
    category: ProviderCategory,
}

impl ProviderIdentity {
    /// Create a new identity
    ///
    /// Names are compared case-insensitively and stored lowercase.
    #[must_use]
    pub fn new(name: impl AsRef<str>, category: ProviderCategory) -> Self {
        Self {
            name: name.as_ref().trim().to_lowercase(),
            category,
        }
    }

    /// Shorthand for a speech-to-text identity
    #[must_use]
    pub fn stt(name: impl AsRef<str>) -> Self {
        Self::new(name, ProviderCategory::Stt)
    }

    /// Shorthand for a text-to-speech identity
    #[must_use]
    pub fn tts(name: impl AsRef<str>) -> Self {
        Self::new(name, ProviderCategory::Tts)
    }

    /// Provider name (lowercase)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider category
    #[must_use]
    pub const fn category(&self) -> ProviderCategory {
        self.category
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

impl FromStr for ProviderIdentity {
    type Err = DomainError;

    /// Parse the `category:name` form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, name) = s
            .split_once(':')
            .ok_or_else(|| DomainError::InvalidProviderIdentity(s.to_string()))?;
        if name.trim().is_empty() {
            return Err(DomainError::InvalidProviderIdentity(s.to_string()));
        }
        Ok(Self::new(name, category.parse()?))
    }
}
