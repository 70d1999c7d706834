//! Provider subsystem.
//!
//! # Data Flow
//! ```text
//! Tool call (preferred provider?, payload size)
//!     → isolation.rs (select healthy provider under manager lock)
//!         - health.rs (derive health from each provider's breaker)
//!         - registry.rs (capabilities for size-based routing)
//!     → execute inside the selected provider's circuit breaker
//! ```
//!
//! # Design Decisions
//! - One breaker per provider: independent failure domains
//! - Unhealthy preferred provider falls over to its alternate (cascade prevention)
//! - Both unhealthy: keep the preferred one and let its breaker reject visibly
//! - Selection is serialized, the protected call is not

pub mod health;
pub mod isolation;
pub mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use health::ProviderHealth;
pub use isolation::{ProviderIsolationManager, SelectionHint, SelectionStats};
pub use registry::{ProviderCapabilities, ProviderRegistry, StaticProviderRegistry};

/// Upstream AI model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Claude, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
        }
    }

    /// The provider to fall over to when this one is unhealthy.
    pub fn alternate(&self) -> Provider {
        match self {
            Provider::Claude => Provider::Gemini,
            Provider::Gemini => Provider::Claude,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Provider::Claude),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_is_an_involution() {
        for p in Provider::ALL {
            assert_ne!(p.alternate(), p);
            assert_eq!(p.alternate().alternate(), p);
        }
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!("openai".parse::<Provider>().is_err());
    }
}
