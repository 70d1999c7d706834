//! Provider registry collaborator.
//!
//! The real registry lives outside this crate; the gateway only asks it for
//! capabilities and per-tool provider preferences.

use std::collections::HashMap;

use super::Provider;

/// What a provider can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Largest request payload the provider accepts comfortably.
    pub max_context_bytes: usize,
}

/// Capability lookup.
pub trait ProviderRegistry: Send + Sync {
    fn capabilities(&self, provider: Provider) -> ProviderCapabilities;

    /// Provider a tool should run on, if it has a preference.
    fn preferred_for(&self, tool: &str) -> Option<Provider>;
}

/// Registry backed by fixed tables.
#[derive(Debug, Clone, Default)]
pub struct StaticProviderRegistry {
    preferences: HashMap<String, Provider>,
}

impl StaticProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `tool` to `provider`.
    pub fn with_preference(mut self, tool: impl Into<String>, provider: Provider) -> Self {
        self.preferences.insert(tool.into(), provider);
        self
    }
}

impl ProviderRegistry for StaticProviderRegistry {
    fn capabilities(&self, provider: Provider) -> ProviderCapabilities {
        match provider {
            Provider::Claude => ProviderCapabilities {
                max_context_bytes: 800_000,
            },
            Provider::Gemini => ProviderCapabilities {
                max_context_bytes: 4_000_000,
            },
        }
    }

    fn preferred_for(&self, tool: &str) -> Option<Provider> {
        self.preferences.get(tool).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_are_per_tool() {
        let registry = StaticProviderRegistry::new().with_preference("summarize", Provider::Gemini);
        assert_eq!(registry.preferred_for("summarize"), Some(Provider::Gemini));
        assert_eq!(registry.preferred_for("echo"), None);
        assert!(
            registry.capabilities(Provider::Gemini).max_context_bytes
                > registry.capabilities(Provider::Claude).max_context_bytes
        );
    }
}
