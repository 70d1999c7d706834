//! Per-request caller identity.

use crate::providers::Provider;
use crate::session::ClientInfo;

/// Who is calling, and on which session.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: String,
    pub client: ClientInfo,
    /// Explicit provider preference. `None` lets the gateway choose.
    pub preferred_provider: Option<Provider>,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>, client: ClientInfo) -> Self {
        Self {
            session_id: session_id.into(),
            client,
            preferred_provider: None,
        }
    }

    pub fn with_preferred_provider(mut self, provider: Option<Provider>) -> Self {
        self.preferred_provider = provider;
        self
    }

    pub fn ip(&self) -> Option<&str> {
        self.client.ip_address.as_deref()
    }

    pub fn user(&self) -> Option<&str> {
        self.client.user_id.as_deref()
    }
}
