//! Session lifecycle: creation, recovery, accounting and sweeping.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::session::{ClientInfo, Session, SessionRecord, SessionStatus};
use crate::config::SessionConfig;
use crate::error::{GatewayError, Result};
use crate::observability::metrics;
use crate::persistence::{decode, unix_time, PersistenceService};

const KEY_PREFIX: &str = "session:";

fn store_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub inflight: usize,
    pub max_concurrent: usize,
    pub total_requests: u64,
}

/// Owns every live session in this process.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    store: Arc<dyn PersistenceService>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig, store: Arc<dyn PersistenceService>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Return the session for `session_id`, recovering or creating it.
    ///
    /// Recovery from the store is not subject to the session cap; creation is.
    pub async fn ensure(&self, session_id: &str, client: &ClientInfo) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(session_id) {
            session.touch(client);
            return Ok(session.clone());
        }

        if let Some(session) = self.recover(session_id).await {
            session.touch(client);
            sessions.insert(session_id.to_string(), session.clone());
            metrics::record_active_sessions(sessions.len());
            tracing::info!(session_id = %session_id, "Session recovered from store");
            return Ok(session);
        }

        if sessions.len() >= self.config.max_concurrent_sessions {
            tracing::warn!(
                session_id = %session_id,
                limit = self.config.max_concurrent_sessions,
                "Session limit reached"
            );
            return Err(GatewayError::SessionLimitExceeded {
                limit: self.config.max_concurrent_sessions,
            });
        }

        let session = Arc::new(Session::new(session_id, self.config.max_inflight, client.clone()));
        sessions.insert(session_id.to_string(), session.clone());
        metrics::record_active_sessions(sessions.len());
        drop(sessions);

        self.persist(&session).await;
        tracing::info!(
            session_id = %session_id,
            ip = client.ip_address.as_deref().unwrap_or("-"),
            "Session created"
        );
        Ok(session)
    }

    async fn recover(&self, session_id: &str) -> Option<Arc<Session>> {
        let key = store_key(session_id);
        let value = match self.store.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Session lookup failed, creating fresh");
                return None;
            }
        };

        let record: SessionRecord = match decode(&key, value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable session record");
                return None;
            }
        };

        if record.state != SessionStatus::Active || record.data.closed {
            return None;
        }
        let session = Session::from_record(session_id, record, self.config.max_inflight);
        if session.is_stale(self.config.timeout(), unix_time()) {
            return None;
        }
        Some(Arc::new(session))
    }

    /// Look up a live session without creating it.
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    /// Account for a finished request and persist in the background.
    pub fn record_request(&self, session: &Arc<Session>, duration: Duration) {
        session.record(duration);
        self.persist_in_background(session);
    }

    async fn persist(&self, session: &Session) {
        write_session(self.store.as_ref(), session, self.config.timeout()).await;
    }

    fn persist_in_background(&self, session: &Arc<Session>) {
        let session = session.clone();
        let store = self.store.clone();
        let ttl = self.config.timeout();
        tokio::spawn(async move {
            write_session(store.as_ref(), &session, ttl).await;
        });
    }

    /// Mark closed, then drop the stored record once pending writes finish.
    async fn retire(&self, session: &Session) {
        session.close();
        let _writes = session.write_lock().await;
        if let Err(e) = self.store.delete(&store_key(session.id())).await {
            tracing::warn!(session_id = %session.id(), error = %e, "Failed to delete session record");
        }
    }

    /// Close a session explicitly. Returns false if it was not live.
    pub async fn close(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            let removed = sessions.remove(session_id);
            metrics::record_active_sessions(sessions.len());
            removed
        };

        let Some(session) = removed else {
            return false;
        };
        self.retire(&session).await;
        tracing::info!(
            session_id = %session_id,
            requests = session.request_count(),
            "Session closed"
        );
        true
    }

    /// Remove sessions idle for at least the configured timeout.
    ///
    /// Sessions with requests in flight are kept until they drain.
    pub async fn cleanup_stale(&self) -> usize {
        let now = unix_time();
        let timeout = self.config.timeout();
        let stale: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.inflight() == 0 && s.is_stale(timeout, now))
                .map(|(id, _)| id.clone())
                .collect();
            let stale = ids.iter().filter_map(|id| sessions.remove(id)).collect();
            metrics::record_active_sessions(sessions.len());
            stale
        };

        for session in &stale {
            self.retire(session).await;
        }
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "Swept stale sessions");
        }
        stale.len()
    }

    /// Rehydrate every active session found in the store.
    pub async fn recover_all_sessions(&self) -> usize {
        let keys = match self.store.keys_with_prefix(KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Session recovery skipped, store unavailable");
                return 0;
            }
        };

        let mut recovered = 0;
        for key in keys {
            let Some(session_id) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            if self.sessions.lock().await.contains_key(session_id) {
                continue;
            }
            if let Some(session) = self.recover(session_id).await {
                let mut sessions = self.sessions.lock().await;
                sessions.entry(session_id.to_string()).or_insert(session);
                metrics::record_active_sessions(sessions.len());
                recovered += 1;
            }
        }

        tracing::info!(recovered, "Session recovery complete");
        recovered
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.lock().await;
        SessionStats {
            active: sessions.len(),
            inflight: sessions.values().map(|s| s.inflight()).sum(),
            max_concurrent: self.config.max_concurrent_sessions,
            total_requests: sessions.values().map(|s| s.request_count()).sum(),
        }
    }
}

/// Write the session's current record unless it has been closed.
async fn write_session(store: &dyn PersistenceService, session: &Session, ttl: Duration) {
    let _writes = session.write_lock().await;
    if session.is_closed() {
        return;
    }
    let value = match serde_json::to_value(session.to_record()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(session_id = %session.id(), error = %e, "Failed to encode session record");
            return;
        }
    };
    if let Err(e) = store.set_with_ttl(&store_key(session.id()), value, ttl).await {
        tracing::warn!(session_id = %session.id(), error = %e, "Failed to persist session");
    }
}
