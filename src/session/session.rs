//! Session state and its persisted record.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{GatewayError, Result};
use crate::persistence::unix_time;

/// Who is on the other end of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_id: Option<String>,
    pub user_type: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub inflight: usize,
    pub max_inflight: usize,
    pub closed: bool,
}

/// Stored form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub state: SessionStatus,
    pub user_id: Option<String>,
    pub user_type: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_count: u64,
    pub total_duration_ms: f64,
    pub created_at: f64,
    pub last_activity: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub data: SessionData,
}

#[derive(Debug)]
struct SessionState {
    last_activity: f64,
    closed: bool,
    client: ClientInfo,
    request_count: u64,
    total_duration_ms: f64,
    metadata: Map<String, Value>,
}

/// One logical client session.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: f64,
    max_inflight: usize,
    slots: Arc<Semaphore>,
    state: Mutex<SessionState>,
    // Orders store writes against the delete on close
    writes: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(id: impl Into<String>, max_inflight: usize, client: ClientInfo) -> Self {
        let now = unix_time();
        Self {
            id: id.into(),
            created_at: now,
            max_inflight,
            slots: Arc::new(Semaphore::new(max_inflight)),
            state: Mutex::new(SessionState {
                last_activity: now,
                closed: false,
                client,
                request_count: 0,
                total_duration_ms: 0.0,
                metadata: Map::new(),
            }),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// Rebuild a session from its stored record with a fresh in-flight guard.
    pub fn from_record(id: impl Into<String>, record: SessionRecord, default_max_inflight: usize) -> Self {
        let max_inflight = if record.data.max_inflight > 0 {
            record.data.max_inflight
        } else {
            default_max_inflight
        };
        Self {
            id: id.into(),
            created_at: record.created_at,
            max_inflight,
            slots: Arc::new(Semaphore::new(max_inflight)),
            state: Mutex::new(SessionState {
                last_activity: record.last_activity,
                closed: false,
                client: ClientInfo {
                    user_id: record.user_id,
                    user_type: record.user_type,
                    ip_address: record.ip_address,
                    user_agent: record.user_agent,
                },
                request_count: record.request_count,
                total_duration_ms: record.total_duration_ms,
                metadata: record.metadata,
            }),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    pub fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    /// Requests currently holding a permit.
    pub fn inflight(&self) -> usize {
        if self.slots.is_closed() {
            return 0;
        }
        self.max_inflight.saturating_sub(self.slots.available_permits())
    }

    /// Held while the session's record is written to or deleted from the store.
    pub(crate) async fn write_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn last_activity(&self) -> f64 {
        self.state.lock().last_activity
    }

    pub fn request_count(&self) -> u64 {
        self.state.lock().request_count
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.state.lock().total_duration_ms
    }

    pub fn client(&self) -> ClientInfo {
        self.state.lock().client.clone()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.state.lock().metadata.insert(key.into(), value);
    }

    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.state.lock().metadata.get(key).cloned()
    }

    /// Wait for an in-flight slot.
    pub async fn acquire(&self) -> Result<InflightPermit> {
        if self.is_closed() {
            return Err(GatewayError::SessionNotFound(self.id.clone()));
        }
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::SessionNotFound(self.id.clone()))?;
        Ok(InflightPermit { _permit: permit })
    }

    /// Mark activity and merge any newly known client details.
    pub fn touch(&self, client: &ClientInfo) {
        let mut state = self.state.lock();
        state.last_activity = unix_time();
        let known = &mut state.client;
        if known.user_id.is_none() {
            known.user_id = client.user_id.clone();
        }
        if known.user_type.is_none() {
            known.user_type = client.user_type.clone();
        }
        if known.ip_address.is_none() {
            known.ip_address = client.ip_address.clone();
        }
        if known.user_agent.is_none() {
            known.user_agent = client.user_agent.clone();
        }
    }

    /// Account for one finished request.
    pub fn record(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.last_activity = unix_time();
        state.request_count += 1;
        state.total_duration_ms += duration.as_secs_f64() * 1000.0;
    }

    pub fn is_stale(&self, timeout: Duration, now: f64) -> bool {
        now - self.last_activity() >= timeout.as_secs_f64()
    }

    /// Close the session; waiting and future acquisitions fail.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.slots.close();
    }

    pub fn to_record(&self) -> SessionRecord {
        let inflight = self.inflight();
        let state = self.state.lock();
        SessionRecord {
            state: if state.closed {
                SessionStatus::Inactive
            } else {
                SessionStatus::Active
            },
            user_id: state.client.user_id.clone(),
            user_type: state.client.user_type.clone(),
            ip_address: state.client.ip_address.clone(),
            user_agent: state.client.user_agent.clone(),
            request_count: state.request_count,
            total_duration_ms: state.total_duration_ms,
            created_at: self.created_at,
            last_activity: state.last_activity,
            metadata: state.metadata.clone(),
            data: SessionData {
                inflight,
                max_inflight: self.max_inflight,
                closed: state.closed,
            },
        }
    }
}

/// An in-flight slot. Released when dropped.
#[derive(Debug)]
pub struct InflightPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_bound_inflight_and_release_on_drop() {
        let session = Session::new("s1", 2, ClientInfo::default());
        let p1 = session.acquire().await.unwrap();
        let _p2 = session.acquire().await.unwrap();
        assert_eq!(session.inflight(), 2);

        let third = tokio::time::timeout(Duration::from_millis(20), session.acquire()).await;
        assert!(third.is_err(), "third acquire should wait");

        drop(p1);
        assert_eq!(session.inflight(), 1);
        assert!(session.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn closed_session_rejects_acquire() {
        let session = Session::new("s1", 1, ClientInfo::default());
        session.close();
        assert!(matches!(session.acquire().await, Err(GatewayError::SessionNotFound(_))));
    }

    #[test]
    fn record_round_trip_keeps_counters() {
        let client = ClientInfo {
            user_id: Some("alice".into()),
            ip_address: Some("10.0.0.1".into()),
            ..ClientInfo::default()
        };
        let session = Session::new("s1", 3, client.clone());
        session.record(Duration::from_millis(250));
        session.set_metadata("protocol", Value::from("op"));

        let record = session.to_record();
        assert_eq!(record.state, SessionStatus::Active);
        assert_eq!(record.request_count, 1);
        assert_eq!(record.data.max_inflight, 3);

        let restored = Session::from_record("s1", record, 1);
        assert_eq!(restored.max_inflight(), 3);
        assert_eq!(restored.inflight(), 0);
        assert_eq!(restored.request_count(), 1);
        assert!((restored.total_duration_ms() - 250.0).abs() < 1e-6);
        assert_eq!(restored.client(), client);
        assert_eq!(restored.metadata("protocol"), Some(Value::from("op")));
    }

    #[test]
    fn touch_fills_missing_client_details_only() {
        let session = Session::new(
            "s1",
            1,
            ClientInfo {
                user_id: Some("alice".into()),
                ..ClientInfo::default()
            },
        );
        session.touch(&ClientInfo {
            user_id: Some("mallory".into()),
            user_agent: Some("cli/1.0".into()),
            ..ClientInfo::default()
        });
        let client = session.client();
        assert_eq!(client.user_id.as_deref(), Some("alice"));
        assert_eq!(client.user_agent.as_deref(), Some("cli/1.0"));
    }
}
