use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use ulid::Ulid;

use crate::auth::Credential;

use super::{requested_user, NewReservation, ReservationSink, ReservationSource, StoreError};

/// Reservation store held in memory. Sessions map bearer tokens to user ids so
/// "the current user" resolves the way the backend resolves it.
pub struct InMemoryStore {
    reservations: DashMap<String, Vec<Value>>,
    sessions: DashMap<String, String>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            sessions: DashMap::new(),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    // ── Setup ────────────────────────────────────────────────

    pub fn add_session(&self, token: &str, user_id: &str) {
        self.sessions.insert(token.to_string(), user_id.to_string());
    }

    /// Store a raw record for a user, as the backend would return it.
    pub fn insert_record(&self, user_id: &str, record: Value) {
        self.reservations
            .entry(user_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn records(&self, user_id: &str) -> Vec<Value> {
        self.reservations
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// While set, every call fails with `StoreError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    // ── Internals ────────────────────────────────────────────

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn resolve_user(&self, credential: &Credential, user_id: Option<&str>) -> Result<String, StoreError> {
        if let Some(uid) = requested_user(user_id) {
            return Ok(uid.to_string());
        }
        self.sessions
            .get(credential.token())
            .map(|e| e.value().clone())
            .ok_or(StoreError::Status {
                status: 401,
                body: "unknown session".into(),
            })
    }
}

#[async_trait]
impl ReservationSource for InMemoryStore {
    async fn fetch_reservations(
        &self,
        credential: &Credential,
        user_id: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let uid = self.resolve_user(credential, user_id)?;
        Ok(self.records(&uid))
    }
}

#[async_trait]
impl ReservationSink for InMemoryStore {
    async fn create_reservation(
        &self,
        credential: &Credential,
        reservation: &NewReservation,
    ) -> Result<Value, StoreError> {
        self.check_available()?;
        let uid = self.resolve_user(credential, reservation.user_id.as_deref())?;
        let record = json!({
            "_id": Ulid::new().to_string(),
            "user": uid,
            "activity": reservation.activity_id,
            "schedule": {
                "date": reservation.date,
                "startTime": reservation.start_time,
                "endTime": reservation.end_time,
            },
            "status": "pending",
        });
        self.insert_record(&uid, record.clone());
        Ok(record)
    }

    async fn cancel_reservation(
        &self,
        _credential: &Credential,
        reservation_id: &str,
    ) -> Result<Value, StoreError> {
        self.check_available()?;
        for mut entry in self.reservations.iter_mut() {
            if let Some(record) = entry
                .value_mut()
                .iter_mut()
                .find(|r| r.get("_id").and_then(Value::as_str) == Some(reservation_id))
            {
                record["status"] = json!("cancelled");
                return Ok(record.clone());
            }
        }
        Err(StoreError::NotFound(reservation_id.to_string()))
    }
}
