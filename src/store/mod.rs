mod error;
mod http;
mod memory;

pub use error::StoreError;
pub use http::HttpReservationStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Credential;
use crate::limits::MAX_RESERVATIONS_PER_SNAPSHOT;
use crate::model::{ReservationCandidate, TimeOfDay};

/// Read side of the reservation store: the snapshot a conflict check scans.
#[async_trait]
pub trait ReservationSource: Send + Sync {
    /// Raw reservation records for `user_id`, or for the credential's own user
    /// when `user_id` is `None`. Records are decoded by the caller, one by one.
    async fn fetch_reservations(
        &self,
        credential: &Credential,
        user_id: Option<&str>,
    ) -> Result<Vec<Value>, StoreError>;
}

/// Write side of the reservation store, used by the booking flow.
#[async_trait]
pub trait ReservationSink: Send + Sync {
    async fn create_reservation(
        &self,
        credential: &Credential,
        reservation: &NewReservation,
    ) -> Result<Value, StoreError>;

    async fn cancel_reservation(
        &self,
        credential: &Credential,
        reservation_id: &str,
    ) -> Result<Value, StoreError>;
}

/// A blank user id means the credential's own user, same as `None`.
pub fn requested_user(user_id: Option<&str>) -> Option<&str> {
    user_id.map(str::trim).filter(|uid| !uid.is_empty())
}

/// Request body for creating a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReservation {
    pub activity_id: String,
    pub date: String,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl NewReservation {
    pub fn from_candidate(candidate: &ReservationCandidate, user_id: Option<&str>) -> Self {
        Self {
            activity_id: candidate.activity_id.clone(),
            date: candidate.schedule.date.to_string(),
            start_time: candidate.schedule.start_time,
            end_time: candidate.schedule.end_time,
            user_id: requested_user(user_id).map(str::to_string),
        }
    }
}

/// List bodies come bare or wrapped, depending on the backend route.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReservationList {
    Bare(Vec<Value>),
    Data { data: Vec<Value> },
    Named { reservations: Vec<Value> },
}

pub(crate) fn decode_list(body: Value) -> Result<Vec<Value>, StoreError> {
    let records = match ReservationList::deserialize(body) {
        Ok(ReservationList::Bare(records))
        | Ok(ReservationList::Data { data: records })
        | Ok(ReservationList::Named {
            reservations: records,
        }) => records,
        Err(_) => {
            return Err(StoreError::Decode(
                "expected a reservation array or a {data|reservations} envelope".into(),
            ));
        }
    };
    if records.len() > MAX_RESERVATIONS_PER_SNAPSHOT {
        return Err(StoreError::LimitExceeded("too many reservations in snapshot"));
    }
    Ok(records)
}
