use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::Credential;
use crate::detector::{ConflictDetector, DetectorError};
use crate::model::{CandidateSchedule, CheckOutcome, ExistingReservation};
use crate::observability::BOOKINGS_TOTAL;
use crate::store::{NewReservation, ReservationSink, StoreError};

/// What to do when the conflict check could not reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnverifiedPolicy {
    /// Book anyway and flag the booking as unverified.
    #[default]
    Allow,
    /// Refuse to book until the check can be verified.
    Block,
}

impl FromStr for UnverifiedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(UnverifiedPolicy::Allow),
            "block" => Ok(UnverifiedPolicy::Block),
            other => Err(format!("unknown unverified policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum BookingDecision {
    Booked { reservation: Value, unverified: bool },
    Rejected { conflicts: Vec<ExistingReservation> },
    Blocked { reason: String },
}

impl BookingDecision {
    pub fn label(&self) -> &'static str {
        match self {
            BookingDecision::Booked { .. } => "booked",
            BookingDecision::Rejected { .. } => "rejected",
            BookingDecision::Blocked { .. } => "blocked",
        }
    }
}

#[derive(Debug)]
pub enum BookingError {
    Detector(DetectorError),
    Store(StoreError),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Detector(e) => write!(f, "{e}"),
            BookingError::Store(e) => write!(f, "booking failed: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Detector(e) => Some(e),
            BookingError::Store(e) => Some(e),
        }
    }
}

impl From<DetectorError> for BookingError {
    fn from(e: DetectorError) -> Self {
        BookingError::Detector(e)
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}

/// Check-then-create: a slot is only submitted once the detector clears it.
pub struct BookingFlow {
    detector: Arc<ConflictDetector>,
    sink: Arc<dyn ReservationSink>,
    policy: UnverifiedPolicy,
}

impl BookingFlow {
    pub fn new(detector: Arc<ConflictDetector>, sink: Arc<dyn ReservationSink>, policy: UnverifiedPolicy) -> Self {
        Self { detector, sink, policy }
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub async fn book(
        &self,
        credential: Option<&Credential>,
        user_id: Option<&str>,
        activity_id: &str,
        schedule: &CandidateSchedule,
    ) -> Result<BookingDecision, BookingError> {
        let credential = credential.ok_or(DetectorError::MissingCredential)?;
        let candidate = self.detector.candidate(activity_id, schedule)?;

        let unverified = match self.detector.check(&candidate, user_id, credential).await {
            CheckOutcome::Verified(result) if result.has_conflict => {
                return Ok(self.decided(BookingDecision::Rejected {
                    conflicts: result.conflicts,
                }));
            }
            CheckOutcome::Verified(_) => false,
            CheckOutcome::Unverified { reason } => match self.policy {
                UnverifiedPolicy::Block => {
                    return Ok(self.decided(BookingDecision::Blocked { reason }));
                }
                UnverifiedPolicy::Allow => {
                    warn!(activity = %candidate.activity_id, "booking without a verified conflict check: {reason}");
                    true
                }
            },
        };

        let request = NewReservation::from_candidate(&candidate, user_id);
        let reservation = self.sink.create_reservation(credential, &request).await?;
        info!(
            activity = %candidate.activity_id,
            date = %candidate.schedule.date,
            "reservation created"
        );
        Ok(self.decided(BookingDecision::Booked { reservation, unverified }))
    }

    pub async fn cancel(&self, credential: Option<&Credential>, reservation_id: &str) -> Result<Value, BookingError> {
        let credential = credential.ok_or(DetectorError::MissingCredential)?;
        let record = self.sink.cancel_reservation(credential, reservation_id).await?;
        info!(reservation = reservation_id, "reservation cancelled");
        Ok(record)
    }

    fn decided(&self, decision: BookingDecision) -> BookingDecision {
        metrics::counter!(BOOKINGS_TOTAL, "decision" => decision.label()).increment(1);
        decision
    }
}
