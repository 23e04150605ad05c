mod conflict;
mod error;
#[cfg(test)]
mod tests;

pub use conflict::{conflicts_with, find_conflicts};
pub use error::DetectorError;

use std::sync::Arc;
use std::time::Instant;

use chrono::{FixedOffset, Offset, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::model::*;
use crate::observability::{CHECKS_TOTAL, CHECK_DURATION_SECONDS, FETCH_FAILURES_TOTAL, RECORDS_SKIPPED_TOTAL};
use crate::sequence::CheckSequencer;
use crate::store::ReservationSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorOptions {
    pub status_policy: StatusPolicy,
    /// Timezone in which timestamps are reduced to calendar days.
    pub venue_offset: FixedOffset,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            status_policy: StatusPolicy::All,
            venue_offset: Utc.fix(),
        }
    }
}

/// Decides whether a candidate slot clashes with a user's existing reservations.
///
/// Holds no reservation data: every check fetches a fresh snapshot from the
/// source and discards it when done.
pub struct ConflictDetector {
    source: Arc<dyn ReservationSource>,
    options: DetectorOptions,
    sequencer: CheckSequencer,
}

impl ConflictDetector {
    pub fn new(source: Arc<dyn ReservationSource>, options: DetectorOptions) -> Self {
        Self {
            source,
            options,
            sequencer: CheckSequencer::new(),
        }
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn sequencer(&self) -> &CheckSequencer {
        &self.sequencer
    }

    /// Parse a caller-supplied slot in the venue timezone.
    pub fn candidate(&self, activity_id: &str, schedule: &CandidateSchedule) -> Result<ReservationCandidate, DetectorError> {
        Ok(ReservationCandidate::parse(activity_id, schedule, &self.options.venue_offset)?)
    }

    /// Check a raw slot against the user's reservations.
    ///
    /// Fails before touching the store when the credential is missing or the
    /// slot does not parse. A store failure is not an error: it comes back as
    /// [`CheckOutcome::Unverified`].
    pub async fn check_for_conflicts(
        &self,
        activity_id: &str,
        schedule: &CandidateSchedule,
        user_id: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<CheckOutcome, DetectorError> {
        let credential = credential.ok_or(DetectorError::MissingCredential)?;
        let candidate = self.candidate(activity_id, schedule)?;
        Ok(self.check(&candidate, user_id, credential).await)
    }

    /// Like [`check_for_conflicts`](Self::check_for_conflicts), but an
    /// unverified check reads as "no conflict".
    pub async fn check_for_conflicts_fail_open(
        &self,
        activity_id: &str,
        schedule: &CandidateSchedule,
        user_id: Option<&str>,
        credential: Option<&Credential>,
    ) -> Result<ConflictResult, DetectorError> {
        let outcome = self
            .check_for_conflicts(activity_id, schedule, user_id, credential)
            .await?;
        Ok(outcome.fail_open())
    }

    pub async fn check(
        &self,
        candidate: &ReservationCandidate,
        user_id: Option<&str>,
        credential: &Credential,
    ) -> CheckOutcome {
        let started = Instant::now();
        let outcome = match self.source.fetch_reservations(credential, user_id).await {
            Ok(records) => {
                let existing = self.decode_snapshot(&records);
                CheckOutcome::Verified(find_conflicts(candidate, &existing, self.options.status_policy))
            }
            Err(e) => {
                warn!(
                    activity = %candidate.activity_id,
                    user = user_id.unwrap_or("<current>"),
                    "could not fetch reservations for conflict check: {e}"
                );
                metrics::counter!(FETCH_FAILURES_TOTAL, "kind" => e.kind()).increment(1);
                CheckOutcome::Unverified { reason: e.to_string() }
            }
        };
        metrics::counter!(CHECKS_TOTAL, "outcome" => outcome.label()).increment(1);
        metrics::histogram!(CHECK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        outcome
    }

    /// Run a check under `key`, cancelling any check already in flight for
    /// it. A check overtaken by a newer one returns `Superseded` rather than a
    /// stale result.
    pub async fn check_latest(
        &self,
        key: &str,
        candidate: &ReservationCandidate,
        user_id: Option<&str>,
        credential: &Credential,
    ) -> Result<CheckOutcome, DetectorError> {
        // Dropping this future mid-check still releases the key.
        let ticket = self.sequencer.begin_guarded(key);
        let outcome = tokio::select! {
            biased;
            _ = ticket.cancelled() => None,
            outcome = self.check(candidate, user_id, credential) => Some(outcome),
        };
        match outcome {
            Some(outcome) if self.sequencer.is_current(&ticket) => Ok(outcome),
            _ => {
                debug!(key, generation = ticket.generation(), "dropping superseded check");
                metrics::counter!(CHECKS_TOTAL, "outcome" => "superseded").increment(1);
                Err(DetectorError::Superseded {
                    generation: ticket.generation(),
                })
            }
        }
    }

    /// Decode records one by one, skipping the malformed ones.
    fn decode_snapshot(&self, records: &[Value]) -> Vec<ExistingReservation> {
        records
            .iter()
            .filter_map(|record| match ExistingReservation::from_record(record, &self.options.venue_offset) {
                Ok(reservation) => Some(reservation),
                Err(e) => {
                    debug!("skipping reservation record: {e}");
                    metrics::counter!(RECORDS_SKIPPED_TOTAL).increment(1);
                    None
                }
            })
            .collect()
    }
}
