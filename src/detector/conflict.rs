use crate::model::*;

/// Same activity always conflicts; otherwise the slots must share a calendar
/// day and strictly overlap.
pub fn conflicts_with(candidate: &ReservationCandidate, existing: &ExistingReservation) -> bool {
    if existing.activity.id.trim() == candidate.activity_id.trim() {
        return true;
    }
    existing.schedule.date == candidate.schedule.date
        && existing.schedule.span().overlaps(&candidate.schedule.span())
}

/// Every reservation admitted by `policy` that conflicts with `candidate`, in input order.
pub fn find_conflicts(
    candidate: &ReservationCandidate,
    existing: &[ExistingReservation],
    policy: StatusPolicy,
) -> ConflictResult {
    let conflicts = existing
        .iter()
        .filter(|r| policy.admits(r.status))
        .filter(|r| conflicts_with(candidate, r))
        .cloned()
        .collect();
    ConflictResult::from_conflicts(conflicts)
}
