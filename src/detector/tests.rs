use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::store::{InMemoryStore, StoreError};

const USER: &str = "member-7";
const TOKEN: &str = "session-token";

fn cred() -> Credential {
    Credential::bearer(TOKEN).unwrap()
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn record(id: &str, activity: &str, date: &str, start: &str, end: &str, status: &str) -> Value {
    json!({
        "_id": id,
        "activity": { "_id": activity, "name": activity.to_uppercase() },
        "schedule": { "date": date, "startTime": start, "endTime": end },
        "status": status,
    })
}

fn existing(activity: &str, date: &str, start: &str, end: &str) -> ExistingReservation {
    ExistingReservation::from_record(&record("r", activity, date, start, end, "confirmed"), &utc()).unwrap()
}

fn candidate(activity: &str, date: &str, start: &str, end: &str) -> ReservationCandidate {
    ReservationCandidate::parse(activity, &CandidateSchedule::new(date, start, end), &utc()).unwrap()
}

fn store_with(records: Vec<Value>) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.add_session(TOKEN, USER);
    for r in records {
        store.insert_record(USER, r);
    }
    store
}

fn detector(store: Arc<InMemoryStore>) -> ConflictDetector {
    ConflictDetector::new(store, DetectorOptions::default())
}

// ── Pure predicate ───────────────────────────────────────

#[test]
fn same_activity_conflicts_regardless_of_time() {
    let e = existing("yoga-1", "2024-06-10", "09:00", "10:00");
    assert!(conflicts_with(&candidate("yoga-1", "2024-06-20", "14:00", "15:00"), &e));
    assert!(conflicts_with(&candidate("yoga-1", "2024-06-10", "10:00", "11:00"), &e));
    assert!(conflicts_with(&candidate("yoga-1", "2030-01-01", "00:00", "00:00"), &e));
}

#[test]
fn different_day_never_conflicts() {
    let e = existing("swim-2", "2024-06-10", "09:00", "10:00");
    assert!(!conflicts_with(&candidate("dance-3", "2024-06-11", "09:00", "10:00"), &e));
    assert!(!conflicts_with(&candidate("dance-3", "2024-06-09", "00:00", "23:59"), &e));
}

#[test]
fn touching_slots_do_not_conflict() {
    let e = existing("swim-2", "2024-06-10", "09:00", "10:00");
    assert!(!conflicts_with(&candidate("dance-3", "2024-06-10", "10:00", "11:00"), &e));
    assert!(!conflicts_with(&candidate("dance-3", "2024-06-10", "08:00", "09:00"), &e));
}

#[test]
fn overlapping_slots_conflict() {
    let e = existing("swim-2", "2024-06-10", "09:00", "10:30");
    assert!(conflicts_with(&candidate("dance-3", "2024-06-10", "10:00", "11:00"), &e));
    assert!(conflicts_with(&candidate("dance-3", "2024-06-10", "08:00", "09:01"), &e));
    assert!(conflicts_with(&candidate("dance-3", "2024-06-10", "09:15", "09:45"), &e)); // inside
    assert!(conflicts_with(&candidate("dance-3", "2024-06-10", "07:00", "12:00"), &e)); // around
}

#[test]
fn zero_length_candidate_only_conflicts_on_activity() {
    let e = existing("swim-2", "2024-06-10", "09:00", "10:00");
    assert!(!conflicts_with(&candidate("dance-3", "2024-06-10", "09:30", "09:30"), &e));
    assert!(conflicts_with(&candidate("swim-2", "2024-06-10", "09:30", "09:30"), &e));
}

#[test]
fn predicate_matches_shared_minutes_on_half_hour_grid() {
    let slots: Vec<String> = (16..=24).map(|half| format!("{:02}:{:02}", half / 2, (half % 2) * 30)).collect();
    for (i, es) in slots.iter().enumerate() {
        for ee in &slots[i..] {
            let e = existing("swim-2", "2024-06-10", es, ee);
            for (j, cs) in slots.iter().enumerate() {
                for ce in &slots[j..] {
                    let c = candidate("dance-3", "2024-06-10", cs, ce);
                    let a = e.schedule.span();
                    let b = c.schedule.span();
                    let shares_a_minute = (a.start..a.end).any(|m| (b.start..b.end).contains(&m));
                    assert_eq!(
                        conflicts_with(&c, &e),
                        shares_a_minute,
                        "existing {es}-{ee} vs candidate {cs}-{ce}"
                    );
                }
            }
        }
    }
}

#[test]
fn find_conflicts_lists_every_match_in_order() {
    let all = vec![
        existing("yoga-1", "2024-06-12", "18:00", "19:00"),
        existing("swim-2", "2024-06-10", "09:00", "10:00"),
        existing("tennis-4", "2024-06-10", "09:45", "11:00"),
        existing("climb-5", "2024-06-10", "11:00", "12:00"),
    ];
    let result = find_conflicts(&candidate("yoga-1", "2024-06-10", "09:30", "11:00"), &all, StatusPolicy::All);
    assert!(result.has_conflict);
    let ids: Vec<_> = result.conflicts.iter().map(|r| r.activity.id.as_str()).collect();
    assert_eq!(ids, vec!["yoga-1", "swim-2", "tennis-4"]);
}

#[test]
fn find_conflicts_empty_snapshot() {
    let result = find_conflicts(&candidate("yoga-1", "2024-06-10", "09:00", "10:00"), &[], StatusPolicy::All);
    assert_eq!(result, ConflictResult::clear());
}

#[test]
fn padded_activity_ids_still_match() {
    let mut e = existing("yoga-1", "2024-06-10", "09:00", "10:00");
    e.activity.id = " yoga-1\t".into();
    assert!(conflicts_with(&candidate("  yoga-1 ", "2024-06-20", "14:00", "15:00"), &e));
}

#[test]
fn active_only_policy_ignores_terminal_reservations() {
    let utc = utc();
    let all: Vec<_> = [
        record("a", "swim-2", "2024-06-10", "09:00", "10:00", "cancelled"),
        record("b", "tennis-4", "2024-06-10", "09:00", "10:00", "completed"),
        record("c", "climb-5", "2024-06-10", "09:00", "10:00", "pending"),
    ]
    .iter()
    .map(|r| ExistingReservation::from_record(r, &utc).unwrap())
    .collect();
    let c = candidate("dance-3", "2024-06-10", "09:30", "10:30");

    assert_eq!(find_conflicts(&c, &all, StatusPolicy::All).conflicts.len(), 3);
    let active = find_conflicts(&c, &all, StatusPolicy::ActiveOnly);
    assert_eq!(active.conflicts.len(), 1);
    assert_eq!(active.conflicts[0].id.as_deref(), Some("c"));
}

// ── Detector against a store ─────────────────────────────

#[tokio::test]
async fn scenario_a_same_activity_overrides_date_and_time() {
    let store = store_with(vec![record("r1", "yoga-1", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store);
    let result = det
        .check_for_conflicts_fail_open("yoga-1", &CandidateSchedule::new("2024-06-20", "14:00", "15:00"), Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(result.has_conflict);
    assert_eq!(result.conflicts.len(), 1);
}

#[tokio::test]
async fn scenario_b_same_day_overlap() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store);
    let outcome = det
        .check_for_conflicts("dance-3", &CandidateSchedule::new("2024-06-10", "09:30", "10:30"), Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(outcome.is_verified());
    assert!(outcome.has_conflict());
}

#[tokio::test]
async fn scenario_c_touching_is_clear() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store);
    let outcome = det
        .check_for_conflicts("dance-3", &CandidateSchedule::new("2024-06-10", "10:00", "11:00"), Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert_eq!(outcome, CheckOutcome::Verified(ConflictResult::clear()));
}

#[tokio::test]
async fn scenario_d_different_day_is_clear() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store);
    let outcome = det
        .check_for_conflicts("dance-3", &CandidateSchedule::new("2024-06-11", "09:00", "10:00"), Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert_eq!(outcome, CheckOutcome::Verified(ConflictResult::clear()));
}

#[tokio::test]
async fn scenario_e_fetch_failure_fails_open() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    store.set_failing(true);
    let det = detector(store.clone());
    let schedule = CandidateSchedule::new("2024-06-10", "09:30", "10:30");

    let outcome = det
        .check_for_conflicts("dance-3", &schedule, Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(matches!(&outcome, CheckOutcome::Unverified { reason } if reason.contains("injected failure")));

    let result = det
        .check_for_conflicts_fail_open("dance-3", &schedule, Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert_eq!(result, ConflictResult::clear());
    assert_eq!(store.fetch_count(), 2);
}

#[tokio::test]
async fn missing_credential_fails_before_fetch() {
    let store = store_with(vec![]);
    let det = detector(store.clone());
    let result = det
        .check_for_conflicts("dance-3", &CandidateSchedule::new("2024-06-10", "09:00", "10:00"), Some(USER), None)
        .await;
    assert!(matches!(result, Err(DetectorError::MissingCredential)));
    assert!(result.unwrap_err().to_string().contains("authentication missing"));
    assert_eq!(store.fetch_count(), 0);
}

#[tokio::test]
async fn invalid_candidate_fails_before_fetch() {
    let store = store_with(vec![]);
    let det = detector(store.clone());
    for (activity, schedule) in [
        ("", CandidateSchedule::new("2024-06-10", "09:00", "10:00")),
        ("dance-3", CandidateSchedule::new("2024-06-10", "9am", "10:00")),
        ("dance-3", CandidateSchedule::new("June 10", "09:00", "10:00")),
        ("dance-3", CandidateSchedule::new("2024-06-10", "11:00", "10:00")),
    ] {
        let result = det.check_for_conflicts(activity, &schedule, Some(USER), Some(&cred())).await;
        assert!(matches!(result, Err(DetectorError::InvalidCandidate(_))), "{schedule:?}");
    }
    assert_eq!(store.fetch_count(), 0);
}

#[tokio::test]
async fn current_user_resolved_by_store() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store);
    let outcome = det
        .check_for_conflicts("swim-2", &CandidateSchedule::new("2024-07-01", "09:00", "10:00"), None, Some(&cred()))
        .await
        .unwrap();
    assert!(outcome.has_conflict());
}

#[tokio::test]
async fn blank_user_id_checks_current_user() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store.clone());
    let outcome = det
        .check_for_conflicts("swim-2", &CandidateSchedule::new("2024-07-01", "09:00", "10:00"), Some(""), Some(&cred()))
        .await
        .unwrap();
    assert!(outcome.is_verified());
    assert!(outcome.has_conflict());
}

#[tokio::test]
async fn backend_record_shapes_still_conflict() {
    let store = store_with(vec![
        // Virtual ids on: `_id` and `id` side by side at both levels.
        json!({
            "_id": "r-virtual",
            "id": "r-virtual",
            "activity": { "_id": "yoga-1", "id": "yoga-1", "name": "Yoga" },
            "schedule": { "date": "2024-06-03T00:00:00.000Z", "startTime": "07:00", "endTime": "08:00" },
            "status": "confirmed"
        }),
        json!({
            "id": 17,
            "activity": { "id": 5, "name": "Pilates" },
            "schedule": { "date": "2024-06-04", "startTime": "12:00", "endTime": "13:00" }
        }),
        json!({
            "_id": "r-naive",
            "activity": "swim-2",
            "schedule": { "date": "2024-06-10T00:00:00.000", "startTime": "09:00", "endTime": "10:00" },
            "status": "pending"
        }),
    ]);
    let det = detector(store);

    let same_activity = det
        .check_for_conflicts("yoga-1", &CandidateSchedule::new("2024-06-20", "18:00", "19:00"), Some(USER), Some(&cred()))
        .await
        .unwrap()
        .fail_open();
    let ids: Vec<_> = same_activity.conflicts.iter().map(|r| r.id.as_deref()).collect();
    assert_eq!(ids, vec![Some("r-virtual")]);

    let numeric = det
        .check_for_conflicts("5", &CandidateSchedule::new("2024-06-21", "18:00", "19:00"), Some(USER), Some(&cred()))
        .await
        .unwrap()
        .fail_open();
    assert_eq!(numeric.conflicts.len(), 1);
    assert_eq!(numeric.conflicts[0].id.as_deref(), Some("17"));

    let overlap = det
        .check_for_conflicts("dance-3", &CandidateSchedule::new("2024-06-10", "09:30", "10:30"), Some(USER), Some(&cred()))
        .await
        .unwrap()
        .fail_open();
    assert_eq!(overlap.conflicts.len(), 1);
    assert_eq!(overlap.conflicts[0].id.as_deref(), Some("r-naive"));
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let store = store_with(vec![
        json!({ "_id": "broken-1", "activity": "swim-2" }),
        json!({ "_id": "broken-2", "schedule": { "date": "2024-06-10", "startTime": "09:00", "endTime": "10:00" } }),
        json!({ "_id": "broken-3", "activity": "tennis-4", "schedule": { "date": "nope", "startTime": "09:00", "endTime": "10:00" } }),
        json!(42),
        record("ok", "climb-5", "2024-06-10", "09:00", "10:00", "pending"),
    ]);
    let det = detector(store);
    let result = det
        .check_for_conflicts_fail_open("dance-3", &CandidateSchedule::new("2024-06-10", "09:30", "09:45"), Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(result.has_conflict);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].id.as_deref(), Some("ok"));
}

#[tokio::test]
async fn cancelled_reservations_count_by_default() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "cancelled")]);
    let schedule = CandidateSchedule::new("2024-06-10", "09:00", "10:00");

    let inclusive = detector(store.clone());
    let outcome = inclusive
        .check_for_conflicts("dance-3", &schedule, Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(outcome.has_conflict());

    let strict = ConflictDetector::new(
        store,
        DetectorOptions {
            status_policy: StatusPolicy::ActiveOnly,
            ..DetectorOptions::default()
        },
    );
    let outcome = strict
        .check_for_conflicts("dance-3", &schedule, Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(!outcome.has_conflict());
}

#[tokio::test]
async fn venue_offset_decides_the_calendar_day() {
    // 23:30 UTC on the 10th is already the 11th two hours east.
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10T23:30:00Z", "09:00", "10:00", "confirmed")]);
    let schedule = CandidateSchedule::new("2024-06-11", "09:30", "10:30");

    let at_utc = detector(store.clone());
    let outcome = at_utc
        .check_for_conflicts("dance-3", &schedule, Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(!outcome.has_conflict());

    let east = ConflictDetector::new(
        store,
        DetectorOptions {
            venue_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            ..DetectorOptions::default()
        },
    );
    let outcome = east
        .check_for_conflicts("dance-3", &schedule, Some(USER), Some(&cred()))
        .await
        .unwrap();
    assert!(outcome.has_conflict());
}

#[tokio::test]
async fn repeated_checks_are_idempotent() {
    let store = store_with(vec![
        record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed"),
        record("r2", "yoga-1", "2024-06-14", "18:00", "19:00", "pending"),
    ]);
    let det = detector(store);
    let schedule = CandidateSchedule::new("2024-06-10", "09:30", "10:30");
    let first = det.check_for_conflicts("yoga-1", &schedule, Some(USER), Some(&cred())).await.unwrap();
    let second = det.check_for_conflicts("yoga-1", &schedule, Some(USER), Some(&cred())).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.fail_open().conflicts.len(), 2);
}

// ── Latest-wins checks ───────────────────────────────────

/// First fetch parks until released; later fetches go straight through.
struct StalledSource {
    inner: Arc<InMemoryStore>,
    calls: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl ReservationSource for StalledSource {
    async fn fetch_reservations(&self, credential: &Credential, user_id: Option<&str>) -> Result<Vec<Value>, StoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.release.notified().await;
        }
        self.inner.fetch_reservations(credential, user_id).await
    }
}

#[tokio::test]
async fn newer_check_supersedes_in_flight_check() {
    let source = Arc::new(StalledSource {
        inner: store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]),
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    let det = Arc::new(ConflictDetector::new(source.clone(), DetectorOptions::default()));

    let stale = det.candidate("dance-3", &CandidateSchedule::new("2024-06-10", "09:30", "10:30")).unwrap();
    let fresh = det.candidate("dance-3", &CandidateSchedule::new("2024-06-10", "10:00", "11:00")).unwrap();

    let first = {
        let det = det.clone();
        tokio::spawn(async move { det.check_latest("member-7/booking", &stale, Some(USER), &cred()).await })
    };
    while source.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let second = det
        .check_latest("member-7/booking", &fresh, Some(USER), &cred())
        .await
        .unwrap();
    assert_eq!(second, CheckOutcome::Verified(ConflictResult::clear()));

    let first = first.await.unwrap();
    assert!(matches!(first, Err(DetectorError::Superseded { .. })));
    assert_eq!(det.sequencer().in_flight(), 0);
}

#[tokio::test]
async fn check_latest_returns_result_when_uncontested() {
    let store = store_with(vec![record("r1", "swim-2", "2024-06-10", "09:00", "10:00", "confirmed")]);
    let det = detector(store);
    let c = det.candidate("dance-3", &CandidateSchedule::new("2024-06-10", "09:30", "10:30")).unwrap();
    let outcome = det.check_latest("k", &c, Some(USER), &cred()).await.unwrap();
    assert!(outcome.has_conflict());
    assert_eq!(det.sequencer().in_flight(), 0);
}

#[tokio::test]
async fn abandoned_check_releases_its_key() {
    let source = Arc::new(StalledSource {
        inner: store_with(vec![]),
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    let det = ConflictDetector::new(source.clone(), DetectorOptions::default());
    let c = det.candidate("dance-3", &CandidateSchedule::new("2024-06-10", "09:30", "10:30")).unwrap();
    let credential = cred();

    let mut pending = tokio_test::task::spawn(det.check_latest("k", &c, Some(USER), &credential));
    tokio_test::assert_pending!(pending.poll());
    assert_eq!(det.sequencer().in_flight(), 1);

    drop(pending);
    assert_eq!(det.sequencer().in_flight(), 0);
}
