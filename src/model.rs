use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::limits::MAX_ID_LEN;

/// Minutes since midnight.
pub type Minutes = u16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    EmptyActivityId,
    IdTooLong(usize),
    BadTime(String),
    BadDate(String),
    StartAfterEnd { start: TimeOfDay, end: TimeOfDay },
    MissingField(&'static str),
    UnknownStatus(String),
    Malformed(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::EmptyActivityId => write!(f, "activity id must not be empty"),
            ModelError::IdTooLong(len) => {
                write!(f, "identifier too long: {len} bytes (max {MAX_ID_LEN})")
            }
            ModelError::BadTime(raw) => write!(f, "invalid time of day {raw:?}, expected HH:MM"),
            ModelError::BadDate(raw) => write!(f, "invalid calendar date {raw:?}"),
            ModelError::StartAfterEnd { start, end } => {
                write!(f, "start time {start} is after end time {end}")
            }
            ModelError::MissingField(name) => write!(f, "missing field: {name}"),
            ModelError::UnknownStatus(raw) => write!(f, "unknown reservation status {raw:?}"),
            ModelError::Malformed(msg) => write!(f, "malformed reservation record: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

// ── Time of day ──────────────────────────────────────────────────

/// A wall-clock time parsed from 24h `"HH:MM"` (a trailing `":SS"` is ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(Minutes);

impl TimeOfDay {
    pub fn from_hm(hours: u8, minutes: u8) -> Option<Self> {
        if hours > 23 || minutes > 59 {
            return None;
        }
        Some(Self(hours as Minutes * 60 + minutes as Minutes))
    }

    pub fn minutes(&self) -> Minutes {
        self.0
    }
}

fn parse_clock_part(part: &str, max: u8) -> Option<u8> {
    if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse::<u8>().ok().filter(|v| *v <= max)
}

impl FromStr for TimeOfDay {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ModelError::BadTime(s.to_string());
        let mut parts = s.trim().split(':');
        let hours = parts.next().and_then(|p| parse_clock_part(p, 23)).ok_or_else(bad)?;
        let minutes = parts.next().and_then(|p| parse_clock_part(p, 59)).ok_or_else(bad)?;
        if let Some(seconds) = parts.next() {
            parse_clock_part(seconds, 59).ok_or_else(bad)?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Self::from_hm(hours, minutes).ok_or_else(bad)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Half-open interval `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteSpan {
    pub start: Minutes,
    pub end: Minutes,
}

impl MinuteSpan {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start <= end, "MinuteSpan start must not be after end");
        Self {
            start: start.minutes(),
            end: end.minutes(),
        }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    /// Strict on both sides: touching endpoints and zero-length spans never overlap.
    pub fn overlaps(&self, other: &MinuteSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Calendar day ─────────────────────────────────────────────────

/// A calendar date normalized in the venue's fixed timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CalendarDay(NaiveDate);

impl CalendarDay {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Accepts plain dates, RFC 3339 timestamps (converted into `venue`), and
    /// naive timestamps (taken as venue-local).
    pub fn parse(raw: &str, venue: &FixedOffset) -> Result<Self, ModelError> {
        let trimmed = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(Self(date));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self(ts.with_timezone(venue).date_naive()));
        }
        if let Ok(naive) = trimmed.parse::<NaiveDateTime>() {
            return Ok(Self(naive.date()));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(Self(naive.date()));
        }
        Err(ModelError::BadDate(raw.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// Which existing reservations take part in a conflict check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Every record the store returns, whatever its status.
    #[default]
    All,
    /// Only pending and confirmed reservations.
    ActiveOnly,
}

impl StatusPolicy {
    pub fn admits(&self, status: ReservationStatus) -> bool {
        match self {
            StatusPolicy::All => true,
            StatusPolicy::ActiveOnly => !status.is_terminal(),
        }
    }
}

impl FromStr for StatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatusPolicy::All),
            "active" | "active_only" => Ok(StatusPolicy::ActiveOnly),
            other => Err(format!("unknown status policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub date: CalendarDay,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

impl Schedule {
    pub fn new(date: CalendarDay, start_time: TimeOfDay, end_time: TimeOfDay) -> Result<Self, ModelError> {
        if start_time > end_time {
            return Err(ModelError::StartAfterEnd {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self {
            date,
            start_time,
            end_time,
        })
    }

    pub fn span(&self) -> MinuteSpan {
        MinuteSpan::new(self.start_time, self.end_time)
    }
}

/// Raw slot as a caller (form) supplies it: strings in wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSchedule {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

impl CandidateSchedule {
    pub fn new(date: impl Into<String>, start_time: impl Into<String>, end_time: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }
}

/// The slot a user wants to book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationCandidate {
    pub activity_id: String,
    pub schedule: Schedule,
}

impl ReservationCandidate {
    pub fn new(activity_id: impl Into<String>, schedule: Schedule) -> Result<Self, ModelError> {
        let activity_id = activity_id.into();
        validate_id(&activity_id)?;
        Ok(Self {
            activity_id,
            schedule,
        })
    }

    pub fn parse(activity_id: &str, raw: &CandidateSchedule, venue: &FixedOffset) -> Result<Self, ModelError> {
        let date = CalendarDay::parse(&raw.date, venue)?;
        let start: TimeOfDay = raw.start_time.parse()?;
        let end: TimeOfDay = raw.end_time.parse()?;
        Self::new(activity_id.trim(), Schedule::new(date, start, end)?)
    }
}

pub(crate) fn validate_id(id: &str) -> Result<(), ModelError> {
    if id.trim().is_empty() {
        return Err(ModelError::EmptyActivityId);
    }
    if id.len() > MAX_ID_LEN {
        return Err(ModelError::IdTooLong(id.len()));
    }
    Ok(())
}

/// A reservation the store already holds for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingReservation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub activity: ActivityRef,
    pub schedule: Schedule,
    pub status: ReservationStatus,
}

/// Ids arrive as strings or, from some backends, as numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Text(s) => s.trim().to_string(),
            WireId::Number(n) => n.to_string(),
        }
    }
}

/// Documents may carry `_id`, `id`, or both (virtual ids); `_id` wins.
fn pick_id(mongo_id: Option<WireId>, id: Option<WireId>) -> Option<String> {
    mongo_id.or(id).map(WireId::into_string)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireActivity {
    Id(WireId),
    Object {
        #[serde(default, rename = "_id")]
        mongo_id: Option<WireId>,
        #[serde(default)]
        id: Option<WireId>,
        #[serde(default)]
        name: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSchedule {
    date: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

#[derive(Deserialize)]
struct WireReservation {
    #[serde(default, rename = "_id")]
    mongo_id: Option<WireId>,
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    activity: Option<WireActivity>,
    #[serde(default)]
    schedule: Option<WireSchedule>,
    #[serde(default)]
    status: Option<String>,
}

impl ExistingReservation {
    /// Decode one record from the store. A missing status reads as pending,
    /// the state the backend creates reservations in.
    pub fn from_record(record: &Value, venue: &FixedOffset) -> Result<Self, ModelError> {
        let wire = WireReservation::deserialize(record).map_err(|e| ModelError::Malformed(e.to_string()))?;

        let activity = match wire.activity.ok_or(ModelError::MissingField("activity"))? {
            WireActivity::Id(id) => ActivityRef {
                id: id.into_string(),
                name: None,
            },
            WireActivity::Object { mongo_id, id, name } => ActivityRef {
                id: pick_id(mongo_id, id).ok_or(ModelError::MissingField("activity._id"))?,
                name,
            },
        };
        validate_id(&activity.id)?;

        let schedule = wire.schedule.ok_or(ModelError::MissingField("schedule"))?;
        let date = schedule.date.ok_or(ModelError::MissingField("schedule.date"))?;
        let start = schedule.start_time.ok_or(ModelError::MissingField("schedule.startTime"))?;
        let end = schedule.end_time.ok_or(ModelError::MissingField("schedule.endTime"))?;
        let schedule = Schedule::new(CalendarDay::parse(&date, venue)?, start.parse()?, end.parse()?)?;

        let status = match wire.status {
            Some(raw) => raw.parse()?,
            None => ReservationStatus::Pending,
        };

        Ok(Self {
            id: pick_id(wire.mongo_id, wire.id),
            activity,
            schedule,
            status,
        })
    }
}

/// Outcome of a verified check. `has_conflict` is true iff `conflicts` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResult {
    pub has_conflict: bool,
    pub conflicts: Vec<ExistingReservation>,
}

impl ConflictResult {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn from_conflicts(conflicts: Vec<ExistingReservation>) -> Self {
        Self {
            has_conflict: !conflicts.is_empty(),
            conflicts,
        }
    }
}

/// A check either saw the store's data or could not reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verification", rename_all = "snake_case")]
pub enum CheckOutcome {
    Verified(ConflictResult),
    Unverified { reason: String },
}

impl CheckOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, CheckOutcome::Verified(_))
    }

    pub fn has_conflict(&self) -> bool {
        matches!(self, CheckOutcome::Verified(r) if r.has_conflict)
    }

    /// Collapse an unverified check into "no conflict".
    pub fn fail_open(self) -> ConflictResult {
        match self {
            CheckOutcome::Verified(result) => result,
            CheckOutcome::Unverified { .. } => ConflictResult::clear(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Verified(r) if r.has_conflict => "conflict",
            CheckOutcome::Verified(_) => "clear",
            CheckOutcome::Unverified { .. } => "unverified",
        }
    }
}
