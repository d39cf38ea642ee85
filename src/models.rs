use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::recurrence::RecurrenceRule;

pub type SeriesId = i64;
pub type InstanceId = i64;
pub type AttendanceId = i64;
pub type BlockId = i64;
pub type CoachId = i64;
pub type ParticipantId = i64;
pub type UserId = i64;
pub type LevelId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Academy,
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    #[default]
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Scheduled,
    Canceled,
    Rescheduled,
    Completed,
}

impl InstanceStatus {
    /// Stored values that win over the date-derived status when rendering.
    pub fn is_terminal(self) -> bool {
        !matches!(self, InstanceStatus::Scheduled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Attendance {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Justification {
    Justified,
    Unjustified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Break,
    Holiday,
    OffWork,
    Personal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    Single,
    Future,
}

/// Lesson template: the default schedule and membership of every occurrence
/// that has not been overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub id: SeriesId,
    pub title: String,
    pub description: Option<String>,
    pub kind: LessonKind,
    pub color: Option<String>,
    pub level_id: Option<LevelId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub recurrence: Option<RecurrenceRule>,
    pub recurrence_end: Option<NaiveDate>,
    pub max_participants: u32,
    pub status: SeriesStatus,
    pub coach_ids: BTreeSet<CoachId>,
    pub participant_ids: BTreeSet<ParticipantId>,
}

impl Series {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Start and end of the occurrence on `date`, keeping the template's time of day.
    pub fn occurrence_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = date.and_time(self.start.time()).and_utc();
        (start, start + self.duration())
    }
}

/// Persisted exception for one concrete occurrence of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideInstance {
    pub id: InstanceId,
    pub series_id: SeriesId,
    /// Date inside the series expansion this instance stands for; merge key with `series_id`.
    pub original_date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: InstanceStatus,
    pub title: Option<String>,
    pub max_participants: u32,
    pub level_id: Option<LevelId>,
    pub notes: Option<String>,
    pub coach_ids: BTreeSet<CoachId>,
    pub participant_ids: BTreeSet<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub instance_id: InstanceId,
    pub participant_id: ParticipantId,
    pub attended: Option<Attendance>,
    pub justification: Option<Justification>,
    pub invited: bool,
    pub confirmed: bool,
    pub validated: bool,
}

impl AttendanceRecord {
    pub fn invitation(instance_id: InstanceId, participant_id: ParticipantId) -> Self {
        Self {
            id: 0,
            instance_id,
            participant_id,
            attended: None,
            justification: None,
            invited: true,
            confirmed: false,
            validated: false,
        }
    }
}

/// Occupied time owned by a user. Every occurrence is rendered straight from the block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalendarBlock {
    pub id: BlockId,
    pub owner_id: UserId,
    pub kind: BlockKind,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub recurrence: Option<RecurrenceRule>,
    pub recurrence_end: Option<NaiveDate>,
}

impl CalendarBlock {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// Inclusive range of instants a calendar query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Whole days `from` through `to`, both inclusive.
    pub fn for_dates(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        let start = from.and_time(NaiveTime::MIN).and_utc();
        let end = to
            .checked_add_days(Days::new(1))?
            .and_time(NaiveTime::MIN)
            .and_utc()
            - TimeDelta::nanoseconds(1);
        Self::new(start, end)
    }

    pub fn for_day(date: NaiveDate) -> Option<Self> {
        Self::for_dates(date, date)
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end.date_naive() - self.start.date_naive()).num_days() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewSeries {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: LessonKind,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub level_id: Option<LevelId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub recurrence_end: Option<NaiveDate>,
    pub max_participants: u32,
    #[serde(default)]
    pub coach_ids: Vec<CoachId>,
    #[serde(default)]
    pub participant_ids: Vec<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewBlock {
    pub owner_id: UserId,
    pub kind: BlockKind,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub recurrence_end: Option<NaiveDate>,
}

/// Reference to one occurrence: either a not-yet-materialized series date or a stored instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum OccurrenceRef {
    #[serde(rename_all = "camelCase")]
    Series { series_id: SeriesId, date: NaiveDate },
    #[serde(rename_all = "camelCase")]
    Instance { instance_id: InstanceId },
}

/// Changes applied to a single occurrence, atomically with its materialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct OccurrenceEdits {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "18:00")]
    pub start_time: Option<NaiveTime>,
    #[serde(with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "19:30")]
    pub end_time: Option<NaiveTime>,
    pub max_participants: Option<u32>,
    pub level_id: Option<LevelId>,
    pub notes: Option<String>,
    pub status: Option<InstanceStatus>,
    pub add_participants: Vec<ParticipantId>,
    pub remove_participants: Vec<ParticipantId>,
}

impl OccurrenceEdits {
    pub fn moves_occurrence(&self) -> bool {
        self.date.is_some() || self.start_time.is_some() || self.end_time.is_some()
    }
}

/// Changes applied to a series template (future scope) or converted to occurrence edits (single scope).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SeriesEdits {
    pub title: Option<String>,
    pub color: Option<String>,
    pub max_participants: Option<u32>,
    pub level_id: Option<LevelId>,
    pub date: Option<NaiveDate>,
    #[serde(with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "18:00")]
    pub start_time: Option<NaiveTime>,
    #[serde(with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "19:30")]
    pub end_time: Option<NaiveTime>,
    pub recurrence_end: Option<NaiveDate>,
    pub add_participants: Vec<ParticipantId>,
    pub remove_participants: Vec<ParticipantId>,
}

impl From<&SeriesEdits> for OccurrenceEdits {
    fn from(edits: &SeriesEdits) -> Self {
        Self {
            title: edits.title.clone(),
            date: edits.date,
            start_time: edits.start_time,
            end_time: edits.end_time,
            max_participants: edits.max_participants,
            level_id: edits.level_id,
            notes: None,
            status: None,
            add_participants: edits.add_participants.clone(),
            remove_participants: edits.remove_participants.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub participant_id: ParticipantId,
    pub attended: Attendance,
    #[serde(default)]
    pub justification: Option<Justification>,
}

/// `HH:MM` wall-clock times on the wire.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => super::serialize(time, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.filter(|value| !value.is_empty())
                .map(|value| {
                    NaiveTime::parse_from_str(&value, super::FORMAT)
                        .map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}
