//! Turning virtual occurrences into stored override instances, and editing them.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::ScheduleError;
use crate::models::{
    AttendanceEntry, AttendanceRecord, InstanceId, InstanceStatus, OccurrenceEdits, OccurrenceRef,
    OverrideInstance, Series, SeriesId, TimeWindow,
};
use crate::recurrence::expand;
use crate::store::{StoreError, Tables};

pub(crate) fn series_or_not_found(
    tables: &Tables,
    series_id: SeriesId,
) -> Result<&Series, ScheduleError> {
    tables
        .series(series_id)
        .map_err(|_| ScheduleError::SeriesNotFound(series_id))
}

pub(crate) fn instance_or_not_found(
    tables: &Tables,
    instance_id: InstanceId,
) -> Result<&OverrideInstance, ScheduleError> {
    tables
        .instance(instance_id)
        .map_err(|_| ScheduleError::InstanceNotFound(instance_id))
}

/// True when the series' own expansion produces an occurrence on `date`.
pub(crate) fn occurs_on(series: &Series, date: NaiveDate) -> bool {
    TimeWindow::for_day(date).is_some_and(|window| {
        !expand(
            series.start,
            series.recurrence.as_ref(),
            series.recurrence_end,
            &window,
        )
        .is_empty()
    })
}

/// The series, provided `date` is one of its occurrences, virtual or stored.
pub(crate) fn occurrence_or_not_found(
    tables: &Tables,
    series_id: SeriesId,
    date: NaiveDate,
) -> Result<&Series, ScheduleError> {
    let series = series_or_not_found(tables, series_id)?;
    if occurs_on(series, date) || tables.instance_for(series_id, date).is_some() {
        Ok(series)
    } else {
        Err(ScheduleError::OccurrenceNotFound { series_id, date })
    }
}

/// Returns the override instance for `(series_id, date)`, creating it from the
/// template on first use. Creation snapshots the series' coaches and participants
/// and sends every participant an invitation.
pub fn materialize(
    tables: &mut Tables,
    series_id: SeriesId,
    date: NaiveDate,
) -> Result<InstanceId, ScheduleError> {
    if let Some(existing) = tables.instance_for(series_id, date) {
        return Ok(existing.id);
    }

    let series = series_or_not_found(tables, series_id)?;
    if !occurs_on(series, date) {
        return Err(ScheduleError::OccurrenceNotFound { series_id, date });
    }

    let (start, end) = series.occurrence_bounds(date);
    let instance = OverrideInstance {
        id: 0,
        series_id,
        original_date: date,
        start,
        end,
        status: InstanceStatus::Scheduled,
        title: None,
        max_participants: series.max_participants,
        level_id: series.level_id,
        notes: None,
        coach_ids: series.coach_ids.clone(),
        participant_ids: series.participant_ids.clone(),
    };
    let participants: Vec<_> = instance.participant_ids.iter().copied().collect();

    let instance_id = match tables.insert_instance(instance) {
        Ok(id) => id,
        Err(StoreError::UniqueViolation { .. }) => {
            // Another writer won the race for this occurrence; reuse its row.
            return tables
                .instance_for(series_id, date)
                .map(|winner| winner.id)
                .ok_or(ScheduleError::OccurrenceNotFound { series_id, date });
        }
        Err(err) => return Err(err.into()),
    };

    for participant_id in participants {
        tables.insert_attendance(AttendanceRecord::invitation(instance_id, participant_id))?;
    }

    info!(series_id, instance_id, %date, "materialized occurrence");
    Ok(instance_id)
}

pub fn resolve_instance(
    tables: &mut Tables,
    target: OccurrenceRef,
) -> Result<InstanceId, ScheduleError> {
    match target {
        OccurrenceRef::Series { series_id, date } => materialize(tables, series_id, date),
        OccurrenceRef::Instance { instance_id } => {
            instance_or_not_found(tables, instance_id).map(|instance| instance.id)
        }
    }
}

/// Applies `edits` to a stored instance. Moving the date or time marks the
/// instance rescheduled unless the edits carry their own status.
pub fn apply_occurrence_edits(
    tables: &mut Tables,
    instance_id: InstanceId,
    edits: &OccurrenceEdits,
) -> Result<(), ScheduleError> {
    let current = instance_or_not_found(tables, instance_id)?;
    let mut updated = current.clone();

    if let Some(title) = &edits.title {
        updated.title = Some(title.clone());
    }
    if let Some(notes) = &edits.notes {
        updated.notes = Some(notes.clone());
    }
    if let Some(level_id) = edits.level_id {
        updated.level_id = Some(level_id);
    }
    if let Some(max_participants) = edits.max_participants {
        if max_participants == 0 {
            return Err(ScheduleError::invariant("maxParticipants must be positive"));
        }
        updated.max_participants = max_participants;
    }

    if edits.moves_occurrence() {
        let date = edits.date.unwrap_or_else(|| current.start.date_naive());
        let start_time = edits.start_time.unwrap_or_else(|| current.start.time());
        let end_time = edits.end_time.unwrap_or_else(|| current.end.time());
        updated.start = date.and_time(start_time).and_utc();
        updated.end = date.and_time(end_time).and_utc();
        if updated.end <= updated.start {
            return Err(ScheduleError::invariant("end time must be after start time"));
        }
        let moved = updated.start != current.start || updated.end != current.end;
        if moved && edits.status.is_none() {
            updated.status = InstanceStatus::Rescheduled;
        }
    }
    if let Some(status) = edits.status {
        updated.status = status;
    }

    let added: Vec<_> = edits
        .add_participants
        .iter()
        .copied()
        .filter(|participant_id| !edits.remove_participants.contains(participant_id))
        .collect();
    for participant_id in &added {
        updated.participant_ids.insert(*participant_id);
    }
    for participant_id in &edits.remove_participants {
        updated.participant_ids.remove(participant_id);
    }

    *tables.instance_mut(instance_id)? = updated;

    for participant_id in added {
        if tables.attendance_for(instance_id, participant_id).is_none() {
            tables.insert_attendance(AttendanceRecord::invitation(instance_id, participant_id))?;
        }
    }
    for participant_id in &edits.remove_participants {
        tables.delete_attendance(instance_id, *participant_id);
    }

    debug!(instance_id, "applied occurrence edits");
    Ok(())
}

/// Materializes the referenced occurrence if needed and applies `edits` in the same write.
pub fn materialize_and_edit(
    tables: &mut Tables,
    target: OccurrenceRef,
    edits: &OccurrenceEdits,
) -> Result<InstanceId, ScheduleError> {
    let instance_id = resolve_instance(tables, target)?;
    apply_occurrence_edits(tables, instance_id, edits)?;
    Ok(instance_id)
}

/// Upserts one attendance record per entry. Recorded participants count as
/// invited, confirmed and validated, and are linked to the instance.
pub fn record_attendance(
    tables: &mut Tables,
    target: OccurrenceRef,
    entries: &[AttendanceEntry],
) -> Result<InstanceId, ScheduleError> {
    let instance_id = resolve_instance(tables, target)?;

    for entry in entries {
        match tables.attendance_for_mut(instance_id, entry.participant_id) {
            Some(record) => {
                record.attended = Some(entry.attended);
                record.justification = entry.justification;
                record.invited = true;
                record.confirmed = true;
                record.validated = true;
            }
            None => {
                tables.insert_attendance(AttendanceRecord {
                    id: 0,
                    instance_id,
                    participant_id: entry.participant_id,
                    attended: Some(entry.attended),
                    justification: entry.justification,
                    invited: true,
                    confirmed: true,
                    validated: true,
                })?;
            }
        }
        tables
            .instance_mut(instance_id)?
            .participant_ids
            .insert(entry.participant_id);
    }

    info!(instance_id, recorded = entries.len(), "recorded attendance");
    Ok(instance_id)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{NaiveTime, TimeZone, Utc, Weekday};

    use super::*;
    use crate::models::{Attendance, Justification, LessonKind, SeriesStatus};
    use crate::recurrence::RecurrenceRule;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn setup() -> (Tables, SeriesId) {
        let mut tables = Tables::default();
        let series_id = tables.insert_series(Series {
            id: 0,
            title: "Adults".to_string(),
            description: None,
            kind: LessonKind::Academy,
            color: None,
            level_id: Some(3),
            start: Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).unwrap(),
            recurrence: Some(RecurrenceRule::weekly([Weekday::Mon, Weekday::Wed])),
            recurrence_end: None,
            max_participants: 4,
            status: SeriesStatus::Active,
            coach_ids: BTreeSet::from([10]),
            participant_ids: BTreeSet::from([1, 2]),
        });
        (tables, series_id)
    }

    #[test]
    fn test_materialize_snapshots_template() {
        let (mut tables, series_id) = setup();
        let instance_id = materialize(&mut tables, series_id, date(8)).unwrap();
        let instance = tables.instance(instance_id).unwrap();
        assert_eq!(instance.start, Utc.with_ymd_and_hms(2024, 1, 8, 18, 0, 0).unwrap());
        assert_eq!(instance.end, Utc.with_ymd_and_hms(2024, 1, 8, 19, 0, 0).unwrap());
        assert_eq!(instance.max_participants, 4);
        assert_eq!(instance.level_id, Some(3));
        assert_eq!(instance.coach_ids, BTreeSet::from([10]));
        assert_eq!(instance.participant_ids, BTreeSet::from([1, 2]));

        let record = tables.attendance_for(instance_id, 1).unwrap();
        assert!(record.invited);
        assert!(!record.confirmed);
        assert!(!record.validated);
        assert_eq!(tables.attendance_of(instance_id).count(), 2);
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let (mut tables, series_id) = setup();
        let first = materialize(&mut tables, series_id, date(8)).unwrap();
        let second = materialize(&mut tables, series_id, date(8)).unwrap();
        assert_eq!(first, second);
        assert_eq!(tables.instances().count(), 1);
        assert_eq!(tables.attendance_of(first).count(), 2);
    }

    #[test]
    fn test_materialize_rejects_dates_outside_expansion() {
        let (mut tables, series_id) = setup();
        let err = materialize(&mut tables, series_id, date(9)).unwrap_err();
        assert!(matches!(err, ScheduleError::OccurrenceNotFound { .. }));
        let err = materialize(&mut tables, 999, date(8)).unwrap_err();
        assert!(matches!(err, ScheduleError::SeriesNotFound(999)));
    }

    #[test]
    fn test_time_move_marks_rescheduled() {
        let (mut tables, series_id) = setup();
        let edits = OccurrenceEdits {
            start_time: NaiveTime::from_hms_opt(17, 0, 0),
            ..Default::default()
        };
        let target = OccurrenceRef::Series {
            series_id,
            date: date(8),
        };
        let instance_id = materialize_and_edit(&mut tables, target, &edits).unwrap();
        let instance = tables.instance(instance_id).unwrap();
        assert_eq!(instance.status, InstanceStatus::Rescheduled);
        assert_eq!(instance.start, Utc.with_ymd_and_hms(2024, 1, 8, 17, 0, 0).unwrap());
        assert_eq!(instance.original_date, date(8));
    }

    #[test]
    fn test_explicit_status_wins_over_move() {
        let (mut tables, series_id) = setup();
        let edits = OccurrenceEdits {
            date: Some(date(9)),
            status: Some(InstanceStatus::Canceled),
            ..Default::default()
        };
        let target = OccurrenceRef::Series {
            series_id,
            date: date(8),
        };
        let instance_id = materialize_and_edit(&mut tables, target, &edits).unwrap();
        assert_eq!(
            tables.instance(instance_id).unwrap().status,
            InstanceStatus::Canceled
        );
    }

    #[test]
    fn test_invalid_edit_is_rejected() {
        let (mut tables, series_id) = setup();
        let instance_id = materialize(&mut tables, series_id, date(8)).unwrap();
        let edits = OccurrenceEdits {
            end_time: NaiveTime::from_hms_opt(17, 0, 0),
            ..Default::default()
        };
        let err = apply_occurrence_edits(&mut tables, instance_id, &edits).unwrap_err();
        assert!(matches!(err, ScheduleError::InvariantViolation(_)));
    }

    #[test]
    fn test_participant_changes_follow_attendance() {
        let (mut tables, series_id) = setup();
        let instance_id = materialize(&mut tables, series_id, date(8)).unwrap();
        let edits = OccurrenceEdits {
            add_participants: vec![5, 6],
            remove_participants: vec![1, 6],
            ..Default::default()
        };
        apply_occurrence_edits(&mut tables, instance_id, &edits).unwrap();

        let instance = tables.instance(instance_id).unwrap();
        assert_eq!(instance.participant_ids, BTreeSet::from([2, 5]));
        assert!(tables.attendance_for(instance_id, 5).is_some());
        assert!(tables.attendance_for(instance_id, 1).is_none());
        assert!(tables.attendance_for(instance_id, 6).is_none());
    }

    #[test]
    fn test_record_attendance_upserts() {
        let (mut tables, series_id) = setup();
        let target = OccurrenceRef::Series {
            series_id,
            date: date(8),
        };
        let entries = vec![
            AttendanceEntry {
                participant_id: 1,
                attended: Attendance::Present,
                justification: None,
            },
            AttendanceEntry {
                participant_id: 9,
                attended: Attendance::Absent,
                justification: Some(Justification::Justified),
            },
        ];
        let instance_id = record_attendance(&mut tables, target, &entries).unwrap();

        let existing = tables.attendance_for(instance_id, 1).unwrap();
        assert_eq!(existing.attended, Some(Attendance::Present));
        assert!(existing.confirmed && existing.validated);
        let walk_in = tables.attendance_for(instance_id, 9).unwrap();
        assert_eq!(walk_in.justification, Some(Justification::Justified));
        assert!(tables.instance(instance_id).unwrap().participant_ids.contains(&9));
        assert_eq!(tables.attendance_of(instance_id).count(), 3);
    }
}
