//! Copy-on-write splitting of recurring series.
//!
//! A future-scope change never rewrites past occurrences: the series is cut at
//! the pivot and the remainder continues as a new series with the same rule, so
//! both parts together still produce exactly the original occurrence set.

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::ScheduleError;
use crate::materialize::{occurrence_or_not_found, series_or_not_found};
use crate::models::{InstanceId, Series, SeriesEdits, SeriesId, TimeWindow};
use crate::recurrence::expand;
use crate::store::Tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SplitOutcome {
    #[serde(rename_all = "camelCase")]
    InPlace { series_id: SeriesId },
    #[serde(rename_all = "camelCase")]
    Split {
        original: SeriesId,
        continuation: SeriesId,
    },
}

impl SplitOutcome {
    /// The series that future-scope edits should be applied to.
    pub fn editable(&self) -> SeriesId {
        match *self {
            SplitOutcome::InPlace { series_id } => series_id,
            SplitOutcome::Split { continuation, .. } => continuation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    #[serde(rename_all = "camelCase")]
    InstanceDeleted { instance_id: InstanceId },
    #[serde(rename_all = "camelCase")]
    SeriesDeleted { series_id: SeriesId },
    #[serde(rename_all = "camelCase")]
    Truncated {
        series_id: SeriesId,
        removed_instances: usize,
    },
    #[serde(rename_all = "camelCase")]
    StartShifted { series_id: SeriesId },
    #[serde(rename_all = "camelCase")]
    Split {
        original: SeriesId,
        continuation: SeriesId,
    },
}

fn day_before(date: NaiveDate) -> Result<NaiveDate, ScheduleError> {
    date.pred_opt()
        .ok_or_else(|| ScheduleError::invariant(format!("no day before {date}")))
}

fn day_after(date: NaiveDate) -> Result<NaiveDate, ScheduleError> {
    date.succ_opt()
        .ok_or_else(|| ScheduleError::invariant(format!("no day after {date}")))
}

/// Moves every instance of `from` dated on or after `first_date` to `to`.
fn reparent_from(
    tables: &mut Tables,
    from: SeriesId,
    to: SeriesId,
    first_date: NaiveDate,
) -> Result<usize, ScheduleError> {
    let moved: Vec<InstanceId> = tables
        .instances()
        .filter(|instance| instance.series_id == from && instance.original_date >= first_date)
        .map(|instance| instance.id)
        .collect();
    for instance_id in &moved {
        tables.reparent_instance(*instance_id, to)?;
    }
    Ok(moved.len())
}

/// Clones `series_id` into a continuation starting on `first_date` and ending
/// where the original ended. The original is not modified.
fn clone_continuation(
    tables: &mut Tables,
    series_id: SeriesId,
    first_date: NaiveDate,
) -> Result<SeriesId, ScheduleError> {
    let mut continuation = series_or_not_found(tables, series_id)?.clone();
    let (start, end) = continuation.occurrence_bounds(first_date);
    continuation.start = start;
    continuation.end = end;
    Ok(tables.insert_series(continuation))
}

/// Prepares `series_id` for an edit that takes effect from `pivot` onward.
pub fn split_for_future_edit(
    tables: &mut Tables,
    series_id: SeriesId,
    pivot: NaiveDate,
) -> Result<SplitOutcome, ScheduleError> {
    let series = series_or_not_found(tables, series_id)?;
    let start_date = series.start_date();
    if pivot < start_date {
        return Err(ScheduleError::invariant(format!(
            "pivot {pivot} is before the series start {start_date}"
        )));
    }
    if !series.is_recurring() || pivot == start_date {
        return Ok(SplitOutcome::InPlace { series_id });
    }
    if let Some(recurrence_end) = series.recurrence_end
        && pivot > recurrence_end
    {
        return Err(ScheduleError::invariant(format!(
            "pivot {pivot} is after the series end {recurrence_end}"
        )));
    }

    let continuation = clone_continuation(tables, series_id, pivot)?;
    tables.series_mut(series_id)?.recurrence_end = Some(day_before(pivot)?);
    let moved = reparent_from(tables, series_id, continuation, pivot)?;

    info!(
        series_id,
        continuation,
        %pivot,
        moved_instances = moved,
        "split series for future edit"
    );
    Ok(SplitOutcome::Split {
        original: series_id,
        continuation,
    })
}

/// Applies template edits to a series that starts at (or was split at) the edited occurrence.
/// `pivot` is the occurrence being edited; a `date` edit swaps its weekday in the rule.
pub fn apply_series_edits(
    tables: &mut Tables,
    series_id: SeriesId,
    edits: &SeriesEdits,
    pivot: NaiveDate,
) -> Result<(), ScheduleError> {
    let mut updated = series_or_not_found(tables, series_id)?.clone();

    if let Some(title) = &edits.title {
        updated.title = title.clone();
    }
    if let Some(color) = &edits.color {
        updated.color = Some(color.clone());
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

    let times_edited = edits.start_time.is_some() || edits.end_time.is_some();
    if let Some(moved_to) = edits.date
        && let Some(rule) = &updated.recurrence
    {
        updated.recurrence = Some(rule.with_moved_weekday(pivot, moved_to));
    }
    // The template stays anchored at the earlier of the two dates, so occurrences
    // between the pivot and the new date survive the move.
    let anchor = match edits.date {
        Some(moved_to) if updated.is_recurring() => moved_to.min(updated.start_date()),
        Some(moved_to) => moved_to,
        None => updated.start_date(),
    };
    if times_edited {
        let start_time = edits.start_time.unwrap_or_else(|| updated.start.time());
        let end_time = edits.end_time.unwrap_or_else(|| updated.end.time());
        updated.start = anchor.and_time(start_time).and_utc();
        updated.end = anchor.and_time(end_time).and_utc();
    } else if edits.date.is_some() {
        let (start, end) = updated.occurrence_bounds(anchor);
        updated.start = start;
        updated.end = end;
    }
    if updated.end <= updated.start {
        return Err(ScheduleError::invariant("end time must be after start time"));
    }

    if let Some(recurrence_end) = edits.recurrence_end {
        updated.recurrence_end = Some(recurrence_end);
    }
    if let Some(recurrence_end) = updated.recurrence_end
        && recurrence_end < updated.start_date()
    {
        return Err(ScheduleError::invariant(
            "recurrenceEndDate must not be before the series start",
        ));
    }

    for participant_id in &edits.add_participants {
        if !edits.remove_participants.contains(participant_id) {
            updated.participant_ids.insert(*participant_id);
        }
    }
    for participant_id in &edits.remove_participants {
        updated.participant_ids.remove(participant_id);
    }

    if let Some(moved_to) = edits.date
        && moved_to != pivot
    {
        move_pivot_instance(tables, &updated, pivot, moved_to, times_edited)?;
    }

    *tables.series_mut(series_id)? = updated;
    info!(series_id, %pivot, "edited series template");
    Ok(())
}

/// Re-keys a stored instance of the pivot occurrence to the date it moved to.
fn move_pivot_instance(
    tables: &mut Tables,
    updated: &Series,
    pivot: NaiveDate,
    moved_to: NaiveDate,
    times_edited: bool,
) -> Result<(), ScheduleError> {
    let Some(instance) = tables.instance_for(updated.id, pivot) else {
        return Ok(());
    };
    let instance_id = instance.id;
    let (start, end) = if times_edited {
        updated.occurrence_bounds(moved_to)
    } else {
        let shift = moved_to.signed_duration_since(pivot);
        (instance.start + shift, instance.end + shift)
    };
    if tables.instance_for(updated.id, moved_to).is_some() {
        return Err(ScheduleError::invariant(format!(
            "an occurrence on {moved_to} is already stored"
        )));
    }

    tables.rekey_instance(instance_id, moved_to)?;
    let instance = tables.instance_mut(instance_id)?;
    instance.start = start;
    instance.end = end;
    info!(instance_id, %pivot, %moved_to, "moved stored occurrence with its series");
    Ok(())
}

/// Removes every occurrence from `pivot` onward.
pub fn truncate_for_future_delete(
    tables: &mut Tables,
    series_id: SeriesId,
    pivot: NaiveDate,
) -> Result<DeleteOutcome, ScheduleError> {
    let series = series_or_not_found(tables, series_id)?;
    if pivot <= series.start_date() {
        tables.delete_series(series_id)?;
        info!(series_id, %pivot, "deleted series from its start");
        return Ok(DeleteOutcome::SeriesDeleted { series_id });
    }
    if !series.is_recurring() {
        return Err(ScheduleError::OccurrenceNotFound {
            series_id,
            date: pivot,
        });
    }

    let last_kept = day_before(pivot)?;
    let recurrence_end = series
        .recurrence_end
        .map_or(last_kept, |current| current.min(last_kept));
    tables.series_mut(series_id)?.recurrence_end = Some(recurrence_end);

    let doomed: Vec<InstanceId> = tables
        .instances()
        .filter(|instance| instance.series_id == series_id && instance.original_date >= pivot)
        .map(|instance| instance.id)
        .collect();
    for instance_id in &doomed {
        tables.delete_instance(*instance_id)?;
    }

    info!(series_id, %pivot, removed = doomed.len(), "truncated series");
    Ok(DeleteOutcome::Truncated {
        series_id,
        removed_instances: doomed.len(),
    })
}

/// Deletes the single occurrence on `date`, leaving the rest of the series intact.
pub fn split_out_occurrence(
    tables: &mut Tables,
    series_id: SeriesId,
    date: NaiveDate,
) -> Result<DeleteOutcome, ScheduleError> {
    let series = occurrence_or_not_found(tables, series_id, date)?;
    if !series.is_recurring() {
        tables.delete_series(series_id)?;
        info!(series_id, %date, "deleted single-occurrence series");
        return Ok(DeleteOutcome::SeriesDeleted { series_id });
    }

    let start_date = series.start_date();
    let has_before = date > start_date
        && TimeWindow::for_dates(start_date, day_before(date)?).is_some_and(|window| {
            !expand(
                series.start,
                series.recurrence.as_ref(),
                series.recurrence_end,
                &window,
            )
            .is_empty()
        });
    let after_from = day_after(date)?;
    // One week always contains the next weekly occurrence when the rule is open-ended.
    let after_to = match series.recurrence_end {
        Some(recurrence_end) => recurrence_end,
        None => after_from
            .checked_add_days(Days::new(7))
            .ok_or_else(|| ScheduleError::invariant(format!("no week after {date}")))?,
    };
    let next_occurrence = TimeWindow::for_dates(after_from, after_to).and_then(|window| {
        expand(
            series.start,
            series.recurrence.as_ref(),
            series.recurrence_end,
            &window,
        )
        .first()
        .map(|instant| instant.date_naive())
    });

    let target = tables.instance_for(series_id, date).map(|instance| instance.id);
    let removed_instances = usize::from(target.is_some());
    if let Some(instance_id) = target {
        tables.delete_instance(instance_id)?;
    }

    let outcome = match (has_before, next_occurrence) {
        (false, None) => {
            tables.delete_series(series_id)?;
            DeleteOutcome::SeriesDeleted { series_id }
        }
        (false, Some(next)) => {
            let updated = tables.series_mut(series_id)?;
            let (start, end) = updated.occurrence_bounds(next);
            updated.start = start;
            updated.end = end;
            DeleteOutcome::StartShifted { series_id }
        }
        (true, None) => {
            tables.series_mut(series_id)?.recurrence_end = Some(day_before(date)?);
            DeleteOutcome::Truncated {
                series_id,
                removed_instances,
            }
        }
        (true, Some(next)) => {
            let continuation = clone_continuation(tables, series_id, next)?;
            tables.series_mut(series_id)?.recurrence_end = Some(day_before(date)?);
            reparent_from(tables, series_id, continuation, after_from)?;
            DeleteOutcome::Split {
                original: series_id,
                continuation,
            }
        }
    };

    info!(series_id, %date, ?outcome, "removed single occurrence");
    Ok(outcome)
}
