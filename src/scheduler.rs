//! Entry point for every calendar operation. Reads run against a store snapshot,
//! writes run inside one store transaction each.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::error::ScheduleError;
use crate::materialize::{
    self, instance_or_not_found, occurrence_or_not_found, series_or_not_found,
};
use crate::merge::{CalendarEvent, block_events, merge_series_events, sort_events};
use crate::models::{
    AttendanceEntry, AttendanceRecord, BlockId, CalendarBlock, EditScope, InstanceId, NewBlock,
    NewSeries, OccurrenceEdits, OccurrenceRef, OverrideInstance, Series, SeriesEdits, SeriesId,
    SeriesStatus, TimeWindow, UserId,
};
use crate::occurrence_index::{AttendanceFilter, Viewer, build_index};
use crate::recurrence::{RecurrenceRule, expand};
use crate::split::{self, DeleteOutcome, SplitOutcome};
use crate::store::{Store, Tables};

/// Whose calendar to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarQuery {
    pub viewer: Viewer,
    pub block_owner: Option<UserId>,
    pub attendance: AttendanceFilter,
}

impl CalendarQuery {
    pub fn for_viewer(viewer: Viewer) -> Self {
        Self {
            viewer,
            block_owner: None,
            attendance: AttendanceFilter::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeriesEditOutcome {
    #[serde(rename_all = "camelCase")]
    InstanceEdited { instance_id: InstanceId },
    #[serde(rename_all = "camelCase")]
    SeriesEdited { series_id: SeriesId },
    #[serde(rename_all = "camelCase")]
    Split {
        original: SeriesId,
        continuation: SeriesId,
    },
}

/// Attendance of one instance after a recording.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSheet {
    pub instance_id: InstanceId,
    pub records: Vec<AttendanceRecord>,
}

impl From<SplitOutcome> for SeriesEditOutcome {
    fn from(value: SplitOutcome) -> Self {
        match value {
            SplitOutcome::InPlace { series_id } => SeriesEditOutcome::SeriesEdited { series_id },
            SplitOutcome::Split {
                original,
                continuation,
            } => SeriesEditOutcome::Split {
                original,
                continuation,
            },
        }
    }
}

fn check_schedule(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    is_recurring: bool,
    recurrence: Option<&RecurrenceRule>,
    recurrence_end: Option<NaiveDate>,
) -> Result<(), ScheduleError> {
    if end <= start {
        return Err(ScheduleError::invariant("end must be after start"));
    }
    if is_recurring != recurrence.is_some() {
        return Err(ScheduleError::invariant(
            "isRecurring must be set exactly when a recurrence rule is given",
        ));
    }
    if let Some(recurrence_end) = recurrence_end
        && recurrence_end < start.date_naive()
    {
        return Err(ScheduleError::invariant(
            "recurrenceEndDate must not be before the start date",
        ));
    }
    Ok(())
}

/// Series a viewer can see in `window`: active, started by the window end, and
/// not already finished before the window start.
fn visible_series<'a>(tables: &'a Tables, viewer: Viewer, window: &TimeWindow) -> Vec<&'a Series> {
    let window_start = window.start.date_naive();
    tables
        .all_series()
        .filter(|series| series.status == SeriesStatus::Active)
        .filter(|series| series.start <= window.end)
        .filter(|series| {
            series.recurrence.is_none()
                || series
                    .recurrence_end
                    .is_none_or(|recurrence_end| recurrence_end >= window_start)
        })
        .filter(|series| match viewer {
            Viewer::Coach(coach_id) => series.coach_ids.contains(&coach_id),
            Viewer::Participant(participant_id) => series.participant_ids.contains(&participant_id),
        })
        .collect()
}

pub struct Scheduler {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Store::new(),
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn create_series(&self, new: NewSeries) -> Result<Series, ScheduleError> {
        check_schedule(
            new.start,
            new.end,
            new.is_recurring,
            new.recurrence.as_ref(),
            new.recurrence_end,
        )?;
        if new.max_participants == 0 {
            return Err(ScheduleError::invariant("maxParticipants must be positive"));
        }

        let series = Series {
            id: 0,
            title: new.title,
            description: new.description,
            kind: new.kind,
            color: new.color,
            level_id: new.level_id,
            start: new.start,
            end: new.end,
            recurrence: new.recurrence,
            recurrence_end: new.recurrence_end,
            max_participants: new.max_participants,
            status: SeriesStatus::Active,
            coach_ids: new.coach_ids.into_iter().collect(),
            participant_ids: new.participant_ids.into_iter().collect(),
        };
        let created = self.store.transaction(|tables| {
            let id = tables.insert_series(series);
            series_or_not_found(tables, id).cloned()
        })?;
        info!(series_id = created.id, title = %created.title, "created series");
        Ok(created)
    }

    pub fn series(&self, series_id: SeriesId) -> Result<Series, ScheduleError> {
        series_or_not_found(&self.store.snapshot(), series_id).cloned()
    }

    pub fn set_series_status(
        &self,
        series_id: SeriesId,
        status: SeriesStatus,
    ) -> Result<Series, ScheduleError> {
        let updated = self.store.transaction(|tables| {
            let series = tables
                .series_mut(series_id)
                .map_err(|_| ScheduleError::SeriesNotFound(series_id))?;
            series.status = status;
            Ok::<_, ScheduleError>(series.clone())
        })?;
        info!(series_id, ?status, "changed series status");
        Ok(updated)
    }

    pub fn delete_series(&self, series_id: SeriesId) -> Result<(), ScheduleError> {
        self.store.transaction(|tables| {
            tables
                .delete_series(series_id)
                .map_err(|_| ScheduleError::SeriesNotFound(series_id))
        })?;
        info!(series_id, "deleted series");
        Ok(())
    }

    pub fn create_block(&self, new: NewBlock) -> Result<CalendarBlock, ScheduleError> {
        check_schedule(
            new.start,
            new.end,
            new.is_recurring,
            new.recurrence.as_ref(),
            new.recurrence_end,
        )?;
        let block = CalendarBlock {
            id: 0,
            owner_id: new.owner_id,
            kind: new.kind,
            title: new.title,
            description: new.description,
            start: new.start,
            end: new.end,
            recurrence: new.recurrence,
            recurrence_end: new.recurrence_end,
        };
        let created = self.store.transaction(|tables| {
            let id = tables.insert_block(block);
            tables.block(id).cloned().map_err(ScheduleError::from)
        })?;
        info!(block_id = created.id, owner_id = created.owner_id, "created block");
        Ok(created)
    }

    pub fn delete_block(&self, block_id: BlockId) -> Result<(), ScheduleError> {
        self.store.transaction(|tables| {
            tables
                .delete_block(block_id)
                .map_err(|_| ScheduleError::BlockNotFound(block_id))
        })?;
        info!(block_id, "deleted block");
        Ok(())
    }

    pub fn instance(&self, instance_id: InstanceId) -> Result<OverrideInstance, ScheduleError> {
        instance_or_not_found(&self.store.snapshot(), instance_id).cloned()
    }

    pub fn attendance(&self, instance_id: InstanceId) -> Result<Vec<AttendanceRecord>, ScheduleError> {
        let tables = self.store.snapshot();
        instance_or_not_found(&tables, instance_id)?;
        Ok(tables.attendance_of(instance_id).cloned().collect())
    }

    /// Occurrence start instants of one series inside `window`.
    pub fn expand_occurrences(
        &self,
        series_id: SeriesId,
        window: &TimeWindow,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let tables = self.store.snapshot();
        let series = series_or_not_found(&tables, series_id)?;
        Ok(expand(
            series.start,
            series.recurrence.as_ref(),
            series.recurrence_end,
            window,
        ))
    }

    /// Merged, ordered calendar for one viewer, including the block owner's blocks.
    pub fn build_events_for_range(
        &self,
        query: &CalendarQuery,
        window: &TimeWindow,
    ) -> Vec<CalendarEvent> {
        let tables = self.store.snapshot();
        let today = self.today();

        let series = visible_series(&tables, query.viewer, window);
        let index = build_index(&tables, query.viewer, window, query.attendance);
        let mut events = merge_series_events(&tables, &series, &index, window, today);

        if let Some(owner_id) = query.block_owner {
            let blocks: Vec<&CalendarBlock> = tables
                .blocks()
                .filter(|block| block.owner_id == owner_id)
                .collect();
            events.extend(block_events(&blocks, window, today));
        }

        sort_events(&mut events);
        debug!(
            series = series.len(),
            overrides = index.len(),
            events = events.len(),
            "built calendar"
        );
        events
    }

    pub fn materialize_and_edit(
        &self,
        target: OccurrenceRef,
        edits: &OccurrenceEdits,
    ) -> Result<OverrideInstance, ScheduleError> {
        self.store.transaction(|tables| {
            let instance_id = materialize::materialize_and_edit(tables, target, edits)?;
            instance_or_not_found(tables, instance_id).cloned()
        })
    }

    /// Eagerly materializes every occurrence of a series inside `window`.
    pub fn materialize_range(
        &self,
        series_id: SeriesId,
        window: &TimeWindow,
    ) -> Result<Vec<OverrideInstance>, ScheduleError> {
        let instances = self.store.transaction(|tables| {
            let series = series_or_not_found(tables, series_id)?;
            let dates: Vec<NaiveDate> = expand(
                series.start,
                series.recurrence.as_ref(),
                series.recurrence_end,
                window,
            )
            .into_iter()
            .map(|occurrence| occurrence.date_naive())
            .collect();

            let mut instances = Vec::with_capacity(dates.len());
            for date in dates {
                let instance_id = materialize::materialize(tables, series_id, date)?;
                instances.push(instance_or_not_found(tables, instance_id)?.clone());
            }
            Ok::<_, ScheduleError>(instances)
        })?;
        debug!(series_id, instances = instances.len(), "materialized range");
        Ok(instances)
    }

    /// Edits one occurrence (`Single`) or the occurrence and everything after it
    /// (`Future`). References to a stored instance only ever touch that instance.
    pub fn edit_series(
        &self,
        target: OccurrenceRef,
        scope: EditScope,
        edits: &SeriesEdits,
    ) -> Result<SeriesEditOutcome, ScheduleError> {
        let occurrence_edits = OccurrenceEdits::from(edits);
        self.store.transaction(|tables| match (target, scope) {
            (OccurrenceRef::Instance { .. }, _) | (OccurrenceRef::Series { .. }, EditScope::Single) => {
                let instance_id =
                    materialize::materialize_and_edit(tables, target, &occurrence_edits)?;
                Ok(SeriesEditOutcome::InstanceEdited { instance_id })
            }
            (OccurrenceRef::Series { series_id, date }, EditScope::Future) => {
                let start_date = series_or_not_found(tables, series_id)?.start_date();
                if date != start_date {
                    occurrence_or_not_found(tables, series_id, date)?;
                }
                let split_point = match edits.date {
                    Some(moved_to) if date != start_date => moved_to.min(date),
                    _ => date,
                };
                let outcome = split::split_for_future_edit(tables, series_id, split_point)?;
                split::apply_series_edits(tables, outcome.editable(), edits, date)?;
                Ok(outcome.into())
            }
        })
    }

    pub fn delete_occurrence(
        &self,
        target: OccurrenceRef,
        scope: EditScope,
    ) -> Result<DeleteOutcome, ScheduleError> {
        self.store.transaction(|tables| match (target, scope) {
            (OccurrenceRef::Instance { instance_id }, EditScope::Single) => {
                instance_or_not_found(tables, instance_id)?;
                tables.delete_instance(instance_id)?;
                info!(instance_id, "deleted instance");
                Ok(DeleteOutcome::InstanceDeleted { instance_id })
            }
            (OccurrenceRef::Instance { instance_id }, EditScope::Future) => {
                let instance = instance_or_not_found(tables, instance_id)?;
                let (series_id, pivot) = (instance.series_id, instance.original_date);
                split::truncate_for_future_delete(tables, series_id, pivot)
            }
            (OccurrenceRef::Series { series_id, date }, EditScope::Single) => {
                split::split_out_occurrence(tables, series_id, date)
            }
            (OccurrenceRef::Series { series_id, date }, EditScope::Future) => {
                split::truncate_for_future_delete(tables, series_id, date)
            }
        })
    }

    pub fn record_attendance(
        &self,
        target: OccurrenceRef,
        entries: &[AttendanceEntry],
    ) -> Result<AttendanceSheet, ScheduleError> {
        self.store.transaction(|tables| {
            let instance_id = materialize::record_attendance(tables, target, entries)?;
            Ok(AttendanceSheet {
                instance_id,
                records: tables.attendance_of(instance_id).cloned().collect(),
            })
        })
    }
}
