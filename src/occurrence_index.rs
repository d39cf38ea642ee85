//! Lookup of override instances by `(series, occurrence date)` for one viewer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::models::{CoachId, OverrideInstance, ParticipantId, SeriesId, TimeWindow};
use crate::store::Tables;

pub type OccurrenceKey = (SeriesId, NaiveDate);
pub type OverrideIndex<'a> = BTreeMap<OccurrenceKey, &'a OverrideInstance>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Coach(CoachId),
    Participant(ParticipantId),
}

/// Which attendance records make an instance visible to a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AttendanceFilter {
    #[default]
    Any,
    ConfirmedOnly,
}

/// Collects the series and stored instances `viewer` can see in `window`.
///
/// Instances belong to the window by their current `start`, not their `original_date`.
/// An instance rescheduled out of the window is therefore left out, and a viewer who
/// sees the series gets the virtual occurrence on the original date in its place.
pub fn build_index<'a>(
    tables: &'a Tables,
    viewer: Viewer,
    window: &TimeWindow,
    filter: AttendanceFilter,
) -> OverrideIndex<'a> {
    match viewer {
        Viewer::Coach(coach_id) => coach_index(tables, coach_id, window),
        Viewer::Participant(participant_id) => {
            participant_index(tables, participant_id, window, filter)
        }
    }
}

/// Coaches of an instance: its own snapshot when present, else the parent series'.
fn effective_coaches<'a>(
    tables: &'a Tables,
    instance: &'a OverrideInstance,
) -> Option<&'a BTreeSet<CoachId>> {
    if !instance.coach_ids.is_empty() {
        return Some(&instance.coach_ids);
    }
    tables
        .series(instance.series_id)
        .ok()
        .map(|series| &series.coach_ids)
}

fn coach_index<'a>(tables: &'a Tables, coach_id: CoachId, window: &TimeWindow) -> OverrideIndex<'a> {
    tables
        .instances()
        .filter(|instance| window.contains(instance.start))
        .filter(|instance| {
            effective_coaches(tables, instance).is_some_and(|coaches| coaches.contains(&coach_id))
        })
        .map(|instance| ((instance.series_id, instance.original_date), instance))
        .collect()
}

fn participant_index<'a>(
    tables: &'a Tables,
    participant_id: ParticipantId,
    window: &TimeWindow,
    filter: AttendanceFilter,
) -> OverrideIndex<'a> {
    let mut index = OverrideIndex::new();

    let records = tables
        .attendance_of_participant(participant_id)
        .filter(|record| filter == AttendanceFilter::Any || record.confirmed);
    for record in records {
        let Ok(instance) = tables.instance(record.instance_id) else {
            continue;
        };
        if window.contains(instance.start) {
            index.insert((instance.series_id, instance.original_date), instance);
        }
    }

    // Direct links count only when no attendance filter narrows the view.
    if filter == AttendanceFilter::Any {
        for instance in tables.instances() {
            if window.contains(instance.start) && instance.participant_ids.contains(&participant_id)
            {
                index
                    .entry((instance.series_id, instance.original_date))
                    .or_insert(instance);
            }
        }
    }

    index
}
