//! Merge of expanded series occurrences with their override instances, plus
//! block rendering, into calendar event view-models.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::models::{
    BlockId, BlockKind, CalendarBlock, InstanceId, LessonKind, LevelId, OverrideInstance, Series,
    SeriesId, TimeWindow, hhmm,
};
use crate::occurrence_index::OverrideIndex;
use crate::recurrence::expand;
use crate::status::{EventStatus, occurrence_status};
use crate::store::Tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Series,
    Instance,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub source: EventSource,
    pub series_id: Option<SeriesId>,
    pub instance_id: Option<InstanceId>,
    pub block_id: Option<BlockId>,
    #[schema(value_type = String, format = "date", example = "2024-01-08")]
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "18:00")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "19:00")]
    pub end_time: NaiveTime,
    pub status: EventStatus,
    pub title: String,
    pub capacity: Option<u32>,
    pub participant_count: Option<usize>,
    pub is_recurring: bool,
    pub lesson_kind: Option<LessonKind>,
    pub block_kind: Option<BlockKind>,
    pub color: Option<String>,
    pub level_id: Option<LevelId>,
}

impl CalendarEvent {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }
}

/// Anything that renders onto a calendar.
#[derive(Debug, Clone, Copy)]
pub enum CalendarEntry<'a> {
    Virtual {
        series: &'a Series,
        occurrence: DateTime<Utc>,
    },
    Override {
        instance: &'a OverrideInstance,
        series: &'a Series,
    },
    Block {
        block: &'a CalendarBlock,
        occurrence: DateTime<Utc>,
    },
}

impl CalendarEntry<'_> {
    pub fn render(&self, today: NaiveDate) -> CalendarEvent {
        match *self {
            CalendarEntry::Virtual { series, occurrence } => {
                let date = occurrence.date_naive();
                CalendarEvent {
                    id: format!("lesson-{}-{}", series.id, date),
                    source: EventSource::Series,
                    series_id: Some(series.id),
                    instance_id: None,
                    block_id: None,
                    date,
                    start_time: occurrence.time(),
                    end_time: (occurrence + series.duration()).time(),
                    status: occurrence_status(date, today, None),
                    title: series.title.clone(),
                    capacity: Some(series.max_participants),
                    participant_count: Some(series.participant_ids.len()),
                    is_recurring: series.is_recurring(),
                    lesson_kind: Some(series.kind),
                    block_kind: None,
                    color: series.color.clone(),
                    level_id: series.level_id,
                }
            }
            CalendarEntry::Override { instance, series } => {
                let date = instance.start.date_naive();
                CalendarEvent {
                    id: format!("instance-{}", instance.id),
                    source: EventSource::Instance,
                    series_id: Some(series.id),
                    instance_id: Some(instance.id),
                    block_id: None,
                    date,
                    start_time: instance.start.time(),
                    end_time: instance.end.time(),
                    status: occurrence_status(date, today, Some(instance.status)),
                    title: instance.title.clone().unwrap_or_else(|| series.title.clone()),
                    capacity: Some(instance.max_participants),
                    participant_count: Some(instance.participant_ids.len()),
                    is_recurring: false,
                    lesson_kind: Some(series.kind),
                    block_kind: None,
                    color: series.color.clone(),
                    level_id: instance.level_id.or(series.level_id),
                }
            }
            CalendarEntry::Block { block, occurrence } => {
                let date = occurrence.date_naive();
                CalendarEvent {
                    id: format!("block-{}-{}", block.id, date),
                    source: EventSource::Block,
                    series_id: None,
                    instance_id: None,
                    block_id: Some(block.id),
                    date,
                    start_time: occurrence.time(),
                    end_time: (occurrence + (block.end - block.start)).time(),
                    status: occurrence_status(date, today, None),
                    title: block.title.clone().unwrap_or_default(),
                    capacity: None,
                    participant_count: None,
                    is_recurring: block.is_recurring(),
                    lesson_kind: None,
                    block_kind: Some(block.kind),
                    color: None,
                    level_id: None,
                }
            }
        }
    }
}

/// Renders every in-window occurrence of `series`, substituting override instances
/// where the index has one. Overrides the expansion never reached are emitted
/// afterwards from their own stored date, so none is dropped or duplicated.
pub fn merge_series_events(
    tables: &Tables,
    series: &[&Series],
    index: &OverrideIndex<'_>,
    window: &TimeWindow,
    today: NaiveDate,
) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut rendered: HashSet<InstanceId> = HashSet::new();

    for &template in series {
        let occurrences = expand(
            template.start,
            template.recurrence.as_ref(),
            template.recurrence_end,
            window,
        );
        for occurrence in occurrences {
            let entry = match index.get(&(template.id, occurrence.date_naive())) {
                Some(&instance) => {
                    rendered.insert(instance.id);
                    CalendarEntry::Override {
                        instance,
                        series: template,
                    }
                }
                None => CalendarEntry::Virtual {
                    series: template,
                    occurrence,
                },
            };
            events.push(entry.render(today));
        }
    }

    for &instance in index.values() {
        if rendered.contains(&instance.id) {
            continue;
        }
        let Ok(parent) = tables.series(instance.series_id) else {
            warn!(instance_id = instance.id, "override instance without parent series");
            continue;
        };
        rendered.insert(instance.id);
        events.push(
            CalendarEntry::Override {
                instance,
                series: parent,
            }
            .render(today),
        );
    }

    events
}

pub fn block_events(
    blocks: &[&CalendarBlock],
    window: &TimeWindow,
    today: NaiveDate,
) -> Vec<CalendarEvent> {
    blocks
        .iter()
        .flat_map(|&block| {
            expand(
                block.start,
                block.recurrence.as_ref(),
                block.recurrence_end,
                window,
            )
            .into_iter()
            .map(move |occurrence| CalendarEntry::Block { block, occurrence }.render(today))
        })
        .collect()
}

pub fn sort_events(events: &mut [CalendarEvent]) {
    events.sort_by(|a, b| {
        a.starts_at()
            .cmp(&b.starts_at())
            .then_with(|| a.id.cmp(&b.id))
    });
}
