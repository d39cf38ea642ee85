use chrono::TimeDelta;
use icalendar::{Calendar, Component, Event, EventLike};

use crate::merge::{CalendarEvent, EventSource};
use crate::status::EventStatus;

#[derive(Clone, Default)]
pub struct ICalExporter;

impl ICalExporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, calendar_name: &str, events: &[CalendarEvent]) -> Vec<u8> {
        let mut calendar = Calendar::new();
        calendar.name(calendar_name);

        for item in events {
            let start = item.starts_at();
            let mut end = item.date.and_time(item.end_time).and_utc();
            // Occurrences crossing midnight end on the following day.
            if end <= start {
                end += TimeDelta::days(1);
            }

            let mut event = Event::new();
            event.summary(&item.title);
            event.starts(start);
            event.ends(end);
            event.uid(&format!("{}@coach-calendar", item.id));
            event.description(&describe(item));
            if item.status == EventStatus::Canceled {
                event.status(icalendar::EventStatus::Cancelled);
            }
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}

fn describe(item: &CalendarEvent) -> String {
    match item.source {
        EventSource::Block => match item.block_kind {
            Some(kind) => format!("Blocked time ({kind:?})"),
            None => "Blocked time".to_string(),
        },
        EventSource::Series | EventSource::Instance => {
            let mut lines = vec![format!("Status: {:?}", item.status)];
            if let (Some(count), Some(capacity)) = (item.participant_count, item.capacity) {
                lines.push(format!("Participants: {count}/{capacity}"));
            }
            if item.is_recurring {
                lines.push("Recurring lesson".to_string());
            }
            lines.join("\n")
        }
    }
}
