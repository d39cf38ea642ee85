use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::bus::ScheduleNotification;
use crate::handlers::{
    AttendanceRequest, OccurrenceDeleteRequest, OccurrenceEditRequest, SeriesEditRequest,
    StatusChange,
};
use crate::merge::{CalendarEvent, EventSource};
use crate::models::{
    Attendance, AttendanceEntry, AttendanceRecord, BlockKind, CalendarBlock, EditScope,
    InstanceStatus, Justification, LessonKind, NewBlock, NewSeries, OccurrenceEdits,
    OccurrenceRef, OverrideInstance, Series, SeriesEdits, SeriesStatus,
};
use crate::recurrence::{Frequency, RecurrenceRule};
use crate::scheduler::{AttendanceSheet, SeriesEditOutcome};
use crate::split::DeleteOutcome;
use crate::status::EventStatus;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let Some(components) = openapi.components.as_mut() else {
            return;
        };
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::get_calendar,
        crate::handlers::get_calendar_ical,
        crate::handlers::create_series,
        crate::handlers::get_series,
        crate::handlers::delete_series,
        crate::handlers::set_series_status,
        crate::handlers::get_series_occurrences,
        crate::handlers::materialize_series_range,
        crate::handlers::edit_series,
        crate::handlers::edit_occurrence,
        crate::handlers::delete_occurrence,
        crate::handlers::record_attendance,
        crate::handlers::get_instance,
        crate::handlers::get_instance_attendance,
        crate::handlers::create_block,
        crate::handlers::delete_block,
        crate::handlers::stream_events
    ),
    components(schemas(
        CalendarEvent,
        EventSource,
        EventStatus,
        Series,
        NewSeries,
        SeriesStatus,
        LessonKind,
        RecurrenceRule,
        Frequency,
        OverrideInstance,
        InstanceStatus,
        AttendanceRecord,
        AttendanceEntry,
        AttendanceSheet,
        Attendance,
        Justification,
        CalendarBlock,
        NewBlock,
        BlockKind,
        EditScope,
        OccurrenceRef,
        OccurrenceEdits,
        SeriesEdits,
        SeriesEditOutcome,
        DeleteOutcome,
        ScheduleNotification,
        StatusChange,
        SeriesEditRequest,
        OccurrenceEditRequest,
        OccurrenceDeleteRequest,
        AttendanceRequest
    )),
    tags(
        (name = "calendar", description = "Merged calendar views and live updates"),
        (name = "series", description = "Lesson series templates"),
        (name = "occurrences", description = "Single occurrences, overrides and attendance"),
        (name = "blocks", description = "Blocked time")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_routes_and_schemes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/calendar"));
        assert!(doc.paths.paths.contains_key("/api/series/{id}/edit"));
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.schemas.contains_key("CalendarEvent"));
    }
}
