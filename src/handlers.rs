use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::{Json, http::StatusCode, response::IntoResponse};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::{DateTime, NaiveDate, Utc};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use utoipa::ToSchema;

use crate::bus::ScheduleNotification;
use crate::merge::CalendarEvent;
use crate::models::{
    AttendanceEntry, AttendanceRecord, BlockId, CalendarBlock, CoachId, EditScope, InstanceId,
    NewBlock, NewSeries, OccurrenceEdits, OccurrenceRef, OverrideInstance, ParticipantId, Series,
    SeriesEdits, SeriesId, SeriesStatus, TimeWindow, UserId,
};
use crate::occurrence_index::AttendanceFilter;
use crate::scheduler::{AttendanceSheet, CalendarQuery, SeriesEditOutcome};
use crate::split::DeleteOutcome;
use crate::validation::{validate_viewer, validate_window};
use crate::{AppState, auth::verify_token, error::ApiError};

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarParams {
    pub from: String,
    pub to: String,
    pub coach_id: Option<CoachId>,
    pub participant_id: Option<ParticipantId>,
    pub block_owner_id: Option<UserId>,
    #[serde(default)]
    pub confirmed_only: bool,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: String,
    pub to: String,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusChange {
    pub status: SeriesStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeriesEditRequest {
    /// Occurrence the edit starts from.
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub scope: EditScope,
    #[serde(default)]
    pub edits: SeriesEdits,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OccurrenceEditRequest {
    pub target: OccurrenceRef,
    #[serde(default)]
    pub edits: OccurrenceEdits,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OccurrenceDeleteRequest {
    pub target: OccurrenceRef,
    pub scope: EditScope,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttendanceRequest {
    pub target: OccurrenceRef,
    pub entries: Vec<AttendanceEntry>,
}

fn authorize(state: &AppState, auth: BearerHeader, query_token: Option<&str>) -> Result<(), ApiError> {
    let header = auth.map(|TypedHeader(header)| header);
    verify_token(&state.settings, header.as_ref(), query_token)
}

fn range(state: &AppState, from: &str, to: &str) -> Result<TimeWindow, ApiError> {
    validate_window(from, to, state.settings.max_window_days)
}

fn calendar_request(
    state: &AppState,
    params: &CalendarParams,
) -> Result<(CalendarQuery, TimeWindow), ApiError> {
    let window = range(state, &params.from, &params.to)?;
    let viewer = validate_viewer(params.coach_id, params.participant_id)?;
    let attendance = if params.confirmed_only {
        AttendanceFilter::ConfirmedOnly
    } else {
        AttendanceFilter::Any
    };
    let query = CalendarQuery {
        viewer,
        block_owner: params.block_owner_id,
        attendance,
    };
    Ok((query, window))
}

#[utoipa::path(get, path = "/", tag = "calendar")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Coaching Calendar API",
        "endpoints": {
            "/api/calendar": "Merged lesson calendar as JSON",
            "/api/calendar.ical": "Merged lesson calendar as iCal file",
            "/api/series": "Create lesson series",
            "/api/occurrences/edit": "Edit a single occurrence",
            "/api/events": "Live schedule updates (server-sent events)"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "calendar")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(get, path = "/healthz/ready", tag = "calendar")]
pub async fn healthz_ready() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/api/calendar",
    params(
        ("from" = String, Query, description = "Window start (YYYY-MM-DD or RFC 3339)"),
        ("to" = String, Query, description = "Window end, inclusive (YYYY-MM-DD or RFC 3339)"),
        ("coachId" = Option<i64>, Query, description = "Build the calendar of this coach"),
        ("participantId" = Option<i64>, Query, description = "Build the calendar of this participant"),
        ("blockOwnerId" = Option<i64>, Query, description = "Include blocks owned by this user"),
        ("confirmedOnly" = Option<bool>, Query, description = "Participant view: only confirmed attendance"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "Merged calendar events", body = [CalendarEvent]),
        (status = 400, description = "Invalid window or viewer"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "calendar"
)]
pub async fn get_calendar(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(params): Query<CalendarParams>,
) -> Result<Json<Vec<CalendarEvent>>, ApiError> {
    authorize(&state, auth, params.token.as_deref())?;
    let (query, window) = calendar_request(&state, &params)?;
    Ok(Json(state.scheduler.build_events_for_range(&query, &window)))
}

#[utoipa::path(
    get,
    path = "/api/calendar.ical",
    params(
        ("from" = String, Query, description = "Window start (YYYY-MM-DD or RFC 3339)"),
        ("to" = String, Query, description = "Window end, inclusive (YYYY-MM-DD or RFC 3339)"),
        ("coachId" = Option<i64>, Query, description = "Build the calendar of this coach"),
        ("participantId" = Option<i64>, Query, description = "Build the calendar of this participant"),
        ("blockOwnerId" = Option<i64>, Query, description = "Include blocks owned by this user"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 400, description = "Invalid window or viewer"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "calendar"
)]
pub async fn get_calendar_ical(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(params): Query<CalendarParams>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, params.token.as_deref())?;
    let (query, window) = calendar_request(&state, &params)?;
    let events = state.scheduler.build_events_for_range(&query, &window);

    let body = state
        .exporter
        .generate(&state.settings.calendar_name, &events);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=coach_calendar.ics",
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/api/series",
    request_body = NewSeries,
    params(("token" = Option<String>, Query, description = "Authentication token")),
    responses(
        (status = 201, description = "Series created", body = Series),
        (status = 400, description = "Invalid schedule"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn create_series(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(new): Json<NewSeries>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let series = state.scheduler.create_series(new)?;
    state.bus.publish(ScheduleNotification::SeriesCreated {
        series_id: series.id,
    });
    Ok((StatusCode::CREATED, Json(series)))
}

#[utoipa::path(
    get,
    path = "/api/series/{id}",
    params(
        ("id" = i64, Path, description = "Series id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "Series template", body = Series),
        (status = 404, description = "Series not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn get_series(
    State(state): State<AppState>,
    Path(series_id): Path<SeriesId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Series>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    Ok(Json(state.scheduler.series(series_id)?))
}

#[utoipa::path(
    delete,
    path = "/api/series/{id}",
    params(
        ("id" = i64, Path, description = "Series id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 204, description = "Series and its instances deleted"),
        (status = 404, description = "Series not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn delete_series(
    State(state): State<AppState>,
    Path(series_id): Path<SeriesId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    state.scheduler.delete_series(series_id)?;
    state
        .bus
        .publish(ScheduleNotification::SeriesDeleted { series_id });
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/series/{id}/status",
    request_body = StatusChange,
    params(
        ("id" = i64, Path, description = "Series id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "Updated series", body = Series),
        (status = 404, description = "Series not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn set_series_status(
    State(state): State<AppState>,
    Path(series_id): Path<SeriesId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Series>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let series = state.scheduler.set_series_status(series_id, change.status)?;
    state
        .bus
        .publish(ScheduleNotification::SeriesUpdated { series_id });
    Ok(Json(series))
}

#[utoipa::path(
    get,
    path = "/api/series/{id}/occurrences",
    params(
        ("id" = i64, Path, description = "Series id"),
        ("from" = String, Query, description = "Window start"),
        ("to" = String, Query, description = "Window end, inclusive"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "Occurrence start instants", body = [String]),
        (status = 404, description = "Series not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn get_series_occurrences(
    State(state): State<AppState>,
    Path(series_id): Path<SeriesId>,
    auth: BearerHeader,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<DateTime<Utc>>>, ApiError> {
    authorize(&state, auth, params.token.as_deref())?;
    let window = range(&state, &params.from, &params.to)?;
    Ok(Json(state.scheduler.expand_occurrences(series_id, &window)?))
}

#[utoipa::path(
    post,
    path = "/api/series/{id}/materialize",
    params(
        ("id" = i64, Path, description = "Series id"),
        ("from" = String, Query, description = "Window start"),
        ("to" = String, Query, description = "Window end, inclusive"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "Override instances for every occurrence in the window", body = [OverrideInstance]),
        (status = 404, description = "Series not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn materialize_series_range(
    State(state): State<AppState>,
    Path(series_id): Path<SeriesId>,
    auth: BearerHeader,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<OverrideInstance>>, ApiError> {
    authorize(&state, auth, params.token.as_deref())?;
    let window = range(&state, &params.from, &params.to)?;
    let instances = state.scheduler.materialize_range(series_id, &window)?;
    state
        .bus
        .publish(ScheduleNotification::SeriesUpdated { series_id });
    Ok(Json(instances))
}

#[utoipa::path(
    post,
    path = "/api/series/{id}/edit",
    request_body = SeriesEditRequest,
    params(
        ("id" = i64, Path, description = "Series id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "What the edit changed", body = SeriesEditOutcome),
        (status = 400, description = "Edit violates the series schedule"),
        (status = 404, description = "Series or occurrence not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "series"
)]
pub async fn edit_series(
    State(state): State<AppState>,
    Path(series_id): Path<SeriesId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(request): Json<SeriesEditRequest>,
) -> Result<Json<SeriesEditOutcome>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let target = OccurrenceRef::Series {
        series_id,
        date: request.date,
    };
    let outcome = state
        .scheduler
        .edit_series(target, request.scope, &request.edits)?;
    state
        .bus
        .publish(ScheduleNotification::SeriesEdited { outcome });
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/occurrences/edit",
    request_body = OccurrenceEditRequest,
    params(("token" = Option<String>, Query, description = "Authentication token")),
    responses(
        (status = 200, description = "Edited override instance", body = OverrideInstance),
        (status = 400, description = "Invalid edit"),
        (status = 404, description = "Occurrence not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "occurrences"
)]
pub async fn edit_occurrence(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(request): Json<OccurrenceEditRequest>,
) -> Result<Json<OverrideInstance>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let instance = state
        .scheduler
        .materialize_and_edit(request.target, &request.edits)?;
    state.bus.publish(ScheduleNotification::OccurrenceChanged {
        series_id: instance.series_id,
        instance_id: instance.id,
    });
    Ok(Json(instance))
}

#[utoipa::path(
    post,
    path = "/api/occurrences/delete",
    request_body = OccurrenceDeleteRequest,
    params(("token" = Option<String>, Query, description = "Authentication token")),
    responses(
        (status = 200, description = "What the deletion removed", body = DeleteOutcome),
        (status = 404, description = "Occurrence not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "occurrences"
)]
pub async fn delete_occurrence(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(request): Json<OccurrenceDeleteRequest>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let outcome = state
        .scheduler
        .delete_occurrence(request.target, request.scope)?;
    state
        .bus
        .publish(ScheduleNotification::OccurrenceDeleted { outcome });
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/api/occurrences/attendance",
    request_body = AttendanceRequest,
    params(("token" = Option<String>, Query, description = "Authentication token")),
    responses(
        (status = 200, description = "Attendance of the occurrence", body = AttendanceSheet),
        (status = 404, description = "Occurrence not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "occurrences"
)]
pub async fn record_attendance(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(request): Json<AttendanceRequest>,
) -> Result<Json<AttendanceSheet>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let sheet = state
        .scheduler
        .record_attendance(request.target, &request.entries)?;
    state.bus.publish(ScheduleNotification::AttendanceRecorded {
        instance_id: sheet.instance_id,
    });
    Ok(Json(sheet))
}

#[utoipa::path(
    get,
    path = "/api/instances/{id}",
    params(
        ("id" = i64, Path, description = "Override instance id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "Override instance", body = OverrideInstance),
        (status = 404, description = "Instance not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "occurrences"
)]
pub async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<InstanceId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<OverrideInstance>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    Ok(Json(state.scheduler.instance(instance_id)?))
}

#[utoipa::path(
    get,
    path = "/api/instances/{id}/attendance",
    params(
        ("id" = i64, Path, description = "Override instance id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 200, description = "Attendance records", body = [AttendanceRecord]),
        (status = 404, description = "Instance not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "occurrences"
)]
pub async fn get_instance_attendance(
    State(state): State<AppState>,
    Path(instance_id): Path<InstanceId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    Ok(Json(state.scheduler.attendance(instance_id)?))
}

#[utoipa::path(
    post,
    path = "/api/blocks",
    request_body = NewBlock,
    params(("token" = Option<String>, Query, description = "Authentication token")),
    responses(
        (status = 201, description = "Block created", body = CalendarBlock),
        (status = 400, description = "Invalid schedule")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "blocks"
)]
pub async fn create_block(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
    Json(new): Json<NewBlock>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let block = state.scheduler.create_block(new)?;
    state.bus.publish(ScheduleNotification::BlockCreated { block_id: block.id });
    Ok((StatusCode::CREATED, Json(block)))
}

#[utoipa::path(
    delete,
    path = "/api/blocks/{id}",
    params(
        ("id" = i64, Path, description = "Block id"),
        ("token" = Option<String>, Query, description = "Authentication token")
    ),
    responses(
        (status = 204, description = "Block deleted"),
        (status = 404, description = "Block not found")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "blocks"
)]
pub async fn delete_block(
    State(state): State<AppState>,
    Path(block_id): Path<BlockId>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    state.scheduler.delete_block(block_id)?;
    state
        .bus
        .publish(ScheduleNotification::BlockDeleted { block_id });
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/events",
    params(("token" = Option<String>, Query, description = "Authentication token")),
    responses(
        (status = 200, description = "Stream of schedule notifications", content_type = "text/event-stream", body = ScheduleNotification),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "calendar"
)]
pub async fn stream_events(
    State(state): State<AppState>,
    auth: BearerHeader,
    Query(query): Query<TokenQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;

    let receiver = state.bus.subscribe();
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(notification) => match SseEvent::default().json_data(&notification) {
                    Ok(event) => return Some((Ok::<_, Infallible>(event), receiver)),
                    Err(err) => warn!("Failed to encode notification: {err}"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Live update subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
