use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::NaiveDate;
use coach_calendar::clock::FixedClock;
use coach_calendar::scheduler::Scheduler;
use coach_calendar::settings::Settings;
use coach_calendar::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::Service;

const TOKEN: &str = "test-token-123";

/// Helper function to create test app state pinned to 2024-01-01
fn create_test_state() -> AppState {
    let settings = Settings {
        debug: true,
        auth_token: TOKEN.to_string(),
        enable_swagger: true,
        enable_cors: false,
        port: 8080,
        timezone: "UTC".to_string(),
        calendar_name: "Test Calendar".to_string(),
        max_window_days: 62,
    };
    let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    AppState::with_scheduler(settings, Scheduler::new(Arc::new(FixedClock(today))))
}

/// Helper to extract response body as string
async fn response_body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call_json(app: &mut Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.call(request).await.unwrap();
    let status = response.status();
    let body = response_body_string(response.into_body()).await;
    let value = serde_json::from_str(&body).unwrap_or(Value::String(body));
    (status, value)
}

/// Mon/Wed lesson from 2024-01-01 18:00 UTC coached by 10 with participants 1 and 2.
async fn create_mon_wed_series(app: &mut Router) -> i64 {
    let (status, series) = call_json(
        app,
        post_json(
            "/api/series",
            json!({
                "title": "Adults Intermediate",
                "kind": "academy",
                "start": "2024-01-01T18:00:00Z",
                "end": "2024-01-01T19:00:00Z",
                "isRecurring": true,
                "recurrence": {"frequency": "weekly", "daysOfWeek": [1, 3]},
                "maxParticipants": 4,
                "coachIds": [10],
                "participantIds": [1, 2]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    series["id"].as_i64().unwrap()
}

fn event_ids(events: &Value) -> Vec<String> {
    events
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_root_endpoint() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let response = app
        .call(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("Coaching Calendar API"));
    assert!(body.contains("/api/calendar"));
    assert!(body.contains("/api/calendar.ical"));
}

#[tokio::test]
async fn test_healthz_endpoints() {
    // Arrange
    let mut app = build_router(create_test_state());

    for uri in ["/healthz/live", "/healthz/ready"] {
        // Act
        let response = app
            .call(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body_string(response.into_body()).await;
        assert!(body.contains(r#""status":"ok"#));
    }
}

#[tokio::test]
async fn test_calendar_no_auth_token() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri("/api/calendar?from=2024-01-01&to=2024-01-15&coachId=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_calendar_invalid_auth_token() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let response = app
        .call(
            Request::builder()
                .uri("/api/calendar?from=2024-01-01&to=2024-01-15&coachId=10&token=invalid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_calendar_rejects_bad_queries() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act / Assert: inverted window
    let (status, _) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-15&to=2024-01-01&coachId=10"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Act / Assert: window wider than max_window_days
    let (status, _) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-12-31&coachId=10"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Act / Assert: no viewer
    let (status, _) = call_json(&mut app, get("/api/calendar?from=2024-01-01&to=2024-01-15")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_calendar_renders_virtual_occurrences() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;

    // Act
    let (status, events) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-01-15&coachId=10"),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        event_ids(&events),
        ["2024-01-01", "2024-01-03", "2024-01-08", "2024-01-10", "2024-01-15"]
            .iter()
            .map(|date| format!("lesson-{series_id}-{date}"))
            .collect::<Vec<_>>()
    );
    let first = &events[0];
    assert_eq!(first["startTime"], "18:00");
    assert_eq!(first["endTime"], "19:00");
    assert_eq!(first["status"], "scheduled");
    assert_eq!(first["capacity"], 4);
    assert_eq!(first["participantCount"], 2);
    assert_eq!(first["isRecurring"], true);
}

#[tokio::test]
async fn test_canceled_occurrence_is_rendered_from_instance() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;

    // Act
    let (status, instance) = call_json(
        &mut app,
        post_json(
            "/api/occurrences/edit",
            json!({
                "target": {"model": "series", "seriesId": series_id, "date": "2024-01-08"},
                "edits": {"status": "canceled"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let instance_id = instance["id"].as_i64().unwrap();

    let (_, events) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-01-15&coachId=10"),
    )
    .await;

    // Assert
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 5);
    let canceled: Vec<&Value> = events
        .iter()
        .filter(|event| event["instanceId"] == instance_id)
        .collect();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0]["status"], "canceled");
    assert_eq!(canceled[0]["date"], "2024-01-08");
    assert_eq!(
        events
            .iter()
            .filter(|event| event["source"] == "series")
            .count(),
        4
    );

    let (status, attendance) =
        call_json(&mut app, get(&format!("/api/instances/{instance_id}/attendance"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attendance.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_future_edit_splits_series() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;

    // Act
    let (status, outcome) = call_json(
        &mut app,
        post_json(
            &format!("/api/series/{series_id}/edit"),
            json!({"date": "2024-01-10", "scope": "future", "edits": {"maxParticipants": 6}}),
        ),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "split");
    assert_eq!(outcome["original"], series_id);

    let (_, before) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-01-08&coachId=10"),
    )
    .await;
    assert!(before.as_array().unwrap().iter().all(|event| event["capacity"] == 4));

    let (_, after) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-10&to=2024-01-17&coachId=10"),
    )
    .await;
    let after = after.as_array().unwrap();
    assert_eq!(after.len(), 3);
    assert!(after.iter().all(|event| event["capacity"] == 6));
}

#[tokio::test]
async fn test_delete_single_occurrence() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;

    // Act
    let (status, outcome) = call_json(
        &mut app,
        post_json(
            "/api/occurrences/delete",
            json!({
                "target": {"model": "series", "seriesId": series_id, "date": "2024-01-08"},
                "scope": "single"
            }),
        ),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "split");
    let (_, events) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-01-15&coachId=10"),
    )
    .await;
    let dates: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["date"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2024-01-01", "2024-01-03", "2024-01-10", "2024-01-15"]);
}

#[tokio::test]
async fn test_record_attendance_materializes() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;

    // Act
    let (status, sheet) = call_json(
        &mut app,
        post_json(
            "/api/occurrences/attendance",
            json!({
                "target": {"model": "series", "seriesId": series_id, "date": "2024-01-03"},
                "entries": [
                    {"participantId": 1, "attended": "present"},
                    {"participantId": 2, "attended": "absent", "justification": "justified"}
                ]
            }),
        ),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let records = sheet["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record["validated"] == true));

    let instance_id = sheet["instanceId"].as_i64().unwrap();
    let (status, instance) = call_json(&mut app, get(&format!("/api/instances/{instance_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(instance["originalDate"], "2024-01-03");
}

#[tokio::test]
async fn test_series_not_found() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let (status, _) = call_json(&mut app, get("/api/series/999")).await;

    // Assert
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_series_is_rejected() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let (status, _) = call_json(
        &mut app,
        post_json(
            "/api/series",
            json!({
                "title": "Backwards",
                "kind": "private",
                "start": "2024-01-01T18:00:00Z",
                "end": "2024-01-01T17:00:00Z",
                "maxParticipants": 1
            }),
        ),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_series_occurrences_endpoint() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;

    // Act
    let (status, occurrences) = call_json(
        &mut app,
        get(&format!(
            "/api/series/{series_id}/occurrences?from=2024-01-01&to=2024-01-07"
        )),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(occurrences.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_materialize_range_endpoint() {
    // Arrange
    let mut app = build_router(create_test_state());
    let series_id = create_mon_wed_series(&mut app).await;
    let uri = format!("/api/series/{series_id}/materialize?from=2024-01-01&to=2024-01-07");

    // Act
    let (status, instances) = call_json(&mut app, post_json(&uri, json!({}))).await;
    let (_, calendar) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-01-07&coachId=10"),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let instances = instances.as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0]["originalDate"], "2024-01-01");
    assert_eq!(instances[1]["originalDate"], "2024-01-03");
    assert!(
        event_ids(&calendar)
            .iter()
            .all(|id| id.starts_with("instance-"))
    );
}

#[tokio::test]
async fn test_blocks_show_for_owner() {
    // Arrange
    let mut app = build_router(create_test_state());
    create_mon_wed_series(&mut app).await;
    let (status, block) = call_json(
        &mut app,
        post_json(
            "/api/blocks",
            json!({
                "ownerId": 10,
                "kind": "holiday",
                "title": "Away",
                "start": "2024-01-02T09:00:00Z",
                "end": "2024-01-02T17:00:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let block_id = block["id"].as_i64().unwrap();

    // Act
    let (_, events) = call_json(
        &mut app,
        get("/api/calendar?from=2024-01-01&to=2024-01-03&coachId=10&blockOwnerId=10"),
    )
    .await;

    // Assert
    assert_eq!(
        event_ids(&events)[1],
        format!("block-{block_id}-2024-01-02")
    );

    let response = app
        .call(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/blocks/{block_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_ical_endpoint() {
    // Arrange
    let mut app = build_router(create_test_state());
    create_mon_wed_series(&mut app).await;

    // Act
    let response = app
        .call(
            Request::builder()
                .uri(format!(
                    "/api/calendar.ical?from=2024-01-01&to=2024-01-07&coachId=10&token={TOKEN}"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert_eq!(content_type, "text/calendar");

    let content_disposition = response.headers().get(header::CONTENT_DISPOSITION).unwrap();
    assert!(
        content_disposition
            .to_str()
            .unwrap()
            .contains("coach_calendar.ics")
    );

    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("BEGIN:VCALENDAR"));
    assert_eq!(body.matches("BEGIN:VEVENT").count(), 2);
    assert!(body.contains("Adults Intermediate"));
}

#[tokio::test]
async fn test_events_stream_requires_token() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let rejected = app
        .call(
            Request::builder()
                .uri("/api/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let accepted = app
        .call(
            Request::builder()
                .uri(format!("/api/events?token={TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(accepted.status(), StatusCode::OK);
    assert_eq!(
        accepted.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
}

#[tokio::test]
async fn test_mutations_are_published() {
    // Arrange
    let state = create_test_state();
    let mut receiver = state.bus.subscribe();
    let mut app = build_router(state);

    // Act
    let series_id = create_mon_wed_series(&mut app).await;

    // Assert
    let notification = serde_json::to_value(receiver.recv().await.unwrap()).unwrap();
    assert_eq!(
        notification,
        json!({"type": "series_created", "seriesId": series_id})
    );
}

#[tokio::test]
async fn test_openapi_document() {
    // Arrange
    let mut app = build_router(create_test_state());

    // Act
    let (status, doc) = call_json(
        &mut app,
        Request::builder()
            .uri("/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/api/calendar"].is_object());
}
