pub mod auth;
pub mod bus;
pub mod clock;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod materialize;
pub mod merge;
pub mod models;
pub mod occurrence_index;
pub mod openapi;
pub mod recurrence;
pub mod scheduler;
pub mod settings;
pub mod split;
pub mod status;
pub mod store;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use config::ConfigError;
use handlers::{
    create_block, create_series, delete_block, delete_occurrence, delete_series, edit_occurrence,
    edit_series, get_calendar, get_calendar_ical, get_instance, get_instance_attendance,
    get_series, get_series_occurrences, healthz_live, healthz_ready, materialize_series_range,
    record_attendance, root, set_series_status, stream_events,
};
use http::Method;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::bus::EventBus;
use crate::clock::SystemClock;
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::scheduler::Scheduler;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub scheduler: Arc<Scheduler>,
    pub exporter: Arc<ICalExporter>,
    pub bus: EventBus,
}

impl AppState {
    /// State backed by the wall clock in the configured time zone.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        let clock = SystemClock::new(settings.time_zone()?);
        Ok(Self::with_scheduler(settings, Scheduler::new(Arc::new(clock))))
    }

    pub fn with_scheduler(settings: Settings, scheduler: Scheduler) -> Self {
        Self {
            settings,
            scheduler: Arc::new(scheduler),
            exporter: Arc::new(ICalExporter::new()),
            bus: EventBus::default(),
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let state = AppState::new(settings)?;
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!(timezone = %state.settings.timezone, "Starting Coaching Calendar API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let api = Router::new()
        .route("/calendar", get(get_calendar))
        .route("/calendar.ical", get(get_calendar_ical))
        .route("/series", post(create_series))
        .route("/series/{id}", get(get_series).delete(delete_series))
        .route("/series/{id}/status", post(set_series_status))
        .route("/series/{id}/occurrences", get(get_series_occurrences))
        .route("/series/{id}/materialize", post(materialize_series_range))
        .route("/series/{id}/edit", post(edit_series))
        .route("/occurrences/edit", post(edit_occurrence))
        .route("/occurrences/delete", post(delete_occurrence))
        .route("/occurrences/attendance", post(record_attendance))
        .route("/instances/{id}", get(get_instance))
        .route("/instances/{id}/attendance", get(get_instance_attendance))
        .route("/blocks", post(create_block))
        .route("/blocks/{id}", axum::routing::delete(delete_block))
        .route("/events", get(stream_events));

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .nest("/api", api)
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    if state.settings.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.layer(trace_layer)
}
