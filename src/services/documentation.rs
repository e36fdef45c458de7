use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the display back-end.
#[openapi(
    paths(
        crate::routes::status::display_status,
        crate::routes::snapshot::display_snapshot,
        crate::routes::websocket::ws_handler,
        crate::routes::metrics::ws_metrics,
    ),
    components(
        schemas(
            crate::dto::status::StatusResponse,
            crate::dto::snapshot::SnapshotDoc,
            crate::dto::snapshot::ScheduleState,
            crate::dto::snapshot::StateKind,
            crate::dto::snapshot::DisplaySettings,
            crate::dto::snapshot::PeriodRef,
            crate::dto::snapshot::DayPathEntry,
            crate::dto::snapshot::StandbyItem,
            crate::dto::snapshot::PeriodClassItem,
            crate::dto::snapshot::DutyPanel,
            crate::dto::snapshot::DutyItem,
            crate::dto::snapshot::Announcement,
            crate::dto::snapshot::ExcellenceItem,
            crate::dto::snapshot::DateInfo,
            crate::dto::snapshot::SnapshotMeta,
            crate::dto::ws::DisplayInboundMessage,
            crate::dto::ws::DisplayOutboundMessage,
            crate::dto::health::WsMetricsResponse,
            crate::dto::health::HealthVerdict,
        )
    ),
    tags(
        (name = "display", description = "Snapshot delivery endpoints for display screens"),
        (name = "push", description = "WebSocket push invalidation plane"),
        (name = "metrics", description = "Operational metrics"),
    )
)]
pub struct ApiDoc;
