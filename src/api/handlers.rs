use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{CreateScheduleRequest, CreatedScheduleDto, InputValue, SnapshotDto, ToggleDto},
    errors::AppError,
};
use crate::{
    device::{ConnectivityState, DeviceAddress, MetricSample, SwitchState},
    registry::Registry,
    schedules::Schedule,
};

pub type AppState = Arc<Registry>;

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Latest snapshot of every registered device, ordered by address.
#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Latest snapshot per device", body = Vec<SnapshotDto>),
    ),
    tag = "devices"
)]
pub async fn list_devices(State(registry): State<AppState>) -> Json<Vec<SnapshotDto>> {
    Json(registry.snapshots().await.into_iter().map(Into::into).collect())
}

/// Latest snapshot of one device.
#[utoipa::path(
    get,
    path = "/devices/{address}",
    params(("address" = String, Path, description = "Device host or host:port")),
    responses(
        (status = 200, description = "Latest snapshot", body = SnapshotDto),
        (status = 400, description = "Malformed address"),
        (status = 404, description = "Device not registered"),
    ),
    tag = "devices"
)]
pub async fn get_device(
    State(registry): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<SnapshotDto>, AppError> {
    let address: DeviceAddress = address.parse()?;
    Ok(Json(registry.snapshot(&address).await?.into()))
}

/// Start monitoring a device.
#[utoipa::path(
    put,
    path = "/devices/{address}",
    params(("address" = String, Path, description = "Device host or host:port")),
    responses(
        (status = 201, description = "Device registered", body = SnapshotDto),
        (status = 400, description = "Malformed address"),
        (status = 409, description = "Device already registered"),
    ),
    tag = "devices"
)]
pub async fn register_device(
    State(registry): State<AppState>,
    Path(address): Path<String>,
) -> Result<(StatusCode, Json<SnapshotDto>), AppError> {
    let address: DeviceAddress = address.parse()?;
    registry.register(address.clone()).await?;
    let snapshot = registry.snapshot(&address).await?;
    Ok((StatusCode::CREATED, Json(snapshot.into())))
}

/// Stop monitoring a device and discard its state.
#[utoipa::path(
    delete,
    path = "/devices/{address}",
    params(("address" = String, Path, description = "Device host or host:port")),
    responses(
        (status = 204, description = "Device unregistered"),
        (status = 404, description = "Device not registered"),
    ),
    tag = "devices"
)]
pub async fn unregister_device(
    State(registry): State<AppState>,
    Path(address): Path<String>,
) -> Result<StatusCode, AppError> {
    let address: DeviceAddress = address.parse()?;
    registry.unregister(&address).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle the outlet. The new state is inferred from the device's reply.
#[utoipa::path(
    post,
    path = "/devices/{address}/toggle",
    params(("address" = String, Path, description = "Device host or host:port")),
    responses(
        (status = 200, description = "Toggle sent", body = ToggleDto),
        (status = 404, description = "Device not registered"),
        (status = 502, description = "Device answered with an invalid response"),
        (status = 504, description = "Device unreachable"),
    ),
    tag = "devices"
)]
pub async fn toggle_device(
    State(registry): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ToggleDto>, AppError> {
    let address: DeviceAddress = address.parse()?;
    let switch = registry.toggle(&address).await?;
    Ok(Json(ToggleDto { switch }))
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Jobs currently stored on the device.
#[utoipa::path(
    get,
    path = "/devices/{address}/schedules",
    params(("address" = String, Path, description = "Device host or host:port")),
    responses(
        (status = 200, description = "Schedules on the device", body = Vec<Schedule>),
        (status = 404, description = "Device not registered"),
        (status = 502, description = "Device answered with an invalid response"),
        (status = 504, description = "Device unreachable"),
    ),
    tag = "schedules"
)]
pub async fn list_schedules(
    State(registry): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<Schedule>>, AppError> {
    let address: DeviceAddress = address.parse()?;
    Ok(Json(registry.list_schedules(&address).await?))
}

/// Create a weekly toggle at `hour:minute` on `day`.
#[utoipa::path(
    post,
    path = "/devices/{address}/schedules",
    params(("address" = String, Path, description = "Device host or host:port")),
    request_body = CreateScheduleRequest,
    responses(
        (status = 201, description = "Schedule created", body = CreatedScheduleDto),
        (status = 400, description = "Day, hour or minute is not a valid number"),
        (status = 404, description = "Device not registered"),
        (status = 422, description = "Device rejected the schedule"),
    ),
    tag = "schedules"
)]
pub async fn create_schedule(
    State(registry): State<AppState>,
    Path(address): Path<String>,
    Json(body): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<CreatedScheduleDto>), AppError> {
    let address: DeviceAddress = address.parse()?;
    let id = registry
        .create_schedule(
            &address,
            &body.day.to_string(),
            &body.hour.to_string(),
            &body.minute.to_string(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedScheduleDto { id })))
}

/// Delete job `id` from the device.
#[utoipa::path(
    delete,
    path = "/devices/{address}/schedules/{id}",
    params(
        ("address" = String, Path, description = "Device host or host:port"),
        ("id"      = String, Path, description = "Job id"),
    ),
    responses(
        (status = 204, description = "Schedule deleted"),
        (status = 400, description = "Id is not a number"),
        (status = 404, description = "Device not registered or no such schedule"),
    ),
    tag = "schedules"
)]
pub async fn delete_schedule(
    State(registry): State<AppState>,
    Path((address, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let address: DeviceAddress = address.parse()?;
    registry.delete_schedule(&address, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_devices,
        get_device,
        register_device,
        unregister_device,
        toggle_device,
        list_schedules,
        create_schedule,
        delete_schedule,
        health
    ),
    components(schemas(
        SnapshotDto,
        MetricSample,
        SwitchState,
        ConnectivityState,
        ToggleDto,
        Schedule,
        CreateScheduleRequest,
        CreatedScheduleDto,
        InputValue
    )),
    tags(
        (name = "devices",   description = "Device telemetry and switching"),
        (name = "schedules", description = "Schedules stored on devices"),
        (name = "system",    description = "System endpoints"),
    ),
    info(
        title = "Smart Plug Monitor API",
        version = "0.1.0",
        description = "Live telemetry, switching and schedules for smart plugs"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::{
        api::router,
        dispatcher::Dispatcher,
        poller::PollSettings,
        registry::Registry,
        shelly::{testing::ScriptedRpc, Method, RpcError},
    };

    use super::*;

    fn test_server(rpc: &ScriptedRpc) -> (TestServer, AppState) {
        let registry = Arc::new(Registry::new(
            Arc::new(rpc.clone()),
            PollSettings::default(),
            Dispatcher::default(),
        ));
        (TestServer::new(router(registry.clone())).unwrap(), registry)
    }

    // -----------------------------------------------------------------------
    // /devices
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn devices_empty_returns_empty_array() {
        let (server, _) = test_server(&ScriptedRpc::new());
        let resp = server.get("/devices").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>(), json!([]));
    }

    #[tokio::test]
    async fn register_then_get_device() {
        let (server, registry) = test_server(&ScriptedRpc::new());

        let resp = server.put("/devices/10.0.0.1").await;
        resp.assert_status(StatusCode::CREATED);
        assert_eq!(resp.json::<Value>()["address"], "10.0.0.1");

        let resp = server.get("/devices/10.0.0.1").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["address"], "10.0.0.1");
        assert!(body["history"].is_array());

        server.put("/devices/10.0.0.1").await.assert_status(StatusCode::CONFLICT);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_device_is_404() {
        let (server, _) = test_server(&ScriptedRpc::new());
        let resp = server.get("/devices/10.0.0.99").await;
        resp.assert_status(StatusCode::NOT_FOUND);
        assert!(resp.json::<Value>()["error"].as_str().unwrap().contains("not registered"));
    }

    #[tokio::test]
    async fn unregister_device() {
        let (server, _) = test_server(&ScriptedRpc::new());
        server.put("/devices/10.0.0.1").await;
        server.delete("/devices/10.0.0.1").await.assert_status(StatusCode::NO_CONTENT);
        server.get("/devices/10.0.0.1").await.assert_status(StatusCode::NOT_FOUND);
        server.delete("/devices/10.0.0.1").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_returns_inferred_state() {
        let rpc = ScriptedRpc::new();
        rpc.push(Method::SwitchToggle, Ok(json!({ "was_on": true })));
        let (server, registry) = test_server(&rpc);
        server.put("/devices/10.0.0.1").await;

        let resp = server.post("/devices/10.0.0.1/toggle").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>(), json!({ "switch": "off" }));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn toggle_unreachable_is_504() {
        let (server, registry) = test_server(&ScriptedRpc::new());
        server.put("/devices/10.0.0.1").await;
        server
            .post("/devices/10.0.0.1/toggle")
            .await
            .assert_status(StatusCode::GATEWAY_TIMEOUT);
        registry.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // /devices/{address}/schedules
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_schedules_returns_jobs() {
        let rpc = ScriptedRpc::new();
        rpc.push(
            Method::ScheduleList,
            Ok(json!({ "jobs": [{ "id": 1, "enable": true, "timespec": "0 0 6 * * 1",
                                  "calls": [{ "method": "switch.toggle" }] }] })),
        );
        let (server, registry) = test_server(&rpc);
        server.put("/devices/10.0.0.1").await;

        let resp = server.get("/devices/10.0.0.1/schedules").await;
        resp.assert_status_ok();
        assert_eq!(
            resp.json::<Value>(),
            json!([{ "id": 1, "enabled": true, "timespec": "0 0 6 * * 1", "method": "switch.toggle" }])
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn create_schedule_with_bad_day_is_400_without_device_call() {
        let rpc = ScriptedRpc::new();
        let (server, registry) = test_server(&rpc);
        server.put("/devices/10.0.0.1").await;

        let resp = server
            .post("/devices/10.0.0.1/schedules")
            .json(&json!({ "day": "abc", "hour": 3, "minute": 5 }))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(rpc.call_count(Method::ScheduleCreate), 0);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn create_schedule_rejected_is_422() {
        let rpc = ScriptedRpc::new();
        rpc.push(
            Method::ScheduleCreate,
            Err(RpcError::NotFound { message: "Invalid timespec".into() }),
        );
        let (server, registry) = test_server(&rpc);
        server.put("/devices/10.0.0.1").await;

        let resp = server
            .post("/devices/10.0.0.1/schedules")
            .json(&json!({ "day": 1, "hour": 3, "minute": 5 }))
            .await;
        resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert!(resp.json::<Value>()["error"].as_str().unwrap().contains("Invalid timespec"));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn create_schedule_returns_id() {
        let rpc = ScriptedRpc::new();
        rpc.push(Method::ScheduleCreate, Ok(json!({ "id": 5, "rev": 2 })));
        let (server, registry) = test_server(&rpc);
        server.put("/devices/10.0.0.1").await;

        let resp = server
            .post("/devices/10.0.0.1/schedules")
            .json(&json!({ "day": "1", "hour": "3", "minute": "5" }))
            .await;
        resp.assert_status(StatusCode::CREATED);
        assert_eq!(resp.json::<Value>(), json!({ "id": 5 }));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn delete_missing_schedule_is_404() {
        let rpc = ScriptedRpc::new();
        rpc.push(
            Method::ScheduleDelete,
            Err(RpcError::NotFound { message: String::new() }),
        );
        let (server, registry) = test_server(&rpc);
        server.put("/devices/10.0.0.1").await;

        server
            .delete("/devices/10.0.0.1/schedules/7")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete("/devices/10.0.0.1/schedules/seven")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        registry.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // GET /health, GET /api-docs/openapi.json
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn health_returns_ok() {
        let (server, _) = test_server(&ScriptedRpc::new());
        let resp = server.get("/health").await;
        resp.assert_status_ok();
        assert_eq!(resp.json::<Value>()["status"], "ok");
    }

    #[tokio::test]
    async fn openapi_spec_is_served() {
        let (server, _) = test_server(&ScriptedRpc::new());
        let resp = server.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Smart Plug Monitor API");
        assert!(body["paths"]["/devices/{address}/schedules/{id}"].is_object());
    }
}
