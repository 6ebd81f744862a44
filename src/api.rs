use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    annotation::allow_validate,
    app_state::{AppState, Status},
    composer::QueryIntent,
    engine::DatasetView,
    error::EngineError,
    models::{Query, Record, RecordId, SortRange, SortSpec, SortableField, ViewMode},
};

type ApiError = (StatusCode, Json<Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct OpenDatasetPayload {
    #[serde(default)]
    multi_label: bool,
    #[serde(default)]
    view_mode: ViewMode,
}

#[derive(Deserialize)]
pub struct ViewModePayload {
    view_mode: ViewMode,
}

#[derive(Deserialize)]
pub struct CopyDatasetPayload {
    name: String,
    #[serde(default)]
    workspace: Option<String>,
}

#[derive(Deserialize)]
pub struct ValidatePayload {
    #[serde(default)]
    labels: Vec<String>,
}

/// Registros a ingerir; los que no traen `id` reciben un UUID.
#[derive(Deserialize)]
pub struct LogRecordsPayload {
    records: Vec<Value>,
}

#[derive(Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    record: Record,
    allow_validate: bool,
}

#[derive(Serialize)]
pub struct DatasetResponse {
    name: String,
    multi_label: bool,
    view_mode: ViewMode,
    query: Query,
    sort: Vec<SortSpec>,
    total: usize,
    records: Vec<RecordView>,
}

impl From<DatasetView> for DatasetResponse {
    fn from(view: DatasetView) -> Self {
        let records = view
            .records
            .into_iter()
            .map(|record| RecordView {
                allow_validate: allow_validate(&record, &view.dataset),
                record,
            })
            .collect();
        Self {
            name: view.dataset.name,
            multi_label: view.dataset.multi_label,
            view_mode: view.dataset.view_mode,
            query: view.dataset.query,
            sort: view.dataset.sort,
            total: view.total,
            records,
        }
    }
}

#[derive(Serialize)]
pub struct SortFieldInfo {
    field: SortableField,
    range: SortRange,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/sort-fields", get(sort_fields_handler))
        .route("/api/datasets/:name", get(dataset_handler).delete(delete_dataset_handler))
        .route("/api/datasets/:name/copy", post(copy_dataset_handler))
        .route("/api/datasets/:name/open", post(open_dataset_handler))
        .route("/api/datasets/:name/query", post(query_handler))
        .route("/api/datasets/:name/view-mode", post(view_mode_handler))
        .route("/api/datasets/:name/records", post(log_records_handler))
        .route("/api/datasets/:name/records/:id/validate", post(validate_handler))
        .route(
            "/api/datasets/:name/records/:id/validate-prediction",
            post(validate_prediction_handler),
        )
        .route("/api/datasets/:name/records/:id/reset", post(reset_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let status = state
        .status
        .lock()
        .map(|s| s.clone())
        .unwrap_or_default();
    Json(status)
}

#[axum::debug_handler]
async fn sort_fields_handler() -> Json<Vec<SortFieldInfo>> {
    Json(
        SortableField::ALL
            .into_iter()
            .map(|field| SortFieldInfo { field, range: field.range() })
            .collect(),
    )
}

#[axum::debug_handler]
async fn dataset_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let view = state.engine.view(&name).map_err(api_error)?;
    Ok(Json(view.into()))
}

#[axum::debug_handler]
async fn open_dataset_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<OpenDatasetPayload>,
) -> Result<Json<DatasetResponse>, ApiError> {
    state.set_busy(true, format!("Abriendo '{name}'..."));
    let result = state
        .engine
        .open_dataset(&name, payload.multi_label, payload.view_mode)
        .await;
    finish(&state, result, format!("Dataset '{name}' abierto."))
        .map(|view| Json(view.into()))
}

#[axum::debug_handler]
async fn delete_dataset_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.set_busy(true, format!("Borrando '{name}'..."));
    let result = state.engine.delete_dataset(&name).await;
    finish(&state, result, format!("Dataset '{name}' borrado."))?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn copy_dataset_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<CopyDatasetPayload>,
) -> Result<impl IntoResponse, ApiError> {
    state.set_busy(true, format!("Copiando '{name}' en '{}'...", payload.name));
    let result = state
        .engine
        .copy_dataset(&name, &payload.name, payload.workspace.as_deref())
        .await;
    finish(&state, result, format!("Dataset '{name}' copiado."))?;
    Ok((StatusCode::CREATED, Json(json!({ "name": payload.name }))))
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(intent): Json<QueryIntent>,
) -> Result<Json<DatasetResponse>, ApiError> {
    state.set_busy(true, format!("Buscando en '{name}'..."));
    let result = state.engine.apply(&name, intent).await;
    finish(&state, result, format!("Búsqueda en '{name}' completada."))
        .map(|view| Json(view.into()))
}

#[axum::debug_handler]
async fn view_mode_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<ViewModePayload>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let view = state
        .engine
        .set_view_mode(&name, payload.view_mode)
        .map_err(api_error)?;
    Ok(Json(view.into()))
}

#[axum::debug_handler]
async fn log_records_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<LogRecordsPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let mut records = Vec::with_capacity(payload.records.len());
    for mut raw in payload.records {
        if let Some(fields) = raw.as_object_mut() {
            fields
                .entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }
        let record: Record = serde_json::from_value(raw).map_err(|e| {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": format!("Registro mal formado: {e}")})),
            )
        })?;
        records.push(record);
    }

    state.set_busy(true, format!("Registrando {} registro(s) en '{name}'...", records.len()));
    let result = state.engine.log_records(&name, records).await;
    let processed = finish(&state, result, format!("Registro en '{name}' completado."))?;
    Ok((StatusCode::CREATED, Json(json!({ "processed": processed }))))
}

#[axum::debug_handler]
async fn validate_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    Json(payload): Json<ValidatePayload>,
) -> Result<Json<Value>, ApiError> {
    ensure_annotate_mode(&state, &name)?;
    let id = RecordId::from(id.as_str());
    state.set_busy(true, format!("Validando {id} en '{name}'..."));
    let result = state.engine.validate(&name, &id, &payload.labels).await;
    finish(&state, result, format!("Registro {id} validado."))
        .map(|records| Json(json!({ "records": records })))
}

#[axum::debug_handler]
async fn validate_prediction_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    ensure_annotate_mode(&state, &name)?;
    let id = RecordId::from(id.as_str());
    state.set_busy(true, format!("Validando predicción de {id} en '{name}'..."));
    let result = state.engine.validate_from_prediction(&name, &id).await;
    finish(&state, result, format!("Predicción de {id} aceptada."))
        .map(|records| Json(json!({ "records": records })))
}

#[axum::debug_handler]
async fn reset_handler(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    ensure_annotate_mode(&state, &name)?;
    let id = RecordId::from(id.as_str());
    state.set_busy(true, format!("Restableciendo {id} en '{name}'..."));
    let result = state.engine.reset(&name, &id).await;
    finish(&state, result, format!("Registro {id} restablecido."))
        .map(|records| Json(json!({ "records": records })))
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut sender) = state.shutdown_sender.lock() {
        if let Some(sender) = sender.take() {
            let _ = sender.send(());
        }
    }
    StatusCode::OK
}

/// La validación solo se expone en modo `annotate`.
fn ensure_annotate_mode(state: &AppState, name: &str) -> Result<(), ApiError> {
    let view = state.engine.view(name).map_err(api_error)?;
    if !view.dataset.view_mode.permits_annotation() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": format!("El dataset '{name}' no está en modo anotación.")})),
        ));
    }
    Ok(())
}

/// Cierra la operación en el estado del servidor y traduce el error.
fn finish<T>(state: &AppState, result: Result<T, EngineError>, done: String) -> Result<T, ApiError> {
    match result {
        Ok(value) => {
            state.set_busy(false, done);
            Ok(value)
        }
        Err(err) => {
            state.set_busy(false, format!("Error: {err}"));
            Err(api_error(err))
        }
    }
}

fn api_error(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::UnknownDataset(_) | EngineError::UnknownRecord { .. } => StatusCode::NOT_FOUND,
        EngineError::EmptyAnnotation | EngineError::InvalidRecord { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Dispatch(_) => StatusCode::BAD_GATEWAY,
    };
    if status == StatusCode::BAD_GATEWAY {
        error!("Error del backend: {err}");
    } else {
        warn!("Petición rechazada: {err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}
