//! The REST surface: thin axum handlers over the registry and the delegated
//! event subsystem, plus the metrics route.

mod ui;

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, info};

use ethgate_core::{
    ArchiveExtractor, DeployContract, GatewayError, MessageHeaders, MessageType, OpenApiDocument,
    SubscriptionManager, TransactionCommon,
};
use ethgate_ethereum::select_contract;

use crate::metrics::GatewayMetrics;
use crate::registry::{ContractRegistration, ContractStore};

/// Shared handler state.
pub struct AppState {
    pub store: Arc<ContractStore>,
    /// The event subsystem; endpoints answer 405 when absent.
    pub events: Option<Arc<dyn SubscriptionManager>>,
    /// Archive handling for uploads; archives are rejected when absent.
    pub archive: Option<Arc<dyn ArchiveExtractor>>,
    pub metrics: Arc<GatewayMetrics>,
}

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/contracts", get(list_contracts))
        .route("/contracts/:address", get(get_contract))
        .route("/abis", get(list_abis).post(add_abi))
        .route("/abis/:abi", get(get_abi))
        .route("/abis/:abi/:address", put(register_contract))
        .route("/eventstreams", get(list_streams).post(create_stream))
        .route("/eventstreams/:id", get(get_stream).delete(delete_stream))
        .route("/eventstreams/:id/suspend", post(suspend_stream))
        .route("/eventstreams/:id/resume", post(resume_stream))
        .route("/subscriptions", get(list_subscriptions))
        .route(
            "/subscriptions/:id",
            get(get_subscription).delete(delete_subscription),
        )
        .route("/metrics", get(serve_metrics))
        .with_state(state)
}

/// Error wrapper mapping the gateway taxonomy onto HTTP responses.
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        debug!(%status, error = %self.0, "request failed");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

async fn list_contracts(State(state): State<Arc<AppState>>) -> Response {
    Json(state.store.list_contracts()).into_response()
}

async fn list_abis(State(state): State<Arc<AppState>>) -> Response {
    Json(state.store.list_abis()).into_response()
}

async fn get_contract(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let mut id = address.to_lowercase();
    if let Some(stripped) = id.strip_prefix("0x") {
        id = stripped.to_string();
    }
    // the sanitized in-memory index is always consulted before the filesystem
    let info = match state.store.contract_by_address(&id) {
        Some(info) => info,
        None => {
            id = state.store.resolve_contract_addr(&address)?;
            state
                .store
                .contract_by_address(&id)
                .ok_or_else(|| GatewayError::NotFound("not found".to_string()))?
        }
    };
    serve_info(&state, "contract", &id, json!(info), false, &params)
}

async fn get_abi(
    State(state): State<Arc<AppState>>,
    Path(abi): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let id = abi.to_lowercase();
    let info = state
        .store
        .abi_by_id(&id)
        .ok_or_else(|| GatewayError::NotFound("not found".to_string()))?;
    serve_info(&state, "abi", &id, json!(info), true, &params)
}

/// Shared query-parameter semantics for contract and ABI fetches: `swagger`/
/// `openapi` return the stored document, `ui` the exerciser page, `download`
/// adds an attachment header, and `from` substitutes the default sender in
/// the returned document without touching the stored file.
fn serve_info(
    state: &AppState,
    prefix: &str,
    id: &str,
    info: Value,
    factory: bool,
    params: &HashMap<String, String>,
) -> ApiResult {
    let swagger_request = params.contains_key("swagger") || params.contains_key("openapi");
    let ui_request = params.contains_key("ui");
    let from = params.get("from").map(String::as_str).unwrap_or_default();

    if ui_request {
        let from_query = if from.is_empty() {
            String::new()
        } else {
            format!("&from={}", crate::registry::query_escape(from))
        };
        let page = ui::exerciser_html(state.store.base_url(), prefix, id, &from_query, factory);
        return Ok(Html(page).into_response());
    }

    if swagger_request {
        let mut bytes = state.store.load_swagger(prefix, id)?;
        if !from.is_empty() {
            let mut doc: OpenApiDocument = serde_json::from_slice(&bytes).map_err(|e| {
                GatewayError::Storage(format!("failed to parse stored OpenAPI definition: {e}"))
            })?;
            doc.set_from_default(from);
            bytes = serde_json::to_vec(&doc).map_err(|e| {
                GatewayError::Storage(format!("failed to serialize OpenAPI definition: {e}"))
            })?;
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().expect("static"));
        if params.contains_key("download") {
            headers.insert(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.swagger.json\"")
                    .parse()
                    .map_err(|_| GatewayError::Storage("bad attachment name".to_string()))?,
            );
        }
        return Ok((StatusCode::OK, headers, bytes).into_response());
    }

    Ok(Json(info).into_response())
}

async fn register_contract(
    State(state): State<Arc<AppState>>,
    Path((abi, address)): Path<(String, String)>,
    body: Option<Json<ContractRegistration>>,
) -> ApiResult {
    let registration = body.map(|Json(b)| b).unwrap_or_default();
    let overwritten = state.store.register_contract(
        &abi,
        &address,
        registration.register_as.as_deref(),
    )?;
    let status = if overwritten {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok(status.into_response())
}

/// Multipart upload of solidity. Files land in a scratch directory (archives
/// are handed to the extractor collaborator); `findsolidity` lists the
/// sources, `findcontracts` the compiled contract names, and the default
/// path stores a new deployable ABI.
async fn add_abi(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> ApiResult {
    let scratch = tempfile::tempdir()
        .map_err(|e| GatewayError::storage("cannot create upload directory", e))?;
    let mut fields = params;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::InvalidMessage(format!("bad multipart form: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::InvalidMessage(format!("bad upload: {e}")))?;
                save_upload(&state, scratch.path(), &file_name, &bytes)?;
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::InvalidMessage(format!("bad form field: {e}")))?;
                fields.insert(name, value);
            }
        }
    }

    if fields.contains_key("findsolidity") {
        let mut sol_files = Vec::new();
        collect_sol_files(scratch.path(), scratch.path(), &mut sol_files)?;
        sol_files.sort();
        return Ok(Json(sol_files).into_response());
    }

    let sources: Vec<String> = fields
        .get("source")
        .map(|s| vec![s.clone()])
        .unwrap_or_default();
    let compiled = state
        .store
        .compiler()
        .compile_directory(
            scratch.path(),
            &sources,
            fields.get("compiler").map(String::as_str),
        )
        .await?;

    if fields.contains_key("findcontracts") {
        let mut names: Vec<String> = compiled.keys().cloned().collect();
        names.sort();
        return Ok(Json(names).into_response());
    }

    let selected = select_contract(compiled, fields.get("contract").map(String::as_str))?;
    let mut msg = DeployContract {
        headers: MessageHeaders {
            id: state.store.new_request_id(),
            msg_type: MessageType::DeployContract,
        },
        tx: TransactionCommon::default(),
        solidity: None,
        abi: None,
        compiled: None,
        dev_doc: None,
        contract_name: None,
        compiler_version: None,
        description: None,
        register_as: None,
        parameters: Vec::new(),
    };
    let info = state.store.store_deployable_abi(&mut msg, Some(selected))?;
    info!(id = %info.id, name = %info.name, "ABI uploaded");
    Ok(Json(info).into_response())
}

fn save_upload(
    state: &AppState,
    dir: &FsPath,
    file_name: &str,
    bytes: &[u8],
) -> Result<(), GatewayError> {
    if file_name.contains('/') || file_name.contains('\\') {
        return Err(GatewayError::InvalidMessage(
            "filenames cannot contain slashes; use an archive to upload a directory structure"
                .to_string(),
        ));
    }
    let path = dir.join(file_name);
    std::fs::write(&path, bytes).map_err(|e| GatewayError::storage("cannot stage upload", e))?;
    if let Some(extractor) = &state.archive {
        if extractor.is_archive(file_name) {
            extractor.unpack(&path, dir)?;
        }
    }
    Ok(())
}

fn collect_sol_files(
    root: &FsPath,
    dir: &FsPath,
    out: &mut Vec<String>,
) -> Result<(), GatewayError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| GatewayError::storage("cannot read upload", e))?;
    for entry in entries.flatten() {
        let path: PathBuf = entry.path();
        if path.is_dir() {
            collect_sol_files(root, &path, out)?;
        } else if path.extension().map(|e| e == "sol").unwrap_or(false) {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

async fn serve_metrics(State(state): State<Arc<AppState>>) -> ApiResult {
    let body = state
        .metrics
        .gather()
        .map_err(|e| GatewayError::Storage(format!("cannot encode metrics: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        "text/plain; charset=utf-8".parse().expect("static"),
    );
    Ok((StatusCode::OK, headers, body).into_response())
}

fn events(state: &AppState) -> Result<&Arc<dyn SubscriptionManager>, ApiError> {
    state
        .events
        .as_ref()
        .ok_or_else(|| GatewayError::EventsUnsupported.into())
}

async fn create_stream(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<Value>,
) -> ApiResult {
    let created = events(&state)?.add_stream(spec).await?;
    Ok(Json(created).into_response())
}

async fn list_streams(State(state): State<Arc<AppState>>) -> ApiResult {
    let streams = events(&state)?.streams().await;
    Ok(Json(streams).into_response())
}

async fn get_stream(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let stream = events(&state)?.stream_by_id(&id).await?;
    Ok(Json(stream).into_response())
}

async fn delete_stream(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    events(&state)?.delete_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn suspend_stream(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    events(&state)?.suspend_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn resume_stream(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    events(&state)?.resume_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_subscriptions(State(state): State<Arc<AppState>>) -> ApiResult {
    let subs = events(&state)?.subscriptions().await;
    Ok(Json(subs).into_response())
}

async fn get_subscription(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let sub = events(&state)?.subscription_by_id(&id).await?;
    Ok(Json(sub).into_response())
}

async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    events(&state)?.delete_subscription(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
