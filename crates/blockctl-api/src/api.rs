//! Volume API routes and handlers.

use crate::config::ApiConfig;
use crate::security::{identity_from_headers, security_headers_middleware};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use blockctl_core::error::ResourceKind;
use blockctl_core::filter::{FilterValidator, ListFilters, Resource};
use blockctl_core::model::Volume;
use blockctl_core::summary::summarize;
use blockctl_core::view::{
    SnapshotEnvelope, SnapshotList, SummaryEnvelope, VolumeBrief, VolumeDetail, VolumeEnvelope,
    VolumeList,
};
use blockctl_core::{
    ApiError, Feature, FeatureSet, ListingPaginator, RequestContext, RevertDispatcher,
    RevertRequest, RevertStateMachine, TenantScope, VersionNegotiator, ViewBuilder, VolumeStore,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Request header naming the API version; echoed on every v3 response.
pub const VERSION_HEADER: &str = "openstack-api-version";
/// Older spelling of [`VERSION_HEADER`], read when the former is absent.
pub const LEGACY_VERSION_HEADER: &str = "api-version";

/// Negotiated per-request state, inserted by the context middleware.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Caller identity.
    pub ctx: RequestContext,
    /// Capabilities at the negotiated version.
    pub features: FeatureSet,
}

/// An [`ApiError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiFault(pub ApiError);

impl From<ApiError> for ApiFault {
    fn from(err: ApiError) -> Self {
        ApiFault(err)
    }
}

impl IntoResponse for ApiFault {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::debug!(error = %err, status = status.as_u16(), "request rejected");
        }

        let mut body = json!({
            "code": status.as_u16(),
            "kind": err.kind().as_str(),
            "message": err.to_string(),
        });
        if let Some(rollback) = err.rollback_error() {
            body["rollback_error"] = json!(rollback);
        }
        (status, Json(json!({ "error": body }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFault>;

/// The volume API service.
#[derive(Clone)]
pub struct VolumeApi {
    store: Arc<dyn VolumeStore>,
    dispatcher: Arc<dyn RevertDispatcher>,
    negotiator: VersionNegotiator,
    paginator: ListingPaginator,
    views: ViewBuilder,
    bind_addr: SocketAddr,
}

impl VolumeApi {
    /// Build the service over `store`, handing reverts to `dispatcher`.
    pub fn new(
        store: Arc<dyn VolumeStore>,
        dispatcher: Arc<dyn RevertDispatcher>,
        config: &ApiConfig,
    ) -> Self {
        let validator = FilterValidator::new(config.volume_filters.iter().cloned());
        Self {
            store,
            dispatcher,
            negotiator: VersionNegotiator::default(),
            paginator: ListingPaginator::new(
                validator,
                config.max_limit,
                config.strict_tenant_scope,
            )
            .with_snapshot_validator(FilterValidator::for_resource(
                Resource::Snapshot,
                config.snapshot_filters.iter().cloned(),
            )),
            views: ViewBuilder::new(&config.public_endpoint),
            bind_addr: config.bind_addr,
        }
    }

    /// Routes of the service.
    pub fn router(self: Arc<Self>) -> Router {
        let v3 = Router::new()
            .route("/v3/:project_id/volumes", get(list_volumes))
            .route("/v3/:project_id/volumes/detail", get(list_volumes_detail))
            .route("/v3/:project_id/volumes/summary", get(volume_summary))
            .route("/v3/:project_id/volumes/:volume_id", get(show_volume))
            .route(
                "/v3/:project_id/volumes/:volume_id/action",
                post(volume_action),
            )
            .route("/v3/:project_id/snapshots", get(list_snapshots))
            .route("/v3/:project_id/snapshots/detail", get(list_snapshots_detail))
            .route("/v3/:project_id/snapshots/:snapshot_id", get(show_snapshot))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                request_context_middleware,
            ));

        let public = Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler));

        Router::new()
            .merge(v3)
            .merge(public)
            .layer(axum::middleware::from_fn(security_headers_middleware))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Listen on the configured address until the server fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.bind_addr;
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Volume API listening on {}", addr);

        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }

    fn negotiate(&self, headers: &HeaderMap) -> Result<ApiRequest, ApiError> {
        let token = match headers
            .get(VERSION_HEADER)
            .or_else(|| headers.get(LEGACY_VERSION_HEADER))
        {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ApiError::InvalidVersion(format!("{:?}", value)))?,
            ),
            None => None,
        };
        let features = self.negotiator.negotiate_features(token)?;
        let ctx = identity_from_headers(headers)?;
        Ok(ApiRequest { ctx, features })
    }

    fn visible_volume(&self, ctx: &RequestContext, raw_id: &str) -> Result<Volume, ApiError> {
        let not_found = || ApiError::NotFound {
            kind: ResourceKind::Volume,
            id: raw_id.to_string(),
        };
        let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
        self.store
            .get_volume(id)?
            .filter(|v| ctx.can_see(&v.project_id))
            .ok_or_else(not_found)
    }
}

async fn request_context_middleware(
    State(api): State<Arc<VolumeApi>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let api_request = match api.negotiate(request.headers()) {
        Ok(api_request) => api_request,
        Err(err) => return ApiFault(err).into_response(),
    };
    let version = api_request.features.version();
    request.extensions_mut().insert(api_request);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("{} {}", VersionNegotiator::SERVICE, version))
    {
        headers.insert(VERSION_HEADER, value);
    }
    headers.append(header::VARY, HeaderValue::from_static("OpenStack-API-Version"));
    response
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready_handler(State(api): State<Arc<VolumeApi>>) -> Response {
    match api
        .store
        .count_volumes(&ListFilters::default(), &TenantScope::AllTenants)
    {
        Ok(volumes) => Json(json!({ "status": "ok", "volumes": volumes })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "volume store is not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

async fn list_volumes(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path(project_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<VolumeList<VolumeBrief>>> {
    req.ctx.authorize_project(&project_id)?;
    let page = api
        .paginator
        .list(api.store.as_ref(), &req.ctx, &req.features, &params)?;
    Ok(Json(api.views.index(&page, &project_id, &params)))
}

async fn list_volumes_detail(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path(project_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<VolumeList<VolumeDetail>>> {
    req.ctx.authorize_project(&project_id)?;
    let page = api
        .paginator
        .list(api.store.as_ref(), &req.ctx, &req.features, &params)?;
    Ok(Json(api.views.detail_list(
        &page,
        &project_id,
        &params,
        &req.ctx,
        &req.features,
    )))
}

async fn volume_summary(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path(project_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<SummaryEnvelope>> {
    req.ctx.authorize_project(&project_id)?;
    req.features.require(Feature::VolumeSummary)?;
    let scope = api.paginator.scope(&req.ctx, &params)?;
    let summary = summarize(api.store.as_ref(), &scope, &req.features)?;
    Ok(Json(api.views.summary(summary)))
}

async fn show_volume(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path((project_id, volume_id)): Path<(String, String)>,
) -> ApiResult<Json<VolumeEnvelope>> {
    req.ctx.authorize_project(&project_id)?;
    let volume = api.visible_volume(&req.ctx, &volume_id)?;
    Ok(Json(api.views.show(&volume, &req.ctx, &req.features)))
}

async fn volume_action(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path((project_id, volume_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    req.ctx.authorize_project(&project_id)?;
    // Revert is the only action served.
    req.features.require(Feature::VolumeRevert)?;
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidInput(format!("malformed request body: {}", e)))?;
    let Some(revert) = body.get("revert") else {
        return Err(ApiError::InvalidInput("unsupported volume action".to_string()).into());
    };

    let request = RevertRequest::from_json(revert)?;
    let volume = api.visible_volume(&req.ctx, &volume_id)?;

    RevertStateMachine::new(api.store.as_ref(), api.dispatcher.as_ref()).revert(
        &req.ctx,
        &req.features,
        volume.id,
        request,
    )?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_snapshots(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path(project_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<SnapshotList>> {
    req.ctx.authorize_project(&project_id)?;
    let page = api
        .paginator
        .list_snapshots(api.store.as_ref(), &req.ctx, &req.features, &params)?;
    Ok(Json(api.views.snapshot_list(
        &page,
        &project_id,
        &params,
        &req.features,
        false,
    )))
}

async fn list_snapshots_detail(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path(project_id): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<SnapshotList>> {
    req.ctx.authorize_project(&project_id)?;
    let page = api
        .paginator
        .list_snapshots(api.store.as_ref(), &req.ctx, &req.features, &params)?;
    Ok(Json(api.views.snapshot_list(
        &page,
        &project_id,
        &params,
        &req.features,
        true,
    )))
}

async fn show_snapshot(
    State(api): State<Arc<VolumeApi>>,
    Extension(req): Extension<ApiRequest>,
    Path((project_id, snapshot_id)): Path<(String, String)>,
) -> ApiResult<Json<SnapshotEnvelope>> {
    req.ctx.authorize_project(&project_id)?;
    let not_found = || ApiError::NotFound {
        kind: ResourceKind::Snapshot,
        id: snapshot_id.clone(),
    };
    let id = Uuid::parse_str(&snapshot_id).map_err(|_| not_found())?;
    let snapshot = api
        .store
        .get_snapshot(id)?
        .filter(|s| req.ctx.can_see(&s.project_id))
        .ok_or_else(not_found)?;
    Ok(Json(api.views.snapshot(&snapshot, &req.features)))
}
