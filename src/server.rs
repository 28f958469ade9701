//! HTTP surface: routes, extractors, and the serve loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{Method, Uri},
    response::Response,
    routing::{get, post},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    download,
    error::{ApiError, ApiResult},
    provider::Provider,
    service::{AppService, SuggestionsResponse, VideosResponse},
    validation::{DownloadQuery, LookupBody, validate_download, validate_lookup},
};

type SharedService<P> = State<Arc<AppService<P>>>;

/// Builds the API router. Unknown paths and known paths called with the
/// wrong method both answer with the JSON 404 envelope.
pub fn router<P: Provider>(service: Arc<AppService<P>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/suggestions", post(suggestions::<P>))
        .route("/videos", post(videos::<P>))
        .route("/download", get(download_media::<P>))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(cors)
        .with_state(service)
}

pub async fn serve<P: Provider>(listener: TcpListener, service: Arc<AppService<P>>) -> Result<()> {
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutting down"),
        Err(err) => tracing::error!(%err, "failed to install Ctrl+C handler"),
    }
}

async fn suggestions<P: Provider>(
    State(service): SharedService<P>,
    body: Result<Json<LookupBody>, JsonRejection>,
) -> ApiResult<Json<SuggestionsResponse>> {
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let request = validate_lookup(body)?;
    Ok(Json(service.suggestions(&request).await?))
}

async fn videos<P: Provider>(
    State(service): SharedService<P>,
    body: Result<Json<LookupBody>, JsonRejection>,
) -> ApiResult<Json<VideosResponse>> {
    let Json(body) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let request = validate_lookup(body)?;
    Ok(Json(service.videos(&request).await?))
}

async fn download_media<P: Provider>(
    State(service): SharedService<P>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let request = validate_download(query)?;
    download::handle(&service, &request).await
}

async fn not_found(method: Method, uri: Uri) -> ApiError {
    let target = uri.path_and_query().map_or(uri.path(), |target| target.as_str());
    ApiError::not_found(format!("Cannot {method} {target}"))
}
