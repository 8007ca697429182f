use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::ToSocketAddrs;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsPublisher;
use crate::monitor::Monitor;

const NO_SUCH_CONTAINER: &str = "no such container";

struct ApiState<I> {
    monitor: Arc<Monitor<I>>,
    publisher: MetricsPublisher,
}

impl<I> Clone for ApiState<I> {
    fn clone(&self) -> Self {
        Self {
            monitor: Arc::clone(&self.monitor),
            publisher: self.publisher.clone(),
        }
    }
}

async fn list_containers<I>(State(state): State<ApiState<I>>) -> Json<BTreeMap<String, String>>
where
    I: Send + Sync + 'static,
{
    Json(state.monitor.list())
}

async fn get_container<I>(State(state): State<ApiState<I>>, Path(id): Path<String>) -> Response
where
    I: Send + Sync + 'static,
{
    match state.monitor.snapshot(&id) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(NO_SUCH_CONTAINER)).into_response(),
    }
}

async fn export_metrics<I>(State(state): State<ApiState<I>>) -> Response
where
    I: Send + Sync + 'static,
{
    match state.publisher.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.publisher.content_type())],
            body,
        )
            .into_response(),
        Err(err) => {
            log::error!("failed to encode metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

/// HTTP surface over the monitor: container queries and the Prometheus scrape endpoint.
pub struct ApiServer {
    router: axum::Router,
}

impl ApiServer {
    pub fn new<I>(monitor: Arc<Monitor<I>>, publisher: MetricsPublisher) -> Self
    where
        I: Send + Sync + 'static,
    {
        let router = axum::Router::new()
            .route("/container", get(list_containers::<I>))
            .route("/container/{id}", get(get_container::<I>))
            .route("/metrics", get(export_metrics::<I>))
            .with_state(ApiState { monitor, publisher });
        Self { router }
    }

    /// Serves requests until `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn listen(self, addr: impl ToSocketAddrs, token: CancellationToken) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("API listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(token.cancelled_owned())
            .await
    }
}
