//! Router assembly and the HTTP server loop.

use std::future::Future;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::auth::{IdentityResolver, StaticTokenResolver};
use super::{cors, handlers};
use crate::config::AppConfig;
use crate::llm::ProviderGateway;
use crate::metrics::metrics_handler;
use crate::pipeline::LaneRunner;
use crate::scheduler::{Dispatcher, JobExecutor, JobQueue};
use crate::storage::Database;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub runner: LaneRunner,
    pub executor: JobExecutor,
    pub dispatcher: Dispatcher,
    pub gateway: ProviderGateway,
    pub identity: Arc<dyn IdentityResolver>,
    pub internal_key: Option<String>,
    pub cors_origins: Arc<Vec<String>>,
}

impl ApiState {
    pub fn new(config: &AppConfig, db: &Database, gateway: ProviderGateway) -> Self {
        let queue = JobQueue::new(db, config);
        let executor = JobExecutor::new(queue, gateway.clone(), config.tools.clone());

        Self {
            db: db.clone(),
            runner: LaneRunner::from_database(db, gateway.clone()),
            dispatcher: Dispatcher::new(executor.clone()),
            executor,
            gateway,
            identity: Arc::new(StaticTokenResolver::new(config.api_tokens.clone())),
            internal_key: config.internal_key.clone(),
            cors_origins: Arc::new(config.cors_origins.clone()),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        self.executor.queue()
    }
}

pub fn router(state: ApiState) -> Router {
    let origins = Arc::clone(&state.cors_origins);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(metrics_handler))
        .route("/runs", post(handlers::submit_run))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/jobs", post(handlers::enqueue_job))
        .route("/jobs/execute", post(handlers::execute_job))
        .route("/jobs/dispatch", post(handlers::dispatch))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/ai/dispatch", post(handlers::ai_dispatch))
        .route("/llm/route", post(handlers::llm_route))
        .layer(TraceLayer::new_for_http())
        // Outermost so preflight and error responses carry the headers too.
        .layer(middleware::from_fn_with_state(origins, cors::cors))
        .with_state(state)
}

/// Serves until Ctrl-C.
pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    serve_with_shutdown(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    })
    .await
}

pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: ApiState,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
