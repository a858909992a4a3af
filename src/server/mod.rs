use crate::config::Config;
use crate::pipeline::{PipelineSettings, TaskPipeline};
use crate::processor::TaskProcessor;
use crate::progress::ProgressBroker;
use crate::state::TaskStore;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use webpforge_av::Codec;

pub mod auth;
pub mod error;
pub mod routes_api;
pub mod routes_ws;

pub use error::ApiError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<TaskStore>,
    pub broker: Arc<ProgressBroker>,
    pub processor: Arc<TaskProcessor>,
}

impl AppContext {
    /// Wire up the store, broker, pipeline and task processor for `config`.
    /// The processor is not started.
    pub fn new(config: Config, codec: Arc<dyn Codec>) -> Self {
        let store = Arc::new(TaskStore::new());
        let broker = Arc::new(ProgressBroker::new(config.tasks.progress_buffer));

        let settings = PipelineSettings {
            temp_dir: config.tasks.temp_dir.clone(),
            default_frame_workers: config.processing.frame_workers,
            timeout: config.tasks.timeout(),
        };
        let pipeline = Arc::new(TaskPipeline::new(
            codec,
            store.clone(),
            broker.clone(),
            settings,
        ));
        let processor = Arc::new(TaskProcessor::new(
            config.tasks.workers,
            store.clone(),
            broker.clone(),
            pipeline,
        ));

        Self {
            config: Arc::new(config),
            store,
            broker,
            processor,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let protected_routes = routes_api::api_routes().merge(routes_ws::ws_routes());

    // Apply auth middleware to protected routes only if enabled
    let protected_routes = if ctx.config.server.auth.enabled {
        protected_routes.layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::api_auth_middleware,
        ))
    } else {
        protected_routes
    };

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes);

    if ctx.config.server.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
        app = app.layer(cors);
    }

    app.layer(TraceLayer::new_for_http()).with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Bind the configured address and serve until a shutdown signal arrives.
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("Starting server on {}", addr);
    serve(listener, ctx, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(ctx);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
