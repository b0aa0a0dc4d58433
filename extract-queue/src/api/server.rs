//! API server setup and configuration.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::models::VersionInfo;
use crate::api::routes;
use crate::error::{Error, Result};
use crate::pipeline::WorkerPool;
use crate::services::JobService;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Request body size limit in bytes
    pub body_limit: usize,
    /// Path prefix for every route, without a trailing slash (may be empty)
    pub prefix: String,
    pub version: VersionInfo,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12556,
            enable_cors: true,
            body_limit: 256 * 1024 * 1024, // 256MB
            prefix: "/extract".to_string(),
            version: VersionInfo::default(),
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from a key lookup, falling back to defaults.
    ///
    /// Supported keys:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "8080")
    /// - `API_PREFIX` (e.g. "/extract", empty for the root)
    /// - `API_BODY_LIMIT_BYTES`
    /// - `API_VERSION`, `GIT_HASH`
    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.bind_address = bind_address.trim().to_string();
        }

        if let Some(port) = get("API_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("Invalid API_PORT '{}': {}", port, e)))?;
        }

        if let Some(limit) = get("API_BODY_LIMIT_BYTES") {
            config.body_limit = limit.trim().parse().map_err(|e| {
                Error::config(format!("Invalid API_BODY_LIMIT_BYTES '{}': {}", limit, e))
            })?;
        }

        if let Some(prefix) = lookup("API_PREFIX") {
            config.prefix = normalize_prefix(&prefix);
        }

        config.version = VersionInfo {
            version: get("API_VERSION"),
            git_hash: get("GIT_HASH"),
        };

        Ok(config)
    }
}

/// `"extract/"` -> `"/extract"`, `"/"` -> `""`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub job_service: Arc<JobService>,
    /// Worker pool, for health reporting
    pub worker_pool: Option<Arc<WorkerPool>>,
    /// Route prefix used when building job endpoint URLs
    pub api_prefix: String,
    pub version: VersionInfo,
}

impl AppState {
    pub fn new(job_service: Arc<JobService>) -> Self {
        Self {
            start_time: Instant::now(),
            job_service,
            worker_pool: None,
            api_prefix: String::new(),
            version: VersionInfo::default(),
        }
    }

    pub fn with_worker_pool(mut self, worker_pool: Arc<WorkerPool>) -> Self {
        self.worker_pool = Some(worker_pool);
        self
    }

    /// Take the prefix and version info from the server config.
    pub fn with_config(mut self, config: &ApiServerConfig) -> Self {
        self.api_prefix = config.prefix.clone();
        self.version = config.version.clone();
        self
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        let state = state.with_config(&config);
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let health_path = format!("{}/health", self.config.prefix);
        let mut router = routes::create_router(self.state.clone(), &self.config.prefix)
            .layer(DefaultBodyLimit::max(self.config.body_limit));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        // Health probes are frequent; keep them out of the request log.
        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(move |req: &Request| {
                    if req.uri().path() == health_path {
                        return Span::none();
                    }
                    tracing::info_span!("request", method = %req.method(), uri = %req.uri())
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if !span.is_disabled() {
                            tracing::info!(
                                status = res.status().as_u16(),
                                latency_ms = latency.as_millis() as u64,
                                "Request finished"
                            );
                        }
                    },
                ),
        )
    }

    /// Start the server and serve until the cancel token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            "API server listening on http://{}{}",
            addr,
            self.config.prefix
        );

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }
}
