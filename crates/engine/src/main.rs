use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;

use trawler_common::types::JobSpec;
use trawler_common::{JobId, TrawlerError};
use trawler_engine::config;
use trawler_engine::jobs::{JobManager, JobTable};
use trawler_engine::scheduler::CrawlScheduler;
use trawler_fetcher::Fetcher;
use trawler_frontier::{CoordinationStore, SeedLoader, UrlFrontier};

/// Attempts to reach the coordination store before giving up at boot.
const STORE_CONNECT_ATTEMPTS: u32 = 5;
const STORE_CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Shared application state accessible from axum handlers.
struct AppState {
    frontier: Arc<UrlFrontier>,
    scheduler: Arc<CrawlScheduler>,
    jobs: Arc<JobManager>,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Trawler engine starting");

    // Load configuration — fail loudly on misconfiguration.
    let crawl_config = match config::load_config(None) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Coordination store, with bounded retries at boot.
    let store_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let store = match connect_store(&store_url).await {
        Some(store) => store,
        None => {
            tracing::error!(
                attempts = STORE_CONNECT_ATTEMPTS,
                "Coordination store unreachable — giving up"
            );
            std::process::exit(2);
        }
    };

    let frontier = Arc::new(UrlFrontier::new(store, crawl_config.frontier.clone()));

    let fetcher = match Fetcher::new(crawl_config.fetcher.clone()) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build fetcher — refusing to start");
            std::process::exit(1);
        }
    };

    let job_table = Arc::new(JobTable::default());
    let scheduler = Arc::new(CrawlScheduler::new(
        Arc::clone(&frontier),
        Arc::clone(&fetcher),
        crawl_config.scheduler.clone(),
        &crawl_config.frontier,
        Arc::clone(&job_table),
    ));
    let jobs = Arc::new(JobManager::new(
        Arc::clone(&frontier),
        Arc::clone(&scheduler),
        job_table,
    ));

    // Periodic maintenance: sweep idle circuit breakers.
    {
        let fetcher = Arc::clone(&fetcher);
        tokio::spawn(async move {
            let interval = Duration::from_secs(600);
            loop {
                tokio::time::sleep(interval).await;
                fetcher.sweep_idle_breakers(Duration::from_secs(3600));
            }
        });
    }

    let state = Arc::new(AppState {
        frontier,
        scheduler: Arc::clone(&scheduler),
        jobs,
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/admit", post(admit_handler))
        .route("/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/jobs/{id}", get(get_job_handler))
        .route("/jobs/{id}/pause", post(pause_job_handler))
        .route("/jobs/{id}/resume", post(resume_job_handler))
        .route("/jobs/{id}/stop", post(stop_job_handler))
        .route("/stats", get(stats_handler))
        .route("/stats/domains", get(domain_stats_handler))
        .with_state(state);

    let port: u16 = std::env::var("ENGINE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "Trawler engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await
        .expect("HTTP server error");

    tracing::info!("Trawler engine stopped");
}

async fn connect_store(store_url: &str) -> Option<CoordinationStore> {
    for attempt in 1..=STORE_CONNECT_ATTEMPTS {
        match CoordinationStore::connect(store_url).await {
            Ok(store) => return Some(store),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    error = %e,
                    "Coordination store not reachable yet"
                );
                if attempt < STORE_CONNECT_ATTEMPTS {
                    tokio::time::sleep(STORE_CONNECT_BACKOFF).await;
                }
            }
        }
    }
    None
}

/// Stop the scheduler cleanly on ctrl-c; workers finish their current URL.
async fn shutdown_signal(scheduler: Arc<CrawlScheduler>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
    scheduler.stop();
}

fn error_response(e: TrawlerError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        TrawlerError::NotFound(_) => StatusCode::NOT_FOUND,
        TrawlerError::Validation(_) | TrawlerError::InvalidUrl(_) | TrawlerError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        TrawlerError::FrontierUnavailable(_) | TrawlerError::Store(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

/// Health check: the frontier is healthy iff the store answers PING.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.frontier.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "scheduler": state.scheduler.state().as_str(),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            })),
        ),
    }
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

/// Request body for bulk URL admission.
#[derive(Deserialize)]
struct AdmitRequest {
    urls: Vec<String>,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    category: Option<String>,
}

/// POST /admit — push URLs straight into the frontier.
async fn admit_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdmitRequest>,
) -> impl IntoResponse {
    let mut loader = SeedLoader::new(Arc::clone(&state.frontier), 100.0);
    match loader
        .add_seeds(&request.urls, request.priority, request.category.as_deref())
        .await
    {
        Ok(report) => (StatusCode::OK, Json(serde_json::json!(report))).into_response(),
        Err(e) => error_response(e.into()).into_response(),
    }
}

/// POST /jobs — create and start a crawl job.
async fn create_job_handler(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<JobSpec>,
) -> impl IntoResponse {
    match state.jobs.start_job(spec).await {
        Ok(snapshot) => (StatusCode::ACCEPTED, Json(serde_json::json!(snapshot))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn list_jobs_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!(state.jobs.jobs()))
}

async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(id) = JobId::parse(&id) else {
        return error_response(TrawlerError::Validation("Bad job id".to_string())).into_response();
    };
    match state.jobs.job(id) {
        Some(snapshot) => Json(serde_json::json!(snapshot)).into_response(),
        None => error_response(TrawlerError::NotFound(format!("job {}", id))).into_response(),
    }
}

async fn pause_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    job_transition(&state, &id, JobTransition::Pause).await
}

async fn resume_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    job_transition(&state, &id, JobTransition::Resume).await
}

async fn stop_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    job_transition(&state, &id, JobTransition::Stop).await
}

enum JobTransition {
    Pause,
    Resume,
    Stop,
}

async fn job_transition(
    state: &Arc<AppState>,
    raw_id: &str,
    transition: JobTransition,
) -> axum::response::Response {
    let Some(id) = JobId::parse(raw_id) else {
        return error_response(TrawlerError::Validation("Bad job id".to_string())).into_response();
    };

    let result = match transition {
        JobTransition::Pause => state.jobs.pause_job(id).await,
        JobTransition::Resume => state.jobs.resume_job(id).await,
        JobTransition::Stop => state.jobs.stop_job(id).await,
    };

    match result {
        Ok(status) => Json(serde_json::json!({
            "job_id": id.to_string(),
            "status": status.as_str(),
        }))
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /stats — scheduler and frontier counters plus job snapshots.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let frontier_stats = match state.frontier.stats().await {
        Ok(stats) => stats,
        Err(e) => return error_response(e.into()).into_response(),
    };

    Json(serde_json::json!({
        "scheduler": state.scheduler.stats(),
        "frontier": frontier_stats,
        "jobs": state.jobs.jobs(),
    }))
    .into_response()
}

/// GET /stats/domains?limit=20 — busiest hosts first.
async fn domain_stats_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let limit = params
        .get("limit")
        .and_then(|value| value.parse().ok())
        .unwrap_or(20);
    let hosts = state.scheduler.host_registry().snapshot(limit).await;
    Json(serde_json::json!(hosts))
}
