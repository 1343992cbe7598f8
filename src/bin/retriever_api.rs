use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use docrag::retrieval::RetrievalResult;
use docrag::{
    render_context, IndexArgs, ProviderArgs, RetrievalEngine, RetrievalError, RetrievalRequest,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "docrag-retriever",
    about = "HTTP API that wraps two-stage retrieval over the docrag index"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "DOCRAG_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Maximum attributes a request may ask for.
    #[arg(long, env = "DOCRAG_MAX_TOP_K", default_value_t = 32)]
    max_top_k: usize,

    /// Maximum raw stage-2 matches a request may ask for.
    #[arg(long, env = "DOCRAG_MAX_RAW_TOP_K", default_value_t = 200)]
    max_raw_top_k: usize,

    #[command(flatten)]
    provider: ProviderArgs,

    #[command(flatten)]
    index: IndexArgs,
}

#[derive(Clone)]
struct AppState {
    engine: RetrievalEngine,
    max_top_k: usize,
    max_raw_top_k: usize,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    #[serde(flatten)]
    result: RetrievalResult,
    context: String,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    latency_ms: f64,
    top_k_attrs: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    docrag::init_tracing();
    let cli = ApiCli::parse();

    let engine = RetrievalEngine::new(
        cli.provider.build_embedder()?,
        cli.index.build_index()?.index,
    );
    let state = AppState {
        engine,
        max_top_k: cli.max_top_k.max(1),
        max_raw_top_k: cli.max_raw_top_k.max(1),
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/query", post(query_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!(%addr, "docrag-retriever listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn query_handler(
    State(state): State<AppState>,
    Json(mut request): Json<RetrievalRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ErrorBody>)> {
    if request.text.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    request.top_k_parents = request.top_k_parents.clamp(1, state.max_top_k);
    request.top_k_attrs = request.top_k_attrs.clamp(1, state.max_top_k);
    request.top_k_raw_attrs = request
        .top_k_raw_attrs
        .clamp(request.top_k_attrs, state.max_raw_top_k.max(request.top_k_attrs));

    let start = Instant::now();
    let engine = state.engine.clone();
    let top_k_attrs = request.top_k_attrs;
    let result = tokio::task::spawn_blocking(move || engine.query(&request))
        .await
        .map_err(|err| internal_error(format!("retrieval task join error: {err}")))?
        .map_err(|err| match err {
            RetrievalError::InvalidRequest(message) => bad_request(message),
            other => {
                tracing::warn!(error = %other, "retrieval failed");
                internal_error(other.to_string())
            }
        })?;

    let context = render_context(&result);
    Ok(Json(QueryResponse {
        result,
        context,
        meta: ResponseMeta {
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            top_k_attrs,
        },
    }))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}
