use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_dynamodb::Client;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use clap::Parser;
use lat_hdr::{
    DEFAULT_TABLE_NAME, DynamoStore, ErrorResponse, HdrError, QueryRequest, QueryResponse, Service,
    SummaryStore,
};
use log::{info, warn};
use tokio::{net::TcpListener, signal};

#[derive(Parser, Debug)]
#[command(name = "lat-api", about = "Group-by percentile queries over stored latency histograms")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "LAT_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
    /// DynamoDB table holding the summaries.
    #[arg(long, env = "LAT_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rtr = router(summary_svc(args.table).await);

    info!("listening on {}", args.listen);
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    axum::serve(listener, rtr)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
            }
        })
        .await?;

    Ok(())
}

fn router<S: SummaryStore + Clone + 'static>(svc: Service<S>) -> Router {
    Router::new()
        .route("/query", post(query::<S>))
        .route("/healthz", get(healthz))
        .with_state(svc)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn query<S: SummaryStore>(
    State(svc): State<Service<S>>,
    body: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> std::result::Result<Json<QueryResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("bad request: {}", e.body_text()),
            }),
        )
    })?;

    match svc.query(&request).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            let status = error_status(&e);
            if status.is_server_error() {
                warn!("query failed: {e}");
            }
            Err((status, Json(ErrorResponse::from(&e))))
        }
    }
}

fn error_status(e: &HdrError) -> StatusCode {
    match e {
        HdrError::BadRequest(_) | HdrError::Configuration(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn summary_svc(table: String) -> Service<DynamoStore> {
    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let config = aws_config::from_env().region(region_provider).load().await;
    let client = Client::new(&config);

    Service::new(DynamoStore::new(client, table))
}
