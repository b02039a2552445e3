//! Entrypoint: set up tracing, start the HTTP metrics & health server, connect
//! to the queue and the database, and run the relay loop.
//!
//! This application uses a strongly-typed configuration (`Settings`) defined in `config.rs`,
//! which provides:
//!  - `queue_url`      – Redis connection URL for the vote queue
//!  - `database_url`   – Postgres connection string
//!  - `poll_interval`  – Delay between relay loop iterations
//!  - `retry_backoff`  – Fixed backoff between connection attempts
//!  - `server_bind`    – HTTP bind address for metrics & health endpoints

use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use prometheus::{Encoder, TextEncoder}; // ← bring Encoder trait into scope
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use vote_relay::config::Settings;
use vote_relay::errors::RelayError;
use vote_relay::metrics;
use vote_relay::relay::Relay;

/// Application entrypoint for the vote relay.
///
/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`).
/// 2. Load `Config.toml` (and apply any `APP__…` env-var overrides).
/// 3. Launch a background HTTP server on `/metrics` and `/healthz`.
/// 4. Connect to Postgres and Redis, each retrying with a fixed backoff.
/// 5. Enter the relay loop: pop one vote per iteration, upsert it, and
///    keep the database connection alive while the queue is idle.
///
/// The loop has no normal exit; returning `Err` here terminates the process
/// with a non-zero status and the error on stderr.
#[tokio::main]
async fn main() -> Result<(), RelayError> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    info!("Starting vote relay…");

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new()?;
    info!(?settings, "Loaded configuration");

    // ───────────────────────────────────────────────────────────────
    // 3. HTTP server for metrics & health
    // ───────────────────────────────────────────────────────────────
    //
    // We must set the `Content-Type` header on `/metrics` to:
    //     text/plain; version=0.0.4; charset=utf-8
    // Otherwise Prometheus (v3+) will reject the scrape.
    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .expect("Invalid `server_bind` in configuration");

    let make_svc = make_service_fn(move |_conn| {
        async move {
            Ok::<_, RelayError>(service_fn(move |req: Request<Body>| {
                async move {
                    match (req.method(), req.uri().path()) {
                        // ─── METRICS ENDPOINT ────────────────────────────────
                        (&Method::GET, "/metrics") => {
                            // 1) Gather all metrics into a text body
                            let metrics_text = metrics::gather_metrics();

                            // 2) Create an encoder to retrieve the correct MIME string
                            let encoder = TextEncoder::new();
                            let mime = encoder.format_type();
                            //    => "text/plain; version=0.0.4; charset=utf-8"

                            // 3) Build a full HTTP response with header + body
                            let resp = Response::builder()
                                .header("Content-Type", mime)
                                .body(Body::from(metrics_text))
                                .expect("Failed to build /metrics response");

                            Ok::<Response<Body>, RelayError>(resp)
                        }

                        // ─── HEALTHCHECK ENDPOINT ───────────────────────────
                        (&Method::GET, "/healthz") => {
                            Ok::<Response<Body>, RelayError>(Response::new(Body::from("OK")))
                        }

                        // ─── ANY OTHER ROUTE ────────────────────────────────
                        _ => {
                            let not_found =
                                Response::builder().status(404).body(Body::empty()).unwrap();
                            Ok::<Response<Body>, RelayError>(not_found)
                        }
                    }
                }
            }))
        }
    });

    // Spawn the metrics & health HTTP server
    tokio::spawn(async move {
        info!(%addr, "Starting metrics & health server");
        Server::bind(&addr)
            .serve(make_svc)
            .await
            .expect("Metrics server failed");
    });

    // ───────────────────────────────────────────────────────────────
    // 4. Connect and relay
    // ───────────────────────────────────────────────────────────────
    let relay = Relay::connect(settings).await?;
    relay.run().await
}
