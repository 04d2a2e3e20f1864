//! HTTP server for the Prometheus endpoint

use super::{Metrics, StatusSource};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Serves `/metrics` and `/health` for a running bridge
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    source: Arc<dyn StatusSource>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, source: Arc<dyn StatusSource>, addr: SocketAddr) -> Self {
        Self {
            metrics,
            source,
            addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);
        self.serve(listener).await
    }

    /// Accept loop on an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();
            let source = self.source.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = metrics.clone();
                    let source = source.clone();
                    async move { handle_request(req, metrics, source).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    source: Arc<dyn StatusSource>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => {
            metrics.observe(&source.status());

            let encoder = TextEncoder::new();
            let metric_families = metrics.registry.gather();
            let mut buffer = Vec::new();

            match encoder.encode(&metric_families, &mut buffer) {
                Ok(_) => {
                    let mut response = respond(StatusCode::OK, buffer);
                    if let Ok(content_type) =
                        encoder.format_type().parse::<hyper::header::HeaderValue>()
                    {
                        response
                            .headers_mut()
                            .insert(hyper::header::CONTENT_TYPE, content_type);
                    }
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to encode metrics",
                    )
                }
            }
        }
        "/health" | "/healthz" => {
            let status = source.status();
            if status.is_healthy() {
                respond(StatusCode::OK, "OK")
            } else {
                respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("source: {}, target: {}", status.source, status.target),
                )
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}
