//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Backups attempted, one-shot and periodic
    pub static ref BACKUPS_ATTEMPTED: CounterVec = register_counter_vec!(
        "etcd_backup_operator_backups_attempt_total",
        "Total number of backup attempts",
        &["namespace", "name"]
    ).unwrap();

    /// Backups that completed successfully
    pub static ref BACKUPS_SUCCEEDED: CounterVec = register_counter_vec!(
        "etcd_backup_operator_backups_success_total",
        "Total number of successful backups",
        &["namespace", "name"]
    ).unwrap();

    /// Unix time of the last successful backup
    pub static ref BACKUPS_LAST_SUCCESS: GaugeVec = register_gauge_vec!(
        "etcd_backup_operator_backups_last_success",
        "Unix timestamp of the last successful backup",
        &["namespace", "name"]
    ).unwrap();

    /// Backup duration histogram
    pub static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "etcd_backup_operator_backup_duration_seconds",
        "Duration of backup operations",
        &["namespace", "name"],
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "etcd_backup_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "etcd_backup_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "etcd_backup_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Keys abandoned after exhausting their retries
    pub static ref QUEUE_DROPPED: CounterVec = register_counter_vec!(
        "etcd_backup_operator_queue_dropped_total",
        "Keys dropped from the work queue after too many failures",
        &["kind"]
    ).unwrap();

    /// Keys waiting in the work queue
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "etcd_backup_operator_queue_depth",
        "Number of keys waiting in the work queue"
    ).unwrap();

    /// Live periodic schedules
    pub static ref ACTIVE_SCHEDULES: Gauge = register_gauge!(
        "etcd_backup_operator_active_schedules",
        "Number of periodic backup runners currently scheduled"
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "etcd_backup_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/readyz" => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder
        .format_type()
        .parse::<hyper::header::HeaderValue>()
    {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Record a backup attempt for a resource
pub fn record_attempt(namespace: &str, name: &str) {
    BACKUPS_ATTEMPTED.with_label_values(&[namespace, name]).inc();
}

/// Record a successful backup for a resource
pub fn record_success(namespace: &str, name: &str, at_unix_secs: i64) {
    BACKUPS_SUCCEEDED.with_label_values(&[namespace, name]).inc();
    BACKUPS_LAST_SUCCESS
        .with_label_values(&[namespace, name])
        .set(at_unix_secs as f64);
}
