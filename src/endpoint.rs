/// HTTP endpoint for querying service status
///
/// Lets external tools check whether polling is healthy without touching
/// the database.
///
/// Endpoints:
/// - GET /status - Monitoring state and yesterday's usage
/// - GET /health - Service health check

use crate::daemon::{lock_status, ServiceStatus, SharedStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Body of GET /status
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub statistic_id: String,
    pub name: String,
    /// Usage of the most recent fetched day, kWh rounded to 2 decimals
    pub yesterday_total_kwh: Option<f64>,
    pub last_successful_update: Option<DateTime<Utc>>,
    pub last_poll_attempted: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
}

impl From<&ServiceStatus> for StatusResponse {
    fn from(status: &ServiceStatus) -> Self {
        Self {
            statistic_id: status.statistic_id.clone(),
            name: status.name.clone(),
            yesterday_total_kwh: status.state.yesterday_total_kwh.map(round_kwh),
            last_successful_update: status.state.last_successful_update,
            last_poll_attempted: status.state.last_poll_attempted,
            consecutive_failures: status.state.consecutive_failures,
            last_error: status.state.last_error.clone(),
        }
    }
}

fn round_kwh(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Resolve a request path to a status code and JSON body.
pub fn route(url: &str, status: &SharedStatus) -> (u16, serde_json::Value) {
    let path = url.split('?').next().unwrap_or(url);

    match path {
        "/health" => (
            200,
            json!({
                "status": "ok",
                "service": SERVICE_NAME,
                "version": SERVICE_VERSION
            }),
        ),
        "/status" => {
            let response = StatusResponse::from(&*lock_status(status));
            match serde_json::to_value(&response) {
                Ok(body) => (200, body),
                Err(e) => (500, json!({ "error": e.to_string() })),
            }
        }
        _ => (
            404,
            json!({
                "error": "Not found",
                "available_endpoints": ["/health", "/status"]
            }),
        ),
    }
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start HTTP endpoint server on the specified port (blocks)
pub fn start_endpoint_server(port: u16, status: SharedStatus) -> Result<(), String> {
    let server = tiny_http::Server::http(format!("0.0.0.0:{}", port))
        .map_err(|e| format!("Failed to start HTTP server: {}", e))?;

    info!("📡 HTTP endpoint listening on http://0.0.0.0:{}", port);
    info!("   GET /status - Polling state and yesterday's usage");
    info!("   GET /health - Service health check");

    for request in server.incoming_requests() {
        let (code, body) = route(request.url(), &status);

        if let Err(e) = request.respond(create_response(code, &body)) {
            warn!("Failed to send response: {}", e);
        }
    }

    Ok(())
}

/// Create HTTP response with JSON body
fn create_response(
    status_code: u16,
    json: &serde_json::Value,
) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string());
    let response = tiny_http::Response::from_data(body.into_bytes())
        .with_status_code(tiny_http::StatusCode::from(status_code));

    match tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
