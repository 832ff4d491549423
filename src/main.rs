mod config;
use config::*;
mod error;
use error::ScanError;
mod types;
use types::*;
mod utils;
use utils::*;
mod hash_store;
use hash_store::HashStore;
mod file_type;
mod indicators;
mod scanner;
use scanner::VerdictEngine;
mod payment;
mod lifecycle;
use lifecycle::{LifecycleSettings, ScanLifecycle};

use serde::de::DeserializeOwned;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Method, Request, Response, Server};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const MAX_JSON_BODY: u64 = 64 * 1024;
// Room for multipart headers around the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

struct AppState {
    config: AppConfig,
    engine: VerdictEngine,
    lifecycle: ScanLifecycle,
}

/// Upload written to disk for scanning. Removed when dropped, whatever the
/// outcome of the scan.
struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    fn write(dir: &std::path::Path, filename: &str, data: &[u8]) -> std::io::Result<Self> {
        let path = dir.join(format!("{}_{}", Uuid::new_v4(), filename));
        fs::write(&path, data)?;
        Ok(Self { path })
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove upload");
        }
    }
}

fn respond(request: Request, response: JsonResponse) {
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "Failed to send response");
    }
}

fn scan_error_response(err: &ScanError) -> JsonResponse {
    error_response(err.status_code(), err.code(), &err.to_string())
}

fn read_json<T: DeserializeOwned>(request: &mut Request) -> Result<T, JsonResponse> {
    let mut body = Vec::new();
    if request
        .as_reader()
        .take(MAX_JSON_BODY)
        .read_to_end(&mut body)
        .is_err()
    {
        return Err(error_response(400, "BAD_REQUEST", "Failed to read request body"));
    }
    serde_json::from_slice(&body)
        .map_err(|e| error_response(400, "BAD_REQUEST", &format!("Invalid JSON: {}", e)))
}

fn handle_options(request: Request) {
    let response = add_cors_headers(Response::from_data(Vec::new()));
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "Failed to answer preflight");
    }
}

fn handle_upload(mut request: Request, state: &AppState) {
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string())
        .unwrap_or_default();

    if !content_type.starts_with("multipart/form-data") {
        return respond(
            request,
            error_response(400, "BAD_REQUEST", "Expected multipart/form-data"),
        );
    }

    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .unwrap_or("")
        .to_string();

    let limit = state.config.max_file_size + MULTIPART_OVERHEAD;
    if request.body_length().map_or(false, |len| len as u64 > limit) {
        return respond(request, too_large(state.config.max_file_size));
    }

    let mut body = Vec::new();
    if let Err(e) = request.as_reader().take(limit + 1).read_to_end(&mut body) {
        // Client went away mid-upload; nothing was written and no scan exists.
        warn!(error = %e, "Upload aborted");
        return respond(
            request,
            error_response(400, "BAD_REQUEST", "Failed to read request body"),
        );
    }
    if body.len() as u64 > limit {
        return respond(request, too_large(state.config.max_file_size));
    }

    let (filename, file_data) = match parse_multipart(&body, &boundary) {
        Ok(result) => result,
        Err(e) => return respond(request, error_response(400, "BAD_REQUEST", &e)),
    };
    drop(body);

    let filename = sanitize_filename(&filename);
    let file_size = file_data.len() as u64;
    info!(file = %filename, size = file_size, "Upload request received");

    if file_size > state.config.max_file_size {
        return respond(request, too_large(state.config.max_file_size));
    }

    let upload = match TempUpload::write(&state.config.upload_dir, &filename, &file_data) {
        Ok(upload) => upload,
        Err(e) => {
            error!(error = %e, "Failed to save upload");
            return respond(
                request,
                error_response(500, "INTERNAL_ERROR", "Failed to save file"),
            );
        }
    };
    drop(file_data);

    let (descriptor, verdict) = match state.engine.analyze_file(&upload.path, &filename) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to analyze upload");
            return respond(
                request,
                error_response(500, "INTERNAL_ERROR", "Failed to analyze file"),
            );
        }
    };
    drop(upload);

    let file_type = file_type::classify(&descriptor.extension);
    let known_malicious = verdict.known_malicious;
    let ticket = state.lifecycle.create(descriptor.clone(), verdict);

    let response = UploadResponse {
        success: true,
        scan_id: ticket.scan_id,
        file_name: descriptor.name,
        file_size: descriptor.size_bytes,
        file_hash: descriptor.content_hash,
        is_potentially_dangerous: file_type.tier == RiskTier::High,
        file_type,
        is_known_malicious: known_malicious,
        requires_payment: ticket.requires_payment,
        payment_reason: ticket.payment_reason,
        scan_type: (if ticket.requires_payment { "premium" } else { "basic" }).to_string(),
        report_id: ticket.report_id,
    };
    respond(request, json_response(200, &response));
}

fn too_large(max: u64) -> JsonResponse {
    error_response(
        413,
        "FILE_TOO_LARGE",
        &format!("File size exceeds maximum limit of {}MB", max / MIB),
    )
}

fn handle_scan(mut request: Request, state: &AppState) {
    let body: ScanRequest = match read_json(&mut request) {
        Ok(body) => body,
        Err(response) => return respond(request, response),
    };

    let descriptor = match FileDescriptor::new(&body.file_name, body.file_size, &body.file_hash) {
        Ok(d) => d,
        Err(e) => return respond(request, error_response(400, "BAD_REQUEST", &e.to_string())),
    };

    // The digest was computed by the client; /upload recomputes it server-side.
    warn!(hash = %descriptor.content_hash, "Scanning with client-supplied hash");
    let verdict = state.engine.evaluate(&descriptor, None);
    let ticket = state.lifecycle.create(descriptor, verdict);
    respond(request, json_response(200, &ticket));
}

fn handle_create_payment_intent(mut request: Request, state: &AppState) {
    let body: PaymentIntentRequest = match read_json(&mut request) {
        Ok(body) => body,
        Err(response) => return respond(request, response),
    };

    let scan_id = ScanId::from(body.scan_id.as_str());
    let response = match state.lifecycle.request_payment(&scan_id) {
        Ok(intent) => json_response(
            200,
            &PaymentIntentResponse {
                success: true,
                scan_id,
                payment_intent_id: intent.intent_id,
                client_secret: intent.client_secret,
                amount: intent.amount,
                currency: intent.currency,
            },
        ),
        Err(e) => scan_error_response(&e),
    };
    respond(request, response);
}

fn handle_verify_payment(mut request: Request, state: &AppState) {
    let body: VerifyPaymentRequest = match read_json(&mut request) {
        Ok(body) => body,
        Err(response) => return respond(request, response),
    };

    let scan_id = ScanId::from(body.scan_id.as_str());
    let response = match state
        .lifecycle
        .confirm_payment(&scan_id, &body.payment_intent_id)
    {
        Ok(record) => report_response(&record),
        Err(e) => scan_error_response(&e),
    };
    respond(request, response);
}

fn handle_report(request: Request, state: &AppState, report_id: &str) {
    let response = match state.lifecycle.get_report(&ReportId::from(report_id)) {
        Ok(record) => report_response(&record),
        Err(e) => scan_error_response(&e),
    };
    respond(request, response);
}

fn report_response(record: &ScanRecord) -> JsonResponse {
    json_response(
        200,
        &ReportResponse {
            record,
            description: record.verdict.description(),
            recommendation: record.verdict.recommendation(),
        },
    )
}

fn handle_health(request: Request, state: &AppState) {
    let response = HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
        malware_database_size: state.engine.hash_store().len(),
        pending_scans: state.lifecycle.pending_count(),
        completed_reports: state.lifecycle.completed_count(),
    };
    respond(request, json_response(200, &response));
}

fn route(request: Request, state: &AppState) {
    if request.method() == &Method::Options {
        return handle_options(request);
    }

    let method = request.method().clone();
    let url = request.url().split('?').next().unwrap_or("").to_string();
    let parts: Vec<&str> = url.trim_end_matches('/').split('/').collect();

    match (method, parts.as_slice()) {
        (Method::Post, ["", "upload"]) => handle_upload(request, state),
        (Method::Post, ["", "scan"]) => handle_scan(request, state),
        (Method::Post, ["", "create-payment-intent"]) => {
            handle_create_payment_intent(request, state)
        }
        (Method::Post, ["", "verify-payment"]) => handle_verify_payment(request, state),
        (Method::Get, ["", "report", report_id]) => handle_report(request, state, report_id),
        (Method::Get, ["", "health"]) => handle_health(request, state),
        _ => respond(request, error_response(404, "NOT_FOUND", "Not found")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "trojantrap=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TrojanTrap scan server");

    let config = AppConfig::from_env();
    fs::create_dir_all(&config.upload_dir)?;

    let hash_store = Arc::new(HashStore::load_or_fallback(&config.hash_feed_path));
    if hash_store.is_empty() {
        warn!("Malware database is empty, hash matching disabled");
    } else {
        info!(count = hash_store.len(), "Malware database ready");
    }

    let gate = payment::select_gate(&config);
    let state = Arc::new(AppState {
        engine: VerdictEngine::new(hash_store),
        lifecycle: ScanLifecycle::new(gate, LifecycleSettings::from(&config)),
        config,
    });

    if state.config.report_ttl.is_some() {
        let state = Arc::clone(&state);
        thread::spawn(move || loop {
            thread::sleep(PURGE_INTERVAL);
            state.lifecycle.purge_expired();
        });
    }

    let addr = format!("0.0.0.0:{}", state.config.port);
    let server = Server::http(&addr).map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

    info!(addr = %addr, upload_dir = %state.config.upload_dir.display(), "Server listening");

    for request in server.incoming_requests() {
        let state = Arc::clone(&state);
        thread::spawn(move || route(request, &state));
    }

    Ok(())
}
