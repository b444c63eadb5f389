//! Receipt Detector - bank and variant classification server for payment-receipt PDFs.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use receipt_detector::config::{BankProfile, DetectionConfig, ServerConfig};
use receipt_detector::detector::{BankDetector, DetectionResult, DetectionTrace};
use receipt_detector::fingerprint::{self, Fingerprint};
use receipt_detector::pdf::{self, ReceiptDocument};
use receipt_detector::registry::{self, ParserRegistry};
use receipt_detector::ocr;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    detector: Arc<BankDetector>,
    registry: Arc<dyn ParserRegistry>,
    text_pages: usize,
    request_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "receipt_detector=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = ServerConfig::from_env();

    // Static detection tables
    let detection = DetectionConfig::load(settings.detection_config.as_deref())?;
    info!(
        "Loaded {} bank profiles ({} OCR-allowlisted, {} variant rules)",
        detection.banks.len(),
        detection.ocr_allowlist.len(),
        detection.variant_rules.len()
    );

    let registry: Arc<dyn ParserRegistry> = Arc::from(registry::open(settings.parser_registry.as_deref()));

    let ocr = ocr::from_settings(&settings.ocr);
    match &ocr {
        Some(provider) => info!("OCR fallback enabled via {}", provider.name()),
        None => info!("OCR fallback disabled"),
    }

    let state = AppState {
        detector: Arc::new(BankDetector::new(Arc::new(detection), registry.clone(), ocr)),
        registry,
        text_pages: settings.text_pages,
        request_timeout: settings.request_timeout,
    };

    // Build router
    let app = Router::new()
        .route("/healthz", get(health))
        .route("/banks", get(list_banks))
        .route("/check", post(check_pdf))
        .route("/check/trace", post(trace_pdf))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

/// Health check endpoint.
async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

#[derive(Serialize)]
struct BankTable {
    banks: Vec<BankProfile>,
    ocr_allowlist: Vec<String>,
    ocr_enabled: bool,
}

/// List supported banks and the OCR allowlist.
async fn list_banks(State(state): State<AppState>) -> Json<BankTable> {
    let config = state.detector.config();
    Json(BankTable {
        banks: config.banks.clone(),
        ocr_allowlist: config.ocr_allowlist.clone(),
        ocr_enabled: state.detector.ocr_enabled(),
    })
}

/// Detection as reported to clients; unknown banks get a placeholder.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
enum Detected {
    Known(DetectionResult),
    Unknown {
        key: &'static str,
        bank: &'static str,
        variant: Option<String>,
        method: &'static str,
    },
}

impl From<Option<DetectionResult>> for Detected {
    fn from(result: Option<DetectionResult>) -> Self {
        match result {
            Some(r) => Detected::Known(r),
            None => Detected::Unknown {
                key: "UNKNOWN",
                bank: "Unknown",
                variant: None,
                method: "none",
            },
        }
    }
}

#[derive(Serialize)]
struct CheckResponse {
    id: Uuid,
    message: String,
    detected: Detected,
    /// Whether a downstream field parser exists for `detected.key`.
    parser_registered: bool,
    fingerprint: Fingerprint,
}

/// Upload a receipt PDF and detect its bank and variant.
async fn check_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<CheckResponse>, (StatusCode, String)> {
    let doc = read_upload(multipart, state.text_pages).await?;
    let id = Uuid::new_v4();
    let name = doc.name().to_string();
    info!("[{}] Received file: {} ({} bytes)", id, name, doc.bytes().len());

    let work = async {
        let doc = doc.extract_text_layer().await.map_err(internal_error)?;
        let detected = state.detector.detect(&doc).await;
        Ok::<_, (StatusCode, String)>((doc, detected))
    };
    let (doc, detected) = tokio::time::timeout(state.request_timeout, work)
        .await
        .map_err(|_| {
            error!("[{}] Detection timed out for {}", id, name);
            timed_out()
        })??;

    if detected.is_none() {
        info!("[{}] No bank detected for {}", id, doc.name());
    }
    let parser_registered = detected
        .as_ref()
        .map(|d| state.registry.contains(&d.key))
        .unwrap_or(false);

    Ok(Json(CheckResponse {
        id,
        message: format!("Uploaded: {}", doc.name()),
        fingerprint: fingerprint::fingerprint(doc.text_raw()),
        detected: detected.into(),
        parser_registered,
    }))
}

/// Upload a receipt PDF and report every detection stage.
async fn trace_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectionTrace>, (StatusCode, String)> {
    let doc = read_upload(multipart, state.text_pages).await?;

    let work = async {
        let doc = doc.extract_text_layer().await.map_err(internal_error)?;
        Ok::<_, (StatusCode, String)>(state.detector.trace(&doc).await)
    };
    let trace = tokio::time::timeout(state.request_timeout, work)
        .await
        .map_err(|_| timed_out())??;
    Ok(Json(trace))
}

// ============================================================================
// Helper functions
// ============================================================================

fn timed_out() -> (StatusCode, String) {
    (StatusCode::GATEWAY_TIMEOUT, "Detection timed out".to_string())
}

fn internal_error(e: pdf::PdfError) -> (StatusCode, String) {
    error!("PDF worker failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Read the `file` field of a multipart upload into a document.
async fn read_upload(
    mut multipart: Multipart,
    text_pages: usize,
) -> Result<ReceiptDocument, (StatusCode, String)> {
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("file.pdf").to_string();
            file_data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?.to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }
    if !pdf::looks_like_pdf(&file_data) {
        warn!("Rejected non-PDF upload: {}", filename);
        return Err((StatusCode::BAD_REQUEST, format!("Not a PDF: {}", filename)));
    }

    Ok(ReceiptDocument::from_bytes(filename, file_data).with_text_pages(text_pages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use receipt_detector::detector::DetectionMethod;

    #[test]
    fn test_unknown_detection_shape() {
        let json = serde_json::to_value(Detected::from(None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"key": "UNKNOWN", "bank": "Unknown", "variant": null, "method": "none"})
        );
    }

    #[test]
    fn test_known_detection_shape() {
        let detected = Detected::from(Some(DetectionResult {
            key: "DENIZBANK".to_string(),
            bank: "DenizBank".to_string(),
            variant: Some("FAST".to_string()),
            method: DetectionMethod::OcrName,
        }));
        let json = serde_json::to_value(detected).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"key": "DENIZBANK", "bank": "DenizBank", "variant": "FAST", "method": "ocr-name"})
        );
    }
}
