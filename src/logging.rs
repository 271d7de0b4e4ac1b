//! # Structured Logging Module
//!
//! Environment-aware structured logging for the delivery pipeline. Console
//! output by default, JSON lines when `OUTBOX_LOG_FORMAT=json`.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;
use crate::messaging::OperateResult;
use crate::models::Envelope;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber and
/// an already installed global subscriber is left untouched.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| get_log_level(&environment));
        let json = matches!(
            std::env::var("OUTBOX_LOG_FORMAT").as_deref(),
            Ok("json")
        );

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(&filter))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(&filter))
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            filter = %filter,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log the outcome of one delivery cycle for an envelope
pub fn log_delivery_outcome(envelope: &Envelope, result: &OperateResult) {
    match result {
        OperateResult::Success => tracing::info!(
            envelope_id = %envelope.id,
            routing_key = %envelope.key,
            status = %envelope.status,
            retries = envelope.retries,
            timestamp = %Utc::now().to_rfc3339(),
            "📬 DELIVERY_OPERATION"
        ),
        OperateResult::Failed(error) => tracing::warn!(
            envelope_id = %envelope.id,
            routing_key = %envelope.key,
            status = %envelope.status,
            retries = envelope.retries,
            error_code = %error.code,
            error = %error.description,
            disposition = ?error.disposition,
            timestamp = %Utc::now().to_rfc3339(),
            "📭 DELIVERY_OPERATION"
        ),
    }
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
