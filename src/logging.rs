//! # Logging Module
//!
//! Environment-aware console logging on the tracing ecosystem.
//!
//! - `JOBFLOW_LOG` overrides the filter directive (falls back to `RUST_LOG`)
//! - `JOBFLOW_ENV` selects environment defaults (`development`, `test`, `production`)
//! - `JOBFLOW_LOG_FORMAT=json` switches the console layer to JSON lines
//!
//! Domain macros (`log_command!`, `log_sla!`, `log_config!`) attach an `operation`
//! field and an RFC3339 timestamp so command and SLA activity can be filtered uniformly.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber once; later calls are no-ops
pub fn init_structured_logging() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json = std::env::var("JOBFLOW_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                json_format = json,
                ansi_colors = use_ansi,
                "Console logging initialized"
            );
        }
    });
}

fn get_environment() -> String {
    std::env::var("JOBFLOW_ENV").unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("JOBFLOW_LOG") {
        return level.to_lowercase();
    }
    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        "test" => "warn".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log command lifecycle operations
#[macro_export]
macro_rules! log_command {
    // Full form with command name and entity key
    ($level:ident, $operation:expr, command: $command:expr, entity: $entity:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            command = %$command,
            entity = %$entity,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
    // Simple form - just operation
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
    // Generic form with additional fields
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
}

/// Log SLA calculator operations
#[macro_export]
macro_rules! log_sla {
    // Full form with SLA id
    ($level:ident, $operation:expr, sla_id: $sla_id:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            sla_id = %$sla_id,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "SLA_{}", $operation
        );
    };
    // Simple form - just operation
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "SLA_{}", $operation
        );
    };
    // Generic form with additional fields
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "SLA_{}", $operation
        );
    };
}

/// Log configuration operations
#[macro_export]
macro_rules! log_config {
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "CONFIG: {}", $operation
        );
    };
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "CONFIG: {}", $operation
        );
    };
}
