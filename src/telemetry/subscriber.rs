use super::config::TelemetryConfig;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Guard that keeps the telemetry subsystem alive for the duration of
/// the program. Hold it in `main`.
pub struct TelemetryGuard {
    _private: (),
}

static TELEMETRY_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber (singleton, called once).
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to
/// `config.log_filter`. Safe to call multiple times, subsequent calls
/// are no-ops.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    TELEMETRY_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

        let fmt_layer = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_ansi(config.enable_console_colors);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();

        tracing::debug!(service = %config.service_name, "Telemetry initialized");
    });

    TelemetryGuard { _private: () }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let _first = init_telemetry(TelemetryConfig::default());
        let _second = init_telemetry(TelemetryConfig {
            log_filter: "debug".into(),
            ..TelemetryConfig::default()
        });
    }
}
