//! Structured logging configuration.
//!
//! - `LOG_FORMAT=json` selects JSON output; anything else selects
//!   human-readable text.
//! - `RUST_LOG` selects the level filter (default: info).
//!
//! Every crate in this workspace logs its own structured fields rather than
//! a free-text message: `queue = %name`, `message_id = %id`, `topic = %topic`,
//! and so on. Open a span around a unit of work (one HTTP request, one
//! broker delivery) to carry those fields onto every event nested inside it:
//!
//! ```rust,ignore
//! use tracing::{info_span, Instrument};
//!
//! async fn handle_inbound(message: &Message) {
//!     let span = info_span!("inbound", message_id = %message.id);
//!     async {
//!         tracing::info!("routing message");
//!     }.instrument(span).await;
//! }
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initializes logging for `service_name`. The service name is not yet
/// attached to every event (no global span exists to carry it); hosts that
/// want it on every line should open a root span with it instead.
pub fn init_logging(_service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter);
    } else {
        init_text_logging(env_filter);
    }
}

fn init_json_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(false)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .init();
}

fn init_text_logging(env_filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true),
        )
        .init();
}

/// Initializes logging with the crate's own default service name.
pub fn init_default_logging() {
    init_logging("bus");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_falls_back_to_info() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        drop(filter);
    }
}
