//! # gridiron-telemetry
//!
//! Logging setup for the gridiron draft assistant.
//!
//! All crates in the workspace log through `tracing`. This crate installs the
//! global subscriber once per process, filtered by `RUST_LOG`, and provides
//! an [`InMemoryEventLayer`] that records events for assertions in tests.
//!
//! ```rust,no_run
//! gridiron_telemetry::init_telemetry("draft-plan").unwrap();
//! tracing::info!("ready");
//! ```

pub mod memory;

use std::sync::{Arc, OnceLock};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

pub use memory::{EventData, InMemoryEventLayer, SharedEventStorage};

/// Outcome of the first install in this process: the stack that was
/// installed, or why installing it failed.
static INSTALLED: OnceLock<Result<&'static str, String>> = OnceLock::new();

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Errors from installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// This call tried to install the subscriber and failed.
    #[error("failed to install subscriber: {0}")]
    Init(#[from] TryInitError),

    /// An earlier call in this process failed to install the subscriber.
    #[error("telemetry initialisation failed earlier: {0}")]
    PreviouslyFailed(String),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable subscriber.
///
/// Only the first install call in a process does anything. Later calls
/// return `Ok(())` if that first call succeeded, even when they ask for a
/// different stack, and [`TelemetryError::PreviouslyFailed`] if it did not.
pub fn init_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    install("fmt", service_name, || {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(true))
            .try_init()
    })
}

/// Install a subscriber that writes one JSON object per event.
///
/// Same first-call-wins rule as [`init_telemetry`].
pub fn init_json_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    install("json", service_name, || {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    })
}

/// Install a human-readable subscriber that also captures events into `storage`.
///
/// Same first-call-wins rule as [`init_telemetry`]; a later call does not
/// attach `storage`.
pub fn init_with_storage(
    service_name: &str,
    storage: Arc<SharedEventStorage>,
) -> Result<(), TelemetryError> {
    install("fmt+memory", service_name, || {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_target(true))
            .with(InMemoryEventLayer::new(storage))
            .try_init()
    })
}

/// The stack installed by the first successful init call, if any.
pub fn installed_stack() -> Option<&'static str> {
    INSTALLED.get().and_then(|outcome| outcome.as_ref().ok().copied())
}

fn install<F>(stack: &'static str, service_name: &str, init: F) -> Result<(), TelemetryError>
where
    F: FnOnce() -> Result<(), TryInitError>,
{
    let mut failure = None;
    let outcome = INSTALLED.get_or_init(|| match init() {
        Ok(()) => {
            tracing::debug!(service.name = service_name, stack, "telemetry initialised");
            Ok(stack)
        }
        Err(e) => {
            let message = e.to_string();
            failure = Some(e);
            Err(message)
        }
    });
    if let Some(e) = failure {
        return Err(TelemetryError::Init(e));
    }
    match outcome {
        Ok(active) => {
            if *active != stack {
                tracing::debug!(
                    requested = stack,
                    active = *active,
                    "telemetry already initialised"
                );
            }
            Ok(())
        }
        Err(message) => Err(TelemetryError::PreviouslyFailed(message.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_is_idempotent_and_captures() {
        let storage = Arc::new(SharedEventStorage::new());
        init_with_storage("telemetry-test", storage.clone()).unwrap();
        init_telemetry("telemetry-test").unwrap();

        assert_eq!(installed_stack(), Some("fmt+memory"));

        tracing::info!(pick = 7u64, "captured after init");
        let events = storage.with_message("captured after init");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fields["pick"], serde_json::json!(7));
    }

    #[test]
    fn previous_failure_is_reported() {
        let err = TelemetryError::PreviouslyFailed("a global default was already set".into());
        assert!(err.to_string().contains("failed earlier"));
    }
}
