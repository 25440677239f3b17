//! Error and success delegates
//!
//! The queue runs without user interaction, so every non-fatal error it
//! produces is handed to an [`ErrorDelegate`]. Expected races (an item that
//! another actor already moved) are filtered out before reaching it.

use crate::config::ShipperConfig;
use crate::ShipError;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Receives every non-fatal error the queue produces.
///
/// Called from worker tasks, never from the caller's thread.
pub trait ErrorDelegate: Send + Sync {
    /// Handle one error
    fn on_error(&self, config: &ShipperConfig, error: &ShipError);
}

/// Notified after an item was delivered and moved to Sent
pub trait SuccessDelegate: Send + Sync {
    /// Handle one delivered item, `path` being its location in Sent
    fn on_sent(&self, config: &ShipperConfig, path: &Path);
}

/// Default error delegate: logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorDelegate;

impl ErrorDelegate for TracingErrorDelegate {
    fn on_error(&self, config: &ShipperConfig, error: &ShipError) {
        error!(shipper = %config.identifier, "{}", error);
    }
}

/// Routes errors and successes to the configured delegates
#[derive(Clone)]
pub struct Reporter {
    config: Arc<ShipperConfig>,
    errors: Arc<dyn ErrorDelegate>,
    successes: Option<Arc<dyn SuccessDelegate>>,
}

impl Reporter {
    /// Create a reporter
    pub fn new(
        config: Arc<ShipperConfig>,
        errors: Arc<dyn ErrorDelegate>,
        successes: Option<Arc<dyn SuccessDelegate>>,
    ) -> Self {
        Self {
            config,
            errors,
            successes,
        }
    }

    /// Configuration the delegates are called with
    pub fn config(&self) -> &Arc<ShipperConfig> {
        &self.config
    }

    /// Surface an error unless it is an expected race
    pub fn report(&self, err: &ShipError) {
        if err.is_expected() {
            debug!("Ignoring expected race: {}", err);
            return;
        }
        self.errors.on_error(&self.config, err);
    }

    /// Announce a delivered item
    pub fn sent(&self, path: &Path) {
        if let Some(successes) = &self.successes {
            successes.on_sent(&self.config, path);
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("identifier", &self.config.identifier)
            .field("has_success_delegate", &self.successes.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::preflight::PreflightError;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<String>>,
    }

    impl ErrorDelegate for Recorder {
        fn on_error(&self, _config: &ShipperConfig, error: &ShipError) {
            self.errors.lock().push(error.to_string());
        }
    }

    #[test]
    fn test_expected_errors_are_swallowed() {
        let recorder = Arc::new(Recorder::default());
        let reporter = Reporter::new(Arc::new(ShipperConfig::default()), recorder.clone(), None);

        reporter.report(&ShipError::Preflight(PreflightError::FileNotPresent(
            PathBuf::from("/q/Outbox/a.json"),
        )));
        assert!(recorder.errors.lock().is_empty());

        reporter.report(&ShipError::Preflight(PreflightError::Extension(PathBuf::from(
            "/q/Inbox/a.txt",
        ))));
        assert_eq!(recorder.errors.lock().len(), 1);
    }
}
