//! Event logger facade: turns log calls into queued events

use crate::client::writer::EventWriter;
use crate::config::ShipperConfig;
use crate::types::{Event, EventFields, LogDetails, LogLevel};
use crate::Result;
use std::collections::HashMap;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::Arc;

/// Severity-filtered logger that queues each accepted call as an [`Event`].
///
/// Every method returns the queued item's path, or `None` when the level is
/// filtered out. The caller's file and line are recorded.
#[derive(Debug, Clone)]
pub struct EventLogger {
    writer: EventWriter,
    config: Arc<ShipperConfig>,
    target: String,
}

impl EventLogger {
    /// Create a logger that names events after the shipper identifier
    pub fn new(writer: EventWriter, config: Arc<ShipperConfig>) -> Self {
        let target = config.identifier.clone();
        Self {
            writer,
            config,
            target,
        }
    }

    /// Same logger, recording `target` as the event's function name
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    /// Whether events at `level` are queued
    pub fn enabled(&self, level: LogLevel) -> bool {
        level.passes(self.config.logging.min_level)
    }

    /// Log a message with specified level
    #[track_caller]
    pub fn log<S: Into<String>>(&self, level: LogLevel, message: S) -> Result<Option<PathBuf>> {
        self.emit(level, message.into(), HashMap::new(), None)
    }

    /// Log a message with specified level and fields
    #[track_caller]
    pub fn log_with_fields<S: Into<String>>(
        &self,
        level: LogLevel,
        message: S,
        fields: EventFields,
    ) -> Result<Option<PathBuf>> {
        self.emit(level, message.into(), fields, None)
    }

    /// Log a message together with an error and its source chain
    #[track_caller]
    pub fn log_error<S: Into<String>>(
        &self,
        level: LogLevel,
        message: S,
        error: &(dyn std::error::Error + 'static),
    ) -> Result<Option<PathBuf>> {
        self.emit(level, message.into(), HashMap::new(), Some(error))
    }

    /// Log an emergency message
    #[track_caller]
    pub fn emergency<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Emergency, message)
    }

    /// Log an alert message
    #[track_caller]
    pub fn alert<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Alert, message)
    }

    /// Log a critical message
    #[track_caller]
    pub fn critical<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Critical, message)
    }

    /// Log an error message
    #[track_caller]
    pub fn error<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Error, message)
    }

    /// Log a warning message
    #[track_caller]
    pub fn warning<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Warning, message)
    }

    /// Log a notice message
    #[track_caller]
    pub fn notice<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Notice, message)
    }

    /// Log an info message
    #[track_caller]
    pub fn info<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Info, message)
    }

    /// Log a debug message
    #[track_caller]
    pub fn debug<S: Into<String>>(&self, message: S) -> Result<Option<PathBuf>> {
        self.log(LogLevel::Debug, message)
    }

    #[track_caller]
    fn emit(
        &self,
        level: LogLevel,
        message: String,
        fields: EventFields,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> Result<Option<PathBuf>> {
        if !self.enabled(level) {
            return Ok(None);
        }

        let caller = Location::caller();
        let mut details = LogDetails::new(level, &self.target, message).at(caller.file(), caller.line());
        details.fields = fields;

        let mut event = Event::new(details).with_extra_details(self.config.logging.extra_details.clone());
        if let Some(error) = error {
            event = event.with_error(error);
        }

        self.writer.append(&event).map(Some)
    }
}
