//! Event types and utilities
//!
//! An [`Event`] is the unit the queue ships: one JSON document per file in the
//! Inbox. Field names are camelCase on the wire because the collector reads
//! `incident`, `logDetails.fileName` and `logDetails.functionName` to build
//! its notification subject.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Type alias for free-form event fields
pub type EventFields = HashMap<String, String>;

/// Log severity levels compatible with syslog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    /// Emergency: system is unusable
    Emergency = 0,
    /// Alert: action must be taken immediately
    Alert = 1,
    /// Critical: critical conditions
    Critical = 2,
    /// Error: error conditions
    Error = 3,
    /// Warning: warning conditions
    Warning = 4,
    /// Notice: normal but significant condition
    Notice = 5,
    /// Info: informational messages
    Info = 6,
    /// Debug: debug-level messages
    Debug = 7,
}

impl LogLevel {
    /// True when an event at this level passes a `min_level` filter.
    ///
    /// Lower discriminants are more severe, so `Error` passes a `Warning`
    /// filter but `Info` does not.
    pub fn passes(self, min_level: LogLevel) -> bool {
        self <= min_level
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Emergency => write!(f, "EMERG"),
            LogLevel::Alert => write!(f, "ALERT"),
            LogLevel::Critical => write!(f, "CRIT"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

/// A structured event, serialized as one queued item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Random incident number, used by the collector to group notifications
    pub incident: String,
    /// What was logged and where
    pub log_details: LogDetails,
    /// Host the event was produced on
    pub device_details: DeviceDetails,
    /// Error captured alongside the message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    /// Application supplied details (user id and friends)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_details: Option<ExtraDetails>,
}

/// Details of the log call that produced an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDetails {
    /// Severity
    pub level: LogLevel,
    /// When the event was created
    pub date: DateTime<Utc>,
    /// Primary message
    pub message: String,
    /// Logging target (module or component name)
    pub function_name: String,
    /// Source file name of the call site, without directories
    pub file_name: String,
    /// Source line of the call site
    pub line_number: u32,
    /// Additional structured fields
    #[serde(default)]
    pub fields: EventFields,
}

/// Where an event was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    /// Host name
    pub hostname: String,
    /// Operating system family
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Process id
    pub pid: u32,
}

/// An error attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// Display form of the error
    pub description: String,
    /// Display form of each `source()` in the chain, outermost first
    #[serde(default)]
    pub causes: Vec<String>,
}

/// Extra details added to every event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraDetails {
    /// Application user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Free-form application information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<EventFields>,
}

impl Event {
    /// Create a new event for the given log details, stamped with this host
    pub fn new(log_details: LogDetails) -> Self {
        Self {
            incident: new_incident(),
            log_details,
            device_details: DeviceDetails::current(),
            error_details: None,
            extra_details: None,
        }
    }

    /// Attach an error and its source chain
    pub fn with_error(mut self, error: &(dyn std::error::Error + 'static)) -> Self {
        self.error_details = Some(ErrorDetails::from_error(error));
        self
    }

    /// Attach extra details
    pub fn with_extra_details(mut self, extra: Option<ExtraDetails>) -> Self {
        self.extra_details = extra;
        self
    }

    /// Serialize to JSON bytes, the on-disk and on-wire form
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Format as human-readable string
    pub fn to_human_readable(&self) -> String {
        let d = &self.log_details;
        let timestamp = d.date.format("%Y-%m-%d %H:%M:%S%.3f");
        format!(
            "[{}] {} {} {}:{} {}",
            self.incident, timestamp, d.level, d.file_name, d.line_number, d.message
        )
    }
}

impl LogDetails {
    /// Create log details for a message logged now
    pub fn new(level: LogLevel, function_name: &str, message: String) -> Self {
        Self {
            level,
            date: Utc::now(),
            message,
            function_name: function_name.to_string(),
            file_name: String::new(),
            line_number: 0,
            fields: HashMap::new(),
        }
    }

    /// Record the call site; only the final path component of `file` is kept
    pub fn at(mut self, file: &str, line: u32) -> Self {
        self.file_name = std::path::Path::new(file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        self.line_number = line;
        self
    }
}

impl DeviceDetails {
    /// Details of the current process and host
    pub fn current() -> Self {
        Self {
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pid: std::process::id(),
        }
    }
}

impl ErrorDetails {
    /// Capture an error's display form and its source chain
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut next = error.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        Self {
            description: error.to_string(),
            causes,
        }
    }
}

fn new_incident() -> String {
    rand::thread_rng()
        .gen_range(10_000_000_000_000_000_000u64..u64::MAX)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "checkout failed")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_level_filter() {
        assert!(LogLevel::Error.passes(LogLevel::Error));
        assert!(LogLevel::Critical.passes(LogLevel::Warning));
        assert!(!LogLevel::Info.passes(LogLevel::Error));
        assert_eq!(LogLevel::Warning.to_string(), "WARN");
    }

    #[test]
    fn test_incident_is_twenty_digits() {
        let event = Event::new(LogDetails::new(LogLevel::Error, "checkout", "boom".into()));
        assert_eq!(event.incident.len(), 20);
        assert!(event.incident.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_wire_field_names() {
        let details = LogDetails::new(LogLevel::Error, "checkout", "boom".into())
            .at("/src/app/checkout.rs", 42);
        let event = Event::new(details);

        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["logDetails"]["fileName"], "checkout.rs");
        assert_eq!(value["logDetails"]["functionName"], "checkout");
        assert_eq!(value["logDetails"]["lineNumber"], 42);
        assert_eq!(value["logDetails"]["level"], "Error");
        assert!(value["deviceDetails"]["hostname"].is_string());
        assert!(value.get("errorDetails").is_none());
    }

    #[test]
    fn test_error_chain_captured() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        let event = Event::new(LogDetails::new(LogLevel::Critical, "orders", "x".into()))
            .with_error(&err);

        let details = event.error_details.unwrap();
        assert_eq!(details.description, "checkout failed");
        assert_eq!(details.causes, vec!["disk full".to_string()]);
    }

    #[test]
    fn test_human_readable_contains_location() {
        let details = LogDetails::new(LogLevel::Error, "orders", "boom".into()).at("lib.rs", 7);
        let line = Event::new(details).to_human_readable();
        assert!(line.contains("ERROR"));
        assert!(line.contains("lib.rs:7"));
        assert!(line.ends_with("boom"));
    }
}
