//! Event types shipped through the queue

pub mod event;

pub use event::{DeviceDetails, ErrorDetails, Event, EventFields, ExtraDetails, LogDetails, LogLevel};
