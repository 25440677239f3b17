//! Producing events: the Inbox writer and the logger facade on top of it

pub mod logger;
pub mod writer;

pub use logger::EventLogger;
pub use writer::EventWriter;
pub use crate::types::LogLevel;
