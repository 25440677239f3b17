//! Configuration management for logship

pub mod settings;

pub use settings::{
    EndpointSettings, ItemSettings, LoggingSettings, RetrySettings, ShipperConfig,
    StorageLocation, ENV_PREFIX,
};
