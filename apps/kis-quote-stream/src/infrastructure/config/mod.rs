//! Configuration Module
//!
//! Configuration loading for the quote client and binary.

mod settings;

pub use settings::{
    AccountNumber, ConfigError, Credentials, Environment, HttpSettings, KisConfig,
    ServerSettings, StreamSettings,
};
