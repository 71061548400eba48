//! Application Layer - Ports and record dispatch.
//!
//! This layer defines the seams the infrastructure adapters plug into
//! (time source, consumer handlers) and the dispatcher that fans decoded
//! records out to registered consumers.

/// Port interfaces (clock, consumer handlers).
pub mod ports;

/// Application services (callback dispatch).
pub mod services;
