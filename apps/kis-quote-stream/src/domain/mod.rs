//! Domain Layer - Core quote types and subscription state.
//!
//! This layer contains the market data records produced by the REST and
//! streaming clients, plus the symbol registry. Nothing here performs I/O.

/// Market data records (price ticks, snapshots, order books).
pub mod streaming;

/// Streamed symbol registry.
pub mod subscription;
