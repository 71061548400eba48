//! Application Services
//!
//! - `CallbackDispatcher`: Routes decoded records to registered handlers

mod dispatcher;

pub use dispatcher::{CallbackDispatcher, DispatchReport};
