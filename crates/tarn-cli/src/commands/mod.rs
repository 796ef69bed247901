//! Command implementations for the tarn CLI.
//!
//! - [`serve`] - Serve a project folder through the worker

pub mod serve;

pub use serve::execute as serve_execute;
