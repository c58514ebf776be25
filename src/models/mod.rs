//! Data Models
//!
//! Configuration and response types used throughout the application.

pub mod config;
pub mod response;

pub use config::*;
pub use response::*;
