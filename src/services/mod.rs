//! Services
//!
//! Business logic of the agent runtime.

pub mod agent;
pub mod context;
pub mod core;
pub mod fallback;
pub mod session;
pub mod store;
