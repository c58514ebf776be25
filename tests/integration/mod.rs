//! Integration Tests Module
//!
//! End-to-end tests of the agent runtime against scripted models and
//! recording tools. No network calls are made.

// Full Works driven through the session controller
mod agent_flow_test;

// Prompt assembly, history compression and pairing repair
mod context_test;
