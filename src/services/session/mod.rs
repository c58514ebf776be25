//! Session Concurrency
//!
//! Cross-session shared state and the controller that guards it:
//!
//! - `push` - client id to outbound push stream
//! - `work` - session id to running Work (stop flag, abort handle)
//! - `scope` - task-local request context
//! - `controller` - start, cancel and reconnect

mod controller;
mod push;
mod scope;
mod work;

pub use controller::{ChatRequest, ChatStream, SessionController, CANCELLED_REASON};
pub use push::{ConnectionId, PushRegistry, SendOutcome, REPLACED_REASON, TIMEOUT_REASON};
pub use scope::{current, scope, RequestContext};
pub use work::{WorkHandle, WorkRegistry};
