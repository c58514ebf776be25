//! Agent Work
//!
//! The loop that drives one Work: prompt assembly, model streaming through
//! the fallback chain, action dispatch and persistence.
//!
//! - `prompts` - fixed prompt texts and system-prompt rendering
//! - `round` - consumption of one model stream
//! - `echo` - push sink bound to the Work's current client
//! - `work` - `AgentRuntime`, the Work loop itself

pub mod prompts;

mod echo;
mod round;
mod work;

pub use echo::WorkSink;
pub use round::{RoundStream, RoundTranscript};
pub use work::{AgentRuntime, WorkExit, SYSTEM_SENDER};
