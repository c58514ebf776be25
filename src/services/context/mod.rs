//! Context Assembly
//!
//! Prompt construction for agent rounds: token budgeting and history loading.

mod assembler;
mod budget;

pub use assembler::{group_turns, merge_system_messages, AssembledPrompt, ContextAssembler};
pub use budget::TokenBudget;
