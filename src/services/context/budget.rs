//! Token Budget
//!
//! Splits a model's context window between the fixed preamble, a small
//! reserve, the new user message and the dialogue history.

use serde::Serialize;

use autoprovider_llm::{estimate_message_tokens, ChatMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenBudget {
    /// Model context window
    pub limit: u32,
    pub preamble_tokens: u32,
    /// Preamble plus the configured reserve
    pub reserved: u32,
    pub new_prompt_tokens: u32,
    /// What is left for history; never negative
    pub history_budget: u32,
}

impl TokenBudget {
    pub fn compute(limit: u32, preamble: &[ChatMessage], reserve_tokens: u32, new_prompt: &ChatMessage) -> Self {
        let preamble_tokens = saturate(estimate_message_tokens(preamble));
        let new_prompt_tokens = saturate(estimate_message_tokens(std::slice::from_ref(new_prompt)));
        let reserved = preamble_tokens.saturating_add(reserve_tokens);
        let history_budget = limit
            .saturating_sub(reserved)
            .saturating_sub(new_prompt_tokens);
        Self {
            limit,
            preamble_tokens,
            reserved,
            new_prompt_tokens,
            history_budget,
        }
    }
}

fn saturate(tokens: usize) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_arithmetic() {
        let preamble = vec![ChatMessage::system("you are an agent")];
        let prompt = ChatMessage::user("build a page");
        let budget = TokenBudget::compute(10_000, &preamble, 20, &prompt);

        assert_eq!(budget.reserved, budget.preamble_tokens + 20);
        assert_eq!(
            budget.history_budget,
            10_000 - budget.reserved - budget.new_prompt_tokens
        );
        assert!(budget.preamble_tokens > 0);
        assert!(budget.new_prompt_tokens > 0);
    }

    #[test]
    fn test_budget_never_negative() {
        let preamble = vec![ChatMessage::system("x".repeat(4_000))];
        let budget = TokenBudget::compute(100, &preamble, 20, &ChatMessage::user("hi"));
        assert_eq!(budget.history_budget, 0);
    }
}
