//! Application State
//!
//! Services shared by every HTTP handler, built once from `AppConfig`.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use autoprovider_core::ToolRegistry;
use autoprovider_llm::{LlmProvider, OpenAIProvider};

use crate::models::config::AppConfig;
use crate::services::agent::prompts::with_marker;
use crate::services::agent::AgentRuntime;
use crate::services::context::ContextAssembler;
use crate::services::core::{HistoryCompressor, LlmSummarizer, Summarizer, UnavailableSummarizer};
use crate::services::fallback::ModelFallbackChain;
use crate::services::session::{PushRegistry, SessionController, WorkRegistry};
use crate::services::store::DialogueStore;
use crate::utils::error::AppResult;

/// Application state shared with the router
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub controller: Arc<SessionController>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services with OpenAI-compatible providers for every usable model.
    pub fn from_config(config: AppConfig, store: Arc<dyn DialogueStore>, tools: ToolRegistry) -> AppResult<Self> {
        config.validate()?;

        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        for model in config.agent.usable_models() {
            providers.push(Arc::new(OpenAIProvider::new(model)?));
        }
        if providers.is_empty() {
            tracing::warn!("[AppState] no usable model configured, chats will fail");
        }

        let summarizer: Arc<dyn Summarizer> = match config.agent.summarizer_model() {
            Some(model) => Arc::new(LlmSummarizer::new(Arc::new(OpenAIProvider::new(model)?))),
            None => Arc::new(UnavailableSummarizer),
        };

        Ok(Self::with_parts(config, store, tools, providers, summarizer))
    }

    /// Wire the services around explicit providers and summarizer.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn DialogueStore>,
        tools: ToolRegistry,
        providers: Vec<Arc<dyn LlmProvider>>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        let compressor = HistoryCompressor::new(summarizer, store.clone(), config.context.clone());
        let system_prompt = with_marker(&config.system_prompt, &config.agent.marker_tag);
        let assembler = ContextAssembler::new(
            store.clone(),
            Arc::new(compressor),
            config.context.clone(),
            system_prompt,
        );
        let chain = ModelFallbackChain::new(providers, config.agent.call_timeout());

        let runtime = AgentRuntime::new(
            store,
            Arc::new(assembler),
            Arc::new(chain),
            Arc::new(tools),
            Arc::new(PushRegistry::new(config.push.clone())),
            Arc::new(WorkRegistry::new()),
            config.agent.clone(),
        );

        Self {
            config: Arc::new(config),
            controller: Arc::new(SessionController::new(Arc::new(runtime))),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start heartbeats and the stale-client sweep.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        self.controller
            .runtime()
            .push()
            .spawn_maintenance(self.shutdown.clone())
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
