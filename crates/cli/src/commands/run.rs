//! `huddle run`: the long-running agent.

use huddle_agent::{
    ActiveThreads, AgentLoop, ConnectionSupervisor, ContextBuilder, DecisionEngine, Responder, StreamPublisher,
    Sweeper,
};
use huddle_channels::{MattermostClient, MattermostEvents};
use huddle_config::AppConfig;
use huddle_core::channel::ChatPlatform;
use huddle_core::identity::BotIdentity;
use huddle_core::provider::{Provider, ServerTool};
use huddle_core::tool::ToolRegistry;
use huddle_providers::AnthropicProvider;
use huddle_tools::AsanaClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let token = config.mattermost.access_token.clone().unwrap_or_default();
    let client = MattermostClient::new(config.mattermost.server_url.clone(), token.clone());
    if config.mattermost.bot_user_id.is_empty() {
        let me = client
            .me()
            .await
            .map_err(|e| format!("Failed to resolve bot user id: {e}"))?;
        info!(user_id = %me.id, username = %me.username, "Resolved bot identity");
        config.mattermost.bot_user_id = me.id;
    }
    let identity = BotIdentity::new(
        &config.mattermost.bot_user_id,
        &config.bot.username,
        &config.bot.display_name,
    );
    let platform: Arc<dyn ChatPlatform> = Arc::new(client.with_bot_user_id(&config.mattermost.bot_user_id));
    let events = Arc::new(MattermostEvents::new(config.mattermost.server_url.clone(), token));

    // === LLM ===
    let mut anthropic = AnthropicProvider::new(config.llm.api_key.clone().unwrap_or_default());
    if let Some(url) = &config.llm.api_url {
        anthropic = anthropic.with_base_url(url.clone());
    }
    let provider: Arc<dyn Provider> = Arc::new(anthropic);

    let mut tools = ToolRegistry::new();
    if let Some(key) = config.asana.api_key.as_deref().filter(|k| !k.is_empty()) {
        huddle_tools::register_asana(&mut tools, AsanaClient::new(key).with_base_url(&config.asana.api_url));
    }
    info!(tools = ?tools.names(), "Tools registered");

    let mut agent = AgentLoop::new(provider.clone(), &config.llm.model, Arc::new(tools))
        .with_max_tokens(config.llm.max_tokens)
        .with_max_rounds(config.llm.max_tool_rounds);
    if config.llm.web_search_max_uses > 0 {
        agent = agent.with_server_tools(vec![ServerTool::WebSearch {
            max_uses: config.llm.web_search_max_uses,
        }]);
    }
    if let Some(prompt) = &config.bot.system_prompt {
        agent = agent.with_system_prompt(prompt.as_str());
    }

    // The judge gets neither client nor server tools.
    let judge = AgentLoop::new(provider, &config.decision.model, Arc::new(ToolRegistry::new()))
        .with_max_tokens(config.decision.max_tokens)
        .with_max_rounds(1);

    // === Engine ===
    let threads = Arc::new(ActiveThreads::new());
    let context = Arc::new(ContextBuilder::new(platform.clone(), identity.clone()));
    let decision = DecisionEngine::new(identity.clone(), threads.clone(), context.clone(), judge);
    let sweeper = Arc::new(Sweeper::new(
        platform.clone(),
        threads.clone(),
        Duration::from_secs(config.sweeper.interval_secs),
        config.sweeper.sample_size,
    ));

    let mut responder = Responder::new(platform.clone(), identity, threads, decision, context, Arc::new(agent), sweeper);
    if config.bot.streaming {
        responder = responder.with_streaming(StreamPublisher::new(
            platform,
            Duration::from_millis(config.bot.stream_tick_ms),
            Duration::from_secs(config.bot.stream_deadline_secs),
        ));
    }

    let supervisor = Arc::new(ConnectionSupervisor::new(
        events,
        Arc::new(responder),
        Duration::from_secs(config.supervisor.reconnect_interval_secs),
    ));
    supervisor
        .start()
        .await
        .map_err(|e| format!("Failed to connect to Mattermost event stream: {e}"))?;
    let supervision = supervisor.clone().spawn_supervision();

    info!(
        username = %config.bot.username,
        model = %config.llm.model,
        decision_model = %config.decision.model,
        streaming = config.bot.streaming,
        "huddle is running"
    );

    tokio::select! {
        result = huddle_gateway::start(&config.gateway, supervisor.connection_flag()) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    supervision.abort();
    supervisor.stop();
    Ok(())
}
