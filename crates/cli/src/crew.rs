//! Turns a loaded [`CrewConfig`] into runtime objects: MCP server configs,
//! agent builders, and the tool lists agents bind.

use crewforge_agent::AgentBuilder;
use crewforge_config::{AgentConfig, CodeExecutionMode, CrewConfig, McpServerConfig, ModelConfig, TransportKind};
use crewforge_core::provider::Provider;
use crewforge_core::tool::Tool;
use crewforge_mcp::{McpError, ServerConfig, ToolServerAdapter};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub fn server_config(server: &McpServerConfig) -> ServerConfig {
    let base = match server.transport {
        TransportKind::Stdio => {
            let mut config = ServerConfig::stdio(&server.name, server.command.clone().unwrap_or_default())
                .with_args(server.args.iter().cloned());
            for (key, value) in &server.env {
                config = config.with_env(key, value);
            }
            if let Some(cwd) = &server.cwd {
                config = config.with_cwd(cwd);
            }
            config
        }
        TransportKind::Sse => {
            let mut config = ServerConfig::sse(&server.name, server.url.clone().unwrap_or_default());
            for (key, value) in &server.headers {
                config = config.with_header(key, value);
            }
            config
        }
    };

    let mut config = base
        .with_connect_timeout(Duration::from_secs(server.connect_timeout_secs))
        .with_discovery_timeout(Duration::from_secs(server.discovery_timeout_secs))
        .with_call_timeout(Duration::from_secs(server.call_timeout_secs));
    if let Some(filter) = &server.tools {
        config = config.with_tool_filter(filter.iter().cloned());
    }
    if let Some(prefix) = &server.tool_prefix {
        config = config.with_tool_prefix(prefix);
    }
    config
}

/// The agents taking part in a run of `role`: the agent itself first, then
/// every other agent as a coworker when it may delegate.
pub fn participants<'a>(config: &'a CrewConfig, role: &str) -> Option<Vec<&'a AgentConfig>> {
    let lead = config.agent(role)?;
    let mut agents = vec![lead];
    if lead.allow_delegation {
        agents.extend(config.agents.iter().filter(|a| a.role != role));
    }
    Some(agents)
}

/// MCP servers bound by any of `agents`, each once, in config order.
pub fn servers_for(config: &CrewConfig, agents: &[&AgentConfig]) -> Vec<ServerConfig> {
    let wanted: BTreeSet<&str> = agents
        .iter()
        .flat_map(|a| a.tools.iter().map(String::as_str))
        .collect();
    config
        .mcp_servers
        .iter()
        .filter(|s| wanted.contains(s.name.as_str()))
        .map(server_config)
        .collect()
}

/// Tools of every running adapter the agent names in `tools`.
pub fn bind_tools(
    agent: &AgentConfig,
    adapters: &[ToolServerAdapter],
) -> Result<Vec<Arc<dyn Tool>>, McpError> {
    let mut tools = Vec::new();
    for adapter in adapters {
        if agent.tools.iter().any(|name| name == adapter.name()) {
            tools.extend(adapter.tools()?);
        }
    }
    Ok(tools)
}

pub fn agent_builder(
    agent: &AgentConfig,
    model: &ModelConfig,
    provider: Arc<dyn Provider>,
) -> AgentBuilder {
    let mut builder = AgentBuilder::new(&agent.role, &agent.goal, &agent.backstory)
        .provider(provider, agent.model.as_deref().unwrap_or(&model.model))
        .temperature(agent.temperature.unwrap_or(model.temperature))
        .max_iterations(agent.max_iterations)
        .max_retry_limit(agent.max_retry_limit)
        .memory_enabled(agent.memory)
        .allow_delegation(agent.allow_delegation)
        .allow_code_execution(agent.allow_code_execution)
        .code_execution_mode(match agent.code_execution_mode {
            CodeExecutionMode::Safe => crewforge_agent::CodeExecutionMode::Safe,
            CodeExecutionMode::Unsafe => crewforge_agent::CodeExecutionMode::Unsafe,
        })
        .respect_context_window(agent.respect_context_window)
        .cache_tool_results(agent.cache_tool_results)
        .context_window_tokens(agent.context_window_tokens);

    if let Some(max_tokens) = model.max_tokens {
        builder = builder.max_tokens(max_tokens);
    }
    if let Some(rpm) = agent.max_requests_per_minute {
        builder = builder.max_requests_per_minute(rpm);
    }
    if let Some(secs) = agent.max_execution_time_secs {
        builder = builder.max_execution_time(Duration::from_secs(secs));
    }
    builder
}
