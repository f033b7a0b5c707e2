//! `crewforge check` — validate the configuration and summarize it.

use crewforge_config::{CrewConfig, TransportKind};
use std::fmt::Write;

pub fn run(config: &CrewConfig, print: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    print!("{}", summary(config));
    if print {
        println!();
        print!("{}", config.to_toml());
    }
    Ok(())
}

fn summary(config: &CrewConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  Model:    {} @ {}", config.model.model, config.model.api_url);
    let _ = writeln!(
        out,
        "  API key:  {}",
        if config.has_api_key() { "configured" } else { "missing" }
    );

    let _ = writeln!(out, "  Agents:   {}", config.agents.len());
    for agent in &config.agents {
        let mut flags = Vec::new();
        if agent.allow_delegation {
            flags.push("delegates".to_string());
        }
        if agent.allow_code_execution {
            flags.push(format!("code:{:?}", agent.code_execution_mode).to_lowercase());
        }
        if let Some(rpm) = agent.max_requests_per_minute {
            flags.push(format!("{rpm}/min"));
        }
        if let Some(secs) = agent.max_execution_time_secs {
            flags.push(format!("{secs}s"));
        }
        let tools = if agent.tools.is_empty() {
            "-".to_string()
        } else {
            agent.tools.join(", ")
        };
        let _ = writeln!(
            out,
            "    {:<16} max_iterations={} tools=[{tools}] {}",
            agent.role,
            agent.max_iterations,
            flags.join(" ")
        );
    }

    let _ = writeln!(out, "  Servers:  {}", config.mcp_servers.len());
    for server in &config.mcp_servers {
        let target = match server.transport {
            TransportKind::Stdio => format!(
                "stdio: {} {}",
                server.command.as_deref().unwrap_or_default(),
                server.args.join(" ")
            ),
            TransportKind::Sse => format!("sse: {}", server.url.as_deref().unwrap_or_default()),
        };
        let _ = writeln!(out, "    {:<16} {}", server.name, target.trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_agents_and_servers() {
        let config = CrewConfig::parse(
            r#"
            [[agents]]
            role = "analyst"
            goal = "Analyze"
            backstory = "Numbers person"
            allow_code_execution = true
            code_execution_mode = "unsafe"
            max_requests_per_minute = 10
            tools = ["calc"]

            [[mcp_servers]]
            name = "calc"
            transport = "stdio"
            command = "calc-server"
            "#,
        )
        .unwrap();
        let text = summary(&config);
        assert!(text.contains("API key:  missing"));
        assert!(text.contains("analyst"));
        assert!(text.contains("tools=[calc]"));
        assert!(text.contains("code:unsafe"));
        assert!(text.contains("10/min"));
        assert!(text.contains("stdio: calc-server"));
    }
}
