//! `crewforge tools` — start one MCP server and list what it exposes.

use crewforge_config::CrewConfig;
use crewforge_mcp::{McpError, with_adapter};

use crate::crew;

pub async fn run(config: &CrewConfig, server: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config
        .server(server)
        .map(crew::server_config)
        .ok_or_else(|| format!("No MCP server named '{server}' in the configuration"))?;
    let kind = server_config.transport.kind();

    let listing = with_adapter(server_config, |adapter| async move {
        let info = adapter.server_info();
        let tools = adapter.tools()?;
        let rows: Vec<(String, String)> = tools
            .iter()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect();
        Ok::<_, McpError>((info, rows))
    })
    .await?;

    let (info, rows) = listing;
    match info {
        Some((name, Some(version))) => println!("  {server} ({kind}): {name} {version}"),
        Some((name, None)) => println!("  {server} ({kind}): {name}"),
        None => println!("  {server} ({kind})"),
    }
    println!("  {} tool(s)", rows.len());
    for (name, description) in rows {
        let summary = description.lines().next().unwrap_or_default();
        println!("    {name:<24} {summary}");
    }
    Ok(())
}
