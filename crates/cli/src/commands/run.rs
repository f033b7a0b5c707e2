//! `crewforge run` — run one agent against one task.

use crewforge_agent::{AgentExecutor, CancellationToken, RunOutcome, StepOutcome};
use crewforge_config::CrewConfig;
use crewforge_core::event::{DomainEvent, EventBus};
use crewforge_core::memory::InMemoryMemory;
use crewforge_mcp::{ToolServerAdapter, with_adapters};
use crewforge_providers::OpenAiCompatProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crew;

pub async fn run(
    config: &CrewConfig,
    role: &str,
    task: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let agents = crew::participants(config, role)
        .ok_or_else(|| format!("No agent with role '{role}' in the configuration"))?;

    if !config.has_api_key() {
        warn!("No API key configured; set CREWFORGE_API_KEY or OPENAI_API_KEY for hosted models");
    }
    let provider = Arc::new(OpenAiCompatProvider::with_timeout(
        "openai-compat",
        &config.model.api_url,
        config.model.api_key.clone().unwrap_or_default(),
        Duration::from_secs(config.model.request_timeout_secs),
    ));

    let servers = crew::servers_for(config, &agents);
    info!(agent = %role, servers = servers.len(), "Starting run");

    let outcome = with_adapters(servers, |adapters: Vec<ToolServerAdapter>| async move {
        let mut built = Vec::with_capacity(agents.len());
        for agent in &agents {
            let tools = crew::bind_tools(agent, &adapters)?;
            let built_agent = crew::agent_builder(agent, &config.model, provider.clone())
                .tools(tools)
                .build()?;
            built.push(Arc::new(built_agent));
        }
        let lead = built.remove(0);

        let bus = Arc::new(EventBus::default());
        let events = tokio::spawn(log_events(bus.subscribe()));
        let executor = AgentExecutor::new()
            .with_event_bus(bus)
            .with_memory(Arc::new(InMemoryMemory::new()))
            .with_coworkers(built);

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                on_interrupt.cancel();
            }
        });

        let outcome = executor.run_with_cancellation(&lead, task, cancel).await;
        interrupt.abort();
        events.abort();
        Ok::<_, Box<dyn std::error::Error>>(outcome?)
    })
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return match outcome {
            RunOutcome::Success { .. } => Ok(()),
            RunOutcome::Failure { kind, .. } => Err(format!("run failed: {kind}").into()),
        };
    }

    for step in outcome.steps() {
        let detail = match &step.outcome {
            StepOutcome::Observation { text } | StepOutcome::Answer { text } => preview(text),
            StepOutcome::Error { message, .. } => format!("error: {}", preview(message)),
        };
        eprintln!("  [{}] {:<12} {detail}", step.index, step.action.label());
    }

    match outcome {
        RunOutcome::Success { answer, termination, .. } => {
            debug!(?termination, "Run finished");
            println!("{answer}");
            Ok(())
        }
        RunOutcome::Failure {
            kind,
            partial_answer,
            message,
            ..
        } => {
            if let Some(partial) = partial_answer {
                println!("{partial}");
            }
            Err(format!("run failed ({kind}): {message}").into())
        }
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 100;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX || text.lines().nth(1).is_some() {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

async fn log_events(mut rx: tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => match event.as_ref() {
                DomainEvent::RunStarted { run_id, agent_role, .. } => {
                    info!(%run_id, agent = %agent_role, "Run started");
                }
                DomainEvent::StepRecorded {
                    run_id,
                    index,
                    action,
                    is_error,
                    ..
                } => {
                    debug!(%run_id, index, %action, is_error, "Step recorded");
                }
                DomainEvent::ToolExecuted {
                    tool_name,
                    success,
                    duration_ms,
                    cached,
                    ..
                } => {
                    debug!(tool = %tool_name, success, duration_ms, cached, "Tool executed");
                }
                DomainEvent::ContextCompacted {
                    run_id,
                    steps_summarized,
                    ..
                } => {
                    info!(%run_id, steps_summarized, "Context compacted");
                }
                DomainEvent::RunFinished {
                    run_id,
                    outcome,
                    steps,
                    ..
                } => {
                    info!(%run_id, %outcome, steps, "Run finished");
                }
            },
            Err(RecvError::Lagged(missed)) => debug!(missed, "Event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
