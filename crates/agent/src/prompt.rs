//! Prompt composition.
//!
//! The prompt is rebuilt from scratch on every iteration:
//! system framing, the task, the compacted-history summary, and the
//! steps recorded since the last compaction.

use crewforge_core::message::Message;
use std::fmt::Write;
use std::sync::Arc;

use crate::agent::Agent;
use crate::parser::DELEGATE_WORK;
use crate::step::{ExecutionStep, StepAction, StepOutcome};

/// Everything a prompt is made of.
pub struct PromptInput<'a> {
    pub agent: &'a Agent,
    pub task: &'a str,
    /// Agents this one may delegate to (already excludes itself).
    pub coworkers: &'a [Arc<Agent>],
    pub knowledge: &'a [String],
    pub memories: &'a [String],
    pub summary: Option<&'a str>,
    /// Steps not covered by `summary`.
    pub steps: &'a [ExecutionStep],
}

/// Build the message list sent to the model.
pub fn compose(input: &PromptInput<'_>) -> Vec<Message> {
    let mut messages = vec![
        Message::system(system_prompt(input)),
        Message::user(format!("Current Task: {}", input.task.trim())),
    ];

    if let Some(summary) = input.summary {
        messages.push(Message::user(format!(
            "Summary of your earlier work on this task:\n{summary}"
        )));
    }

    for step in input.steps {
        messages.push(Message::assistant(render_action(step)));
        messages.push(Message::user(render_outcome(step)));
    }

    messages
}

fn system_prompt(input: &PromptInput<'_>) -> String {
    let agent = input.agent;
    let mut prompt = format!(
        "You are {}. {}\nYour personal goal is: {}",
        agent.role(),
        agent.backstory().trim(),
        agent.goal().trim()
    );

    let tools = agent.tools();
    let delegating = !input.coworkers.is_empty();

    if !tools.is_empty() || delegating {
        prompt.push_str("\n\nYou ONLY have access to the following tools:\n");
        for tool in tools.iter() {
            let _ = write!(
                prompt,
                "- {}: {}\n  Arguments: {}\n",
                tool.name(),
                tool.description(),
                tool.parameters_schema()
            );
        }
        let mut names: Vec<&str> = tools.names();
        if delegating {
            let _ = writeln!(
                prompt,
                "- {DELEGATE_WORK}: Delegate a task to a coworker.\n  Arguments: \
                 {{\"coworker\": \"<role>\", \"task\": \"<task>\", \"context\": \"<everything they need>\"}}"
            );
            names.push(DELEGATE_WORK);
        }
        let _ = write!(
            prompt,
            "\nUse the following format:\n\n\
             Thought: you should always think about what to do\n\
             Action: the action to take, only one name of [{}]\n\
             Action Input: the input to the action, as a JSON object\n\
             Observation: the result of the action\n\n\
             Once all necessary information is gathered:\n\n\
             Thought: I now know the final answer\n\
             Final Answer: the final answer to the original task\n",
            names.join(", ")
        );
    } else {
        prompt.push_str(
            "\n\nReply with:\n\nThought: your reasoning\nFinal Answer: the final answer to the task\n",
        );
    }

    if delegating {
        prompt.push_str("\nYour coworkers:\n");
        for coworker in input.coworkers {
            let _ = writeln!(prompt, "- {}: {}", coworker.role(), coworker.goal().trim());
        }
    }

    if !input.knowledge.is_empty() {
        prompt.push_str("\nRelevant knowledge:\n");
        for fragment in input.knowledge {
            let _ = writeln!(prompt, "- {fragment}");
        }
    }

    if !input.memories.is_empty() {
        prompt.push_str("\nThings you remember from earlier work:\n");
        for memory in input.memories {
            let _ = writeln!(prompt, "- {memory}");
        }
    }

    prompt
}

fn render_action(step: &ExecutionStep) -> String {
    let mut text = String::new();
    if let Some(thought) = &step.thought {
        let _ = writeln!(text, "Thought: {thought}");
    }
    match &step.action {
        StepAction::ToolCall { tool, arguments } => {
            let _ = write!(text, "Action: {tool}\nAction Input: {arguments}");
        }
        StepAction::Delegation { coworker, task } => {
            let input = serde_json::json!({ "coworker": coworker, "task": task });
            let _ = write!(text, "Action: {DELEGATE_WORK}\nAction Input: {input}");
        }
        StepAction::FinalAnswer { answer } => {
            let _ = write!(text, "Final Answer: {answer}");
        }
        StepAction::Malformed { raw } => text.push_str(raw),
    }
    text
}

fn render_outcome(step: &ExecutionStep) -> String {
    match &step.outcome {
        StepOutcome::Observation { text } | StepOutcome::Answer { text } => {
            format!("Observation: {text}")
        }
        StepOutcome::Error { message, .. } => format!(
            "Observation: Error: {message}\nCorrect your next response and follow the format."
        ),
    }
}

/// One step as plain text, used when summarizing history.
pub fn render_step(step: &ExecutionStep) -> String {
    format!("{}\n{}", render_action(step), render_outcome(step))
}
